// Pub/Sub adapter constants (no magic values)
use std::time::Duration;

/// Public Pub/Sub endpoint
pub const DEFAULT_BASE_URL: &str = "https://pubsub.googleapis.com";

/// REST API version segment
pub const API_VERSION: &str = "v1";

/// Emulator address (`host:port`); when set, requests go there unauthenticated
pub const EMULATOR_HOST_ENV: &str = "PUBSUB_EMULATOR_HOST";

/// Token endpoint used when the credentials carry no `token_uri`
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// OAuth2 scope for Pub/Sub
pub const PUBSUB_SCOPE: &str = "https://www.googleapis.com/auth/pubsub";

/// OAuth2 grant type for signed service-account assertions
pub const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for a signed assertion (1 hour, the maximum)
pub const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Refresh access tokens this long before they expire
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Page size for listing topic subscriptions
pub const LIST_PAGE_SIZE: u32 = 100;

/// Publisher option carrying the message ordering key
pub const ORDERING_KEY_OPTION: &str = "orderingKey";

/// Sleep after a pull returned no messages
pub const PULL_IDLE_DELAY: Duration = Duration::from_millis(200);

/// Sleep after a failed pull before trying again
pub const PULL_ERROR_DELAY: Duration = Duration::from_secs(1);

/// Deadline that hands a message straight back for redelivery (nack)
pub const NACK_DEADLINE_SECS: i32 = 0;
