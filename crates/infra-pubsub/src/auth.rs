// Access tokens for the REST transport (RS256 service-account assertions)

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::constants::{
    ASSERTION_LIFETIME_SECS, DEFAULT_TOKEN_URI, JWT_GRANT_TYPE, PUBSUB_SCOPE,
    TOKEN_REFRESH_MARGIN_SECS,
};
use crate::wire::TokenResponse;
use topiq_core::error::QueueError;
use topiq_core::port::BrokerError;
use topiq_core::Credentials;

/// Supplies the bearer token for each request (None = unauthenticated)
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<Option<String>, BrokerError>;
}

/// No authentication (emulator)
pub struct NoAuth;

#[async_trait]
impl TokenSource for NoAuth {
    async fn token(&self) -> Result<Option<String>, BrokerError> {
        Ok(None)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Service-account token source
///
/// Signs an assertion with the account's private key, exchanges it at the
/// token endpoint and caches the access token until shortly before expiry.
pub struct ServiceAccountTokenSource {
    http: Client,
    client_email: String,
    token_uri: String,
    key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    /// # Errors
    /// - QueueError::Credentials if `client_email` or `private_key` is missing or unusable
    pub fn from_credentials(http: Client, credentials: &Credentials) -> Result<Self, QueueError> {
        let client_email = credentials.client_email().ok_or_else(|| {
            QueueError::Credentials("Credentials are missing client_email".to_string())
        })?;
        let private_key = credentials.private_key().ok_or_else(|| {
            QueueError::Credentials("Credentials are missing private_key".to_string())
        })?;
        let key = EncodingKey::from_rsa_pem(private_key.as_bytes()).map_err(|e| {
            debug!(error = %e, "Private key rejected");
            QueueError::Credentials("Credentials private_key is not a valid RSA key".to_string())
        })?;

        Ok(Self {
            http,
            client_email: client_email.to_string(),
            token_uri: credentials
                .token_uri()
                .unwrap_or(DEFAULT_TOKEN_URI)
                .to_string(),
            key,
            cached: Mutex::new(None),
        })
    }

    fn assertion(&self, now: DateTime<Utc>) -> Result<String, BrokerError> {
        let iat = now.timestamp();
        let claims = Claims {
            iss: &self.client_email,
            scope: PUBSUB_SCOPE,
            aud: &self.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| BrokerError::Auth(format!("Could not sign assertion: {}", e)))
    }

    async fn fetch(&self, now: DateTime<Utc>) -> Result<CachedToken, BrokerError> {
        let assertion = self.assertion(now)?;
        let response = self
            .http
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Token exchange rejected");
            return Err(BrokerError::Auth(format!(
                "Token endpoint returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::Decode(e.to_string()))?;
        let lifetime = token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);
        debug!(expires_in = lifetime, "Access token refreshed");
        Ok(CachedToken {
            value: token.access_token,
            expires_at: expiry(now, lifetime)?,
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn token(&self) -> Result<Option<String>, BrokerError> {
        // Held across the exchange so concurrent callers share one refresh
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(Some(token.value.clone()));
        }
        let token = self.fetch(now).await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(Some(value))
    }
}

/// Expiry instant for a token issued at `now` living `lifetime` seconds
fn expiry(now: DateTime<Utc>, lifetime: i64) -> Result<DateTime<Utc>, BrokerError> {
    Duration::try_seconds(lifetime)
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| BrokerError::Decode(format!("Token lifetime out of range: {}", lifetime)))
}
