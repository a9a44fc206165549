// Subscription Naming & Flow Control
//
// Pure string rules, kept apart from the broker calls that use them.

use crate::domain::config::MAX_LIMIT;

/// Prefix of fully-qualified resource paths
pub const PROJECTS_PREFIX: &str = "projects/";

/// Local flow-control setting applied to a resolved subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControl {
    /// Max unsettled messages across the handle's listeners
    pub max_messages: usize,
}

impl FlowControl {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages: max_messages.clamp(1, MAX_LIMIT),
        }
    }
}

/// Server-side subscription resource as reported by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    /// Full resource name (or bare name on brokers without projects)
    pub name: String,
    pub topic: Option<String>,
}

impl SubscriptionInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }
}

/// Project segment of a `projects/{project}/...` path
pub fn project_segment(resource: &str) -> Option<&str> {
    resource
        .strip_prefix(PROJECTS_PREFIX)?
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

pub fn is_qualified(name: &str) -> bool {
    name.starts_with(PROJECTS_PREFIX)
}

/// Qualify a subscription name against its topic
///
/// Only a qualified topic paired with a bare name is rewritten to
/// `projects/{project}/subscriptions/{name}`; anything else is returned as-is.
pub fn qualify_subscription_name(topic: &str, name: &str) -> String {
    if is_qualified(topic) && !is_qualified(name) {
        if let Some(project) = project_segment(topic) {
            return format!("{PROJECTS_PREFIX}{project}/subscriptions/{name}");
        }
    }
    name.to_string()
}

/// Last `/`-separated segment of a resource name
pub fn trailing_segment(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Tolerant match: full name equality, or trailing segment equal to the bare name
pub fn matches_subscription(existing: &str, qualified: &str, plain: &str) -> bool {
    existing == qualified || trailing_segment(existing) == plain
}

/// First subscription in `existing` matching the requested name
pub fn find_subscription<'a>(
    existing: &'a [SubscriptionInfo],
    qualified: &str,
    plain: &str,
) -> Option<&'a SubscriptionInfo> {
    existing
        .iter()
        .find(|info| matches_subscription(&info.name, qualified, plain))
}
