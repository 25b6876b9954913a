//! Attribute finder invocations.
//!
//! An invocation is the immutable identity of an attribute stream: two
//! subscribers whose invocations are equal share one upstream. Equality and
//! hashing cover every field, so differing arguments, timing options, or
//! subscription contexts produce distinct streams.

use std::fmt;
use std::time::Duration;

use arbiter_core::Value;
use arbiter_interchange::AuthorizationSubscription;

/// The evaluation context an invocation carries to its PIP: the
/// subscription (including its secrets) plus the PDP's own secrets.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct InvocationContext {
    pub subscription: AuthorizationSubscription,
    pub pdp_secrets: Value,
}

impl InvocationContext {
    pub fn new(subscription: AuthorizationSubscription, pdp_secrets: Value) -> Self {
        InvocationContext {
            subscription,
            pdp_secrets,
        }
    }

    /// The subscription's own secrets.
    pub fn subscription_secrets(&self) -> &Value {
        &self.subscription.secrets
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("subscription", &self.subscription)
            .field("pdp_secrets", &"<redacted>")
            .finish()
    }
}

/// Immutable key identifying one attribute stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeFinderInvocation {
    /// Identifies the PDP configuration the invocation was compiled under.
    pub configuration_id: String,
    /// Dot-separated attribute name, e.g. `time.now`.
    pub attribute_name: String,
    /// `None` for environment attributes.
    pub entity: Option<Value>,
    pub arguments: Vec<Value>,
    /// Maximum wait for the first emission before an error value is emitted.
    pub initial_timeout: Duration,
    /// Base delay between reconnection attempts.
    pub poll_interval: Duration,
    /// Upper bound on the exponential reconnect backoff.
    pub backoff: Duration,
    /// Maximum number of reconnection attempts after upstream termination.
    pub retries: u32,
    /// `true` forces a new stream instead of cache reuse.
    pub fresh: bool,
    pub ctx: InvocationContext,
}

impl AttributeFinderInvocation {
    /// Reconnect delay before attempt `attempt` (0-based): exponential from
    /// `poll_interval`, bounded by `backoff`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        if self.poll_interval.is_zero() {
            return self.backoff;
        }
        let factor = 2u32.saturating_pow(attempt);
        self.poll_interval
            .saturating_mul(factor)
            .min(self.backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn ctx() -> InvocationContext {
        InvocationContext::new(
            AuthorizationSubscription::new(
                Value::text("alice"),
                Value::text("read"),
                Value::text("doc"),
            ),
            Value::Undefined,
        )
    }

    fn invocation(fresh: bool) -> AttributeFinderInvocation {
        AttributeFinderInvocation {
            configuration_id: "cfg-1".to_string(),
            attribute_name: "time.now".to_string(),
            entity: None,
            arguments: vec![],
            initial_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
            backoff: Duration::from_secs(5),
            retries: 3,
            fresh,
            ctx: ctx(),
        }
    }

    #[test]
    fn equality_covers_all_fields() {
        assert_eq!(invocation(false), invocation(false));
        assert_ne!(invocation(false), invocation(true));

        let mut other = invocation(false);
        other.arguments.push(Value::number(1));
        assert_ne!(invocation(false), other);
    }

    #[test]
    fn hash_is_stable_for_equal_invocations() {
        let mut h1 = DefaultHasher::new();
        invocation(false).hash(&mut h1);
        let mut h2 = DefaultHasher::new();
        invocation(false).hash(&mut h2);
        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn retry_delay_is_exponential_and_capped() {
        let inv = invocation(false);
        assert_eq!(inv.retry_delay(0), Duration::from_millis(100));
        assert_eq!(inv.retry_delay(1), Duration::from_millis(200));
        assert_eq!(inv.retry_delay(2), Duration::from_millis(400));
        assert_eq!(inv.retry_delay(10), Duration::from_secs(5));
    }

    #[test]
    fn debug_redacts_pdp_secrets() {
        let mut context = ctx();
        context.pdp_secrets = Value::text("api-key-123");
        let rendered = format!("{:?}", context);
        assert!(!rendered.contains("api-key-123"));
    }
}
