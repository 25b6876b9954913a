//! Authorization subscriptions.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use arbiter_core::Value;

/// A request for a continuously updating authorization decision.
///
/// `secrets` is confidential: it never appears in logs, traces, or the
/// `Debug` rendering.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorizationSubscription {
    pub subject: Value,
    pub action: Value,
    pub resource: Value,
    #[serde(default = "undefined")]
    pub environment: Value,
    #[serde(default = "undefined")]
    pub secrets: Value,
}

fn undefined() -> Value {
    Value::Undefined
}

impl AuthorizationSubscription {
    pub fn new(subject: Value, action: Value, resource: Value) -> Self {
        AuthorizationSubscription {
            subject,
            action,
            resource,
            environment: Value::Undefined,
            secrets: Value::Undefined,
        }
    }

    pub fn with_environment(mut self, environment: Value) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_secrets(mut self, secrets: Value) -> Self {
        self.secrets = secrets;
        self
    }

    /// Parse the plain-JSON shape clients send:
    /// `{"subject": ..., "action": ..., "resource": ..., "environment": ...,
    /// "secrets": ...}` with arbitrary JSON in each field.
    pub fn from_plain_json(v: &serde_json::Value) -> Result<Self, String> {
        let obj = v
            .as_object()
            .ok_or_else(|| "subscription must be a JSON object".to_string())?;
        let field = |name: &str| {
            obj.get(name)
                .map(Value::from_json)
                .unwrap_or(Value::Undefined)
        };
        for required in ["subject", "action", "resource"] {
            if !obj.contains_key(required) {
                return Err(format!("subscription missing '{}'", required));
            }
        }
        Ok(AuthorizationSubscription {
            subject: field("subject"),
            action: field("action"),
            resource: field("resource"),
            environment: field("environment"),
            secrets: field("secrets"),
        })
    }

    /// Read a subscription field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match name {
            "subject" => Some(&self.subject),
            "action" => Some(&self.action),
            "resource" => Some(&self.resource),
            "environment" => Some(&self.environment),
            "secrets" => Some(&self.secrets),
            _ => None,
        }
    }
}

impl fmt::Debug for AuthorizationSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationSubscription")
            .field("subject", &self.subject)
            .field("action", &self.action)
            .field("resource", &self.resource)
            .field("environment", &self.environment)
            .field("secrets", &"<redacted>")
            .finish()
    }
}

/// Several subscriptions multiplexed over one decision stream, keyed by
/// subscription id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MultiAuthorizationSubscription {
    pub subscriptions: IndexMap<String, AuthorizationSubscription>,
}

impl MultiAuthorizationSubscription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: impl Into<String>, subscription: AuthorizationSubscription) -> Self {
        self.subscriptions.insert(id.into(), subscription);
        self
    }
}
