//! Authorization decisions.

use serde::{Deserialize, Serialize};

use arbiter_core::Value;

/// The four possible outcomes of combining policy votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Permit,
    Deny,
    Indeterminate,
    NotApplicable,
}

/// A decision together with its constraints and optional transformed
/// resource. `resource` is `Undefined` when no transformation applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    pub decision: Decision,
    #[serde(default)]
    pub obligations: Vec<Value>,
    #[serde(default)]
    pub advice: Vec<Value>,
    #[serde(default = "undefined")]
    pub resource: Value,
}

fn undefined() -> Value {
    Value::Undefined
}

impl AuthorizationDecision {
    pub fn new(decision: Decision) -> Self {
        AuthorizationDecision {
            decision,
            obligations: Vec::new(),
            advice: Vec::new(),
            resource: Value::Undefined,
        }
    }

    pub fn permit() -> Self {
        Self::new(Decision::Permit)
    }

    pub fn deny() -> Self {
        Self::new(Decision::Deny)
    }

    pub fn indeterminate() -> Self {
        Self::new(Decision::Indeterminate)
    }

    pub fn not_applicable() -> Self {
        Self::new(Decision::NotApplicable)
    }

    pub fn with_obligations(mut self, obligations: Vec<Value>) -> Self {
        self.obligations = obligations;
        self
    }

    pub fn with_advice(mut self, advice: Vec<Value>) -> Self {
        self.advice = advice;
        self
    }

    pub fn with_resource(mut self, resource: Value) -> Self {
        self.resource = resource;
        self
    }
}

/// A decision tagged with the subscription id it answers, for
/// multi-subscription streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifiableAuthorizationDecision {
    pub subscription_id: String,
    pub decision: AuthorizationDecision,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_names_on_the_wire() {
        assert_eq!(
            serde_json::to_value(Decision::NotApplicable).unwrap(),
            serde_json::json!("NOT_APPLICABLE")
        );
        assert_eq!(
            serde_json::to_value(Decision::Permit).unwrap(),
            serde_json::json!("PERMIT")
        );
    }

    #[test]
    fn decision_round_trip_with_constraints() {
        let decision = AuthorizationDecision::permit()
            .with_obligations(vec![Value::text("log-access")])
            .with_advice(vec![Value::text("notify-owner")])
            .with_resource(Value::text("filtered"));
        let json = serde_json::to_value(&decision).unwrap();
        let back: AuthorizationDecision = serde_json::from_value(json).unwrap();
        assert_eq!(back, decision);
    }

    #[test]
    fn undefined_resource_survives_round_trip() {
        let decision = AuthorizationDecision::deny();
        let json = serde_json::to_value(&decision).unwrap();
        let back: AuthorizationDecision = serde_json::from_value(json).unwrap();
        assert!(back.resource.is_undefined());
    }
}
