//! End-to-end decision scenarios.

use std::sync::Arc;

use futures::StreamExt;

use arbiter_broker::{AttributeBroker, AttributeKey, AttributeRepository, ExpiryStrategy, Ttl};
use arbiter_core::ast::{
    BinaryOp, CombiningAlgorithm, Document, Entitlement, Expression, Policy, SubscriptionField,
};
use arbiter_core::Value;
use arbiter_eval::FunctionBroker;
use arbiter_interchange::{
    AuthorizationSubscription, Decision, MultiAuthorizationSubscription,
};
use arbiter_pdp::{PdpConfiguration, PolicyDecisionPoint};

fn pdp(algorithm: CombiningAlgorithm) -> PolicyDecisionPoint {
    PolicyDecisionPoint::new(
        PdpConfiguration::new("test", algorithm),
        Arc::new(FunctionBroker::with_standard_library()),
        Arc::new(AttributeBroker::new(Arc::new(AttributeRepository::new()))),
    )
}

fn subscription(subject: &str) -> AuthorizationSubscription {
    AuthorizationSubscription::new(
        Value::text(subject),
        Value::text("read"),
        Value::text("doc"),
    )
}

fn subject_is(name: &str) -> Expression {
    Expression::binary(
        BinaryOp::Eq,
        Expression::subscription(SubscriptionField::Subject),
        Expression::literal(Value::text(name)),
    )
}

fn permit_where(name: &str, condition: Expression) -> Document {
    Document::Policy(Policy {
        name: name.to_string(),
        entitlement: Entitlement::Permit,
        target: None,
        where_clauses: vec![condition],
        obligations: vec![],
        advice: vec![],
        transform: None,
    })
}

fn constant_policy(name: &str, entitlement: Entitlement, obligations: Vec<Value>) -> Document {
    Document::Policy(Policy {
        name: name.to_string(),
        entitlement,
        target: None,
        where_clauses: vec![],
        obligations: obligations.into_iter().map(Expression::literal).collect(),
        advice: vec![],
        transform: None,
    })
}

#[tokio::test]
async fn permit_where_subject_matches() {
    let mut pdp = pdp(CombiningAlgorithm::PermitOverrides);
    pdp.load_document(&permit_where("alice-only", subject_is("alice")));

    let decision = pdp.decide_once(subscription("alice")).await;
    assert_eq!(decision.decision, Decision::Permit);
    assert!(decision.obligations.is_empty());
    assert!(decision.advice.is_empty());
    assert!(decision.resource.is_undefined());

    let decision = pdp.decide_once(subscription("bob")).await;
    assert_eq!(decision.decision, Decision::NotApplicable);
}

#[tokio::test]
async fn obligations_merge_across_permits_in_document_order() {
    let mut pdp = pdp(CombiningAlgorithm::PermitOverrides);
    pdp.load_document(&constant_policy(
        "first",
        Entitlement::Permit,
        vec![Value::text("A")],
    ));
    pdp.load_document(&constant_policy(
        "second",
        Entitlement::Permit,
        vec![Value::text("B")],
    ));

    let decision = pdp.decide_once(subscription("alice")).await;
    assert_eq!(decision.decision, Decision::Permit);
    assert_eq!(decision.obligations, vec![Value::text("A"), Value::text("B")]);
}

#[tokio::test]
async fn permit_shaped_indeterminate_short_circuits_deny_overrides() {
    let mut pdp = pdp(CombiningAlgorithm::DenyOverrides);
    // A permit policy whose target is a type error: INDETERMINATE with a
    // PERMIT-shaped outcome, contradicting the DENY priority.
    pdp.load_document(&Document::Policy(Policy {
        name: "broken-permit".to_string(),
        entitlement: Entitlement::Permit,
        target: Some(Expression::binary(
            BinaryOp::Div,
            Expression::literal(Value::number(1)),
            Expression::literal(Value::number(0)),
        )),
        where_clauses: vec![],
        obligations: vec![],
        advice: vec![],
        transform: None,
    }));
    pdp.load_document(&constant_policy("denier", Entitlement::Deny, vec![]));

    let decision = pdp.decide_once(subscription("alice")).await;
    assert_eq!(decision.decision, Decision::Indeterminate);
    assert!(decision.obligations.is_empty());
}

#[tokio::test]
async fn invalid_document_does_not_stop_other_documents() {
    let mut pdp = pdp(CombiningAlgorithm::PermitOverrides);
    let loaded = pdp.load_document_source("broken.json", b"{not json");
    assert!(!loaded.errors().is_empty());
    pdp.load_document(&constant_policy("permitter", Entitlement::Permit, vec![]));

    // The broken document votes a mixed INDETERMINATE, which is critical.
    let decision = pdp.decide_once(subscription("alice")).await;
    assert_eq!(decision.decision, Decision::Indeterminate);
}

#[tokio::test]
async fn empty_configuration_is_not_applicable() {
    let pdp = pdp(CombiningAlgorithm::PermitOverrides);
    let decision = pdp.decide_once(subscription("alice")).await;
    assert_eq!(decision.decision, Decision::NotApplicable);
}

#[tokio::test(start_paused = true)]
async fn decision_stream_updates_when_attributes_change() {
    let repository = Arc::new(AttributeRepository::new());
    let attributes = Arc::new(AttributeBroker::new(repository.clone()));
    let mut pdp = PolicyDecisionPoint::new(
        PdpConfiguration::new("test", CombiningAlgorithm::PermitOverrides),
        Arc::new(FunctionBroker::with_standard_library()),
        attributes,
    );

    repository
        .publish_attribute(
            AttributeKey::environment("door.open", vec![]),
            Value::Bool(true),
            Ttl::Infinite,
            ExpiryStrategy::Remove,
        )
        .unwrap();

    // permit where <door.open> == true
    pdp.load_document(&permit_where(
        "door-guard",
        Expression::binary(
            BinaryOp::Eq,
            Expression::Attribute {
                name: "door.open".to_string(),
                entity: None,
                arguments: vec![],
                options: Default::default(),
                fresh: false,
                location: None,
            },
            Expression::literal(Value::Bool(true)),
        ),
    ));

    let mut decisions = pdp.decide(subscription("alice"));
    let first = decisions.next().await.unwrap();
    assert_eq!(first.decision, Decision::Permit);

    repository
        .publish_attribute(
            AttributeKey::environment("door.open", vec![]),
            Value::Bool(false),
            Ttl::Infinite,
            ExpiryStrategy::Remove,
        )
        .unwrap();
    let second = decisions.next().await.unwrap();
    assert_eq!(second.decision, Decision::NotApplicable);

    // Republishing the same value changes nothing: consecutive identical
    // decisions are suppressed, so the next emission is the flip back.
    repository
        .publish_attribute(
            AttributeKey::environment("door.open", vec![]),
            Value::Bool(false),
            Ttl::Infinite,
            ExpiryStrategy::Remove,
        )
        .unwrap();
    repository
        .publish_attribute(
            AttributeKey::environment("door.open", vec![]),
            Value::Bool(true),
            Ttl::Infinite,
            ExpiryStrategy::Remove,
        )
        .unwrap();
    let third = decisions.next().await.unwrap();
    assert_eq!(third.decision, Decision::Permit);
}

#[tokio::test]
async fn multi_subscription_tags_decisions_with_ids() {
    let mut pdp = pdp(CombiningAlgorithm::PermitOverrides);
    pdp.load_document(&permit_where("alice-only", subject_is("alice")));

    let multi = MultiAuthorizationSubscription::new()
        .with("alice-request", subscription("alice"))
        .with("bob-request", subscription("bob"));

    let mut decisions: Vec<_> = pdp.decide_all(&multi).collect().await;
    decisions.sort_by(|a, b| a.subscription_id.cmp(&b.subscription_id));
    assert_eq!(decisions.len(), 2);
    assert_eq!(decisions[0].subscription_id, "alice-request");
    assert_eq!(decisions[0].decision.decision, Decision::Permit);
    assert_eq!(decisions[1].subscription_id, "bob-request");
    assert_eq!(decisions[1].decision.decision, Decision::NotApplicable);
}

#[tokio::test]
async fn variables_parameterize_policies() {
    let configuration = PdpConfiguration::new("test", CombiningAlgorithm::PermitOverrides)
        .with_variable("required_role", Value::text("admin"));
    let mut pdp = PolicyDecisionPoint::new(
        configuration,
        Arc::new(FunctionBroker::with_standard_library()),
        Arc::new(AttributeBroker::new(Arc::new(AttributeRepository::new()))),
    );
    // permit where subject == required_role
    pdp.load_document(&permit_where(
        "role-gate",
        Expression::binary(
            BinaryOp::Eq,
            Expression::subscription(SubscriptionField::Subject),
            Expression::Variable {
                name: "required_role".to_string(),
                location: None,
            },
        ),
    ));

    let decision = pdp.decide_once(subscription("admin")).await;
    assert_eq!(decision.decision, Decision::Permit);
    let decision = pdp.decide_once(subscription("guest")).await;
    assert_eq!(decision.decision, Decision::NotApplicable);
}
