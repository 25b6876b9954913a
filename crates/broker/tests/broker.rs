//! Attribute broker behavior: deduplication, hot-swap, atomic library
//! load, grace-period teardown, timeouts, and retries.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;

use arbiter_broker::{
    AttributeBroker, AttributeFinderInvocation, AttributeFinderSpecification, AttributeKey,
    AttributeRepository, BrokerError, ExpiryStrategy, InvocationContext, PolicyInformationPoint,
    PolicyInformationPointSpecification, Ttl, ValueStream,
};
use arbiter_core::{TracedValue, Value};
use arbiter_interchange::AuthorizationSubscription;

// ──────────────────────────────────────────────
// Test PIPs
// ──────────────────────────────────────────────

/// Replays `initial` on connect, then forwards values pushed by the test.
struct ScriptedPip {
    spec: PolicyInformationPointSpecification,
    initial: Vec<Value>,
    tx: broadcast::Sender<Value>,
}

impl ScriptedPip {
    fn new(spec: PolicyInformationPointSpecification, initial: Vec<Value>) -> Arc<Self> {
        let (tx, _) = broadcast::channel(64);
        Arc::new(ScriptedPip { spec, initial, tx })
    }

    fn push(&self, value: Value) {
        let _ = self.tx.send(value);
    }
}

#[async_trait]
impl PolicyInformationPoint for ScriptedPip {
    fn specification(&self) -> PolicyInformationPointSpecification {
        self.spec.clone()
    }

    async fn attribute_stream(&self, _invocation: &AttributeFinderInvocation) -> ValueStream {
        let initial = self.initial.clone();
        let mut rx = self.tx.subscribe();
        Box::pin(stream! {
            for value in initial {
                yield TracedValue::untraced(value);
            }
            loop {
                match rx.recv().await {
                    Ok(value) => yield TracedValue::untraced(value),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Never emits anything.
struct SilentPip {
    spec: PolicyInformationPointSpecification,
}

#[async_trait]
impl PolicyInformationPoint for SilentPip {
    fn specification(&self) -> PolicyInformationPointSpecification {
        self.spec.clone()
    }

    async fn attribute_stream(&self, _invocation: &AttributeFinderInvocation) -> ValueStream {
        Box::pin(futures::stream::pending())
    }
}

/// Completes immediately without emitting.
struct DeadPip {
    spec: PolicyInformationPointSpecification,
}

#[async_trait]
impl PolicyInformationPoint for DeadPip {
    fn specification(&self) -> PolicyInformationPointSpecification {
        self.spec.clone()
    }

    async fn attribute_stream(&self, _invocation: &AttributeFinderInvocation) -> ValueStream {
        Box::pin(futures::stream::empty())
    }
}

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

fn spec_with_exact(pip: &str, attribute: &str, arity: usize) -> PolicyInformationPointSpecification {
    PolicyInformationPointSpecification::new(pip, "test pip")
        .with_finder(AttributeFinderSpecification::exact(attribute, arity))
}

fn invocation(attribute: &str) -> AttributeFinderInvocation {
    AttributeFinderInvocation {
        configuration_id: "cfg".to_string(),
        attribute_name: attribute.to_string(),
        entity: None,
        arguments: vec![],
        initial_timeout: Duration::from_secs(3600),
        poll_interval: Duration::from_millis(10),
        backoff: Duration::from_millis(100),
        retries: 0,
        fresh: false,
        ctx: InvocationContext::new(
            AuthorizationSubscription::new(Value::text("s"), Value::text("a"), Value::text("r")),
            Value::Undefined,
        ),
    }
}

fn broker() -> AttributeBroker {
    AttributeBroker::new(Arc::new(AttributeRepository::new()))
        .with_grace_period(Duration::from_millis(200))
}

async fn next_value(stream: &mut ValueStream) -> Value {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("stream emission timed out")
        .expect("stream completed unexpectedly")
        .value
}

// ──────────────────────────────────────────────
// Deduplication
// ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn concurrent_subscribers_share_one_stream() {
    let broker = broker();
    let pip = ScriptedPip::new(spec_with_exact("p1", "sensor.value", 0), vec![Value::number(1)]);
    broker.load_policy_information_point(pip.clone()).unwrap();

    let mut first = broker.attribute_stream(&invocation("sensor.value"));
    let mut second = broker.attribute_stream(&invocation("sensor.value"));
    assert_eq!(broker.active_stream_count(), 1);

    assert_eq!(next_value(&mut first).await, Value::number(1));
    assert_eq!(next_value(&mut second).await, Value::number(1));

    pip.push(Value::number(2));
    assert_eq!(next_value(&mut first).await, Value::number(2));
    assert_eq!(next_value(&mut second).await, Value::number(2));
}

#[tokio::test(start_paused = true)]
async fn fresh_invocation_forces_new_stream() {
    let broker = broker();
    let pip = ScriptedPip::new(spec_with_exact("p1", "sensor.value", 0), vec![Value::number(1)]);
    broker.load_policy_information_point(pip).unwrap();

    let _shared = broker.attribute_stream(&invocation("sensor.value"));
    let mut fresh = invocation("sensor.value");
    fresh.fresh = true;
    let _first_fresh = broker.attribute_stream(&fresh);
    let _second_fresh = broker.attribute_stream(&fresh);

    assert_eq!(broker.active_stream_count(), 3);
}

// ──────────────────────────────────────────────
// Hot-swap
// ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unloading_exact_finder_switches_to_varargs_then_repository() {
    let broker = broker();
    let exact = ScriptedPip::new(spec_with_exact("exact-pip", "time.now", 0), vec![Value::text("exact")]);
    let varargs = ScriptedPip::new(
        PolicyInformationPointSpecification::new("varargs-pip", "test pip")
            .with_finder(AttributeFinderSpecification::varargs("time.now", 0)),
        vec![Value::text("varargs")],
    );
    broker.load_policy_information_point(exact).unwrap();
    broker.load_policy_information_point(varargs).unwrap();

    let mut subscriber = broker.attribute_stream(&invocation("time.now"));
    assert_eq!(next_value(&mut subscriber).await, Value::text("exact"));

    // Removing the exact finder swaps the live stream onto the varargs
    // finder with no completion in between.
    broker.unload_policy_information_point("exact-pip").unwrap();
    assert_eq!(next_value(&mut subscriber).await, Value::text("varargs"));

    // Removing the varargs finder as well falls back to the repository.
    broker.unload_policy_information_point("varargs-pip").unwrap();
    assert_eq!(next_value(&mut subscriber).await, Value::Undefined);

    broker
        .repository()
        .publish_attribute(
            AttributeKey::environment("time.now", vec![]),
            Value::text("from-repository"),
            Ttl::Infinite,
            ExpiryStrategy::Remove,
        )
        .unwrap();
    assert_eq!(next_value(&mut subscriber).await, Value::text("from-repository"));
}

#[tokio::test(start_paused = true)]
async fn loading_exact_finder_takes_over_from_varargs() {
    let broker = broker();
    let varargs = ScriptedPip::new(
        PolicyInformationPointSpecification::new("varargs-pip", "test pip")
            .with_finder(AttributeFinderSpecification::varargs("geo.fence", 0)),
        vec![Value::text("varargs")],
    );
    broker.load_policy_information_point(varargs).unwrap();

    let mut subscriber = broker.attribute_stream(&invocation("geo.fence"));
    assert_eq!(next_value(&mut subscriber).await, Value::text("varargs"));

    let exact = ScriptedPip::new(spec_with_exact("exact-pip", "geo.fence", 0), vec![Value::text("exact")]);
    broker.load_policy_information_point(exact).unwrap();
    assert_eq!(next_value(&mut subscriber).await, Value::text("exact"));
}

// ──────────────────────────────────────────────
// Atomic library load
// ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn library_load_with_collision_leaves_no_trace() {
    let broker = broker();
    let existing = ScriptedPip::new(spec_with_exact("p1", "a.b", 0), vec![]);
    broker.load_policy_information_point(existing).unwrap();

    let clean = ScriptedPip::new(spec_with_exact("p2", "c.d", 0), vec![]);
    let colliding = ScriptedPip::new(spec_with_exact("p3", "a.b", 0), vec![]);
    let err = broker
        .load_policy_information_point_library("lib", vec![clean, colliding])
        .unwrap_err();
    assert!(matches!(err, BrokerError::SignatureCollision(_)));
    assert!(broker.loaded_library_names().is_empty());

    // Nothing from the failed library was registered: "c.d" is free.
    let retry = ScriptedPip::new(spec_with_exact("p2", "c.d", 0), vec![]);
    broker
        .load_policy_information_point_library("lib", vec![retry])
        .unwrap();
    assert_eq!(broker.loaded_library_names(), vec!["lib".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn library_load_rejects_duplicate_library() {
    let broker = broker();
    let first = ScriptedPip::new(spec_with_exact("p1", "a.b", 0), vec![]);
    broker
        .load_policy_information_point_library("lib", vec![first])
        .unwrap();

    let second = ScriptedPip::new(spec_with_exact("p2", "c.d", 0), vec![]);
    let err = broker
        .load_policy_information_point_library("lib", vec![second])
        .unwrap_err();
    assert!(matches!(err, BrokerError::LibraryAlreadyLoaded(_)));
}

#[tokio::test(start_paused = true)]
async fn library_unload_removes_all_members() {
    let broker = broker();
    let p1 = ScriptedPip::new(spec_with_exact("p1", "a.b", 0), vec![]);
    let p2 = ScriptedPip::new(spec_with_exact("p2", "c.d", 0), vec![]);
    broker
        .load_policy_information_point_library("lib", vec![p1, p2])
        .unwrap();

    broker.unload_library("lib").unwrap();
    assert!(broker.loaded_library_names().is_empty());
    // Both names are free again.
    let p1 = ScriptedPip::new(spec_with_exact("p1", "a.b", 0), vec![]);
    broker.load_policy_information_point(p1).unwrap();
}

#[tokio::test(start_paused = true)]
async fn duplicate_exact_signature_rejected_at_registration() {
    let broker = broker();
    let first = ScriptedPip::new(spec_with_exact("p1", "a.b", 0), vec![]);
    broker.load_policy_information_point(first).unwrap();

    let duplicate = ScriptedPip::new(spec_with_exact("p2", "a.b", 0), vec![]);
    let err = broker.load_policy_information_point(duplicate).unwrap_err();
    assert!(matches!(err, BrokerError::SignatureCollision(_)));
}

// ──────────────────────────────────────────────
// Grace period
// ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stream_survives_resubscription_within_grace_period() {
    let broker = broker();
    let pip = ScriptedPip::new(spec_with_exact("p1", "sensor.value", 0), vec![Value::number(7)]);
    broker.load_policy_information_point(pip).unwrap();

    let mut first = broker.attribute_stream(&invocation("sensor.value"));
    assert_eq!(next_value(&mut first).await, Value::number(7));
    drop(first);

    // Return before the 200ms grace period elapses: the stream is reused
    // and replays its latest value.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut second = broker.attribute_stream(&invocation("sensor.value"));
    assert_eq!(broker.active_stream_count(), 1);
    assert_eq!(next_value(&mut second).await, Value::number(7));
}

#[tokio::test(start_paused = true)]
async fn stream_torn_down_after_grace_period() {
    let broker = broker();
    let pip = ScriptedPip::new(spec_with_exact("p1", "sensor.value", 0), vec![Value::number(7)]);
    broker.load_policy_information_point(pip).unwrap();

    let mut subscriber = broker.attribute_stream(&invocation("sensor.value"));
    assert_eq!(next_value(&mut subscriber).await, Value::number(7));
    drop(subscriber);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(broker.active_stream_count(), 0);
}

// ──────────────────────────────────────────────
// Timeouts and retries
// ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn initial_timeout_emits_error_and_keeps_stream_open() {
    let broker = broker();
    let pip = Arc::new(SilentPip {
        spec: spec_with_exact("silent", "slow.attr", 0),
    });
    broker.load_policy_information_point(pip).unwrap();

    let mut inv = invocation("slow.attr");
    inv.initial_timeout = Duration::from_millis(100);
    let mut subscriber = broker.attribute_stream(&inv);

    let first = next_value(&mut subscriber).await;
    assert!(matches!(first, Value::Error(message) if message.contains("no value within")));
    // The stream stays open afterwards.
    assert_eq!(broker.active_stream_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_emit_error_value() {
    let broker = broker();
    let pip = Arc::new(DeadPip {
        spec: spec_with_exact("dead", "dead.attr", 0),
    });
    broker.load_policy_information_point(pip).unwrap();

    let mut inv = invocation("dead.attr");
    inv.retries = 2;
    let mut subscriber = broker.attribute_stream(&inv);

    let first = next_value(&mut subscriber).await;
    assert!(
        matches!(first, Value::Error(message) if message.contains("2 reconnect attempts")),
        "unexpected value"
    );
}
