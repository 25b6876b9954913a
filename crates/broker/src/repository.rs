//! In-memory entity-attribute repository with TTL expiry.
//!
//! The repository is the fallback attribute source when no PIP serves an
//! invocation, and a first-class publish/subscribe store in its own right.
//! Each key holds at most one value; publishing re-arms the key's TTL timer,
//! expiry applies the entry's strategy, and watchers observe every change
//! as a stream.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_stream::stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use arbiter_core::{TracedValue, Value};

use crate::error::RepositoryError;
use crate::invocation::AttributeFinderInvocation;
use crate::ValueStream;

const WATCHER_CHANNEL_CAPACITY: usize = 64;

// ──────────────────────────────────────────────
// Keys, TTLs, strategies
// ──────────────────────────────────────────────

/// Storage key: entity (None for environment attributes), attribute name,
/// and arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeKey {
    pub entity: Option<Value>,
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl AttributeKey {
    pub fn new(entity: Option<Value>, name: impl Into<String>, arguments: Vec<Value>) -> Self {
        AttributeKey {
            entity,
            name: name.into(),
            arguments,
        }
    }

    /// Environment attribute key (no entity).
    pub fn environment(name: impl Into<String>, arguments: Vec<Value>) -> Self {
        AttributeKey::new(None, name, arguments)
    }

    pub fn of_invocation(invocation: &AttributeFinderInvocation) -> Self {
        AttributeKey {
            entity: invocation.entity.clone(),
            name: invocation.attribute_name.clone(),
            arguments: invocation.arguments.clone(),
        }
    }
}

/// Time-to-live of a published attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ttl {
    Infinite,
    Millis(u64),
}

impl Ttl {
    pub fn after(duration: Duration) -> Ttl {
        Ttl::Millis(duration.as_millis() as u64)
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Ttl::Infinite => None,
            Ttl::Millis(ms) => Some(Duration::from_millis(*ms)),
        }
    }
}

/// What happens to an entry when its TTL elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryStrategy {
    /// Delete the entry.
    Remove,
    /// Replace the entry with `(Undefined, ttl = Infinite)`.
    BecomeUndefined,
}

/// Serialized form of one repository entry, for snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedAttribute {
    pub key: AttributeKey,
    pub value: Value,
    pub created_at_ms: i64,
    pub ttl: Ttl,
    pub strategy: ExpiryStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<i64>,
}

// ──────────────────────────────────────────────
// Repository
// ──────────────────────────────────────────────

struct Entry {
    value: Value,
    created_at_ms: i64,
    ttl: Ttl,
    strategy: ExpiryStrategy,
    expires_at_ms: Option<i64>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<AttributeKey, Entry>,
    watchers: HashMap<AttributeKey, broadcast::Sender<Value>>,
    next_generation: u64,
}

impl Inner {
    fn notify(&self, key: &AttributeKey, value: Value) {
        if let Some(tx) = self.watchers.get(key) {
            let _ = tx.send(value);
        }
    }
}

/// The in-memory attribute store.
pub struct AttributeRepository {
    inner: Arc<Mutex<Inner>>,
}

impl Default for AttributeRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeRepository {
    pub fn new() -> Self {
        AttributeRepository {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Rebuild a repository from a snapshot. Entries already past their
    /// expiry are handled immediately according to their strategy;
    /// still-active entries re-arm timers for the remainder.
    pub fn from_snapshot(snapshot: Vec<PersistedAttribute>) -> Result<Self, RepositoryError> {
        let repository = AttributeRepository::new();
        repository.restore(snapshot)?;
        Ok(repository)
    }

    /// Publish a value under a key, replacing any previous value and
    /// cancelling its pending timeout.
    pub fn publish_attribute(
        &self,
        key: AttributeKey,
        value: Value,
        ttl: Ttl,
        strategy: ExpiryStrategy,
    ) -> Result<(), RepositoryError> {
        if let Ttl::Millis(0) = ttl {
            return Err(RepositoryError::InvalidTtl(
                "finite ttl must be greater than zero".to_string(),
            ));
        }
        let now = now_ms();
        let expires_at_ms = ttl.duration().map(|d| now + d.as_millis() as i64);
        self.insert(key, value, now, ttl, strategy, expires_at_ms);
        Ok(())
    }

    /// Remove an entry, cancelling its timer. Watchers observe `Undefined`.
    pub fn remove_attribute(&self, key: &AttributeKey) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.remove(key) {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            inner.notify(key, Value::Undefined);
        }
    }

    /// Current value under a key, if present.
    pub fn get(&self, key: &AttributeKey) -> Option<Value> {
        self.inner.lock().entries.get(key).map(|e| e.value.clone())
    }

    /// Stream of updates for a key, starting with the current value
    /// (`Undefined` when absent). The stream stays open across removal and
    /// republication.
    pub fn observe(&self, key: AttributeKey) -> ValueStream {
        let (current, rx) = {
            let mut inner = self.inner.lock();
            let tx = inner
                .watchers
                .entry(key.clone())
                .or_insert_with(|| broadcast::channel(WATCHER_CHANNEL_CAPACITY).0);
            let rx = tx.subscribe();
            let current = inner.entries.get(&key).map(|e| e.value.clone());
            (current, rx)
        };
        Box::pin(stream! {
            yield TracedValue::untraced(current.unwrap_or(Value::Undefined));
            let mut rx = rx;
            loop {
                match rx.recv().await {
                    Ok(value) => yield TracedValue::untraced(value),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Serialize all live entries.
    pub fn snapshot(&self) -> Vec<PersistedAttribute> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .map(|(key, entry)| PersistedAttribute {
                key: key.clone(),
                value: entry.value.clone(),
                created_at_ms: entry.created_at_ms,
                ttl: entry.ttl,
                strategy: entry.strategy,
                expires_at_ms: entry.expires_at_ms,
            })
            .collect()
    }

    /// Load entries from a snapshot into this repository.
    pub fn restore(&self, snapshot: Vec<PersistedAttribute>) -> Result<(), RepositoryError> {
        let now = now_ms();
        for persisted in snapshot {
            if matches!(persisted.ttl, Ttl::Millis(_)) && persisted.expires_at_ms.is_none() {
                return Err(RepositoryError::MalformedSnapshot(format!(
                    "entry '{}' has a finite ttl but no expiry timestamp",
                    persisted.key.name
                )));
            }
            match persisted.expires_at_ms {
                Some(expires_at) if expires_at <= now => match persisted.strategy {
                    ExpiryStrategy::Remove => {
                        tracing::trace!(attribute = %persisted.key.name, "snapshot entry already expired, dropped");
                    }
                    ExpiryStrategy::BecomeUndefined => {
                        self.insert(
                            persisted.key,
                            Value::Undefined,
                            persisted.created_at_ms,
                            Ttl::Infinite,
                            ExpiryStrategy::BecomeUndefined,
                            None,
                        );
                    }
                },
                _ => {
                    self.insert(
                        persisted.key,
                        persisted.value,
                        persisted.created_at_ms,
                        persisted.ttl,
                        persisted.strategy,
                        persisted.expires_at_ms,
                    );
                }
            }
        }
        Ok(())
    }

    fn insert(
        &self,
        key: AttributeKey,
        value: Value,
        created_at_ms: i64,
        ttl: Ttl,
        strategy: ExpiryStrategy,
        expires_at_ms: Option<i64>,
    ) {
        let mut inner = self.inner.lock();
        let generation = inner.next_generation;
        inner.next_generation += 1;

        if let Some(previous) = inner.entries.remove(&key) {
            if let Some(timer) = previous.timer {
                timer.abort();
            }
        }

        let timer = expires_at_ms.map(|expires_at| {
            let remaining = Duration::from_millis((expires_at - now_ms()).max(0) as u64);
            spawn_expiry(Arc::downgrade(&self.inner), key.clone(), generation, remaining)
        });

        inner.notify(&key, value.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                created_at_ms,
                ttl,
                strategy,
                expires_at_ms,
                generation,
                timer,
            },
        );
    }
}

fn spawn_expiry(
    inner: Weak<Mutex<Inner>>,
    key: AttributeKey,
    generation: u64,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut inner = inner.lock();
        let strategy = match inner.entries.get(&key) {
            Some(entry) if entry.generation == generation => entry.strategy,
            _ => return,
        };
        match strategy {
            ExpiryStrategy::Remove => {
                inner.entries.remove(&key);
            }
            ExpiryStrategy::BecomeUndefined => {
                if let Some(entry) = inner.entries.get_mut(&key) {
                    entry.value = Value::Undefined;
                    entry.ttl = Ttl::Infinite;
                    entry.expires_at_ms = None;
                    entry.timer = None;
                }
            }
        }
        inner.notify(&key, Value::Undefined);
        tracing::trace!(attribute = %key.name, ?strategy, "attribute expired");
    })
}

fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
