//! Live attribute streams.
//!
//! One [`AttributeStream`] exists per deduplicated invocation. A pump task
//! draws values from the current source (a PIP or the repository) into a
//! broadcast channel; downstream subscribers replay the latest value and
//! then follow the broadcast. Swapping the source never completes the
//! downstream side -- that is what makes PIP hot-swap invisible to
//! subscribers.
//!
//! Subscribers are counted through drop guards. When the last one leaves,
//! a grace-period timer is armed; a new subscriber arriving before it fires
//! reuses the stream, otherwise the stream de-registers itself from the
//! broker and shuts down.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use arbiter_core::{TracedValue, Value};

use crate::invocation::AttributeFinderInvocation;
use crate::pip::PolicyInformationPoint;
use crate::repository::{AttributeKey, AttributeRepository};
use crate::ValueStream;

const STREAM_CHANNEL_CAPACITY: usize = 256;

/// Where a stream currently draws its values from.
#[derive(Clone)]
pub(crate) enum StreamSource {
    Pip {
        name: String,
        pip: Arc<dyn PolicyInformationPoint>,
    },
    Repository(Arc<AttributeRepository>),
    Disconnected,
}

impl StreamSource {
    pub(crate) fn pip_name(&self) -> Option<&str> {
        match self {
            StreamSource::Pip { name, .. } => Some(name),
            _ => None,
        }
    }
}

enum Command {
    Switch(StreamSource),
    Shutdown,
}

/// A shared, hot-swappable attribute stream.
pub struct AttributeStream {
    invocation: AttributeFinderInvocation,
    tx: broadcast::Sender<TracedValue>,
    last: Arc<Mutex<Option<TracedValue>>>,
    command_tx: mpsc::UnboundedSender<Command>,
    subscriber_count: Arc<AtomicUsize>,
    grace_epoch: Arc<AtomicU64>,
    grace_period: Duration,
    current_pip: Mutex<Option<String>>,
    on_teardown: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl AttributeStream {
    pub(crate) fn new(invocation: AttributeFinderInvocation, grace_period: Duration) -> Arc<Self> {
        let (tx, _) = broadcast::channel(STREAM_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let last = Arc::new(Mutex::new(None));
        let pump = tokio::spawn(pump(
            invocation.clone(),
            command_rx,
            tx.clone(),
            last.clone(),
        ));
        Arc::new(AttributeStream {
            invocation,
            tx,
            last,
            command_tx,
            subscriber_count: Arc::new(AtomicUsize::new(0)),
            grace_epoch: Arc::new(AtomicU64::new(0)),
            grace_period,
            current_pip: Mutex::new(None),
            on_teardown: Mutex::new(None),
            pump: Mutex::new(Some(pump)),
        })
    }

    pub fn invocation(&self) -> &AttributeFinderInvocation {
        &self.invocation
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }

    /// Name of the PIP currently serving this stream, if any.
    pub fn current_pip(&self) -> Option<String> {
        self.current_pip.lock().clone()
    }

    pub(crate) fn set_on_teardown(&self, callback: Box<dyn FnOnce() + Send>) {
        *self.on_teardown.lock() = Some(callback);
    }

    /// Swap the upstream source without disturbing downstream subscribers.
    pub(crate) fn connect(&self, source: StreamSource) {
        *self.current_pip.lock() = source.pip_name().map(str::to_owned);
        let _ = self.command_tx.send(Command::Switch(source));
    }

    /// De-register from the broker and stop the pump. Idempotent.
    pub(crate) fn teardown(&self) {
        if let Some(callback) = self.on_teardown.lock().take() {
            callback();
        }
        let _ = self.command_tx.send(Command::Shutdown);
        if self.command_tx.is_closed() {
            if let Some(pump) = self.pump.lock().take() {
                pump.abort();
            }
        }
        tracing::debug!(attribute = %self.invocation.attribute_name, "attribute stream torn down");
    }

    /// The downstream flux: replays the latest value, then follows every
    /// emission. Holding the returned stream keeps this attribute stream
    /// alive; dropping the last one arms the grace-period timer.
    pub fn subscribe(self: &Arc<Self>) -> ValueStream {
        let guard = SubscriberGuard::register(self.clone());
        let rx = self.tx.subscribe();
        let replay = self.last.lock().clone();
        Box::pin(stream! {
            let _guard = guard;
            if let Some(value) = replay {
                yield value;
            }
            let mut rx = rx;
            loop {
                match rx.recv().await {
                    Ok(value) => yield value,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

struct SubscriberGuard {
    stream: Arc<AttributeStream>,
}

impl SubscriberGuard {
    fn register(stream: Arc<AttributeStream>) -> Self {
        stream.subscriber_count.fetch_add(1, Ordering::SeqCst);
        stream.grace_epoch.fetch_add(1, Ordering::SeqCst);
        SubscriberGuard { stream }
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        let stream = self.stream.clone();
        if stream.subscriber_count.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }
        // Last subscriber left: arm the grace timer. A new subscriber bumps
        // the epoch, which invalidates this timer.
        let epoch = stream.grace_epoch.load(Ordering::SeqCst);
        let grace = stream.grace_period;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    if stream.subscriber_count.load(Ordering::SeqCst) == 0
                        && stream.grace_epoch.load(Ordering::SeqCst) == epoch
                    {
                        stream.teardown();
                    }
                });
            }
            Err(_) => stream.teardown(),
        }
    }
}

// ──────────────────────────────────────────────
// Pump
// ──────────────────────────────────────────────

async fn pump(
    invocation: AttributeFinderInvocation,
    mut commands: mpsc::UnboundedReceiver<Command>,
    tx: broadcast::Sender<TracedValue>,
    last: Arc<Mutex<Option<TracedValue>>>,
) {
    let mut descriptor = StreamSource::Disconnected;
    let mut upstream: Option<ValueStream> = None;
    // Armed while waiting for the first emission from a fresh connection.
    let mut deadline: Option<Pin<Box<tokio::time::Sleep>>> = None;
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                None | Some(Command::Shutdown) => break,
                Some(Command::Switch(source)) => {
                    descriptor = source;
                    attempt = 0;
                    upstream = open(&descriptor, &invocation).await;
                    deadline = upstream
                        .is_some()
                        .then(|| Box::pin(tokio::time::sleep(invocation.initial_timeout)));
                }
            },
            item = next_item(&mut upstream), if upstream.is_some() => match item {
                Some(value) => {
                    deadline = None;
                    attempt = 0;
                    emit(&tx, &last, value);
                }
                None => {
                    if attempt < invocation.retries {
                        let delay = invocation.retry_delay(attempt);
                        attempt += 1;
                        tracing::debug!(
                            attribute = %invocation.attribute_name,
                            attempt,
                            "upstream ended, reconnecting"
                        );
                        tokio::time::sleep(delay).await;
                        upstream = open(&descriptor, &invocation).await;
                    } else {
                        upstream = None;
                        deadline = None;
                        emit(&tx, &last, TracedValue::untraced(Value::error(format!(
                            "attribute '{}': upstream terminated after {} reconnect attempts",
                            invocation.attribute_name, invocation.retries
                        ))));
                    }
                }
            },
            _ = wait(&mut deadline), if deadline.is_some() => {
                deadline = None;
                emit(&tx, &last, TracedValue::untraced(Value::error(format!(
                    "attribute '{}': no value within {}ms",
                    invocation.attribute_name,
                    invocation.initial_timeout.as_millis()
                ))));
            }
        }
    }
}

fn emit(
    tx: &broadcast::Sender<TracedValue>,
    last: &Arc<Mutex<Option<TracedValue>>>,
    value: TracedValue,
) {
    *last.lock() = Some(value.clone());
    let _ = tx.send(value);
}

async fn open(
    descriptor: &StreamSource,
    invocation: &AttributeFinderInvocation,
) -> Option<ValueStream> {
    match descriptor {
        StreamSource::Pip { pip, .. } => Some(pip.attribute_stream(invocation).await),
        StreamSource::Repository(repository) => {
            Some(repository.observe(AttributeKey::of_invocation(invocation)))
        }
        StreamSource::Disconnected => None,
    }
}

async fn next_item(upstream: &mut Option<ValueStream>) -> Option<TracedValue> {
    match upstream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn wait(deadline: &mut Option<Pin<Box<tokio::time::Sleep>>>) {
    match deadline {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
