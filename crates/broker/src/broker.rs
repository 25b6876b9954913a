//! The attribute broker.
//!
//! Owns four indexes behind a single coarse lock: active streams per
//! invocation, finders per attribute name, registered PIPs, and library
//! membership. At most one live upstream exists per invocation (barring
//! `fresh` streams and grace-period overlap); registration changes
//! reconnect affected streams in place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::BrokerError;
use crate::invocation::AttributeFinderInvocation;
use crate::pip::PolicyInformationPoint;
use crate::repository::AttributeRepository;
use crate::spec::{AttributeFinderSpecification, MatchKind, PolicyInformationPointSpecification};
use crate::stream::{AttributeStream, StreamSource};
use crate::ValueStream;

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

#[derive(Clone)]
struct RegisteredFinder {
    pip_name: String,
    spec: AttributeFinderSpecification,
}

#[derive(Default)]
struct Indexes {
    active: HashMap<AttributeFinderInvocation, Vec<Arc<AttributeStream>>>,
    finders: HashMap<String, Vec<RegisteredFinder>>,
    pips: HashMap<String, Arc<dyn PolicyInformationPoint>>,
    libraries: HashMap<String, Vec<String>>,
}

/// Deduplicating, hot-swapping registry of attribute streams.
pub struct AttributeBroker {
    inner: Arc<Mutex<Indexes>>,
    repository: Arc<AttributeRepository>,
    grace_period: Duration,
}

impl AttributeBroker {
    pub fn new(repository: Arc<AttributeRepository>) -> Self {
        AttributeBroker {
            inner: Arc::new(Mutex::new(Indexes::default())),
            repository,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn repository(&self) -> &Arc<AttributeRepository> {
        &self.repository
    }

    // ── Stream access ────────────────────────────────────────────────

    /// The shared stream for an invocation. Reuses a live stream unless
    /// `invocation.fresh` forces a new one; otherwise resolves a source
    /// (exact finder, else varargs finder, else repository) and registers
    /// a new stream.
    pub fn attribute_stream(&self, invocation: &AttributeFinderInvocation) -> ValueStream {
        let mut indexes = self.inner.lock();
        if !invocation.fresh {
            if let Some(stream) = indexes.active.get(invocation).and_then(|list| list.first()) {
                return stream.subscribe();
            }
        }
        let source = resolve(&indexes, invocation, &self.repository);
        let stream = AttributeStream::new(invocation.clone(), self.grace_period);

        let weak = Arc::downgrade(&self.inner);
        let key = invocation.clone();
        let ptr = Arc::as_ptr(&stream) as usize;
        stream.set_on_teardown(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut indexes = inner.lock();
                if let Some(list) = indexes.active.get_mut(&key) {
                    list.retain(|s| Arc::as_ptr(s) as usize != ptr);
                    if list.is_empty() {
                        indexes.active.remove(&key);
                    }
                }
            }
        }));

        stream.connect(source);
        indexes
            .active
            .entry(invocation.clone())
            .or_default()
            .push(stream.clone());
        tracing::debug!(
            attribute = %invocation.attribute_name,
            fresh = invocation.fresh,
            "attribute stream created"
        );
        stream.subscribe()
    }

    /// Number of live streams across all invocations.
    pub fn active_stream_count(&self) -> usize {
        self.inner.lock().active.values().map(Vec::len).sum()
    }

    // ── Registration ─────────────────────────────────────────────────

    /// Register one additional finder for an already-loaded PIP, and
    /// reconnect any active stream the new finder now wins.
    pub fn register_attribute_finder(
        &self,
        pip_name: &str,
        finder: AttributeFinderSpecification,
    ) -> Result<(), BrokerError> {
        let mut indexes = self.inner.lock();
        if !indexes.pips.contains_key(pip_name) {
            return Err(BrokerError::UnknownPip(pip_name.to_string()));
        }
        check_finder_collision(&indexes, &finder)?;
        let attribute_name = finder.attribute_name.clone();
        indexes
            .finders
            .entry(attribute_name.clone())
            .or_default()
            .push(RegisteredFinder {
                pip_name: pip_name.to_string(),
                spec: finder,
            });
        reconcile(&indexes, &attribute_name, &self.repository);
        Ok(())
    }

    /// Load a single PIP: register its finders and hot-swap matching
    /// active streams onto it. All checks pass before any state changes.
    pub fn load_policy_information_point(
        &self,
        pip: Arc<dyn PolicyInformationPoint>,
    ) -> Result<(), BrokerError> {
        let spec = pip.specification();
        validate_spec(&spec)?;
        let mut indexes = self.inner.lock();
        check_pip(&indexes, &spec)?;
        load_pip_locked(&mut indexes, pip, spec, &self.repository);
        Ok(())
    }

    /// Unload a PIP: remove its finders and reconnect affected streams to
    /// a remaining varargs finder or the repository.
    pub fn unload_policy_information_point(&self, name: &str) -> Result<(), BrokerError> {
        let mut indexes = self.inner.lock();
        if indexes.pips.remove(name).is_none() {
            return Err(BrokerError::UnknownPip(name.to_string()));
        }
        let mut affected = Vec::new();
        indexes.finders.retain(|attribute_name, finders| {
            let before = finders.len();
            finders.retain(|f| f.pip_name != name);
            if finders.len() != before {
                affected.push(attribute_name.clone());
            }
            !finders.is_empty()
        });
        for attribute_name in &affected {
            reconcile(&indexes, attribute_name, &self.repository);
        }
        tracing::info!(pip = name, "policy information point unloaded");
        Ok(())
    }

    /// Atomically load a library of PIPs.
    ///
    /// Specifications are produced and validated outside the lock; under
    /// the lock every collision is checked before anything mutates, so a
    /// failing load leaves the broker unchanged.
    pub fn load_policy_information_point_library(
        &self,
        library_name: &str,
        pips: Vec<Arc<dyn PolicyInformationPoint>>,
    ) -> Result<(), BrokerError> {
        // 1. Metadata processing, outside the lock.
        let mut prepared = Vec::with_capacity(pips.len());
        for pip in pips {
            let spec = pip.specification();
            validate_spec(&spec)?;
            prepared.push((pip, spec));
        }

        // 2. Cheap pre-check, outside the lock.
        if self.loaded_library_names().contains(&library_name.to_string()) {
            return Err(BrokerError::LibraryAlreadyLoaded(library_name.to_string()));
        }

        // 3. Re-check and collision scan under the lock; abort loads nothing.
        let mut indexes = self.inner.lock();
        if indexes.libraries.contains_key(library_name) {
            return Err(BrokerError::LibraryAlreadyLoaded(library_name.to_string()));
        }
        for (_, spec) in &prepared {
            check_pip(&indexes, spec)?;
        }
        for (i, (_, spec)) in prepared.iter().enumerate() {
            for (_, other_spec) in prepared.iter().skip(i + 1) {
                if spec.name == other_spec.name {
                    return Err(BrokerError::PipNameCollision(spec.name.clone()));
                }
                for finder in &spec.finders {
                    for other_finder in &other_spec.finders {
                        if finder.collides_with(other_finder) {
                            return Err(BrokerError::SignatureCollision(format!(
                                "'{}' claimed twice within library '{}'",
                                finder.attribute_name, library_name
                            )));
                        }
                    }
                }
            }
        }

        // 4. All clear: load every PIP and record the library.
        let mut pip_names = Vec::with_capacity(prepared.len());
        for (pip, spec) in prepared {
            pip_names.push(spec.name.clone());
            load_pip_locked(&mut indexes, pip, spec, &self.repository);
        }
        indexes
            .libraries
            .insert(library_name.to_string(), pip_names);
        tracing::info!(library = library_name, "library loaded");
        Ok(())
    }

    /// Unload every PIP of a library.
    pub fn unload_library(&self, library_name: &str) -> Result<(), BrokerError> {
        let pip_names = {
            let mut indexes = self.inner.lock();
            indexes
                .libraries
                .remove(library_name)
                .ok_or_else(|| BrokerError::UnknownLibrary(library_name.to_string()))?
        };
        for pip_name in pip_names {
            // Already-removed PIPs are tolerated during bulk unload.
            let _ = self.unload_policy_information_point(&pip_name);
        }
        Ok(())
    }

    pub fn loaded_library_names(&self) -> Vec<String> {
        self.inner.lock().libraries.keys().cloned().collect()
    }
}

// ──────────────────────────────────────────────
// Locked helpers
// ──────────────────────────────────────────────

fn validate_spec(spec: &PolicyInformationPointSpecification) -> Result<(), BrokerError> {
    if spec.name.is_empty() {
        return Err(BrokerError::InvalidSpecification(
            "policy information point name must not be empty".to_string(),
        ));
    }
    for finder in &spec.finders {
        if finder.attribute_name.is_empty() {
            return Err(BrokerError::InvalidSpecification(format!(
                "'{}' declares a finder with an empty attribute name",
                spec.name
            )));
        }
    }
    for (i, finder) in spec.finders.iter().enumerate() {
        for other in spec.finders.iter().skip(i + 1) {
            if finder.collides_with(other) {
                return Err(BrokerError::SignatureCollision(format!(
                    "'{}' claimed twice by '{}'",
                    finder.attribute_name, spec.name
                )));
            }
        }
    }
    Ok(())
}

fn check_pip(
    indexes: &Indexes,
    spec: &PolicyInformationPointSpecification,
) -> Result<(), BrokerError> {
    if indexes.pips.contains_key(&spec.name) {
        return Err(BrokerError::PipNameCollision(spec.name.clone()));
    }
    for finder in &spec.finders {
        check_finder_collision(indexes, finder)?;
    }
    Ok(())
}

fn check_finder_collision(
    indexes: &Indexes,
    finder: &AttributeFinderSpecification,
) -> Result<(), BrokerError> {
    if let Some(existing) = indexes.finders.get(&finder.attribute_name) {
        for registered in existing {
            if registered.spec.collides_with(finder) {
                return Err(BrokerError::SignatureCollision(format!(
                    "'{}' already served by '{}'",
                    finder.attribute_name, registered.pip_name
                )));
            }
        }
    }
    Ok(())
}

fn load_pip_locked(
    indexes: &mut Indexes,
    pip: Arc<dyn PolicyInformationPoint>,
    spec: PolicyInformationPointSpecification,
    repository: &Arc<AttributeRepository>,
) {
    indexes.pips.insert(spec.name.clone(), pip);
    let mut touched = Vec::new();
    for finder in spec.finders {
        touched.push(finder.attribute_name.clone());
        indexes
            .finders
            .entry(finder.attribute_name.clone())
            .or_default()
            .push(RegisteredFinder {
                pip_name: spec.name.clone(),
                spec: finder,
            });
    }
    for attribute_name in touched {
        reconcile(indexes, &attribute_name, repository);
    }
    tracing::info!(pip = %spec.name, "policy information point loaded");
}

/// Resolve the source for an invocation: exact finder wins, then the first
/// varargs finder, then the repository fallback.
fn resolve(
    indexes: &Indexes,
    invocation: &AttributeFinderInvocation,
    repository: &Arc<AttributeRepository>,
) -> StreamSource {
    let mut varargs: Option<&RegisteredFinder> = None;
    if let Some(finders) = indexes.finders.get(&invocation.attribute_name) {
        for finder in finders {
            match finder.spec.matches(invocation) {
                MatchKind::ExactMatch => {
                    if let Some(pip) = indexes.pips.get(&finder.pip_name) {
                        return StreamSource::Pip {
                            name: finder.pip_name.clone(),
                            pip: pip.clone(),
                        };
                    }
                }
                MatchKind::VarargsMatch => {
                    varargs.get_or_insert(finder);
                }
                MatchKind::NoMatch => {}
            }
        }
    }
    if let Some(finder) = varargs {
        if let Some(pip) = indexes.pips.get(&finder.pip_name) {
            return StreamSource::Pip {
                name: finder.pip_name.clone(),
                pip: pip.clone(),
            };
        }
    }
    StreamSource::Repository(repository.clone())
}

/// Reconnect every active stream on `attribute_name` whose resolved source
/// changed. Downstream subscribers never see a completion.
fn reconcile(indexes: &Indexes, attribute_name: &str, repository: &Arc<AttributeRepository>) {
    for (invocation, streams) in &indexes.active {
        if invocation.attribute_name != attribute_name {
            continue;
        }
        let source = resolve(indexes, invocation, repository);
        for stream in streams {
            if stream.current_pip().as_deref() != source.pip_name() {
                tracing::debug!(
                    attribute = %attribute_name,
                    to = source.pip_name().unwrap_or("<repository>"),
                    "hot-swapping attribute stream"
                );
                stream.connect(source.clone());
            }
        }
    }
}
