//! arbiter-broker: the reactive attribute broker and attribute repository.
//!
//! Attribute references in policies resolve to live external streams
//! produced by Policy Information Points (PIPs). This crate keeps at most
//! one upstream stream alive per [`AttributeFinderInvocation`], shares it
//! across all current subscribers, reconnects it when PIP registrations
//! change (hot-swap), and tears it down a grace period after the last
//! subscriber leaves.
//!
//! The [`AttributeRepository`] is the in-memory fallback source: published
//! entity attributes with TTL expiry, watchable as streams.

pub mod broker;
pub mod error;
pub mod invocation;
pub mod pip;
pub mod repository;
pub mod spec;
pub mod stream;

pub use broker::AttributeBroker;
pub use error::{BrokerError, RepositoryError};
pub use invocation::{AttributeFinderInvocation, InvocationContext};
pub use pip::PolicyInformationPoint;
pub use repository::{
    AttributeKey, AttributeRepository, ExpiryStrategy, PersistedAttribute, Ttl,
};
pub use spec::{AttributeFinderSpecification, MatchKind, PolicyInformationPointSpecification};
pub use stream::AttributeStream;

use arbiter_core::TracedValue;

/// A boxed stream of traced values; the currency of every attribute source.
pub type ValueStream = futures::stream::BoxStream<'static, TracedValue>;
