//! The policy information point trait.
//!
//! PIPs register explicitly by exposing their [`specification()`]; there is
//! no runtime introspection. A PIP produces one live value stream per
//! invocation; errors inside the stream are emitted as error values, never
//! as stream termination.
//!
//! [`specification()`]: PolicyInformationPoint::specification

use async_trait::async_trait;

use crate::invocation::AttributeFinderInvocation;
use crate::spec::PolicyInformationPointSpecification;
use crate::ValueStream;

/// A source of live attribute values.
#[async_trait]
pub trait PolicyInformationPoint: Send + Sync + 'static {
    /// Registration metadata: PIP name and the finders it serves.
    fn specification(&self) -> PolicyInformationPointSpecification;

    /// Open a value stream for the invocation.
    ///
    /// Called once per upstream connection; the broker multiplexes the
    /// result across subscribers and re-invokes it on reconnect.
    async fn attribute_stream(&self, invocation: &AttributeFinderInvocation) -> ValueStream;
}
