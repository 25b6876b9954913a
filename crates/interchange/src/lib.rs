//! arbiter-interchange: subscription and decision wire forms.
//!
//! The shared record types exchanged between policy enforcement points and
//! the PDP. Value-typed fields serialize through the lossless kind-tagged
//! wire form from `arbiter-core`, so `Undefined` and `Error` survive the
//! round trip; [`AuthorizationSubscription::from_plain_json`] accepts the
//! plain-JSON shape clients usually send.

pub mod decision;
pub mod subscription;

pub use decision::{AuthorizationDecision, Decision, IdentifiableAuthorizationDecision};
pub use subscription::{AuthorizationSubscription, MultiAuthorizationSubscription};
