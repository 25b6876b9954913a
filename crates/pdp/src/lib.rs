//! arbiter-pdp: the policy decision point façade.
//!
//! Accepts authorization subscriptions, orchestrates the function and
//! attribute brokers, and emits a continuously updating decision stream.
//! The PDP owns its brokers; there is no global state.

pub mod config;
pub mod documents;
pub mod pdp;

pub use config::PdpConfiguration;
pub use documents::{compile_document, load_document};
pub use pdp::PolicyDecisionPoint;
