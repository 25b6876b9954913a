//! arbiter-core: value model, policy AST, and source-safety utilities.
//!
//! Everything the rest of the workspace agrees on lives here:
//!
//! - [`Value`] -- the tagged semantic value every operator consumes and
//!   produces, including first-class `Undefined` and `Error`
//! - [`TracedValue`] / [`SourceLocation`] -- values paired with the source
//!   spans that produced them
//! - AST types ([`Expression`], [`Document`], ...) -- the shape the
//!   external parser hands us; documents are also loadable from JSON
//! - Source safety: BOM-aware [`decode_source`], the [`bidi`] trojan-source
//!   guard, and the [`snippet`] error formatters
//! - [`DocumentError`] -- the per-document error record collected during
//!   compilation

pub mod ast;
pub mod bidi;
pub mod encoding;
pub mod error;
pub mod snippet;
pub mod trace;
pub mod value;

pub use ast::{
    AttributeOptions, BinaryOp, Document, Entitlement, Expression, Policy, PolicySet,
    SubscriptionField, UnaryOp,
};
pub use encoding::decode_source;
pub use error::{DocumentError, ErrorKind};
pub use trace::{SourceLocation, TracedValue};
pub use value::{ArrayBuilder, ObjectBuilder, Value};
