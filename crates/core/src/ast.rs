//! Policy document AST.
//!
//! The grammar and parser live outside this workspace; the parser hands the
//! engine these types. Documents are also loadable from JSON (serde), the
//! same way the engine's tooling stores them on disk.
//!
//! Every node may carry a [`SourceLocation`] so compile errors and traced
//! values can point back into the document.

use serde::{Deserialize, Serialize};

use crate::trace::SourceLocation;
use crate::value::Value;

// ──────────────────────────────────────────────
// Expressions
// ──────────────────────────────────────────────

/// The subscription field an expression reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionField {
    Subject,
    Action,
    Resource,
    Environment,
    Secrets,
}

impl SubscriptionField {
    pub fn name(&self) -> &'static str {
        match self {
            SubscriptionField::Subject => "subject",
            SubscriptionField::Action => "action",
            SubscriptionField::Resource => "resource",
            SubscriptionField::Environment => "environment",
            SubscriptionField::Secrets => "secrets",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Neg,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

/// Timing options on an attribute finder reference.
///
/// All durations are milliseconds; absent fields fall back to broker
/// defaults at invocation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AttributeOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

/// An expression node as produced by the parser.
///
/// Serialization is externally tagged (`{"binary": {...}}`); internal
/// tagging would buffer node payloads through serde's content machinery,
/// which does not round-trip arbitrary-precision numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    /// A literal value, including array/object literals already reduced by
    /// the parser.
    Literal {
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<SourceLocation>,
    },
    /// Read of a subscription field (`subject`, `action`, ...).
    Subscription {
        field: SubscriptionField,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<SourceLocation>,
    },
    /// Read of an environment variable from PDP data.
    Variable {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<SourceLocation>,
    },
    /// `object.field`
    FieldAccess {
        object: Box<Expression>,
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<SourceLocation>,
    },
    /// `target[index]`
    Index {
        target: Box<Expression>,
        index: Box<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<SourceLocation>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<SourceLocation>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<SourceLocation>,
    },
    /// Error recovery: evaluates to the fallback when the primary is an
    /// error value.
    Recover {
        primary: Box<Expression>,
        fallback: Box<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<SourceLocation>,
    },
    /// Pure function call dispatched through the function broker.
    FunctionCall {
        name: String,
        #[serde(default)]
        arguments: Vec<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<SourceLocation>,
    },
    /// Attribute finder reference: `entity.<name(args)>` or the environment
    /// form `<name(args)>` with no entity.
    Attribute {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entity: Option<Box<Expression>>,
        #[serde(default)]
        arguments: Vec<Expression>,
        #[serde(default)]
        options: AttributeOptions,
        #[serde(default)]
        fresh: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<SourceLocation>,
    },
    /// `[e1, e2, ...]` with non-literal items.
    ArrayExpr {
        items: Vec<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<SourceLocation>,
    },
    /// `{k1: e1, ...}` with non-literal entries; insertion order preserved.
    ObjectExpr {
        entries: Vec<(String, Expression)>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<SourceLocation>,
    },
}

impl Expression {
    pub fn literal(value: Value) -> Expression {
        Expression::Literal {
            value,
            location: None,
        }
    }

    pub fn subscription(field: SubscriptionField) -> Expression {
        Expression::Subscription {
            field,
            location: None,
        }
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Expression {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            location: None,
        }
    }

    pub fn unary(op: UnaryOp, operand: Expression) -> Expression {
        Expression::Unary {
            op,
            operand: Box::new(operand),
            location: None,
        }
    }

    pub fn field(object: Expression, field: impl Into<String>) -> Expression {
        Expression::FieldAccess {
            object: Box::new(object),
            field: field.into(),
            location: None,
        }
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            Expression::Literal { location, .. }
            | Expression::Subscription { location, .. }
            | Expression::Variable { location, .. }
            | Expression::FieldAccess { location, .. }
            | Expression::Index { location, .. }
            | Expression::Unary { location, .. }
            | Expression::Binary { location, .. }
            | Expression::Recover { location, .. }
            | Expression::FunctionCall { location, .. }
            | Expression::Attribute { location, .. }
            | Expression::ArrayExpr { location, .. }
            | Expression::ObjectExpr { location, .. } => location.as_ref(),
        }
    }
}

// ──────────────────────────────────────────────
// Documents
// ──────────────────────────────────────────────

/// The concrete decision a policy produces when applicable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entitlement {
    Permit,
    Deny,
}

/// Priority-based combining algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CombiningAlgorithm {
    PermitOverrides,
    DenyOverrides,
}

/// A single policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub entitlement: Entitlement,
    /// Applicability test; absent means the policy always applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Expression>,
    /// Conjunction of body conditions.
    #[serde(default)]
    pub where_clauses: Vec<Expression>,
    #[serde(default)]
    pub obligations: Vec<Expression>,
    #[serde(default)]
    pub advice: Vec<Expression>,
    /// Optional resource transformation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Expression>,
}

/// A policy set composing child policies under a combining algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySet {
    pub name: String,
    pub algorithm: CombiningAlgorithm,
    pub policies: Vec<Policy>,
}

/// A top-level policy document: a single policy or a policy set.
/// Externally tagged like [`Expression`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Document {
    Policy(Policy),
    PolicySet(PolicySet),
}

impl Document {
    pub fn name(&self) -> &str {
        match self {
            Document::Policy(p) => &p.name,
            Document::PolicySet(s) => &s.name,
        }
    }
}
