//! Compiled expression variants.
//!
//! Every compiled node is one of four things:
//!
//! - [`Compiled::Value`] -- already reduced; evaluation is identity
//! - [`Compiled::Error`] -- a compile-time error surfaced as a value
//! - [`Compiled::Pure`] -- evaluates against an [`EvaluationContext`] and
//!   declares whether it reads the subscription
//! - [`Compiled::Stream`] -- produces a lazy sequence of traced values,
//!   reading the context from the [`ContextView`] installed by the caller
//!
//! Stream composites follow `combine_latest` rules: each emission combines
//! the latest value of every input, error values occupy their slot without
//! terminating anything, and completion requires all inputs to complete.

use std::time::Duration;

use futures::StreamExt;

use arbiter_broker::{AttributeFinderInvocation, ValueStream};
use arbiter_core::ast::{BinaryOp, SubscriptionField, UnaryOp};
use arbiter_core::{SourceLocation, TracedValue, Value};

use crate::combinators::combine_latest;
use crate::context::{ContextView, EvaluationContext};
use crate::functions::FunctionInvocation;
use crate::operators;
use crate::stratum::Stratum;

/// A compiled expression.
#[derive(Debug, Clone)]
pub enum Compiled {
    Value(Value),
    Error {
        message: String,
        location: Option<SourceLocation>,
    },
    Pure(PureExpression),
    Stream(StreamExpression),
}

impl Compiled {
    pub fn error(message: impl Into<String>, location: Option<SourceLocation>) -> Compiled {
        Compiled::Error {
            message: message.into(),
            location,
        }
    }

    pub fn stratum(&self) -> Stratum {
        match self {
            Compiled::Value(_) | Compiled::Error { .. } => Stratum::Value,
            Compiled::Pure(p) => {
                if p.depends_on_subscription {
                    Stratum::PureSubscription
                } else {
                    Stratum::PureNonSubscription
                }
            }
            Compiled::Stream(_) => Stratum::Stream,
        }
    }

    /// The compile-time value, for VALUE-stratum nodes.
    pub fn constant_value(&self) -> Option<Value> {
        match self {
            Compiled::Value(v) => Some(v.clone()),
            Compiled::Error { message, .. } => Some(Value::Error(message.clone())),
            _ => None,
        }
    }

    /// Evaluate a non-stream node. Calling this on a stream node is a
    /// compiler bug and yields an error value rather than a panic.
    pub fn evaluate(&self, ctx: &EvaluationContext) -> Value {
        match self {
            Compiled::Value(v) => v.clone(),
            Compiled::Error { message, .. } => Value::Error(message.clone()),
            Compiled::Pure(p) => p.evaluate(ctx),
            Compiled::Stream(_) => {
                Value::error("stream expression evaluated in a pure context")
            }
        }
    }

    /// The node as a stream. Non-stream nodes emit once and complete;
    /// under `combine_latest` their value is then retained.
    pub fn stream(&self, view: &ContextView) -> ValueStream {
        match self {
            Compiled::Value(v) => {
                let value = v.clone();
                Box::pin(futures::stream::once(async move {
                    TracedValue::untraced(value)
                }))
            }
            Compiled::Error { message, location } => {
                let traced = TracedValue::new(
                    Value::Error(message.clone()),
                    location.iter().cloned().collect(),
                );
                Box::pin(futures::stream::once(async move { traced }))
            }
            Compiled::Pure(p) => {
                let expression = p.clone();
                let view = view.clone();
                Box::pin(futures::stream::once(async move {
                    TracedValue::untraced(expression.evaluate(&view))
                }))
            }
            Compiled::Stream(s) => s.stream(view),
        }
    }
}

// ──────────────────────────────────────────────
// Pure expressions
// ──────────────────────────────────────────────

/// A pure operator tree evaluated once per context.
#[derive(Debug, Clone)]
pub struct PureExpression {
    pub(crate) node: PureNode,
    pub(crate) depends_on_subscription: bool,
}

impl PureExpression {
    pub fn is_depending_on_subscription(&self) -> bool {
        self.depends_on_subscription
    }

    pub fn evaluate(&self, ctx: &EvaluationContext) -> Value {
        eval_pure(&self.node, ctx)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum PureNode {
    Constant(Value),
    Subscription(SubscriptionField),
    Unary {
        op: UnaryOp,
        operand: Box<PureNode>,
    },
    Binary {
        op: BinaryOp,
        left: Box<PureNode>,
        right: Box<PureNode>,
    },
    FieldAccess {
        object: Box<PureNode>,
        field: String,
    },
    Index {
        target: Box<PureNode>,
        index: Box<PureNode>,
    },
    Recover {
        primary: Box<PureNode>,
        fallback: Box<PureNode>,
    },
    Function {
        name: String,
        arguments: Vec<PureNode>,
    },
    Array(Vec<PureNode>),
    Object(Vec<(String, PureNode)>),
}

fn eval_pure(node: &PureNode, ctx: &EvaluationContext) -> Value {
    match node {
        PureNode::Constant(v) => v.clone(),

        PureNode::Subscription(field) => subscription_value(ctx, *field),

        PureNode::Unary { op, operand } => {
            operators::apply_unary(*op, &eval_pure(operand, ctx))
        }

        PureNode::Binary { op, left, right } => {
            operators::apply_binary(*op, &eval_pure(left, ctx), &eval_pure(right, ctx))
        }

        PureNode::FieldAccess { object, field } => {
            operators::field_access(&eval_pure(object, ctx), field)
        }

        PureNode::Index { target, index } => {
            operators::index_value(&eval_pure(target, ctx), &eval_pure(index, ctx))
        }

        PureNode::Recover { primary, fallback } => {
            let value = eval_pure(primary, ctx);
            if value.is_error() {
                eval_pure(fallback, ctx)
            } else {
                value
            }
        }

        PureNode::Function { name, arguments } => {
            let mut values = Vec::with_capacity(arguments.len());
            for argument in arguments {
                let value = eval_pure(argument, ctx);
                if value.is_error() {
                    return value;
                }
                values.push(value);
            }
            ctx.functions.evaluate(&FunctionInvocation {
                function_name: name.clone(),
                arguments: values,
            })
        }

        PureNode::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                let value = eval_pure(item, ctx);
                if value.is_error() {
                    return value;
                }
                values.push(value);
            }
            Value::Array(values)
        }

        PureNode::Object(entries) => {
            let mut out = indexmap::IndexMap::with_capacity(entries.len());
            for (key, entry) in entries {
                let value = eval_pure(entry, ctx);
                if value.is_error() {
                    return value;
                }
                out.insert(key.clone(), value);
            }
            Value::Object(out)
        }
    }
}

fn subscription_value(ctx: &EvaluationContext, field: SubscriptionField) -> Value {
    match field {
        SubscriptionField::Subject => ctx.subscription.subject.clone(),
        SubscriptionField::Action => ctx.subscription.action.clone(),
        SubscriptionField::Resource => ctx.subscription.resource.clone(),
        SubscriptionField::Environment => ctx.subscription.environment.clone(),
        SubscriptionField::Secrets => ctx.subscription.secrets.clone(),
    }
}

// ──────────────────────────────────────────────
// Stream expressions
// ──────────────────────────────────────────────

/// A reactive operator tree driven by attribute streams.
#[derive(Debug, Clone)]
pub struct StreamExpression {
    pub(crate) node: StreamNode,
}

impl StreamExpression {
    pub fn stream(&self, view: &ContextView) -> ValueStream {
        stream_node(&self.node, view)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum StreamNode {
    /// An attribute finder reference. Entity and arguments are non-stream
    /// by construction; timing options are already resolved to durations.
    Attribute {
        name: String,
        entity: Option<Box<Compiled>>,
        arguments: Vec<Compiled>,
        initial_timeout: Duration,
        poll_interval: Duration,
        backoff: Duration,
        retries: u32,
        fresh: bool,
        location: Option<SourceLocation>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Compiled>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Compiled>,
        right: Box<Compiled>,
    },
    FieldAccess {
        object: Box<Compiled>,
        field: String,
    },
    Index {
        target: Box<Compiled>,
        index: Box<Compiled>,
    },
    Recover {
        primary: Box<Compiled>,
        fallback: Box<Compiled>,
    },
    Function {
        name: String,
        arguments: Vec<Compiled>,
    },
    Array(Vec<Compiled>),
    Object {
        keys: Vec<String>,
        values: Vec<Compiled>,
    },
}

fn stream_node(node: &StreamNode, view: &ContextView) -> ValueStream {
    match node {
        StreamNode::Attribute {
            name,
            entity,
            arguments,
            initial_timeout,
            poll_interval,
            backoff,
            retries,
            fresh,
            location,
        } => attribute_stream(
            view,
            name,
            entity.as_deref(),
            arguments,
            *initial_timeout,
            *poll_interval,
            *backoff,
            *retries,
            *fresh,
            location.clone(),
        ),

        StreamNode::Unary { op, operand } => {
            let op = *op;
            Box::pin(operand.stream(view).map(move |traced| {
                let value = operators::apply_unary(op, &traced.value);
                traced.with_value(value)
            }))
        }

        StreamNode::Binary { op, left, right } => {
            let op = *op;
            combined(vec![left.stream(view), right.stream(view)], move |snapshot| {
                operators::apply_binary(op, &snapshot[0].value, &snapshot[1].value)
            })
        }

        StreamNode::FieldAccess { object, field } => {
            let field = field.clone();
            Box::pin(object.stream(view).map(move |traced| {
                let value = operators::field_access(&traced.value, &field);
                traced.with_value(value)
            }))
        }

        StreamNode::Index { target, index } => combined(
            vec![target.stream(view), index.stream(view)],
            |snapshot| operators::index_value(&snapshot[0].value, &snapshot[1].value),
        ),

        StreamNode::Recover { primary, fallback } => Box::pin(
            combine_latest(vec![primary.stream(view), fallback.stream(view)]).map(|snapshot| {
                if snapshot[0].value.is_error() {
                    snapshot[1].clone()
                } else {
                    snapshot[0].clone()
                }
            }),
        ),

        StreamNode::Function { name, arguments } => {
            let name = name.clone();
            let functions = view.functions.clone();
            combined(
                arguments.iter().map(|a| a.stream(view)).collect(),
                move |snapshot| {
                    let mut values = Vec::with_capacity(snapshot.len());
                    for traced in snapshot {
                        if traced.value.is_error() {
                            return traced.value.clone();
                        }
                        values.push(traced.value.clone());
                    }
                    functions.evaluate(&FunctionInvocation {
                        function_name: name.clone(),
                        arguments: values,
                    })
                },
            )
        }

        StreamNode::Array(items) => combined(
            items.iter().map(|i| i.stream(view)).collect(),
            |snapshot| {
                let mut values = Vec::with_capacity(snapshot.len());
                for traced in snapshot {
                    if traced.value.is_error() {
                        return traced.value.clone();
                    }
                    values.push(traced.value.clone());
                }
                Value::Array(values)
            },
        ),

        StreamNode::Object { keys, values } => {
            let keys = keys.clone();
            combined(
                values.iter().map(|v| v.stream(view)).collect(),
                move |snapshot| {
                    let mut out = indexmap::IndexMap::with_capacity(snapshot.len());
                    for (key, traced) in keys.iter().zip(snapshot) {
                        if traced.value.is_error() {
                            return traced.value.clone();
                        }
                        out.insert(key.clone(), traced.value.clone());
                    }
                    Value::Object(out)
                },
            )
        }
    }
}

/// Combine input streams and map each snapshot through an operator,
/// concatenating the inputs' traces in order.
fn combined(
    streams: Vec<ValueStream>,
    apply: impl Fn(&[TracedValue]) -> Value + Send + 'static,
) -> ValueStream {
    Box::pin(combine_latest(streams).map(move |snapshot| {
        let value = apply(&snapshot);
        let trace: Vec<SourceLocation> = snapshot
            .iter()
            .flat_map(|traced| traced.trace.iter().cloned())
            .collect();
        TracedValue::new(value, trace)
    }))
}

#[allow(clippy::too_many_arguments)]
fn attribute_stream(
    view: &ContextView,
    name: &str,
    entity: Option<&Compiled>,
    arguments: &[Compiled],
    initial_timeout: Duration,
    poll_interval: Duration,
    backoff: Duration,
    retries: u32,
    fresh: bool,
    location: Option<SourceLocation>,
) -> ValueStream {
    let entity_value = match entity {
        Some(expression) => {
            let value = expression.evaluate(view);
            if value.is_error() {
                return error_stream(value, location);
            }
            if value.is_undefined() {
                return error_stream(
                    Value::error(format!("attribute '{}': entity is undefined", name)),
                    location,
                );
            }
            Some(value)
        }
        None => None,
    };

    let mut argument_values = Vec::with_capacity(arguments.len());
    for argument in arguments {
        let value = argument.evaluate(view);
        if value.is_error() {
            return error_stream(value, location);
        }
        argument_values.push(value);
    }

    let invocation = AttributeFinderInvocation {
        configuration_id: view.configuration_id.clone(),
        attribute_name: name.to_string(),
        entity: entity_value,
        arguments: argument_values,
        initial_timeout,
        poll_interval,
        backoff,
        retries,
        fresh,
        ctx: view.invocation_context(),
    };

    let upstream = view.attributes.attribute_stream(&invocation);
    match location {
        Some(location) => Box::pin(upstream.map(move |mut traced| {
            traced.trace.push(location.clone());
            traced
        })),
        None => upstream,
    }
}

fn error_stream(value: Value, location: Option<SourceLocation>) -> ValueStream {
    let traced = TracedValue::new(value, location.into_iter().collect());
    Box::pin(futures::stream::once(async move { traced }))
}
