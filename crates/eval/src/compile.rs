//! Lowering the policy AST to compiled expressions.
//!
//! Compilation classifies every node by stratum and reduces what it can:
//! an operator over VALUE-stratum inputs is evaluated once, here, and the
//! result (or the resulting error) replaces the node. Environment
//! variables come from configuration data and fold to constants.

use std::time::Duration;

use arbiter_core::ast::{AttributeOptions, BinaryOp, Expression, UnaryOp};
use arbiter_core::{SourceLocation, Value};

use crate::compiled::{Compiled, PureExpression, PureNode, StreamExpression, StreamNode};
use crate::context::CompilationContext;
use crate::functions::FunctionInvocation;
use crate::operators;

/// Timing defaults applied to attribute references without explicit
/// options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeDefaults {
    pub initial_timeout: Duration,
    pub poll_interval: Duration,
    pub backoff: Duration,
    pub retries: u32,
}

impl Default for AttributeDefaults {
    fn default() -> Self {
        AttributeDefaults {
            initial_timeout: Duration::from_millis(3_000),
            poll_interval: Duration::from_millis(500),
            backoff: Duration::from_secs(30),
            retries: 3,
        }
    }
}

/// Compile one expression.
pub fn compile_expression(expression: &Expression, ctx: &CompilationContext) -> Compiled {
    match expression {
        Expression::Literal { value, .. } => Compiled::Value(value.clone()),

        Expression::Subscription { field, .. } => Compiled::Pure(PureExpression {
            node: PureNode::Subscription(*field),
            depends_on_subscription: true,
        }),

        // Environment variables are configuration data, known now.
        Expression::Variable { name, .. } => match ctx.data.variables.get(name) {
            Some(value) => Compiled::Value(value.clone()),
            None => Compiled::Value(Value::Undefined),
        },

        Expression::Unary {
            op,
            operand,
            location,
        } => compose_unary(*op, compile_expression(operand, ctx), location),

        Expression::Binary {
            op,
            left,
            right,
            location,
        } => compose_binary(
            *op,
            compile_expression(left, ctx),
            compile_expression(right, ctx),
            location,
        ),

        Expression::FieldAccess {
            object,
            field,
            location,
        } => compose_field_access(compile_expression(object, ctx), field.clone(), location),

        Expression::Index {
            target,
            index,
            location,
        } => compose_index(
            compile_expression(target, ctx),
            compile_expression(index, ctx),
            location,
        ),

        Expression::Recover {
            primary,
            fallback,
            location,
        } => compose_recover(
            compile_expression(primary, ctx),
            compile_expression(fallback, ctx),
            location,
        ),

        Expression::FunctionCall {
            name,
            arguments,
            location,
        } => compose_function(
            name.clone(),
            arguments.iter().map(|a| compile_expression(a, ctx)).collect(),
            ctx,
            location,
        ),

        Expression::Attribute {
            name,
            entity,
            arguments,
            options,
            fresh,
            location,
        } => compose_attribute(
            name.clone(),
            entity.as_deref().map(|e| compile_expression(e, ctx)),
            arguments.iter().map(|a| compile_expression(a, ctx)).collect(),
            options,
            *fresh,
            ctx,
            location,
        ),

        Expression::ArrayExpr { items, location } => compose_array(
            items.iter().map(|i| compile_expression(i, ctx)).collect(),
            location,
        ),

        Expression::ObjectExpr { entries, location } => compose_object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), compile_expression(v, ctx)))
                .collect(),
            location,
        ),
    }
}

// ──────────────────────────────────────────────
// Composition helpers
// ──────────────────────────────────────────────

/// Wrap a folded value; errors surface as the error variant.
fn fold(value: Value, location: &Option<SourceLocation>) -> Compiled {
    match value {
        Value::Error(message) => Compiled::Error {
            message,
            location: location.clone(),
        },
        other => Compiled::Value(other),
    }
}

/// Lower a non-stream compiled node into a pure node plus its
/// subscription dependency.
fn to_pure(compiled: Compiled) -> (PureNode, bool) {
    match compiled {
        Compiled::Value(value) => (PureNode::Constant(value), false),
        Compiled::Error { message, .. } => (PureNode::Constant(Value::Error(message)), false),
        Compiled::Pure(pure) => (pure.node, pure.depends_on_subscription),
        // Unreachable: callers branch to stream composition first.
        Compiled::Stream(_) => (
            PureNode::Constant(Value::error("stream expression in pure position")),
            false,
        ),
    }
}

fn is_stream(compiled: &Compiled) -> bool {
    matches!(compiled, Compiled::Stream(_))
}

fn compose_unary(op: UnaryOp, operand: Compiled, location: &Option<SourceLocation>) -> Compiled {
    if let Some(value) = operand.constant_value() {
        return fold(operators::apply_unary(op, &value), location);
    }
    if is_stream(&operand) {
        return Compiled::Stream(StreamExpression {
            node: StreamNode::Unary {
                op,
                operand: Box::new(operand),
            },
        });
    }
    let (node, depends) = to_pure(operand);
    Compiled::Pure(PureExpression {
        node: PureNode::Unary {
            op,
            operand: Box::new(node),
        },
        depends_on_subscription: depends,
    })
}

fn compose_binary(
    op: BinaryOp,
    left: Compiled,
    right: Compiled,
    location: &Option<SourceLocation>,
) -> Compiled {
    if let (Some(l), Some(r)) = (left.constant_value(), right.constant_value()) {
        return fold(operators::apply_binary(op, &l, &r), location);
    }
    if is_stream(&left) || is_stream(&right) {
        return Compiled::Stream(StreamExpression {
            node: StreamNode::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
        });
    }
    let (left_node, left_depends) = to_pure(left);
    let (right_node, right_depends) = to_pure(right);
    Compiled::Pure(PureExpression {
        node: PureNode::Binary {
            op,
            left: Box::new(left_node),
            right: Box::new(right_node),
        },
        depends_on_subscription: left_depends || right_depends,
    })
}

fn compose_field_access(
    object: Compiled,
    field: String,
    location: &Option<SourceLocation>,
) -> Compiled {
    if let Some(value) = object.constant_value() {
        return fold(operators::field_access(&value, &field), location);
    }
    if is_stream(&object) {
        return Compiled::Stream(StreamExpression {
            node: StreamNode::FieldAccess {
                object: Box::new(object),
                field,
            },
        });
    }
    let (node, depends) = to_pure(object);
    Compiled::Pure(PureExpression {
        node: PureNode::FieldAccess {
            object: Box::new(node),
            field,
        },
        depends_on_subscription: depends,
    })
}

fn compose_index(
    target: Compiled,
    index: Compiled,
    location: &Option<SourceLocation>,
) -> Compiled {
    if let (Some(t), Some(i)) = (target.constant_value(), index.constant_value()) {
        return fold(operators::index_value(&t, &i), location);
    }
    if is_stream(&target) || is_stream(&index) {
        return Compiled::Stream(StreamExpression {
            node: StreamNode::Index {
                target: Box::new(target),
                index: Box::new(index),
            },
        });
    }
    let (target_node, target_depends) = to_pure(target);
    let (index_node, index_depends) = to_pure(index);
    Compiled::Pure(PureExpression {
        node: PureNode::Index {
            target: Box::new(target_node),
            index: Box::new(index_node),
        },
        depends_on_subscription: target_depends || index_depends,
    })
}

fn compose_recover(
    primary: Compiled,
    fallback: Compiled,
    location: &Option<SourceLocation>,
) -> Compiled {
    if let Some(value) = primary.constant_value() {
        if !value.is_error() {
            return fold(value, location);
        }
        // A compile-time error recovers to the fallback outright.
        return fallback;
    }
    if is_stream(&primary) || is_stream(&fallback) {
        return Compiled::Stream(StreamExpression {
            node: StreamNode::Recover {
                primary: Box::new(primary),
                fallback: Box::new(fallback),
            },
        });
    }
    let (primary_node, primary_depends) = to_pure(primary);
    let (fallback_node, fallback_depends) = to_pure(fallback);
    Compiled::Pure(PureExpression {
        node: PureNode::Recover {
            primary: Box::new(primary_node),
            fallback: Box::new(fallback_node),
        },
        depends_on_subscription: primary_depends || fallback_depends,
    })
}

fn compose_function(
    name: String,
    arguments: Vec<Compiled>,
    ctx: &CompilationContext,
    location: &Option<SourceLocation>,
) -> Compiled {
    if arguments.iter().all(|a| a.constant_value().is_some()) {
        let mut values = Vec::with_capacity(arguments.len());
        for argument in &arguments {
            match argument.constant_value() {
                Some(value) if value.is_error() => return fold(value, location),
                Some(value) => values.push(value),
                None => {}
            }
        }
        return fold(
            ctx.functions.evaluate(&FunctionInvocation {
                function_name: name,
                arguments: values,
            }),
            location,
        );
    }
    if arguments.iter().any(is_stream) {
        return Compiled::Stream(StreamExpression {
            node: StreamNode::Function { name, arguments },
        });
    }
    let mut depends = false;
    let mut nodes = Vec::with_capacity(arguments.len());
    for argument in arguments {
        let (node, argument_depends) = to_pure(argument);
        depends |= argument_depends;
        nodes.push(node);
    }
    Compiled::Pure(PureExpression {
        node: PureNode::Function {
            name,
            arguments: nodes,
        },
        depends_on_subscription: depends,
    })
}

#[allow(clippy::too_many_arguments)]
fn compose_attribute(
    name: String,
    entity: Option<Compiled>,
    arguments: Vec<Compiled>,
    options: &AttributeOptions,
    fresh: bool,
    ctx: &CompilationContext,
    location: &Option<SourceLocation>,
) -> Compiled {
    // The invocation is an immutable stream key formed once per
    // subscription, so entities and arguments must not be streams.
    if entity.as_ref().map(is_stream).unwrap_or(false) || arguments.iter().any(is_stream) {
        return Compiled::error(
            format!(
                "attribute '{}': entity and arguments must not contain attribute references",
                name
            ),
            location.clone(),
        );
    }
    let defaults = ctx.attribute_defaults;
    Compiled::Stream(StreamExpression {
        node: StreamNode::Attribute {
            name,
            entity: entity.map(Box::new),
            arguments,
            initial_timeout: options
                .initial_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_timeout),
            poll_interval: options
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            backoff: options
                .backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff),
            retries: options.retries.unwrap_or(defaults.retries),
            fresh,
            location: location.clone(),
        },
    })
}

fn compose_array(items: Vec<Compiled>, location: &Option<SourceLocation>) -> Compiled {
    if items.iter().all(|i| i.constant_value().is_some()) {
        let mut values = Vec::with_capacity(items.len());
        for item in &items {
            match item.constant_value() {
                Some(value) if value.is_error() => return fold(value, location),
                Some(value) => values.push(value),
                None => {}
            }
        }
        return Compiled::Value(Value::Array(values));
    }
    if items.iter().any(is_stream) {
        return Compiled::Stream(StreamExpression {
            node: StreamNode::Array(items),
        });
    }
    let mut depends = false;
    let mut nodes = Vec::with_capacity(items.len());
    for item in items {
        let (node, item_depends) = to_pure(item);
        depends |= item_depends;
        nodes.push(node);
    }
    Compiled::Pure(PureExpression {
        node: PureNode::Array(nodes),
        depends_on_subscription: depends,
    })
}

fn compose_object(
    entries: Vec<(String, Compiled)>,
    location: &Option<SourceLocation>,
) -> Compiled {
    if entries.iter().all(|(_, v)| v.constant_value().is_some()) {
        let mut out = indexmap::IndexMap::with_capacity(entries.len());
        for (key, entry) in &entries {
            match entry.constant_value() {
                Some(value) if value.is_error() => return fold(value, location),
                Some(value) => {
                    out.insert(key.clone(), value);
                }
                None => {}
            }
        }
        return Compiled::Value(Value::Object(out));
    }
    if entries.iter().any(|(_, v)| is_stream(v)) {
        let (keys, values) = entries.into_iter().unzip();
        return Compiled::Stream(StreamExpression {
            node: StreamNode::Object { keys, values },
        });
    }
    let mut depends = false;
    let mut nodes = Vec::with_capacity(entries.len());
    for (key, entry) in entries {
        let (node, entry_depends) = to_pure(entry);
        depends |= entry_depends;
        nodes.push((key, node));
    }
    Compiled::Pure(PureExpression {
        node: PureNode::Object(nodes),
        depends_on_subscription: depends,
    })
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
