//! The function broker.
//!
//! Pure functions from registered libraries, dispatched by fully qualified
//! name and arity (exact signatures before variadic ones). Functions never
//! block, perform I/O, or observe time; the broker is stateless after
//! construction and needs no locking on the hot path.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;

use arbiter_core::Value;

/// A pure function body.
pub type FunctionHandler = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

#[derive(Clone)]
struct FunctionSignature {
    arity: usize,
    variadic: bool,
    handler: FunctionHandler,
}

/// Library registration failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FunctionError {
    #[error("function library already registered: {0}")]
    LibraryAlreadyRegistered(String),
}

/// A function call by fully qualified name.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInvocation {
    pub function_name: String,
    pub arguments: Vec<Value>,
}

/// A named collection of functions, registered as a unit.
pub struct FunctionLibrary {
    name: String,
    functions: Vec<(String, FunctionSignature)>,
}

impl FunctionLibrary {
    pub fn new(name: impl Into<String>) -> Self {
        FunctionLibrary {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    /// Register a function with a fixed arity.
    pub fn function(
        mut self,
        name: impl Into<String>,
        arity: usize,
        handler: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.functions.push((
            name.into(),
            FunctionSignature {
                arity,
                variadic: false,
                handler: Arc::new(handler),
            },
        ));
        self
    }

    /// Register a variadic function accepting at least `min_arity` arguments.
    pub fn variadic(
        mut self,
        name: impl Into<String>,
        min_arity: usize,
        handler: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.functions.push((
            name.into(),
            FunctionSignature {
                arity: min_arity,
                variadic: true,
                handler: Arc::new(handler),
            },
        ));
        self
    }
}

/// Stateless dispatcher for pure functions.
#[derive(Default)]
pub struct FunctionBroker {
    index: HashMap<String, Vec<FunctionSignature>>,
    libraries: Vec<String>,
}

impl FunctionBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker with the built-in `standard` library loaded.
    pub fn with_standard_library() -> Self {
        let mut broker = FunctionBroker::new();
        // Registration of the built-in library cannot collide in an empty broker.
        let _ = broker.register_library(standard_library());
        broker
    }

    /// Register all functions of a library under `<library>.<function>`.
    pub fn register_library(&mut self, library: FunctionLibrary) -> Result<(), FunctionError> {
        if self.libraries.contains(&library.name) {
            return Err(FunctionError::LibraryAlreadyRegistered(library.name));
        }
        for (function_name, signature) in library.functions {
            let qualified = format!("{}.{}", library.name, function_name);
            self.index.entry(qualified).or_default().push(signature);
        }
        self.libraries.push(library.name);
        Ok(())
    }

    pub fn library_names(&self) -> &[String] {
        &self.libraries
    }

    /// Evaluate an invocation. Unknown names and unmatched arities return
    /// error values, never panic.
    pub fn evaluate(&self, invocation: &FunctionInvocation) -> Value {
        let Some(signatures) = self.index.get(&invocation.function_name) else {
            return Value::error(format!(
                "unknown function: {}",
                invocation.function_name
            ));
        };
        let argc = invocation.arguments.len();
        // Exact arity first, variadic last.
        let exact = signatures
            .iter()
            .find(|s| !s.variadic && s.arity == argc);
        let chosen = exact.or_else(|| {
            signatures
                .iter()
                .find(|s| s.variadic && argc >= s.arity)
        });
        match chosen {
            Some(signature) => (signature.handler)(&invocation.arguments),
            None => Value::error(format!(
                "function {} does not accept {} arguments",
                invocation.function_name, argc
            )),
        }
    }
}

// ──────────────────────────────────────────────
// Standard library
// ──────────────────────────────────────────────

fn standard_library() -> FunctionLibrary {
    FunctionLibrary::new("standard")
        .function("length", 1, |args| match &args[0] {
            Value::Text(s) => Value::number(s.chars().count() as i64),
            Value::Array(items) => Value::number(items.len() as i64),
            Value::Object(entries) => Value::number(entries.len() as i64),
            other => Value::error(format!(
                "standard.length expects text, array, or object, got {}",
                other.type_name()
            )),
        })
        .function("upper", 1, |args| match &args[0] {
            Value::Text(s) => Value::text(s.to_uppercase()),
            other => Value::error(format!(
                "standard.upper expects text, got {}",
                other.type_name()
            )),
        })
        .function("lower", 1, |args| match &args[0] {
            Value::Text(s) => Value::text(s.to_lowercase()),
            other => Value::error(format!(
                "standard.lower expects text, got {}",
                other.type_name()
            )),
        })
        .variadic("concat", 0, |args| {
            let mut out = String::new();
            for arg in args {
                match arg {
                    Value::Text(s) => out.push_str(s),
                    other => {
                        return Value::error(format!(
                            "standard.concat expects text arguments, got {}",
                            other.type_name()
                        ))
                    }
                }
            }
            Value::text(out)
        })
        .variadic("min", 1, |args| fold_numeric(args, "standard.min", |a, b| a.min(b)))
        .variadic("max", 1, |args| fold_numeric(args, "standard.max", |a, b| a.max(b)))
}

fn fold_numeric(args: &[Value], name: &str, pick: fn(Decimal, Decimal) -> Decimal) -> Value {
    let mut acc: Option<Decimal> = None;
    for arg in args {
        match arg {
            Value::Number(n) => acc = Some(acc.map_or(*n, |a| pick(a, *n))),
            other => {
                return Value::error(format!(
                    "{} expects number arguments, got {}",
                    name,
                    other.type_name()
                ))
            }
        }
    }
    match acc {
        Some(n) => Value::Number(n),
        None => Value::error(format!("{} requires at least one argument", name)),
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(broker: &FunctionBroker, name: &str, args: Vec<Value>) -> Value {
        broker.evaluate(&FunctionInvocation {
            function_name: name.to_string(),
            arguments: args,
        })
    }

    #[test]
    fn unknown_function_is_an_error_value() {
        let broker = FunctionBroker::new();
        let result = call(&broker, "nope.missing", vec![]);
        assert_eq!(result, Value::error("unknown function: nope.missing"));
    }

    #[test]
    fn standard_length() {
        let broker = FunctionBroker::with_standard_library();
        assert_eq!(
            call(&broker, "standard.length", vec![Value::text("abcd")]),
            Value::number(4)
        );
        assert_eq!(
            call(
                &broker,
                "standard.length",
                vec![Value::Array(vec![Value::Null, Value::Null])]
            ),
            Value::number(2)
        );
    }

    #[test]
    fn standard_concat_is_variadic() {
        let broker = FunctionBroker::with_standard_library();
        assert_eq!(
            call(
                &broker,
                "standard.concat",
                vec![Value::text("a"), Value::text("b"), Value::text("c")]
            ),
            Value::text("abc")
        );
        assert_eq!(call(&broker, "standard.concat", vec![]), Value::text(""));
    }

    #[test]
    fn standard_min_max() {
        let broker = FunctionBroker::with_standard_library();
        assert_eq!(
            call(
                &broker,
                "standard.min",
                vec![Value::number(3), Value::number(1), Value::number(2)]
            ),
            Value::number(1)
        );
        assert_eq!(
            call(&broker, "standard.max", vec![Value::number(3), Value::number(7)]),
            Value::number(7)
        );
    }

    #[test]
    fn exact_signature_wins_over_variadic() {
        let mut broker = FunctionBroker::new();
        broker
            .register_library(
                FunctionLibrary::new("t")
                    .variadic("pick", 0, |_| Value::text("variadic"))
                    .function("pick", 1, |_| Value::text("exact")),
            )
            .unwrap();
        assert_eq!(call(&broker, "t.pick", vec![Value::Null]), Value::text("exact"));
        assert_eq!(call(&broker, "t.pick", vec![]), Value::text("variadic"));
    }

    #[test]
    fn duplicate_library_rejected() {
        let mut broker = FunctionBroker::new();
        broker.register_library(FunctionLibrary::new("lib")).unwrap();
        let err = broker
            .register_library(FunctionLibrary::new("lib"))
            .unwrap_err();
        assert_eq!(err, FunctionError::LibraryAlreadyRegistered("lib".to_string()));
    }

    #[test]
    fn arity_mismatch_is_an_error_value() {
        let broker = FunctionBroker::with_standard_library();
        let result = call(&broker, "standard.upper", vec![]);
        assert!(matches!(result, Value::Error(m) if m.contains("0 arguments")));
    }
}
