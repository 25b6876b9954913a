//! Compilation and evaluation contexts.
//!
//! The evaluation context is shared as an immutable [`ContextView`] passed
//! down the subscription chain; there is no thread-local ambient state.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use arbiter_broker::{AttributeBroker, InvocationContext};
use arbiter_core::Value;
use arbiter_interchange::AuthorizationSubscription;

use crate::compile::AttributeDefaults;
use crate::functions::FunctionBroker;

/// Configuration-scoped data: environment variables and the PDP's secrets.
///
/// `secrets` never appears in logs or error messages.
#[derive(Clone)]
pub struct PdpData {
    pub variables: IndexMap<String, Value>,
    pub secrets: Value,
}

impl Default for PdpData {
    fn default() -> Self {
        PdpData {
            variables: IndexMap::new(),
            secrets: Value::Undefined,
        }
    }
}

impl PdpData {
    pub fn new(variables: IndexMap<String, Value>, secrets: Value) -> Self {
        PdpData { variables, secrets }
    }
}

impl fmt::Debug for PdpData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdpData")
            .field("variables", &self.variables)
            .field("secrets", &"<redacted>")
            .finish()
    }
}

/// Everything the compiler needs: brokers plus configuration data.
#[derive(Clone)]
pub struct CompilationContext {
    pub configuration_id: String,
    pub functions: Arc<FunctionBroker>,
    pub attributes: Arc<AttributeBroker>,
    pub data: Arc<PdpData>,
    /// Timing defaults for attribute references without explicit options.
    pub attribute_defaults: AttributeDefaults,
}

impl CompilationContext {
    pub fn new(
        configuration_id: impl Into<String>,
        functions: Arc<FunctionBroker>,
        attributes: Arc<AttributeBroker>,
        data: Arc<PdpData>,
    ) -> Self {
        CompilationContext {
            configuration_id: configuration_id.into(),
            functions,
            attributes,
            data,
            attribute_defaults: AttributeDefaults::default(),
        }
    }
}

/// Everything evaluation needs for one subscription.
pub struct EvaluationContext {
    pub configuration_id: String,
    pub subscription: AuthorizationSubscription,
    pub functions: Arc<FunctionBroker>,
    pub attributes: Arc<AttributeBroker>,
    pub data: Arc<PdpData>,
}

/// Immutable shared view of the evaluation context, installed by the
/// caller and threaded through every stream subscription.
pub type ContextView = Arc<EvaluationContext>;

impl EvaluationContext {
    pub fn new(compilation: &CompilationContext, subscription: AuthorizationSubscription) -> Self {
        EvaluationContext {
            configuration_id: compilation.configuration_id.clone(),
            subscription,
            functions: compilation.functions.clone(),
            attributes: compilation.attributes.clone(),
            data: compilation.data.clone(),
        }
    }

    /// The invocation context attribute finders receive.
    pub fn invocation_context(&self) -> InvocationContext {
        InvocationContext::new(self.subscription.clone(), self.data.secrets.clone())
    }
}
