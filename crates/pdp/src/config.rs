//! PDP configuration.

use std::fmt;

use indexmap::IndexMap;

use arbiter_core::ast::CombiningAlgorithm;
use arbiter_core::{DocumentError, Value};

/// Names the combining algorithm and the configuration data policies see.
///
/// `secrets` is confidential and redacted from the `Debug` rendering.
#[derive(Clone)]
pub struct PdpConfiguration {
    pub configuration_id: String,
    pub algorithm: CombiningAlgorithm,
    pub variables: IndexMap<String, Value>,
    pub secrets: Value,
}

impl PdpConfiguration {
    pub fn new(configuration_id: impl Into<String>, algorithm: CombiningAlgorithm) -> Self {
        PdpConfiguration {
            configuration_id: configuration_id.into(),
            algorithm,
            variables: IndexMap::new(),
            secrets: Value::Undefined,
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn with_secrets(mut self, secrets: Value) -> Self {
        self.secrets = secrets;
        self
    }

    /// Parse the `pdp.json` shape:
    ///
    /// ```json
    /// {
    ///   "configuration_id": "prod",
    ///   "algorithm": "deny-overrides",
    ///   "variables": { "max_level": 4 },
    ///   "secrets": { "api_key": "..." }
    /// }
    /// ```
    ///
    /// Only `algorithm` is required; variables and secrets are plain JSON.
    pub fn from_json(v: &serde_json::Value) -> Result<Self, DocumentError> {
        let obj = v
            .as_object()
            .ok_or_else(|| DocumentError::validation("pdp configuration must be a JSON object"))?;
        let algorithm_value = obj
            .get("algorithm")
            .ok_or_else(|| DocumentError::validation("pdp configuration missing 'algorithm'"))?;
        let algorithm: CombiningAlgorithm = serde_json::from_value(algorithm_value.clone())
            .map_err(|e| DocumentError::validation(format!("invalid combining algorithm: {}", e)))?;

        let configuration_id = obj
            .get("configuration_id")
            .and_then(|id| id.as_str())
            .unwrap_or("default")
            .to_string();

        let mut variables = IndexMap::new();
        if let Some(raw) = obj.get("variables") {
            let entries = raw.as_object().ok_or_else(|| {
                DocumentError::validation("pdp configuration 'variables' must be an object")
            })?;
            for (name, value) in entries {
                variables.insert(name.clone(), Value::from_json(value));
            }
        }

        let secrets = obj
            .get("secrets")
            .map(Value::from_json)
            .unwrap_or(Value::Undefined);

        Ok(PdpConfiguration {
            configuration_id,
            algorithm,
            variables,
            secrets,
        })
    }
}

impl fmt::Debug for PdpConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdpConfiguration")
            .field("configuration_id", &self.configuration_id)
            .field("algorithm", &self.algorithm)
            .field("variables", &self.variables)
            .field("secrets", &"<redacted>")
            .finish()
    }
}
