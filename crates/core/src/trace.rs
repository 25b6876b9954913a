//! Source locations and traced values.
//!
//! Stream emissions carry the source spans that produced them so coverage
//! tracking and diagnostics can point back into policy documents.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A span in a policy document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub document_name: String,
    pub document_source: String,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl SourceLocation {
    pub fn new(
        document_name: impl Into<String>,
        document_source: impl Into<String>,
        start_line: u32,
        start_col: u32,
        end_line: u32,
        end_col: u32,
    ) -> Self {
        SourceLocation {
            document_name: document_name.into(),
            document_source: document_source.into(),
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }
}

/// A value paired with the source locations that contributed to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedValue {
    pub value: Value,
    pub trace: Vec<SourceLocation>,
}

impl TracedValue {
    /// A value with an empty trace.
    pub fn untraced(value: Value) -> Self {
        TracedValue {
            value,
            trace: Vec::new(),
        }
    }

    pub fn new(value: Value, trace: Vec<SourceLocation>) -> Self {
        TracedValue { value, trace }
    }

    /// Combine this value's trace with another's, in encounter order.
    pub fn merge_trace(mut self, other: &TracedValue) -> Self {
        self.trace.extend(other.trace.iter().cloned());
        self
    }

    /// Replace the carried value, keeping the trace.
    pub fn with_value(self, value: Value) -> Self {
        TracedValue {
            value,
            trace: self.trace,
        }
    }
}

impl From<Value> for TracedValue {
    fn from(value: Value) -> Self {
        TracedValue::untraced(value)
    }
}
