//! Per-document error records.
//!
//! Compilation collects errors per document instead of aborting the whole
//! configuration; a document with errors still produces a voter (an
//! INDETERMINATE one). The trojan-source guard is the exception: it aborts
//! compilation of the offending document outright.

use serde::{Deserialize, Serialize};

use crate::trace::SourceLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Syntax,
    Validation,
    Compilation,
    TrojanSource,
}

impl ErrorKind {
    fn label(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Validation => "validation error",
            ErrorKind::Compilation => "compilation error",
            ErrorKind::TrojanSource => "trojan source",
        }
    }
}

/// An error anchored to a document, optionally to a span within it.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{}: {message}", .kind.label())]
pub struct DocumentError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl DocumentError {
    pub fn syntax(message: impl Into<String>) -> Self {
        DocumentError {
            kind: ErrorKind::Syntax,
            message: message.into(),
            location: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DocumentError {
            kind: ErrorKind::Validation,
            message: message.into(),
            location: None,
        }
    }

    pub fn compilation(message: impl Into<String>) -> Self {
        DocumentError {
            kind: ErrorKind::Compilation,
            message: message.into(),
            location: None,
        }
    }

    pub fn trojan_source(message: impl Into<String>) -> Self {
        DocumentError {
            kind: ErrorKind::TrojanSource,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}
