//! Document loading.
//!
//! Raw bytes go through the safety gauntlet before anything parses them:
//! the byte-level trojan-source scan, BOM-aware decoding, the char-level
//! scan, then JSON and AST deserialization. Failures at any step produce
//! an [`CompiledDocument::Invalid`] that votes INDETERMINATE; the rest of
//! the configuration keeps evaluating.

use arbiter_core::ast::Document;
use arbiter_core::{bidi, decode_source, DocumentError};
use arbiter_eval::{compile_policy, compile_policy_set, CompilationContext, CompiledDocument};

/// Load and compile one document from raw bytes.
pub fn load_document(name: &str, bytes: &[u8], ctx: &CompilationContext) -> CompiledDocument {
    match parse_document(name, bytes) {
        Ok(document) => compile_document(&document, ctx),
        Err(error) => {
            tracing::warn!(document = name, %error, "document rejected");
            CompiledDocument::Invalid {
                name: name.to_string(),
                errors: vec![error],
            }
        }
    }
}

fn parse_document(name: &str, bytes: &[u8]) -> Result<Document, DocumentError> {
    // Byte-level scan first: trojan-source detection happens before any
    // decoding touches the input.
    bidi::guard_bytes(name, bytes)?;
    let source = decode_source(bytes)?;
    bidi::guard_source(name, &source)?;

    let json: serde_json::Value = serde_json::from_str(&source)
        .map_err(|e| DocumentError::syntax(format!("malformed document JSON: {}", e)))?;
    serde_json::from_value(json)
        .map_err(|e| DocumentError::validation(format!("invalid document structure: {}", e)))
}

/// Compile an already-parsed document.
pub fn compile_document(document: &Document, ctx: &CompilationContext) -> CompiledDocument {
    match document {
        Document::Policy(policy) => CompiledDocument::Policy(compile_policy(policy, ctx)),
        Document::PolicySet(set) => CompiledDocument::Set(compile_policy_set(set, ctx)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arbiter_broker::{AttributeBroker, AttributeRepository};
    use arbiter_eval::{FunctionBroker, PdpData};

    fn ctx() -> CompilationContext {
        CompilationContext::new(
            "cfg",
            Arc::new(FunctionBroker::with_standard_library()),
            Arc::new(AttributeBroker::new(Arc::new(AttributeRepository::new()))),
            Arc::new(PdpData::default()),
        )
    }

    fn policy_json() -> String {
        serde_json::json!({
            "policy": {
                "name": "allow-all",
                "entitlement": "permit"
            }
        })
        .to_string()
    }

    #[test]
    fn loads_a_valid_policy_document() {
        let document = load_document("allow.json", policy_json().as_bytes(), &ctx());
        assert!(matches!(document, CompiledDocument::Policy(_)));
        assert_eq!(document.name(), "allow-all");
    }

    #[test]
    fn loads_a_policy_with_utf8_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(policy_json().as_bytes());
        let document = load_document("allow.json", &bytes, &ctx());
        assert!(matches!(document, CompiledDocument::Policy(_)));
    }

    #[test]
    fn trojan_source_aborts_the_document() {
        let poisoned = policy_json().replace("allow-all", "allow\u{202E}lla");
        let document = load_document("evil.json", poisoned.as_bytes(), &ctx());
        match &document {
            CompiledDocument::Invalid { errors, .. } => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].to_string().contains("trojan source"));
            }
            _ => panic!("expected invalid document"),
        }
    }

    #[test]
    fn malformed_json_is_a_syntax_error() {
        let document = load_document("broken.json", b"{not json", &ctx());
        match &document {
            CompiledDocument::Invalid { errors, .. } => {
                assert!(errors[0].to_string().contains("syntax error"));
            }
            _ => panic!("expected invalid document"),
        }
    }

    #[test]
    fn wrong_shape_is_a_validation_error() {
        let document = load_document(
            "odd.json",
            br#"{"policy": {"name": "x"}}"#,
            &ctx(),
        );
        match &document {
            CompiledDocument::Invalid { errors, .. } => {
                assert!(errors[0].to_string().contains("validation error"));
            }
            _ => panic!("expected invalid document"),
        }
    }
}
