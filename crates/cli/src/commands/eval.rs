//! `arbiter eval`: build a PDP from documents and configuration, evaluate
//! one subscription, print decisions as JSON lines.

use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;

use arbiter_broker::{AttributeBroker, AttributeRepository};
use arbiter_core::ast::CombiningAlgorithm;
use arbiter_core::Value;
use arbiter_eval::FunctionBroker;
use arbiter_interchange::{AuthorizationDecision, AuthorizationSubscription};
use arbiter_pdp::{PdpConfiguration, PolicyDecisionPoint};

use super::{document_files, document_name};

pub async fn run(
    documents: &Path,
    subscription: &Path,
    config: Option<&Path>,
    watch: bool,
) -> Result<(), String> {
    let configuration = match config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            let json: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|e| format!("malformed configuration: {}", e))?;
            PdpConfiguration::from_json(&json).map_err(|e| e.to_string())?
        }
        None => PdpConfiguration::new("default", CombiningAlgorithm::PermitOverrides),
    };

    let repository = Arc::new(AttributeRepository::new());
    let mut pdp = PolicyDecisionPoint::new(
        configuration,
        Arc::new(FunctionBroker::with_standard_library()),
        Arc::new(AttributeBroker::new(repository)),
    );

    for file in document_files(documents)? {
        let bytes = std::fs::read(&file)
            .map_err(|e| format!("cannot read {}: {}", file.display(), e))?;
        let loaded = pdp.load_document_source(&document_name(&file), &bytes);
        for error in loaded.errors() {
            eprintln!("{}: {}", document_name(&file), error);
        }
    }

    let raw = std::fs::read_to_string(subscription)
        .map_err(|e| format!("cannot read {}: {}", subscription.display(), e))?;
    let json: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| format!("malformed subscription: {}", e))?;
    let subscription = AuthorizationSubscription::from_plain_json(&json)?;

    if watch {
        let mut decisions = pdp.decide(subscription);
        while let Some(decision) = decisions.next().await {
            println!("{}", decision_to_plain_json(&decision));
        }
    } else {
        let decision = pdp.decide_once(subscription).await;
        println!("{}", decision_to_plain_json(&decision));
    }
    Ok(())
}

/// Render a decision as plain JSON for human consumption; the lossless
/// wire form stays on the API surface.
fn decision_to_plain_json(decision: &AuthorizationDecision) -> String {
    let mut out = serde_json::Map::new();
    out.insert(
        "decision".to_string(),
        serde_json::to_value(decision.decision).unwrap_or(serde_json::Value::Null),
    );
    out.insert(
        "obligations".to_string(),
        serde_json::Value::Array(decision.obligations.iter().map(Value::to_json).collect()),
    );
    out.insert(
        "advice".to_string(),
        serde_json::Value::Array(decision.advice.iter().map(Value::to_json).collect()),
    );
    if decision.resource.is_defined() {
        out.insert("resource".to_string(), decision.resource.to_json());
    }
    serde_json::Value::Object(out).to_string()
}
