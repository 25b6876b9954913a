//! `arbiter check`: compile every document and render errors with source
//! snippets where locations are available.

use std::path::Path;
use std::sync::Arc;

use arbiter_broker::{AttributeBroker, AttributeRepository};
use arbiter_core::snippet::format_snippet;
use arbiter_eval::{CompilationContext, FunctionBroker, PdpData};
use arbiter_pdp::load_document;

use super::{document_files, document_name};

pub fn run(documents: &Path) -> Result<(), String> {
    let ctx = CompilationContext::new(
        "check",
        Arc::new(FunctionBroker::with_standard_library()),
        Arc::new(AttributeBroker::new(Arc::new(AttributeRepository::new()))),
        Arc::new(PdpData::default()),
    );

    let mut failures = 0usize;
    for file in document_files(documents)? {
        let bytes = std::fs::read(&file)
            .map_err(|e| format!("cannot read {}: {}", file.display(), e))?;
        let name = document_name(&file);
        let compiled = load_document(&name, &bytes, &ctx);
        if compiled.errors().is_empty() {
            println!("ok      {}", name);
            continue;
        }
        failures += 1;
        for error in compiled.errors() {
            println!("error   {}: {}", name, error);
            if let Some(location) = &error.location {
                print!("{}", format_snippet(location));
            }
        }
    }

    if failures > 0 {
        Err(format!("{} document(s) failed to compile", failures))
    } else {
        Ok(())
    }
}
