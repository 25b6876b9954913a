//! The policy decision point.

use std::sync::Arc;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;

use arbiter_broker::AttributeBroker;
use arbiter_core::ast::{CombiningAlgorithm, Document};
use arbiter_eval::combinators::combine_latest;
use arbiter_eval::{
    combine, CompilationContext, CompiledDocument, ContextView, EvaluationContext, FunctionBroker,
    PdpData, Vote,
};
use arbiter_interchange::{
    AuthorizationDecision, AuthorizationSubscription, IdentifiableAuthorizationDecision,
    MultiAuthorizationSubscription,
};

use crate::config::PdpConfiguration;
use crate::documents;

/// A PDP for one configuration: documents are compiled once at load time,
/// subscriptions are evaluated against the compiled forms.
pub struct PolicyDecisionPoint {
    compilation: CompilationContext,
    algorithm: CombiningAlgorithm,
    documents: Vec<CompiledDocument>,
}

impl PolicyDecisionPoint {
    pub fn new(
        configuration: PdpConfiguration,
        functions: Arc<FunctionBroker>,
        attributes: Arc<AttributeBroker>,
    ) -> Self {
        let data = Arc::new(PdpData::new(configuration.variables, configuration.secrets));
        PolicyDecisionPoint {
            compilation: CompilationContext::new(
                configuration.configuration_id,
                functions,
                attributes,
                data,
            ),
            algorithm: configuration.algorithm,
            documents: Vec::new(),
        }
    }

    pub fn attributes(&self) -> &Arc<AttributeBroker> {
        &self.compilation.attributes
    }

    /// Load a document from raw bytes; failures become INDETERMINATE
    /// voters and are reported on the returned document.
    pub fn load_document_source(&mut self, name: &str, bytes: &[u8]) -> &CompiledDocument {
        let document = documents::load_document(name, bytes, &self.compilation);
        self.documents.push(document);
        &self.documents[self.documents.len() - 1]
    }

    /// Load an already-parsed document.
    pub fn load_document(&mut self, document: &Document) {
        let compiled = documents::compile_document(document, &self.compilation);
        self.documents.push(compiled);
    }

    pub fn documents(&self) -> &[CompiledDocument] {
        &self.documents
    }

    /// The continuously updating decision stream for one subscription.
    ///
    /// All non-stream voters are evaluated up front; the initial decision
    /// is emitted once every stream voter has produced its first vote
    /// (bounded by attribute initial timeouts). Consecutive identical
    /// decisions are suppressed. With no stream voters the single decision
    /// is emitted and the stream completes.
    pub fn decide(
        &self,
        subscription: AuthorizationSubscription,
    ) -> BoxStream<'static, AuthorizationDecision> {
        let view: ContextView =
            Arc::new(EvaluationContext::new(&self.compilation, subscription));
        let algorithm = self.algorithm;

        enum Slot {
            Fixed(Vote),
            Stream(usize),
        }

        let mut slots = Vec::with_capacity(self.documents.len());
        let mut vote_streams = Vec::new();
        for document in &self.documents {
            let voter = document.voter();
            if voter.is_stream() {
                slots.push(Slot::Stream(vote_streams.len()));
                vote_streams.push(voter.votes(&view));
            } else {
                slots.push(Slot::Fixed(voter.evaluate(&view)));
            }
        }
        tracing::debug!(
            configuration = %view.configuration_id,
            documents = slots.len(),
            streaming = vote_streams.len(),
            "subscription accepted"
        );

        if vote_streams.is_empty() {
            let votes: Vec<Vote> = slots
                .iter()
                .filter_map(|slot| match slot {
                    Slot::Fixed(vote) => Some(vote.clone()),
                    Slot::Stream(_) => None,
                })
                .collect();
            let decision = combine(algorithm, votes.iter()).into_decision();
            return Box::pin(futures::stream::once(async move { decision }));
        }

        let mut combined_votes = combine_latest(vote_streams);
        Box::pin(stream! {
            let mut last: Option<AuthorizationDecision> = None;
            while let Some(stream_votes) = combined_votes.next().await {
                let votes: Vec<Vote> = slots
                    .iter()
                    .map(|slot| match slot {
                        Slot::Fixed(vote) => vote.clone(),
                        Slot::Stream(i) => stream_votes[*i].clone(),
                    })
                    .collect();
                let decision = combine(algorithm, votes.iter()).into_decision();
                if last.as_ref() != Some(&decision) {
                    last = Some(decision.clone());
                    yield decision;
                }
            }
        })
    }

    /// The first decision of the stream.
    pub async fn decide_once(
        &self,
        subscription: AuthorizationSubscription,
    ) -> AuthorizationDecision {
        self.decide(subscription)
            .next()
            .await
            .unwrap_or_else(AuthorizationDecision::not_applicable)
    }

    /// Merged decision streams for a multi-subscription, each decision
    /// tagged with its subscription id.
    pub fn decide_all(
        &self,
        multi: &MultiAuthorizationSubscription,
    ) -> BoxStream<'static, IdentifiableAuthorizationDecision> {
        let streams: Vec<BoxStream<'static, IdentifiableAuthorizationDecision>> = multi
            .subscriptions
            .iter()
            .map(|(id, subscription)| {
                let id = id.clone();
                self.decide(subscription.clone())
                    .map(move |decision| IdentifiableAuthorizationDecision {
                        subscription_id: id.clone(),
                        decision,
                    })
                    .boxed()
            })
            .collect();
        futures::stream::select_all(streams).boxed()
    }
}
