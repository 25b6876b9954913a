//! Policy and policy-set compilation.
//!
//! A compiled policy exposes one thing: a [`Voter`]. Depending on the
//! strata of its parts, the voter is a compile-time constant vote, a pure
//! voter evaluated once per subscription, or a stream voter producing a
//! reactive sequence of votes. Policy sets compose child voters under
//! their combining algorithm and are voters of the same taxonomy.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;

use arbiter_broker::ValueStream;
use arbiter_core::ast::{CombiningAlgorithm, Entitlement, Policy, PolicySet};
use arbiter_core::{DocumentError, TracedValue, Value};
use arbiter_interchange::Decision;

use crate::combinators::combine_latest;
use crate::combining;
use crate::compile::compile_expression;
use crate::compiled::Compiled;
use crate::context::{CompilationContext, ContextView, EvaluationContext};
use crate::stratum::Stratum;

// ──────────────────────────────────────────────
// Votes
// ──────────────────────────────────────────────

/// The decision shape behind an INDETERMINATE: what the vote would have
/// been had it not failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Permit,
    Deny,
    PermitOrDeny,
}

impl Outcome {
    pub fn of_entitlement(entitlement: Entitlement) -> Outcome {
        match entitlement {
            Entitlement::Permit => Outcome::Permit,
            Entitlement::Deny => Outcome::Deny,
        }
    }
}

/// One policy's contribution to the final decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Vote {
    pub applicable: bool,
    pub decision: Decision,
    pub outcome: Outcome,
    pub obligations: Vec<Value>,
    pub advice: Vec<Value>,
    /// `Undefined` when the policy declares no transformation.
    pub resource_transform: Value,
}

impl Vote {
    pub fn not_applicable(outcome: Outcome) -> Vote {
        Vote {
            applicable: false,
            decision: Decision::NotApplicable,
            outcome,
            obligations: Vec::new(),
            advice: Vec::new(),
            resource_transform: Value::Undefined,
        }
    }

    pub fn indeterminate(outcome: Outcome) -> Vote {
        Vote {
            applicable: true,
            decision: Decision::Indeterminate,
            outcome,
            obligations: Vec::new(),
            advice: Vec::new(),
            resource_transform: Value::Undefined,
        }
    }

    pub fn permit() -> Vote {
        Vote {
            applicable: true,
            decision: Decision::Permit,
            outcome: Outcome::Permit,
            obligations: Vec::new(),
            advice: Vec::new(),
            resource_transform: Value::Undefined,
        }
    }

    pub fn deny() -> Vote {
        Vote {
            applicable: true,
            decision: Decision::Deny,
            outcome: Outcome::Deny,
            obligations: Vec::new(),
            advice: Vec::new(),
            resource_transform: Value::Undefined,
        }
    }

    pub fn with_obligations(mut self, obligations: Vec<Value>) -> Vote {
        self.obligations = obligations;
        self
    }

    pub fn with_advice(mut self, advice: Vec<Value>) -> Vote {
        self.advice = advice;
        self
    }

    pub fn with_transform(mut self, resource_transform: Value) -> Vote {
        self.resource_transform = resource_transform;
        self
    }
}

// ──────────────────────────────────────────────
// Voters
// ──────────────────────────────────────────────

/// How a compiled document contributes votes.
#[derive(Clone)]
pub enum Voter {
    /// The outcome is known at compile time.
    Constant(Vote),
    /// Evaluates once per subscription.
    Pure(PureVoter),
    /// Produces a reactive sequence of votes.
    Stream(StreamVoter),
}

#[derive(Clone)]
pub enum PureVoter {
    Policy(Arc<CompiledPolicy>),
    Set {
        algorithm: CombiningAlgorithm,
        children: Vec<Voter>,
    },
}

#[derive(Clone)]
pub enum StreamVoter {
    Policy(Arc<CompiledPolicy>),
    Set {
        algorithm: CombiningAlgorithm,
        children: Vec<Voter>,
    },
}

impl Voter {
    pub fn is_stream(&self) -> bool {
        matches!(self, Voter::Stream(_))
    }

    /// Evaluate a non-stream voter.
    pub fn evaluate(&self, ctx: &EvaluationContext) -> Vote {
        match self {
            Voter::Constant(vote) => vote.clone(),
            Voter::Pure(pure) => pure.evaluate(ctx),
            // A stream voter has no single vote; callers branch on
            // `is_stream` first.
            Voter::Stream(_) => Vote::indeterminate(Outcome::PermitOrDeny),
        }
    }

    /// The voter as a vote stream; constant and pure voters emit once.
    pub fn votes(&self, view: &ContextView) -> BoxStream<'static, Vote> {
        match self {
            Voter::Constant(vote) => {
                let vote = vote.clone();
                Box::pin(futures::stream::once(async move { vote }))
            }
            Voter::Pure(pure) => {
                let pure = pure.clone();
                let view = view.clone();
                Box::pin(futures::stream::once(async move { pure.evaluate(&view) }))
            }
            Voter::Stream(stream) => stream.votes(view),
        }
    }
}

impl PureVoter {
    pub fn evaluate(&self, ctx: &EvaluationContext) -> Vote {
        match self {
            PureVoter::Policy(policy) => policy.evaluate_vote(ctx),
            PureVoter::Set {
                algorithm,
                children,
            } => {
                let votes: Vec<Vote> = children.iter().map(|c| c.evaluate(ctx)).collect();
                combining::combine(*algorithm, votes.iter()).into_vote()
            }
        }
    }
}

impl StreamVoter {
    pub fn votes(&self, view: &ContextView) -> BoxStream<'static, Vote> {
        match self {
            StreamVoter::Policy(policy) => policy.vote_stream(view),
            StreamVoter::Set {
                algorithm,
                children,
            } => {
                let algorithm = *algorithm;
                let child_streams: Vec<BoxStream<'static, Vote>> =
                    children.iter().map(|c| c.votes(view)).collect();
                Box::pin(combine_latest(child_streams).map(move |votes| {
                    combining::combine(algorithm, votes.iter()).into_vote()
                }))
            }
        }
    }
}

// ──────────────────────────────────────────────
// Compiled policies
// ──────────────────────────────────────────────

/// A policy lowered to compiled expressions.
pub struct CompiledPolicy {
    pub name: String,
    pub entitlement: Entitlement,
    target: Compiled,
    body: Vec<Compiled>,
    obligations: Vec<Compiled>,
    advice: Vec<Compiled>,
    transform: Option<Compiled>,
}

/// Compile a policy. A missing target means the policy always applies.
pub fn compile_policy(policy: &Policy, ctx: &CompilationContext) -> Arc<CompiledPolicy> {
    Arc::new(CompiledPolicy {
        name: policy.name.clone(),
        entitlement: policy.entitlement,
        target: policy
            .target
            .as_ref()
            .map(|t| compile_expression(t, ctx))
            .unwrap_or(Compiled::Value(Value::Bool(true))),
        body: policy
            .where_clauses
            .iter()
            .map(|w| compile_expression(w, ctx))
            .collect(),
        obligations: policy
            .obligations
            .iter()
            .map(|o| compile_expression(o, ctx))
            .collect(),
        advice: policy
            .advice
            .iter()
            .map(|a| compile_expression(a, ctx))
            .collect(),
        transform: policy.transform.as_ref().map(|t| compile_expression(t, ctx)),
    })
}

impl CompiledPolicy {
    fn components(&self) -> impl Iterator<Item = &Compiled> {
        std::iter::once(&self.target)
            .chain(self.body.iter())
            .chain(self.obligations.iter())
            .chain(self.advice.iter())
            .chain(self.transform.iter())
    }

    pub fn stratum(&self) -> Stratum {
        self.components()
            .map(Compiled::stratum)
            .fold(Stratum::Value, Stratum::join)
    }

    /// The applicability-and-vote path: a voter of the right taxon.
    pub fn voter(self: &Arc<Self>) -> Voter {
        match self.stratum() {
            Stratum::Value => {
                let values: Vec<Value> = self
                    .components()
                    .filter_map(|c| c.constant_value())
                    .collect();
                Voter::Constant(self.vote_from_values(&values))
            }
            Stratum::Stream => Voter::Stream(StreamVoter::Policy(self.clone())),
            _ => Voter::Pure(PureVoter::Policy(self.clone())),
        }
    }

    /// Evaluate all parts against a context and form the vote.
    pub fn evaluate_vote(&self, ctx: &EvaluationContext) -> Vote {
        let values: Vec<Value> = self.components().map(|c| c.evaluate(ctx)).collect();
        self.vote_from_values(&values)
    }

    /// Reactive votes: combine the latest value of every part.
    pub fn vote_stream(self: &Arc<Self>, view: &ContextView) -> BoxStream<'static, Vote> {
        let streams: Vec<ValueStream> = self.components().map(|c| c.stream(view)).collect();
        let policy = self.clone();
        Box::pin(combine_latest(streams).map(move |snapshot: Vec<TracedValue>| {
            let values: Vec<Value> = snapshot.into_iter().map(|t| t.value).collect();
            policy.vote_from_values(&values)
        }))
    }

    /// Form a vote from component values laid out in `components()` order.
    ///
    /// The target decides applicability: an error or non-boolean target is
    /// INDETERMINATE, `false` is NOT_APPLICABLE, and only `true` opens the
    /// body and constraints. Errors anywhere downstream are INDETERMINATE
    /// shaped by the policy's entitlement.
    fn vote_from_values(&self, values: &[Value]) -> Vote {
        let outcome = Outcome::of_entitlement(self.entitlement);
        let mut values = values.iter();

        let Some(target) = values.next() else {
            return Vote::indeterminate(outcome);
        };
        match target {
            Value::Bool(true) => {}
            Value::Bool(false) => return Vote::not_applicable(outcome),
            _ => return Vote::indeterminate(outcome),
        }

        for _ in 0..self.body.len() {
            match values.next() {
                Some(Value::Bool(true)) => {}
                Some(Value::Bool(false)) => return Vote::not_applicable(outcome),
                _ => return Vote::indeterminate(outcome),
            }
        }

        let mut obligations = Vec::with_capacity(self.obligations.len());
        for _ in 0..self.obligations.len() {
            match values.next() {
                Some(value) if value.is_defined() => obligations.push(value.clone()),
                _ => return Vote::indeterminate(outcome),
            }
        }

        let mut advice = Vec::with_capacity(self.advice.len());
        for _ in 0..self.advice.len() {
            match values.next() {
                Some(value) if value.is_defined() => advice.push(value.clone()),
                _ => return Vote::indeterminate(outcome),
            }
        }

        let resource_transform = if self.transform.is_some() {
            match values.next() {
                Some(Value::Error(_)) | None => return Vote::indeterminate(outcome),
                Some(value) => value.clone(),
            }
        } else {
            Value::Undefined
        };

        let decision = match self.entitlement {
            Entitlement::Permit => Decision::Permit,
            Entitlement::Deny => Decision::Deny,
        };
        Vote {
            applicable: true,
            decision,
            outcome,
            obligations,
            advice,
            resource_transform,
        }
    }
}

// ──────────────────────────────────────────────
// Compiled policy sets
// ──────────────────────────────────────────────

/// A policy set: children composed under a combining algorithm.
pub struct CompiledPolicySet {
    pub name: String,
    pub algorithm: CombiningAlgorithm,
    pub policies: Vec<Arc<CompiledPolicy>>,
}

pub fn compile_policy_set(set: &PolicySet, ctx: &CompilationContext) -> Arc<CompiledPolicySet> {
    Arc::new(CompiledPolicySet {
        name: set.name.clone(),
        algorithm: set.algorithm,
        policies: set.policies.iter().map(|p| compile_policy(p, ctx)).collect(),
    })
}

impl CompiledPolicySet {
    pub fn voter(&self) -> Voter {
        let children: Vec<Voter> = self.policies.iter().map(|p| p.voter()).collect();
        if children
            .iter()
            .all(|c| matches!(c, Voter::Constant(_)))
        {
            let votes: Vec<Vote> = children
                .iter()
                .filter_map(|c| match c {
                    Voter::Constant(vote) => Some(vote.clone()),
                    _ => None,
                })
                .collect();
            return Voter::Constant(combining::combine(self.algorithm, votes.iter()).into_vote());
        }
        if children.iter().any(Voter::is_stream) {
            Voter::Stream(StreamVoter::Set {
                algorithm: self.algorithm,
                children,
            })
        } else {
            Voter::Pure(PureVoter::Set {
                algorithm: self.algorithm,
                children,
            })
        }
    }
}

// ──────────────────────────────────────────────
// Compiled documents
// ──────────────────────────────────────────────

/// A top-level document after compilation. Documents that failed to load
/// still vote: INDETERMINATE, carrying their errors.
pub enum CompiledDocument {
    Policy(Arc<CompiledPolicy>),
    Set(Arc<CompiledPolicySet>),
    Invalid {
        name: String,
        errors: Vec<DocumentError>,
    },
}

impl CompiledDocument {
    pub fn name(&self) -> &str {
        match self {
            CompiledDocument::Policy(p) => &p.name,
            CompiledDocument::Set(s) => &s.name,
            CompiledDocument::Invalid { name, .. } => name,
        }
    }

    pub fn errors(&self) -> &[DocumentError] {
        match self {
            CompiledDocument::Invalid { errors, .. } => errors,
            _ => &[],
        }
    }

    pub fn voter(&self) -> Voter {
        match self {
            CompiledDocument::Policy(p) => p.voter(),
            CompiledDocument::Set(s) => s.voter(),
            CompiledDocument::Invalid { .. } => {
                Voter::Constant(Vote::indeterminate(Outcome::PermitOrDeny))
            }
        }
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
