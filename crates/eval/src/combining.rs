//! Priority-based vote combining.
//!
//! Permit-overrides and deny-overrides are the same fold with the priority
//! decision swapped. Votes are consumed in encounter order:
//!
//! - non-applicable votes contribute nothing
//! - a *critical* INDETERMINATE (shaped like the non-priority decision, or
//!   mixed) short-circuits the whole combination to INDETERMINATE and
//!   voids accumulated constraints
//! - a non-critical INDETERMINATE (priority-shaped) displaces anything but
//!   an accumulated priority decision, and is itself displaced by any
//!   concrete decision
//! - the priority decision displaces everything else; same-decision votes
//!   merge their constraints in encounter order, without deduplication
//! - merging two votes that both carry resource transforms is
//!   transformation uncertainty: INDETERMINATE

use arbiter_core::ast::CombiningAlgorithm;
use arbiter_core::Value;
use arbiter_interchange::{AuthorizationDecision, Decision};

use crate::policy::{Outcome, Vote};

/// The result of folding a vote sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Combined {
    pub decision: Decision,
    pub outcome: Outcome,
    pub obligations: Vec<Value>,
    pub advice: Vec<Value>,
    pub resource: Value,
}

impl Combined {
    fn not_applicable(outcome: Outcome) -> Combined {
        Combined {
            decision: Decision::NotApplicable,
            outcome,
            obligations: Vec::new(),
            advice: Vec::new(),
            resource: Value::Undefined,
        }
    }

    fn indeterminate(outcome: Outcome) -> Combined {
        Combined {
            decision: Decision::Indeterminate,
            outcome,
            obligations: Vec::new(),
            advice: Vec::new(),
            resource: Value::Undefined,
        }
    }

    fn of_vote(vote: &Vote) -> Combined {
        Combined {
            decision: vote.decision,
            outcome: vote.outcome,
            obligations: vote.obligations.clone(),
            advice: vote.advice.clone(),
            resource: vote.resource_transform.clone(),
        }
    }

    pub fn into_decision(self) -> AuthorizationDecision {
        AuthorizationDecision {
            decision: self.decision,
            obligations: self.obligations,
            advice: self.advice,
            resource: self.resource,
        }
    }

    pub fn into_vote(self) -> Vote {
        Vote {
            applicable: self.decision != Decision::NotApplicable,
            decision: self.decision,
            outcome: self.outcome,
            obligations: self.obligations,
            advice: self.advice,
            resource_transform: self.resource,
        }
    }
}

fn priority_of(algorithm: CombiningAlgorithm) -> (Decision, Outcome, Outcome) {
    match algorithm {
        CombiningAlgorithm::PermitOverrides => {
            (Decision::Permit, Outcome::Permit, Outcome::Deny)
        }
        CombiningAlgorithm::DenyOverrides => (Decision::Deny, Outcome::Deny, Outcome::Permit),
    }
}

/// Fold votes into one combined outcome. Terminates early on a critical
/// INDETERMINATE; trailing votes are then never consulted.
pub fn combine<'a>(
    algorithm: CombiningAlgorithm,
    votes: impl IntoIterator<Item = &'a Vote>,
) -> Combined {
    let (priority, priority_shape, non_priority_shape) = priority_of(algorithm);
    let mut acc = Combined::not_applicable(priority_shape);

    for vote in votes {
        if !vote.applicable || vote.decision == Decision::NotApplicable {
            continue;
        }
        match vote.decision {
            Decision::Indeterminate => {
                let critical = vote.outcome == Outcome::PermitOrDeny
                    || vote.outcome == non_priority_shape;
                if critical {
                    // Short-circuit: accumulated constraints are voided.
                    return Combined::indeterminate(vote.outcome);
                }
                if acc.decision != priority {
                    acc = Combined::indeterminate(vote.outcome);
                }
            }
            decision if decision == priority => {
                if acc.decision == priority {
                    match merge_constraints(&mut acc, vote) {
                        Ok(()) => {}
                        Err(outcome) => return Combined::indeterminate(outcome),
                    }
                } else {
                    acc = Combined::of_vote(vote);
                }
            }
            _ => {
                // The non-priority concrete decision.
                match acc.decision {
                    d if d == priority => {}
                    Decision::Indeterminate | Decision::NotApplicable => {
                        acc = Combined::of_vote(vote);
                    }
                    _ => match merge_constraints(&mut acc, vote) {
                        Ok(()) => {}
                        Err(outcome) => return Combined::indeterminate(outcome),
                    },
                }
            }
        }
    }
    acc
}

/// Append the vote's constraints in encounter order. Two transforms on the
/// same decision are transformation uncertainty.
fn merge_constraints(acc: &mut Combined, vote: &Vote) -> Result<(), Outcome> {
    acc.obligations.extend(vote.obligations.iter().cloned());
    acc.advice.extend(vote.advice.iter().cloned());
    if vote.resource_transform.is_defined() {
        if acc.resource.is_defined() && acc.resource != vote.resource_transform {
            return Err(vote.outcome);
        }
        acc.resource = vote.resource_transform.clone();
    }
    Ok(())
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
