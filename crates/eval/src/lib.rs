//! arbiter-eval: the stratified expression compiler and evaluator, policy
//! compilers, and the vote-combining engine.
//!
//! Compilation classifies every expression into one of four strata and
//! lowers it accordingly:
//!
//! 1. **Value** -- reduced at compile time, evaluation is identity
//! 2. **Pure, non-subscription** -- evaluated once per configuration
//! 3. **Pure, subscription** -- evaluated once per subscription
//! 4. **Stream** -- a reactive sequence driven by attribute streams
//!
//! Errors are values: a failing operator emits an error value through the
//! same channel as data and never unwinds.

pub mod combinators;
pub mod combining;
pub mod compile;
pub mod compiled;
pub mod context;
pub mod functions;
pub mod operators;
pub mod policy;
pub mod stratum;

pub use combining::{combine, Combined};
pub use compile::{compile_expression, AttributeDefaults};
pub use compiled::{Compiled, PureExpression, StreamExpression};
pub use context::{CompilationContext, ContextView, EvaluationContext, PdpData};
pub use functions::{FunctionBroker, FunctionError, FunctionInvocation, FunctionLibrary};
pub use policy::{
    compile_policy, compile_policy_set, CompiledDocument, CompiledPolicy, CompiledPolicySet,
    Outcome, PureVoter, StreamVoter, Vote, Voter,
};
pub use stratum::Stratum;
