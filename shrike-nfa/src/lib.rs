// Shrike CEP core - NFA runtime for complex event detection
//
// This crate implements the pattern-matching heart of the engine:
// - NFA definitions (states, edges, predicates) shared by all candidates
// - Partial matches with per-candidate registers (Kleene counters,
//   related-value records)
// - A partitioned structure pool holding every live candidate
// - Temporal window constraints
// - The first-match and next-match engines driving candidates per event

mod engine;
mod instance;
mod metrics;
mod nfa;
mod pool;
mod related;
mod structure;
mod window;

pub use engine::{
    ComplexMatch, FirstMatchEngine, MatchEngine, NextMatchEngine,
};
pub use instance::EventInstance;
pub use metrics::{EngineMetrics, EvictionReason, MetricsSnapshot};
pub use nfa::{
    Edge, EdgeId, EdgeKind, InitFn, KleeneMode, Nfa, NfaBuilder, Predicate, State, StateId,
    StateKind, UpdateFn,
};
pub use pool::{Partitioner, PartitionKey, StructurePool};
pub use related::{Max, Min, Previous, Sum};
pub use structure::PartialMatch;
pub use window::WindowConstraint;

use thiserror::Error;

/// Pattern-definition errors.
///
/// All of these are fatal and surface before any event is processed; the
/// engines assume a validated NFA.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("Pattern has no start state")]
    MissingStartState,

    #[error("Pattern has no final state")]
    MissingFinalState,

    #[error("Pattern already has a start state")]
    DuplicateStartState,

    #[error("Loop transition on non-Kleene state '{state}'")]
    LoopTransitionOnNonKleene { state: String },

    #[error("Kleene state '{state}' has no loop edge")]
    KleeneWithoutLoopEdge { state: String },

    #[error("Forward edge {edge} was never bound to a transition")]
    UnboundForwardEdge { edge: EdgeId },

    #[error("Loop edge {edge} was never bound to a Kleene state")]
    UnboundLoopEdge { edge: EdgeId },

    #[error("Edge {edge} is already bound to a transition")]
    EdgeRebound { edge: EdgeId },

    #[error("Edge {edge} has the wrong kind for this transition")]
    EdgeKindMismatch { edge: EdgeId },

    #[error("Final state '{state}' cannot have outgoing edges")]
    EdgeFromFinal { state: String },

    #[error("Unknown state id {0}")]
    UnknownState(StateId),

    #[error("Unknown edge id {0}")]
    UnknownEdge(EdgeId),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Combined output requires a fixed-length pattern (no Kleene states)")]
    VariableLengthCombined,
}

/// Result type for pattern construction and compilation
pub type PatternResult<T> = Result<T, PatternError>;
