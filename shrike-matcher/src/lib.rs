//! Shrike Matcher - the CEP operator facade
//!
//! The matcher sits between an upstream operator emitting typed events and a
//! downstream consumer of match tuples. It compiles a pattern into an NFA,
//! feeds arriving events to the configured engine, and publishes completed
//! matches per the output strategy. Punctuations pass through unchanged.
//!
//! A matcher instance is single-threaded cooperative: all state transitions
//! run on the caller's thread of control. Parallelism comes from the
//! surrounding dataflow instantiating one matcher per shard.

pub mod dsl;

use serde::{Deserialize, Serialize};
use shrike_event::{EventRef, Punctuation};
use shrike_nfa::{
    EngineMetrics, EventInstance, MatchEngine, Nfa, Partitioner, PatternError, WindowConstraint,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// How overlapping matches interact.
///
/// Only `FirstMatch` and `NextMatch` are implemented; the remaining
/// strategies fall back to `FirstMatch` until their semantics are settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionStrategy {
    #[default]
    FirstMatch,
    NextMatch,
    AllMatches,
    ContinuityMatches,
    RecentMatch,
}

/// Shape of the downstream tuples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputStrategy {
    /// One tuple per event in the match: the event plus its state name and
    /// sequence number. Fixed downstream schema.
    #[default]
    OneByOne,
    /// A single tuple concatenating all events of the match. Requires a
    /// fixed-length pattern.
    Combined,
}

/// Matcher configuration
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MatcherConfig {
    pub selection: SelectionStrategy,
    pub output: OutputStrategy,
    pub window: WindowConstraint,
}

/// A tuple leaving the matcher on the data channel
#[derive(Debug, Clone)]
pub enum MatchTuple {
    /// OneByOne output: `event ⊕ state_name ⊕ sequence_in_complex`
    Instance(EventInstance),
    /// Combined output: all events of one match
    Combined(Vec<EventInstance>),
}

/// Downstream consumer of the matcher's two output channels
pub trait MatchSink {
    fn on_tuple(&mut self, tuple: MatchTuple, outdated: bool);
    fn on_punctuation(&mut self, punctuation: &Punctuation);
}

/// Sink collecting everything it receives; handy for tests and examples
#[derive(Debug, Default)]
pub struct VecSink {
    pub tuples: Vec<MatchTuple>,
    pub punctuations: Vec<Punctuation>,
}

impl MatchSink for VecSink {
    fn on_tuple(&mut self, tuple: MatchTuple, _outdated: bool) {
        self.tuples.push(tuple);
    }

    fn on_punctuation(&mut self, punctuation: &Punctuation) {
        self.punctuations.push(punctuation.clone());
    }
}

/// Matcher construction errors
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("pattern definition error: {0}")]
    Pattern(#[from] PatternError),
}

/// The matcher operator: owns the engine, publishes matches downstream
pub struct Matcher<D, S: MatchSink> {
    engine: MatchEngine<D>,
    selection: SelectionStrategy,
    output: OutputStrategy,
    metrics: Arc<EngineMetrics>,
    sink: S,
}

impl<D: 'static, S: MatchSink> Matcher<D, S> {
    /// Compile a pattern expression and build the matcher around it
    pub fn compile(
        config: MatcherConfig,
        pattern: dsl::Pattern<D>,
        partitioner: Partitioner,
        sink: S,
    ) -> Result<Self, MatcherError>
    where
        D: Default,
    {
        let nfa = dsl::compile(pattern)?;
        Self::from_nfa(config, nfa, partitioner, sink)
    }

    /// Build the matcher around a hand-constructed NFA
    pub fn from_nfa(
        config: MatcherConfig,
        nfa: Nfa<D>,
        partitioner: Partitioner,
        sink: S,
    ) -> Result<Self, MatcherError> {
        if config.output == OutputStrategy::Combined && nfa.kleene_count() > 0 {
            return Err(PatternError::VariableLengthCombined.into());
        }

        let selection = match config.selection {
            SelectionStrategy::FirstMatch | SelectionStrategy::NextMatch => config.selection,
            other => {
                warn!(
                    requested = ?other,
                    "selection strategy not implemented, falling back to FirstMatch"
                );
                SelectionStrategy::FirstMatch
            }
        };

        let metrics = Arc::new(EngineMetrics::new());
        let nfa = Arc::new(nfa);
        let engine = match selection {
            SelectionStrategy::NextMatch => {
                MatchEngine::next_match(nfa, config.window, partitioner, metrics.clone())
            }
            _ => MatchEngine::first_match(nfa, config.window, partitioner, metrics.clone()),
        };

        debug!(?selection, output = ?config.output, "matcher ready");

        Ok(Self {
            engine,
            selection,
            output: config.output,
            metrics,
            sink,
        })
    }

    /// Ingest one data element. The `outdated` flag is carried through the
    /// operator interface but does not affect the NFA.
    pub fn on_event(&mut self, event: &EventRef, _outdated: bool) {
        for m in self.engine.process_event(event) {
            self.publish(m.instances);
        }
    }

    /// Forward a punctuation downstream unchanged
    pub fn on_punctuation(&mut self, punctuation: &Punctuation) {
        self.sink.on_punctuation(punctuation);
    }

    fn publish(&mut self, instances: Vec<EventInstance>) {
        match self.output {
            OutputStrategy::OneByOne => {
                for instance in instances {
                    self.sink.on_tuple(MatchTuple::Instance(instance), false);
                }
            }
            OutputStrategy::Combined => {
                self.sink.on_tuple(MatchTuple::Combined(instances), false);
            }
        }
    }

    /// Matches published so far
    pub fn num_matches(&self) -> u64 {
        self.engine.num_matches()
    }

    /// Live candidates currently in the pool
    pub fn live_candidates(&self) -> usize {
        self.engine.live_candidates()
    }

    /// The effective selection strategy (after fallback)
    pub fn selection_strategy(&self) -> SelectionStrategy {
        self.selection
    }

    pub fn output_strategy(&self) -> OutputStrategy {
        self.output
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Discard live candidates (topology teardown); un-emitted partial
    /// matches are lost. Returns how many were dropped.
    pub fn drain(&mut self) -> usize {
        self.engine.drain()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{begin, final_state, state};
    use shrike_event::{Event, PunctuationKind};
    use shrike_schema::TypedValue;

    const X: u32 = 0;

    fn event(ts: u64, x: i64) -> EventRef {
        Event::new(ts).with_field(X, TypedValue::I64(x)).into_ref()
    }

    fn x_is(value: i64) -> impl Fn(&Event, Option<&()>) -> bool + Send + Sync + 'static {
        move |e, _| e.get_field(X).and_then(TypedValue::as_i64) == Some(value)
    }

    fn two_step_matcher(config: MatcherConfig) -> Matcher<(), VecSink> {
        let pattern = begin("start") >> state("a", x_is(1)) >> final_state("f", x_is(2));
        Matcher::compile(config, pattern, Partitioner::sequence(), VecSink::default()).unwrap()
    }

    #[test]
    fn test_one_by_one_output() {
        let mut matcher = two_step_matcher(MatcherConfig::default());
        matcher.on_event(&event(1, 1), false);
        matcher.on_event(&event(2, 2), false);

        assert_eq!(matcher.num_matches(), 1);
        let sink = matcher.sink();
        assert_eq!(sink.tuples.len(), 2);
        match &sink.tuples[0] {
            MatchTuple::Instance(inst) => {
                assert_eq!(inst.state_name(), "start");
                assert_eq!(inst.sequence_in_complex(), 1);
                assert_eq!(inst.ts(), 1);
            }
            other => panic!("expected instance tuple, got {other:?}"),
        }
        match &sink.tuples[1] {
            MatchTuple::Instance(inst) => {
                assert_eq!(inst.state_name(), "a");
                assert_eq!(inst.sequence_in_complex(), 2);
            }
            other => panic!("expected instance tuple, got {other:?}"),
        }
    }

    #[test]
    fn test_combined_output() {
        let config = MatcherConfig {
            output: OutputStrategy::Combined,
            ..Default::default()
        };
        let mut matcher = two_step_matcher(config);
        matcher.on_event(&event(1, 1), false);
        matcher.on_event(&event(2, 2), false);

        let sink = matcher.sink();
        assert_eq!(sink.tuples.len(), 1);
        match &sink.tuples[0] {
            MatchTuple::Combined(instances) => {
                assert_eq!(instances.len(), 2);
                assert_eq!(instances[0].ts(), 1);
                assert_eq!(instances[1].ts(), 2);
            }
            other => panic!("expected combined tuple, got {other:?}"),
        }
    }

    #[test]
    fn test_combined_rejects_kleene_patterns() {
        use crate::dsl::kleene;
        use shrike_nfa::KleeneMode;

        let config = MatcherConfig {
            output: OutputStrategy::Combined,
            ..Default::default()
        };
        let pattern = begin("start")
            >> kleene("k", KleeneMode::Star, x_is(1))
            >> final_state("f", x_is(2));
        let result = Matcher::compile(config, pattern, Partitioner::sequence(), VecSink::default());
        assert!(matches!(
            result,
            Err(MatcherError::Pattern(PatternError::VariableLengthCombined))
        ));
    }

    #[test]
    fn test_unimplemented_strategy_falls_back() {
        let config = MatcherConfig {
            selection: SelectionStrategy::AllMatches,
            ..Default::default()
        };
        let matcher = two_step_matcher(config);
        assert_eq!(matcher.selection_strategy(), SelectionStrategy::FirstMatch);
    }

    #[test]
    fn test_punctuation_passes_through() {
        let mut matcher = two_step_matcher(MatcherConfig::default());
        let punctuation = Punctuation {
            ts: 9,
            kind: PunctuationKind::EndOfStream,
        };
        matcher.on_punctuation(&punctuation);

        assert_eq!(matcher.sink().punctuations, vec![punctuation]);
        assert_eq!(matcher.sink().tuples.len(), 0);
    }

    #[test]
    fn test_drain_discards_partials() {
        let mut matcher = two_step_matcher(MatcherConfig::default());
        matcher.on_event(&event(1, 1), false);
        assert_eq!(matcher.live_candidates(), 1);
        assert_eq!(matcher.drain(), 1);
        assert_eq!(matcher.live_candidates(), 0);
        assert_eq!(matcher.sink().tuples.len(), 0);
    }
}
