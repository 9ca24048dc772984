// Matching engines - per-event drivers over the candidate pool
//
// Both engines share the same per-candidate routines: predicate dispatch
// keyed on the current state's kind, the window check, and candidate
// creation from the start state. They differ in candidate lifecycle: the
// first-match engine keeps at most one candidate and consumes events into
// it; the next-match engine keeps many, advancing existing candidates
// before starting a new one on every event.

use crate::instance::EventInstance;
use crate::metrics::{EngineMetrics, EvictionReason};
use crate::nfa::{EdgeKind, KleeneMode, Nfa, State, StateKind};
use crate::pool::{Partitioner, PartitionKey, StructurePool};
use crate::structure::PartialMatch;
use crate::window::WindowConstraint;
use shrike_event::EventRef;
use std::sync::Arc;
use tracing::{debug, trace};

/// A completed match leaving the engine
#[derive(Debug, Clone)]
pub struct ComplexMatch {
    /// The adopted events in consumption order
    pub instances: Vec<EventInstance>,
    /// Partition the candidate lived under
    pub partition: PartitionKey,
}

/// Outcome of predicate dispatch for one candidate
enum Dispatch {
    /// Index of the satisfied forward edge on the (possibly snapped)
    /// current state
    Forward(usize),
    /// No forward hit; a loop side-effect may already have been applied
    Stay,
    /// A negation predicate matched
    Kill,
}

/// Outcome of advancing one candidate by one event
enum Advance {
    Kept,
    Completed(ComplexMatch),
    Doomed(EvictionReason),
}

/// State shared by both engine variants
struct EngineCore<D> {
    nfa: Arc<Nfa<D>>,
    window: WindowConstraint,
    metrics: Arc<EngineMetrics>,
}

impl<D> EngineCore<D> {
    fn first_satisfied(
        &self,
        state: &State,
        event: &EventRef,
        related: Option<&D>,
    ) -> Option<usize> {
        state
            .forward_edges()
            .iter()
            .position(|edge| self.nfa.edge(*edge).evaluate(event, related))
    }

    /// Predicate dispatch keyed on the current state's kind. Forward edges
    /// are tried in declaration order. Kleene loop hits commit the event as
    /// a side effect and still report `Stay`.
    fn check_predicate(&self, event: &EventRef, candidate: &mut PartialMatch<D>) -> Dispatch {
        let state = self.nfa.state(candidate.current_state());
        match state.kind() {
            StateKind::Start | StateKind::Normal => {
                match self.first_satisfied(state, event, Some(candidate.related())) {
                    Some(index) => Dispatch::Forward(index),
                    None => Dispatch::Stay,
                }
            }
            StateKind::Kleene { mode, slot, loop_edge } => {
                let count = candidate.kleene_count_at(slot);

                let forward_allowed = match mode {
                    KleeneMode::Star | KleeneMode::Question => true,
                    KleeneMode::Plus => count >= 1,
                    KleeneMode::Restricted(k) => count >= k,
                };
                if forward_allowed {
                    if let Some(index) =
                        self.first_satisfied(state, event, Some(candidate.related()))
                    {
                        return Dispatch::Forward(index);
                    }
                }

                let loop_edge = loop_edge.expect("kleene state without loop edge");
                if self
                    .nfa
                    .edge(loop_edge)
                    .evaluate(event, Some(candidate.related()))
                {
                    let may_append = match mode {
                        KleeneMode::Star => true,
                        KleeneMode::Plus | KleeneMode::Question => count < 1,
                        KleeneMode::Restricted(k) => count < k,
                    };
                    if may_append {
                        candidate.add_event(&self.nfa, event, loop_edge);
                    }
                }
                Dispatch::Stay
            }
            StateKind::Negation => self.check_negation_chain(state, event, candidate),
            StateKind::Final => Dispatch::Stay,
        }
    }

    /// Walk a (possibly chained) run of negation states. A satisfied
    /// predicate on any of them kills the candidate. Past the chain, the
    /// first non-negation state's edges decide the advance; reaching a
    /// final state directly advances through the chain's first edge.
    fn check_negation_chain(
        &self,
        state: &State,
        event: &EventRef,
        candidate: &mut PartialMatch<D>,
    ) -> Dispatch {
        let mut current = state;
        loop {
            for edge in current.forward_edges() {
                if self.nfa.edge(*edge).evaluate(event, Some(candidate.related())) {
                    return Dispatch::Kill;
                }
            }

            let Some(first) = current.forward_edges().first() else {
                return Dispatch::Stay;
            };
            let EdgeKind::Forward { dest } = self.nfa.edge(*first).kind() else {
                return Dispatch::Stay;
            };
            let next = self.nfa.state(dest);

            if next.is_negation() {
                current = next;
                continue;
            }
            if next.is_final() {
                return Dispatch::Forward(0);
            }

            for (index, edge) in next.forward_edges().iter().enumerate() {
                if self.nfa.edge(*edge).evaluate(event, Some(candidate.related())) {
                    candidate.set_current_state(next.id());
                    return Dispatch::Forward(index);
                }
            }
            return Dispatch::Stay;
        }
    }

    /// Advance one candidate by one event: dispatch, window check, commit,
    /// completion.
    fn advance(&self, event: &EventRef, candidate: &mut PartialMatch<D>) -> Advance {
        match self.check_predicate(event, candidate) {
            Dispatch::Forward(index) => {
                if self.window.is_constrained() && !self.window.check(event.ts, candidate) {
                    trace!(
                        structure = candidate.structure_id(),
                        "window violated, scheduling candidate for deletion"
                    );
                    return Advance::Doomed(EvictionReason::WindowViolation);
                }

                let edge = self.nfa.state(candidate.current_state()).forward_edges()[index];
                candidate.add_event(&self.nfa, event, edge);

                if candidate.is_complete() {
                    debug!(
                        structure = candidate.structure_id(),
                        events = candidate.sequence(),
                        "candidate completed"
                    );
                    Advance::Completed(ComplexMatch {
                        instances: candidate.events().to_vec(),
                        partition: *candidate.partition(),
                    })
                } else {
                    Advance::Kept
                }
            }
            Dispatch::Kill => {
                trace!(
                    structure = candidate.structure_id(),
                    "negation matched, scheduling candidate for deletion"
                );
                Advance::Doomed(EvictionReason::NegationKill)
            }
            Dispatch::Stay => Advance::Kept,
        }
    }

    /// Try to start a new candidate from this event. Walks the start
    /// state's forward edges in declaration order with no related values;
    /// the first satisfied edge adopts the event. A pattern with a single
    /// transition completes on creation and is returned instead of pooled.
    fn create_start(
        &self,
        partitioner: &mut Partitioner,
        pool: &mut StructurePool<D>,
        event: &EventRef,
    ) -> Option<ComplexMatch> {
        let start = self.nfa.start_state();
        let index = start
            .forward_edges()
            .iter()
            .position(|edge| self.nfa.edge(*edge).evaluate(event, None))?;

        let key = partitioner.generate(event);
        let mut candidate = PartialMatch::new(&self.nfa, key);
        candidate.add_event(&self.nfa, event, start.forward_edges()[index]);
        self.metrics.structure_created();

        if candidate.is_complete() {
            self.metrics.structures_removed(1);
            self.metrics.record_eviction(EvictionReason::Completed);
            return Some(ComplexMatch {
                instances: candidate.into_instances(),
                partition: key,
            });
        }

        let id = pool.insert(candidate);
        trace!(structure = id, ?key, "started new candidate");
        None
    }
}

/// Engine keeping at most one live candidate.
///
/// A completed first match consumes all events up to its completion; no
/// overlapping matches are produced.
pub struct FirstMatchEngine<D> {
    core: EngineCore<D>,
    pool: StructurePool<D>,
    partitioner: Partitioner,
    matched: u64,
}

impl<D> FirstMatchEngine<D> {
    pub fn new(
        nfa: Arc<Nfa<D>>,
        window: WindowConstraint,
        partitioner: Partitioner,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            core: EngineCore {
                nfa,
                window,
                metrics,
            },
            pool: StructurePool::new(),
            partitioner,
            matched: 0,
        }
    }

    /// Drive one event through the engine
    pub fn process_event(&mut self, event: &EventRef) -> Vec<ComplexMatch> {
        self.core.metrics.record_event();
        let mut out = Vec::new();

        if self.pool.is_empty() {
            if let Some(m) =
                self.core
                    .create_start(&mut self.partitioner, &mut self.pool, event)
            {
                self.matched += 1;
                self.core.metrics.record_match();
                out.push(m);
            }
            return out;
        }

        let Some(candidate) = self.pool.first_mut() else {
            return out;
        };
        match self.core.advance(event, candidate) {
            Advance::Completed(m) => {
                self.matched += 1;
                self.core.metrics.record_match();
                self.core.metrics.record_eviction(EvictionReason::Completed);
                self.core.metrics.structures_removed(self.pool.len());
                self.pool.clear();
                out.push(m);
            }
            Advance::Doomed(reason) => {
                self.core.metrics.record_eviction(reason);
                self.core.metrics.structures_removed(self.pool.len());
                self.pool.clear();
            }
            Advance::Kept => {}
        }
        out
    }

    pub fn num_matches(&self) -> u64 {
        self.matched
    }

    pub fn pool(&self) -> &StructurePool<D> {
        &self.pool
    }

    pub fn nfa(&self) -> &Arc<Nfa<D>> {
        &self.core.nfa
    }

    fn drain(&mut self) -> usize {
        let dropped = self.pool.len();
        for _ in 0..dropped {
            self.core.metrics.record_eviction(EvictionReason::Cleared);
        }
        self.core.metrics.structures_removed(dropped);
        self.pool.clear();
        dropped
    }
}

/// Engine keeping many live candidates, keyed by partition.
///
/// Every event first advances the candidates it can concern, then may start
/// a new candidate; deletions are deferred until the event has visited all
/// candidates.
pub struct NextMatchEngine<D> {
    core: EngineCore<D>,
    pool: StructurePool<D>,
    partitioner: Partitioner,
    pending_deletions: Vec<(PartitionKey, u64)>,
    matched: u64,
}

impl<D> NextMatchEngine<D> {
    pub fn new(
        nfa: Arc<Nfa<D>>,
        window: WindowConstraint,
        partitioner: Partitioner,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            core: EngineCore {
                nfa,
                window,
                metrics,
            },
            pool: StructurePool::new(),
            partitioner,
            pending_deletions: Vec::new(),
            matched: 0,
        }
    }

    fn visit_candidate(
        core: &EngineCore<D>,
        event: &EventRef,
        candidate: &mut PartialMatch<D>,
        out: &mut Vec<ComplexMatch>,
        pending: &mut Vec<(PartitionKey, u64)>,
        matched: &mut u64,
    ) {
        match core.advance(event, candidate) {
            Advance::Completed(m) => {
                *matched += 1;
                core.metrics.record_match();
                core.metrics.record_eviction(EvictionReason::Completed);
                pending.push((*candidate.partition(), candidate.structure_id()));
                out.push(m);
            }
            Advance::Doomed(reason) => {
                core.metrics.record_eviction(reason);
                pending.push((*candidate.partition(), candidate.structure_id()));
            }
            Advance::Kept => {}
        }
    }

    /// Drive one event through the engine
    pub fn process_event(&mut self, event: &EventRef) -> Vec<ComplexMatch> {
        self.core.metrics.record_event();
        let mut out = Vec::new();

        // Existing candidates are advanced before a new one may start.
        if let Some(key) = self.partitioner.probe(event) {
            for candidate in self.pool.range_mut(&key) {
                Self::visit_candidate(
                    &self.core,
                    event,
                    candidate,
                    &mut out,
                    &mut self.pending_deletions,
                    &mut self.matched,
                );
            }
        } else {
            for candidate in self.pool.scan_mut() {
                Self::visit_candidate(
                    &self.core,
                    event,
                    candidate,
                    &mut out,
                    &mut self.pending_deletions,
                    &mut self.matched,
                );
            }
        }

        // The same event may both continue existing matches and start a new
        // one.
        if let Some(m) = self
            .core
            .create_start(&mut self.partitioner, &mut self.pool, event)
        {
            self.matched += 1;
            self.core.metrics.record_match();
            out.push(m);
        }

        self.drain_deletions();
        out
    }

    fn drain_deletions(&mut self) {
        for (key, id) in self.pending_deletions.drain(..) {
            if self.pool.remove(&key, id).is_some() {
                self.core.metrics.structures_removed(1);
            }
        }
    }

    pub fn num_matches(&self) -> u64 {
        self.matched
    }

    pub fn pool(&self) -> &StructurePool<D> {
        &self.pool
    }

    pub fn nfa(&self) -> &Arc<Nfa<D>> {
        &self.core.nfa
    }

    fn drain(&mut self) -> usize {
        let dropped = self.pool.len();
        for _ in 0..dropped {
            self.core.metrics.record_eviction(EvictionReason::Cleared);
        }
        self.core.metrics.structures_removed(dropped);
        self.pool.clear();
        dropped
    }
}

/// The configured engine variant behind the matcher facade
pub enum MatchEngine<D> {
    First(FirstMatchEngine<D>),
    Next(NextMatchEngine<D>),
}

impl<D> MatchEngine<D> {
    pub fn first_match(
        nfa: Arc<Nfa<D>>,
        window: WindowConstraint,
        partitioner: Partitioner,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        MatchEngine::First(FirstMatchEngine::new(nfa, window, partitioner, metrics))
    }

    pub fn next_match(
        nfa: Arc<Nfa<D>>,
        window: WindowConstraint,
        partitioner: Partitioner,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        MatchEngine::Next(NextMatchEngine::new(nfa, window, partitioner, metrics))
    }

    /// Drive one event through the configured engine
    pub fn process_event(&mut self, event: &EventRef) -> Vec<ComplexMatch> {
        match self {
            MatchEngine::First(engine) => engine.process_event(event),
            MatchEngine::Next(engine) => engine.process_event(event),
        }
    }

    /// Matches emitted so far
    pub fn num_matches(&self) -> u64 {
        match self {
            MatchEngine::First(engine) => engine.num_matches(),
            MatchEngine::Next(engine) => engine.num_matches(),
        }
    }

    /// Live candidates in the pool
    pub fn live_candidates(&self) -> usize {
        match self {
            MatchEngine::First(engine) => engine.pool().len(),
            MatchEngine::Next(engine) => engine.pool().len(),
        }
    }

    pub fn nfa(&self) -> &Arc<Nfa<D>> {
        match self {
            MatchEngine::First(engine) => engine.nfa(),
            MatchEngine::Next(engine) => engine.nfa(),
        }
    }

    /// Discard all live candidates (topology teardown); returns how many
    /// were dropped
    pub fn drain(&mut self) -> usize {
        match self {
            MatchEngine::First(engine) => engine.drain(),
            MatchEngine::Next(engine) => engine.drain(),
        }
    }
}
