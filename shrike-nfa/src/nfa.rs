// NFA definition - the immutable pattern graph
//
// An Nfa is built once (from the DSL or by hand through NfaBuilder) and then
// shared read-only by every partial match. States and edges live in two
// id-indexed vectors; state kinds and edge kinds are tagged variants so the
// engines dispatch with a plain match instead of virtual calls.

use crate::{PatternError, PatternResult};
use serde::{Deserialize, Serialize};
use shrike_event::Event;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// State identifier, sequential and local to one NFA
pub type StateId = u16;

/// Edge identifier, sequential and local to one NFA
pub type EdgeId = u32;

/// Edge predicate: sees the incoming event and the candidate's related-value
/// record (`None` when evaluated from the start state, where no candidate
/// exists yet). Expected to be pure and cheap.
pub type Predicate<D> = Box<dyn Fn(&Event, Option<&D>) -> bool + Send + Sync>;

/// Builds a fresh related-value record for a new partial match
pub type InitFn<D> = Box<dyn Fn() -> D + Send + Sync>;

/// Evolves a candidate's related-value record on each edge traversal
pub type UpdateFn<D> = Box<dyn Fn(&mut D, EdgeId, &Event) + Send + Sync>;

/// Repetition discipline of a Kleene state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KleeneMode {
    /// Zero or more iterations
    Star,
    /// One or more iterations
    Plus,
    /// At most one iteration
    Question,
    /// Exactly the given number of iterations
    Restricted(u16),
}

/// The five state kinds of the pattern graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// Unique entry point, forward edges only
    Start,
    /// Forward edges only
    Normal,
    /// One loop edge plus forward edges; `slot` indexes the per-match
    /// iteration counter
    Kleene {
        mode: KleeneMode,
        slot: usize,
        loop_edge: Option<EdgeId>,
    },
    /// A satisfied predicate here aborts the candidate
    Negation,
    /// Terminal, no outgoing edges
    Final,
}

/// A state of the NFA
#[derive(Debug, Clone)]
pub struct State {
    id: StateId,
    name: Arc<str>,
    kind: StateKind,
    forward_edges: Vec<EdgeId>,
}

impl State {
    fn new(id: StateId, name: &str, kind: StateKind) -> Self {
        Self {
            id,
            name: Arc::from(name),
            kind,
            forward_edges: Vec::new(),
        }
    }

    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    /// Outgoing forward edges in declaration order
    pub fn forward_edges(&self) -> &[EdgeId] {
        &self.forward_edges
    }

    pub fn is_final(&self) -> bool {
        matches!(self.kind, StateKind::Final)
    }

    pub fn is_negation(&self) -> bool {
        matches!(self.kind, StateKind::Negation)
    }

    pub fn is_kleene(&self) -> bool {
        matches!(self.kind, StateKind::Kleene { .. })
    }
}

/// Edge kinds: forward transitions move to a destination state, loop edges
/// re-enter their Kleene state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Forward { dest: StateId },
    Loop { max_iters: Option<u16> },
}

/// An edge of the NFA, owning its predicate
pub struct Edge<D> {
    id: EdgeId,
    kind: EdgeKind,
    predicate: Predicate<D>,
}

impl<D> Edge<D> {
    pub fn id(&self) -> EdgeId {
        self.id
    }

    pub fn kind(&self) -> EdgeKind {
        self.kind
    }

    /// Evaluate the user predicate against an event and the candidate's
    /// related values (`None` only for start-state evaluation)
    pub fn evaluate(&self, event: &Event, related: Option<&D>) -> bool {
        (self.predicate)(event, related)
    }
}

impl<D> fmt::Debug for Edge<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// The compiled pattern graph, immutable and shared by all partial matches
pub struct Nfa<D> {
    states: Vec<State>,
    edges: Vec<Edge<D>>,
    start: StateId,
    finals: Vec<StateId>,
    kleene_count: usize,
    init: InitFn<D>,
    update: UpdateFn<D>,
}

impl<D> Nfa<D> {
    pub fn state(&self, id: StateId) -> &State {
        &self.states[id as usize]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge<D> {
        &self.edges[id as usize]
    }

    pub fn start_state(&self) -> &State {
        &self.states[self.start as usize]
    }

    pub fn start_id(&self) -> StateId {
        self.start
    }

    /// Ids of all final states
    pub fn final_states(&self) -> &[StateId] {
        &self.finals
    }

    /// Number of Kleene states; partial matches size their counter arrays
    /// from this
    pub fn kleene_count(&self) -> usize {
        self.kleene_count
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Build a fresh related-value record for a new candidate
    pub fn init_related(&self) -> D {
        (self.init)()
    }

    /// Evolve a candidate's related-value record for one edge traversal
    pub fn update_related(&self, record: &mut D, edge: EdgeId, event: &Event) {
        (self.update)(record, edge, event)
    }
}

impl<D> fmt::Debug for Nfa<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nfa")
            .field("states", &self.states)
            .field("start", &self.start)
            .field("finals", &self.finals)
            .field("edge_count", &self.edges.len())
            .finish_non_exhaustive()
    }
}

/// Builder-side edge: forward destinations stay open until a transition
/// binds them
struct PendingEdge<D> {
    id: EdgeId,
    kind: PendingKind,
    predicate: Predicate<D>,
    bound: bool,
}

enum PendingKind {
    Forward { dest: Option<StateId> },
    Loop { max_iters: Option<u16> },
}

/// Constructs an [`Nfa`] by creating states, edges, and transitions, in the
/// order a pattern compiler (or a hand-written test) naturally emits them.
///
/// `build` validates the result: exactly one start state, at least one final
/// state, every Kleene state owns its loop edge, and no edge is left
/// dangling. Reachability is a property of how transitions are created and
/// is not re-checked.
pub struct NfaBuilder<D> {
    states: Vec<State>,
    edges: Vec<PendingEdge<D>>,
    start: Option<StateId>,
    finals: Vec<StateId>,
    kleene_count: usize,
    init: InitFn<D>,
    update: UpdateFn<D>,
}

impl<D: Default + 'static> NfaBuilder<D> {
    /// Create a builder whose related-value record defaults to `D::default()`
    /// with a no-op update
    pub fn new() -> Self {
        Self::with_dependency(Box::new(D::default), Box::new(|_, _, _| {}))
    }
}

impl<D: Default + 'static> Default for NfaBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> NfaBuilder<D> {
    /// Create a builder with explicit related-value callbacks
    pub fn with_dependency(init: InitFn<D>, update: UpdateFn<D>) -> Self {
        Self {
            states: Vec::new(),
            edges: Vec::new(),
            start: None,
            finals: Vec::new(),
            kleene_count: 0,
            init,
            update,
        }
    }

    /// Replace the related-value callbacks
    pub fn set_dependency(&mut self, init: InitFn<D>, update: UpdateFn<D>) {
        self.init = init;
        self.update = update;
    }

    fn add_state(&mut self, name: &str, kind: StateKind) -> StateId {
        let id = self.states.len() as StateId;
        self.states.push(State::new(id, name, kind));
        id
    }

    /// Create the unique start state
    pub fn create_start_state(&mut self, name: &str) -> PatternResult<StateId> {
        if self.start.is_some() {
            return Err(PatternError::DuplicateStartState);
        }
        let id = self.add_state(name, StateKind::Start);
        self.start = Some(id);
        Ok(id)
    }

    /// Create a normal state
    pub fn create_normal_state(&mut self, name: &str) -> StateId {
        self.add_state(name, StateKind::Normal)
    }

    /// Create a Kleene state with the given repetition mode
    pub fn create_kleene_state(&mut self, name: &str, mode: KleeneMode) -> StateId {
        let slot = self.kleene_count;
        self.kleene_count += 1;
        self.add_state(
            name,
            StateKind::Kleene {
                mode,
                slot,
                loop_edge: None,
            },
        )
    }

    /// Create a negation state
    pub fn create_negation_state(&mut self, name: &str) -> StateId {
        self.add_state(name, StateKind::Negation)
    }

    /// Create a final state
    pub fn create_final_state(&mut self, name: &str) -> StateId {
        let id = self.add_state(name, StateKind::Final);
        self.finals.push(id);
        id
    }

    /// Create a forward edge carrying the given predicate; its destination
    /// is bound later by [`create_forward_transition`](Self::create_forward_transition)
    pub fn create_forward_edge(
        &mut self,
        predicate: impl Fn(&Event, Option<&D>) -> bool + Send + Sync + 'static,
    ) -> EdgeId {
        let id = self.edges.len() as EdgeId;
        self.edges.push(PendingEdge {
            id,
            kind: PendingKind::Forward { dest: None },
            predicate: Box::new(predicate),
            bound: false,
        });
        id
    }

    /// Create a loop edge carrying the given predicate; it is bound to a
    /// Kleene state by [`create_loop_transition`](Self::create_loop_transition)
    pub fn create_loop_edge(
        &mut self,
        predicate: impl Fn(&Event, Option<&D>) -> bool + Send + Sync + 'static,
    ) -> EdgeId {
        let id = self.edges.len() as EdgeId;
        self.edges.push(PendingEdge {
            id,
            kind: PendingKind::Loop { max_iters: None },
            predicate: Box::new(predicate),
            bound: false,
        });
        id
    }

    fn check_state(&self, id: StateId) -> PatternResult<()> {
        if (id as usize) < self.states.len() {
            Ok(())
        } else {
            Err(PatternError::UnknownState(id))
        }
    }

    fn check_edge(&self, id: EdgeId) -> PatternResult<()> {
        if (id as usize) < self.edges.len() {
            Ok(())
        } else {
            Err(PatternError::UnknownEdge(id))
        }
    }

    /// Bind a forward edge to `src`'s outgoing list and set its destination
    pub fn create_forward_transition(
        &mut self,
        src: StateId,
        edge: EdgeId,
        dst: StateId,
    ) -> PatternResult<()> {
        self.check_state(src)?;
        self.check_state(dst)?;
        self.check_edge(edge)?;

        let src_state = &self.states[src as usize];
        if src_state.is_final() {
            return Err(PatternError::EdgeFromFinal {
                state: src_state.name().to_string(),
            });
        }

        let pending = &mut self.edges[edge as usize];
        if pending.bound {
            return Err(PatternError::EdgeRebound { edge });
        }
        match &mut pending.kind {
            PendingKind::Forward { dest } => {
                *dest = Some(dst);
                pending.bound = true;
            }
            PendingKind::Loop { .. } => return Err(PatternError::EdgeKindMismatch { edge }),
        }

        self.states[src as usize].forward_edges.push(edge);
        Ok(())
    }

    /// Bind a loop edge to a Kleene state. For a `Restricted(k)` state the
    /// edge's iteration bound is aligned to `k`.
    pub fn create_loop_transition(
        &mut self,
        kleene_state: StateId,
        loop_edge: EdgeId,
    ) -> PatternResult<()> {
        self.check_state(kleene_state)?;
        self.check_edge(loop_edge)?;

        let restricted = match &self.states[kleene_state as usize].kind {
            StateKind::Kleene {
                mode,
                loop_edge: existing,
                ..
            } => {
                if existing.is_some() {
                    return Err(PatternError::EdgeRebound { edge: loop_edge });
                }
                match mode {
                    KleeneMode::Restricted(k) => Some(*k),
                    _ => None,
                }
            }
            _ => {
                return Err(PatternError::LoopTransitionOnNonKleene {
                    state: self.states[kleene_state as usize].name().to_string(),
                })
            }
        };

        let pending = &mut self.edges[loop_edge as usize];
        if pending.bound {
            return Err(PatternError::EdgeRebound { edge: loop_edge });
        }
        match &mut pending.kind {
            PendingKind::Loop { max_iters } => {
                *max_iters = restricted;
                pending.bound = true;
            }
            PendingKind::Forward { .. } => {
                return Err(PatternError::EdgeKindMismatch { edge: loop_edge })
            }
        }

        if let StateKind::Kleene { loop_edge: le, .. } =
            &mut self.states[kleene_state as usize].kind
        {
            *le = Some(loop_edge);
        }
        Ok(())
    }

    /// Validate the graph and freeze it
    pub fn build(self) -> PatternResult<Nfa<D>> {
        let start = self.start.ok_or(PatternError::MissingStartState)?;
        if self.finals.is_empty() {
            return Err(PatternError::MissingFinalState);
        }

        for state in &self.states {
            if let StateKind::Kleene { loop_edge: None, .. } = state.kind {
                return Err(PatternError::KleeneWithoutLoopEdge {
                    state: state.name().to_string(),
                });
            }
        }

        let mut edges = Vec::with_capacity(self.edges.len());
        for pending in self.edges {
            let kind = match pending.kind {
                PendingKind::Forward { dest: Some(dest) } => EdgeKind::Forward { dest },
                PendingKind::Forward { dest: None } => {
                    return Err(PatternError::UnboundForwardEdge { edge: pending.id })
                }
                PendingKind::Loop { max_iters } => {
                    if !pending.bound {
                        return Err(PatternError::UnboundLoopEdge { edge: pending.id });
                    }
                    EdgeKind::Loop { max_iters }
                }
            };
            edges.push(Edge {
                id: pending.id,
                kind,
                predicate: pending.predicate,
            });
        }

        debug!(
            states = self.states.len(),
            edges = edges.len(),
            kleene = self.kleene_count,
            "NFA built"
        );

        Ok(Nfa {
            states: self.states,
            edges,
            start,
            finals: self.finals,
            kleene_count: self.kleene_count,
            init: self.init,
            update: self.update,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shrike_schema::TypedValue;

    fn x_equals(value: i64) -> impl Fn(&Event, Option<&()>) -> bool + Send + Sync {
        move |event, _| event.get_field(0).and_then(TypedValue::as_i64) == Some(value)
    }

    /// start -(x==1)-> a -(x==2)-> final
    fn simple_nfa() -> Nfa<()> {
        let mut b = NfaBuilder::<()>::new();
        let start = b.create_start_state("start").unwrap();
        let a = b.create_normal_state("a");
        let fin = b.create_final_state("final");
        let e1 = b.create_forward_edge(x_equals(1));
        let e2 = b.create_forward_edge(x_equals(2));
        b.create_forward_transition(start, e1, a).unwrap();
        b.create_forward_transition(a, e2, fin).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_build_simple_sequence() {
        let nfa = simple_nfa();
        assert_eq!(nfa.state_count(), 3);
        assert_eq!(nfa.edge_count(), 2);
        assert_eq!(nfa.start_state().name(), "start");
        assert_eq!(nfa.final_states().len(), 1);
        assert_eq!(nfa.kleene_count(), 0);

        let start = nfa.start_state();
        assert_eq!(start.forward_edges().len(), 1);
        let edge = nfa.edge(start.forward_edges()[0]);
        assert!(matches!(edge.kind(), EdgeKind::Forward { dest } if dest == 1));
    }

    #[test]
    fn test_predicate_evaluation() {
        let nfa = simple_nfa();
        let edge = nfa.edge(0);
        let hit = Event::new(1).with_field(0, TypedValue::I64(1));
        let miss = Event::new(1).with_field(0, TypedValue::I64(5));
        assert!(edge.evaluate(&hit, None));
        assert!(!edge.evaluate(&miss, None));
    }

    #[test]
    fn test_missing_start_state() {
        let mut b = NfaBuilder::<()>::new();
        b.create_final_state("final");
        assert!(matches!(b.build(), Err(PatternError::MissingStartState)));
    }

    #[test]
    fn test_missing_final_state() {
        let mut b = NfaBuilder::<()>::new();
        b.create_start_state("start").unwrap();
        assert!(matches!(b.build(), Err(PatternError::MissingFinalState)));
    }

    #[test]
    fn test_duplicate_start_state() {
        let mut b = NfaBuilder::<()>::new();
        b.create_start_state("s1").unwrap();
        assert!(matches!(
            b.create_start_state("s2"),
            Err(PatternError::DuplicateStartState)
        ));
    }

    #[test]
    fn test_loop_transition_on_non_kleene() {
        let mut b = NfaBuilder::<()>::new();
        b.create_start_state("start").unwrap();
        let a = b.create_normal_state("a");
        let loop_edge = b.create_loop_edge(|_, _| true);
        assert!(matches!(
            b.create_loop_transition(a, loop_edge),
            Err(PatternError::LoopTransitionOnNonKleene { .. })
        ));
    }

    #[test]
    fn test_kleene_without_loop_edge() {
        let mut b = NfaBuilder::<()>::new();
        let start = b.create_start_state("start").unwrap();
        let k = b.create_kleene_state("k", KleeneMode::Star);
        let fin = b.create_final_state("final");
        let e1 = b.create_forward_edge(|_, _| true);
        let e2 = b.create_forward_edge(|_, _| true);
        b.create_forward_transition(start, e1, k).unwrap();
        b.create_forward_transition(k, e2, fin).unwrap();
        assert!(matches!(
            b.build(),
            Err(PatternError::KleeneWithoutLoopEdge { .. })
        ));
    }

    #[test]
    fn test_restricted_mode_sets_loop_bound() {
        let mut b = NfaBuilder::<()>::new();
        let start = b.create_start_state("start").unwrap();
        let k = b.create_kleene_state("k", KleeneMode::Restricted(3));
        let fin = b.create_final_state("final");
        let e1 = b.create_forward_edge(|_, _| true);
        let e2 = b.create_forward_edge(|_, _| true);
        let le = b.create_loop_edge(|_, _| true);
        b.create_forward_transition(start, e1, k).unwrap();
        b.create_forward_transition(k, e2, fin).unwrap();
        b.create_loop_transition(k, le).unwrap();
        let nfa = b.build().unwrap();
        assert!(matches!(
            nfa.edge(le).kind(),
            EdgeKind::Loop {
                max_iters: Some(3)
            }
        ));
        assert_eq!(nfa.kleene_count(), 1);
    }

    #[test]
    fn test_dangling_forward_edge() {
        let mut b = NfaBuilder::<()>::new();
        b.create_start_state("start").unwrap();
        b.create_final_state("final");
        b.create_forward_edge(|_, _| true);
        assert!(matches!(
            b.build(),
            Err(PatternError::UnboundForwardEdge { edge: 0 })
        ));
    }

    #[test]
    fn test_edge_from_final() {
        let mut b = NfaBuilder::<()>::new();
        b.create_start_state("start").unwrap();
        let fin = b.create_final_state("final");
        let a = b.create_normal_state("a");
        let e = b.create_forward_edge(|_, _| true);
        assert!(matches!(
            b.create_forward_transition(fin, e, a),
            Err(PatternError::EdgeFromFinal { .. })
        ));
    }

    #[test]
    fn test_edge_rebound() {
        let mut b = NfaBuilder::<()>::new();
        let start = b.create_start_state("start").unwrap();
        let a = b.create_normal_state("a");
        let fin = b.create_final_state("final");
        let e = b.create_forward_edge(|_, _| true);
        b.create_forward_transition(start, e, a).unwrap();
        assert!(matches!(
            b.create_forward_transition(a, e, fin),
            Err(PatternError::EdgeRebound { edge: 0 })
        ));
    }

    #[test]
    fn test_dependency_callbacks() {
        let mut b = NfaBuilder::<i64>::with_dependency(
            Box::new(|| 10),
            Box::new(|rec, edge, _| *rec += edge as i64),
        );
        let start = b.create_start_state("start").unwrap();
        let fin = b.create_final_state("final");
        let e = b.create_forward_edge(|_, _| true);
        b.create_forward_transition(start, e, fin).unwrap();
        let nfa = b.build().unwrap();

        let mut rec = nfa.init_related();
        assert_eq!(rec, 10);
        let event = Event::new(1);
        nfa.update_related(&mut rec, 0, &event);
        assert_eq!(rec, 10);
        nfa.update_related(&mut rec, 5, &event);
        assert_eq!(rec, 15);
    }
}
