// PartialMatch - the mutable per-candidate record
//
// A partial match tracks one candidate's walk through the shared NFA: its
// current state, the events it has adopted, one loop counter per Kleene
// state, and its related-value record. The engines are the only writers and
// never touch the same candidate concurrently.

use crate::instance::EventInstance;
use crate::nfa::{EdgeId, EdgeKind, Nfa, State, StateId, StateKind};
use crate::pool::PartitionKey;
use shrike_event::EventRef;
use shrike_schema::Timestamp;
use smallvec::{smallvec, SmallVec};

#[derive(Debug)]
pub struct PartialMatch<D> {
    /// Pool identity, assigned on insertion; 0 until then
    structure_id: u64,

    current_state: StateId,

    /// Events adopted so far, in consumption order
    events: SmallVec<[EventInstance; 4]>,

    /// Loop-edge traversal counts, one slot per Kleene state of the NFA
    kleene_counts: SmallVec<[u16; 2]>,

    /// Related-value record, opaque to the engine
    related: D,

    partition: PartitionKey,

    complete: bool,
}

impl<D> PartialMatch<D> {
    /// Create a candidate resting at the start state with a fresh
    /// related-value record
    pub fn new(nfa: &Nfa<D>, partition: PartitionKey) -> Self {
        Self {
            structure_id: 0,
            current_state: nfa.start_id(),
            events: SmallVec::new(),
            kleene_counts: smallvec![0; nfa.kleene_count()],
            related: nfa.init_related(),
            partition,
            complete: false,
        }
    }

    /// Adopt an event through the given edge and make the necessary updates:
    /// record the instance under the active state's name, evolve the
    /// related-value record, then advance (forward edge) or bump the loop
    /// counter (loop edge). Reaching a final state completes the candidate.
    pub fn add_event(&mut self, nfa: &Nfa<D>, event: &EventRef, edge: EdgeId) {
        let state = nfa.state(self.current_state);
        let sequence = self.events.len() as u32 + 1;
        self.events
            .push(EventInstance::new(event.clone(), state.name_arc(), sequence));

        nfa.update_related(&mut self.related, edge, event);

        match nfa.edge(edge).kind() {
            EdgeKind::Forward { dest } => {
                self.current_state = dest;
            }
            EdgeKind::Loop { .. } => {
                if let StateKind::Kleene { slot, .. } = state.kind() {
                    self.kleene_counts[slot] += 1;
                }
            }
        }

        if nfa.state(self.current_state).is_final() {
            self.complete = true;
        }
    }

    pub fn current_state(&self) -> StateId {
        self.current_state
    }

    /// Used by the negation walk to resume from the reached state
    pub(crate) fn set_current_state(&mut self, state: StateId) {
        self.current_state = state;
    }

    /// All adopted events in consumption order
    pub fn events(&self) -> &[EventInstance] {
        &self.events
    }

    /// Event at the given 0-based position
    pub fn event_at(&self, index: usize) -> Option<&EventInstance> {
        self.events.get(index)
    }

    /// Timestamp of the first adopted event
    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.events.first().map(EventInstance::ts)
    }

    /// Timestamp of the most recently adopted event
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.events.last().map(EventInstance::ts)
    }

    /// Loop-edge traversals taken at the given Kleene state (0 for any
    /// other state kind)
    pub fn kleene_count(&self, state: &State) -> u16 {
        match state.kind() {
            StateKind::Kleene { slot, .. } => self.kleene_counts[slot],
            _ => 0,
        }
    }

    pub(crate) fn kleene_count_at(&self, slot: usize) -> u16 {
        self.kleene_counts[slot]
    }

    /// The candidate's related-value record
    pub fn related(&self) -> &D {
        &self.related
    }

    /// Number of adopted events
    pub fn sequence(&self) -> usize {
        self.events.len()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    pub fn structure_id(&self) -> u64 {
        self.structure_id
    }

    pub(crate) fn set_structure_id(&mut self, id: u64) {
        self.structure_id = id;
    }

    /// Consume the candidate, yielding its adopted events
    pub fn into_instances(self) -> Vec<EventInstance> {
        self.events.into_vec()
    }
}
