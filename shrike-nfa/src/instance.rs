// EventInstance - an adopted event inside a partial match
//
// Pairs the shared event with the name of the state that was active when the
// event was consumed and the event's 1-based position in the candidate.
// Immutable after construction.

use shrike_event::EventRef;
use shrike_schema::Timestamp;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct EventInstance {
    event: EventRef,
    state_name: Arc<str>,
    sequence_in_complex: u32,
}

impl EventInstance {
    pub(crate) fn new(event: EventRef, state_name: Arc<str>, sequence_in_complex: u32) -> Self {
        Self {
            event,
            state_name,
            sequence_in_complex,
        }
    }

    /// The original event
    pub fn event(&self) -> &EventRef {
        &self.event
    }

    /// Name of the state active when this event was consumed
    pub fn state_name(&self) -> &str {
        &self.state_name
    }

    /// 1-based position of this event within the match that adopted it
    pub fn sequence_in_complex(&self) -> u32 {
        self.sequence_in_complex
    }

    /// Timestamp of the underlying event
    pub fn ts(&self) -> Timestamp {
        self.event.ts
    }
}
