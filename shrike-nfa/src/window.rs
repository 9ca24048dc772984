// WindowConstraint - temporal validity of a candidate
//
// Checked after a successful predicate and before the event is committed to
// the candidate; a violated window schedules the candidate for deletion.
// The incoming event's timestamp stands in for "last" in the FirstLast and
// FromLast variants.

use crate::structure::PartialMatch;
use serde::{Deserialize, Serialize};
use shrike_schema::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WindowConstraint {
    /// Always valid
    #[default]
    NoConstraint,
    /// event.ts - first_event.ts <= period
    FirstLast { period: u64 },
    /// event.ts - events[from].ts <= period
    FromLast { period: u64, from: usize },
    /// events[to].ts - events[from].ts <= period
    FromTo { period: u64, from: usize, to: usize },
}

impl WindowConstraint {
    pub fn is_constrained(&self) -> bool {
        !matches!(self, WindowConstraint::NoConstraint)
    }

    /// Whether the candidate remains valid when the event at `event_ts` is
    /// about to be committed.
    ///
    /// An index the candidate has not populated yet cannot be evaluated and
    /// passes.
    pub fn check<D>(&self, event_ts: Timestamp, candidate: &PartialMatch<D>) -> bool {
        match *self {
            WindowConstraint::NoConstraint => true,
            WindowConstraint::FirstLast { period } => match candidate.first_timestamp() {
                Some(first) => event_ts.saturating_sub(first) <= period,
                None => true,
            },
            WindowConstraint::FromLast { period, from } => match candidate.event_at(from) {
                Some(inst) => event_ts.saturating_sub(inst.ts()) <= period,
                None => true,
            },
            WindowConstraint::FromTo { period, from, to } => {
                match (candidate.event_at(from), candidate.event_at(to)) {
                    (Some(from_inst), Some(to_inst)) => {
                        to_inst.ts().saturating_sub(from_inst.ts()) <= period
                    }
                    _ => true,
                }
            }
        }
    }
}
