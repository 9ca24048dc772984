//! Shrike Event Model
//!
//! This module defines the input record the CEP core consumes. An event is
//! an ordered, typed tuple of arbitrary arity with a logical timestamp; the
//! core treats it as opaque apart from the fields user predicates touch.
//!
//! Events are shared between overlapping candidate matches, so the canonical
//! handle is [`EventRef`] (`Arc<Event>`): the atomic refcount guarantees an
//! event outlives its last referencing candidate even when shard boundaries
//! put producer and consumer on different threads.

use serde::{Deserialize, Serialize};
use shrike_schema::{FieldId, Timestamp, TypedValue};
use smallvec::SmallVec;
use std::sync::Arc;

/// Shared handle to an event; candidates hold clones of this
pub type EventRef = Arc<Event>;

/// A single data-channel record in the stream
#[derive(Debug, Clone)]
pub struct Event {
    /// Logical timestamp (non-decreasing; ties resolved by arrival order)
    pub ts: Timestamp,

    /// Event fields (sparse storage using field_id -> value mapping)
    pub fields: SmallVec<[(FieldId, TypedValue); 8]>,

    /// Optional source identifier
    pub source_id: Option<String>,
}

impl Event {
    /// Create a new event with no fields
    pub fn new(ts: Timestamp) -> Self {
        Self {
            ts,
            fields: SmallVec::new(),
            source_id: None,
        }
    }

    /// Add a field to the event
    pub fn with_field(mut self, field_id: FieldId, value: TypedValue) -> Self {
        self.fields.push((field_id, value));
        self
    }

    /// Set source identifier
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_id = Some(source.into());
        self
    }

    /// Get a field value by field ID
    pub fn get_field(&self, field_id: FieldId) -> Option<&TypedValue> {
        self.fields
            .iter()
            .find(|(id, _)| *id == field_id)
            .map(|(_, v)| v)
    }

    /// Check if event has a specific field
    pub fn has_field(&self, field_id: FieldId) -> bool {
        self.fields.iter().any(|(id, _)| *id == field_id)
    }

    /// Number of fields in this event
    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    /// Create an event builder
    pub fn builder() -> EventBuilder {
        EventBuilder::default()
    }

    /// Wrap this event in the shared handle used across candidates
    pub fn into_ref(self) -> EventRef {
        Arc::new(self)
    }
}

/// Event builder for convenient event construction
#[derive(Debug, Default)]
pub struct EventBuilder {
    ts: Option<Timestamp>,
    fields: SmallVec<[(FieldId, TypedValue); 8]>,
    source_id: Option<String>,
}

impl EventBuilder {
    /// Set the logical timestamp
    pub fn ts(mut self, ts: Timestamp) -> Self {
        self.ts = Some(ts);
        self
    }

    /// Add a field
    pub fn field(mut self, field_id: FieldId, value: TypedValue) -> Self {
        self.fields.push((field_id, value));
        self
    }

    /// Set source
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source_id = Some(source.into());
        self
    }

    /// Build the event
    pub fn build(self) -> Result<Event, BuildError> {
        Ok(Event {
            ts: self.ts.ok_or(BuildError::MissingField("ts"))?,
            fields: self.fields,
            source_id: self.source_id,
        })
    }
}

/// Error building an event
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

/// An out-of-band control record in the data stream.
///
/// Punctuations never mutate matcher state; the facade forwards them to the
/// downstream unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Punctuation {
    /// Logical timestamp of the control record
    pub ts: Timestamp,
    /// What the punctuation announces
    pub kind: PunctuationKind,
}

/// Punctuation kinds understood by the surrounding dataflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PunctuationKind {
    /// No further data elements will arrive
    EndOfStream,
    /// A window boundary upstream has expired
    WindowExpired,
    /// Application-defined marker
    Marker(u32),
}
