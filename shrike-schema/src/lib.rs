//! Shrike Field Schema
//!
//! This module defines the type system for event fields in the Shrike CEP
//! core. Events are strongly typed with numeric field ids so predicates and
//! partition projections can address fields without string lookups on the
//! hot path.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Field identifier (u32 for fast lookup)
pub type FieldId = u32;

/// Logical timestamp in nanoseconds, non-decreasing per stream; ties allowed
pub type Timestamp = u64;

/// Field definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    /// Unique field path (e.g., "quote.price")
    pub path: String,
    /// Field data type
    pub data_type: FieldDataType,
    /// Optional description
    pub description: Option<String>,
}

/// Field data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldDataType {
    I64,
    U64,
    F64,
    Bool,
    String,
    Bytes,
}

/// Typed field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedValue {
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    Null,
}

impl TypedValue {
    /// Get as i64 if possible
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TypedValue::I64(v) => Some(*v),
            TypedValue::U64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Get as u64 if possible
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            TypedValue::U64(v) => Some(*v),
            TypedValue::I64(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Get as f64 if possible
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::F64(v) => Some(*v),
            TypedValue::I64(v) => Some(*v as f64),
            TypedValue::U64(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Get as bool if possible
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as string if possible
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }

    /// Feed this value into a hasher in a type-stable way.
    ///
    /// Used by attribute partitioners to fingerprint key fields. F64 hashes
    /// by bit pattern, which keeps the enum free of a blanket `Hash` impl.
    pub fn hash_into<H: Hasher>(&self, state: &mut H) {
        match self {
            TypedValue::I64(v) => {
                0u8.hash(state);
                v.hash(state);
            }
            TypedValue::U64(v) => {
                1u8.hash(state);
                v.hash(state);
            }
            TypedValue::F64(v) => {
                2u8.hash(state);
                v.to_bits().hash(state);
            }
            TypedValue::Bool(v) => {
                3u8.hash(state);
                v.hash(state);
            }
            TypedValue::String(v) => {
                4u8.hash(state);
                v.hash(state);
            }
            TypedValue::Bytes(v) => {
                5u8.hash(state);
                v.hash(state);
            }
            TypedValue::Null => 6u8.hash(state),
        }
    }
}

/// Schema registry that maintains field definitions
///
/// Registration assigns sequential ids starting at 1; lookups work in both
/// directions (id -> def, path -> id).
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    fields: AHashMap<FieldId, FieldDef>,
    field_paths: AHashMap<String, FieldId>,
    next_field_id: FieldId,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    /// Create a new schema registry
    pub fn new() -> Self {
        Self {
            fields: AHashMap::default(),
            field_paths: AHashMap::default(),
            next_field_id: 1,
        }
    }

    /// Register a field definition and return its ID
    pub fn register_field(&mut self, def: FieldDef) -> Result<FieldId, SchemaError> {
        if self.field_paths.contains_key(&def.path) {
            return Err(SchemaError::FieldAlreadyExists(def.path));
        }

        let id = self.next_field_id;
        self.next_field_id += 1;

        self.field_paths.insert(def.path.clone(), id);
        self.fields.insert(id, def);

        Ok(id)
    }

    /// Get field definition by ID
    pub fn get_field(&self, id: FieldId) -> Option<&FieldDef> {
        self.fields.get(&id)
    }

    /// Get field ID by path
    pub fn get_field_id(&self, path: &str) -> Option<FieldId> {
        self.field_paths.get(path).copied()
    }

    /// List all registered fields
    pub fn list_fields(&self) -> Vec<(FieldId, &FieldDef)> {
        self.fields.iter().map(|(id, def)| (*id, def)).collect()
    }
}

/// Schema errors
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Field already exists: {0}")]
    FieldAlreadyExists(String),

    #[error("Field not found: {0}")]
    FieldNotFound(String),
}
