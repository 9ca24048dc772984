// StructurePool - partitioned storage for live partial matches
//
// A multimap from partition key to candidates. Sequence keys give every
// candidate its own bucket (full-scan semantics); attribute keys bucket
// candidates by a fingerprint of chosen fields of their first event, so the
// next-match engine only visits the candidates an event can concern.

use crate::structure::PartialMatch;
use ahash::AHashMap;
use shrike_event::Event;
use shrike_schema::{FieldId, TypedValue};
use std::hash::{BuildHasher, Hasher};

/// Bucket key for a candidate in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKey {
    /// Fresh per candidate; semantically "no partitioning"
    Sequence(u64),
    /// Fingerprint of chosen fields of the candidate's first event
    Attribute(u64),
}

enum PartitionMode {
    Sequence,
    Attribute(Box<dyn Fn(&Event) -> u64 + Send + Sync>),
}

/// Produces partition keys for new candidates.
///
/// The sequence counter is local to this partitioner (one per matcher), so
/// independent matchers in a process never contend on it.
pub struct Partitioner {
    mode: PartitionMode,
    next_sequence: u64,
}

impl Partitioner {
    /// No partitioning: every candidate gets a fresh key
    pub fn sequence() -> Self {
        Self {
            mode: PartitionMode::Sequence,
            next_sequence: 0,
        }
    }

    /// Partition by a user projection over the first event
    pub fn attribute(projection: impl Fn(&Event) -> u64 + Send + Sync + 'static) -> Self {
        Self {
            mode: PartitionMode::Attribute(Box::new(projection)),
            next_sequence: 0,
        }
    }

    /// Partition by the fingerprint of the given fields.
    ///
    /// Missing fields hash as null, so events of mixed arity still land in
    /// stable buckets.
    pub fn by_fields(fields: Vec<FieldId>) -> Self {
        let build = ahash::RandomState::with_seeds(
            0x5113_29ab_cd01_ef23,
            0x9e37_79b9_7f4a_7c15,
            0x2545_f491_4f6c_dd1d,
            0xda94_2a3c_1b0f_107b,
        );
        Self::attribute(move |event| {
            let mut hasher = build.build_hasher();
            for field in &fields {
                match event.get_field(*field) {
                    Some(value) => value.hash_into(&mut hasher),
                    None => TypedValue::Null.hash_into(&mut hasher),
                }
            }
            hasher.finish()
        })
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self.mode, PartitionMode::Attribute(_))
    }

    /// Generate the key for a candidate created from this event. Advances
    /// the sequence counter in sequence mode.
    pub fn generate(&mut self, event: &Event) -> PartitionKey {
        match &self.mode {
            PartitionMode::Sequence => {
                let value = self.next_sequence;
                self.next_sequence += 1;
                PartitionKey::Sequence(value)
            }
            PartitionMode::Attribute(projection) => PartitionKey::Attribute(projection(event)),
        }
    }

    /// Key this event would map to, without consuming a sequence number.
    /// `None` in sequence mode, where lookup degenerates to a full scan.
    pub fn probe(&self, event: &Event) -> Option<PartitionKey> {
        match &self.mode {
            PartitionMode::Sequence => None,
            PartitionMode::Attribute(projection) => Some(PartitionKey::Attribute(projection(event))),
        }
    }
}

impl std::fmt::Debug for Partitioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match &self.mode {
            PartitionMode::Sequence => "Sequence",
            PartitionMode::Attribute(_) => "Attribute",
        };
        f.debug_struct("Partitioner")
            .field("mode", &mode)
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

/// All live candidates, bucketed by partition key
#[derive(Debug)]
pub struct StructurePool<D> {
    buckets: AHashMap<PartitionKey, Vec<PartialMatch<D>>>,
    len: usize,
    insertions: u64,
    next_structure_id: u64,
}

impl<D> StructurePool<D> {
    pub fn new() -> Self {
        Self {
            buckets: AHashMap::default(),
            len: 0,
            insertions: 0,
            next_structure_id: 1,
        }
    }

    /// Insert a candidate under its partition key, assigning its pool
    /// identity
    pub fn insert(&mut self, mut candidate: PartialMatch<D>) -> u64 {
        let id = self.next_structure_id;
        self.next_structure_id += 1;
        candidate.set_structure_id(id);

        let key = *candidate.partition();
        self.buckets.entry(key).or_default().push(candidate);
        self.len += 1;
        self.insertions += 1;
        id
    }

    /// Candidates under one key
    pub fn range(&self, key: &PartitionKey) -> impl Iterator<Item = &PartialMatch<D>> {
        self.buckets.get(key).into_iter().flatten()
    }

    /// Mutable candidates under one key
    pub fn range_mut(&mut self, key: &PartitionKey) -> impl Iterator<Item = &mut PartialMatch<D>> {
        self.buckets.get_mut(key).into_iter().flatten()
    }

    /// All candidates
    pub fn scan(&self) -> impl Iterator<Item = &PartialMatch<D>> {
        self.buckets.values().flatten()
    }

    /// All candidates, mutable
    pub fn scan_mut(&mut self) -> impl Iterator<Item = &mut PartialMatch<D>> {
        self.buckets.values_mut().flatten()
    }

    /// The first candidate in the pool, if any. The first-match engine keeps
    /// at most one candidate alive, making this its lookup.
    pub fn first_mut(&mut self) -> Option<&mut PartialMatch<D>> {
        self.buckets.values_mut().next().and_then(|b| b.first_mut())
    }

    /// Remove a candidate by key and pool identity
    pub fn remove(&mut self, key: &PartitionKey, structure_id: u64) -> Option<PartialMatch<D>> {
        let bucket = self.buckets.get_mut(key)?;
        let index = bucket
            .iter()
            .position(|m| m.structure_id() == structure_id)?;
        let candidate = bucket.swap_remove(index);
        if bucket.is_empty() {
            self.buckets.remove(key);
        }
        self.len -= 1;
        Some(candidate)
    }

    /// Drop every candidate
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.len = 0;
    }

    /// Number of live candidates
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total insertions over the pool's lifetime
    pub fn num_insertions(&self) -> u64 {
        self.insertions
    }
}

impl<D> Default for StructurePool<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfa::{Nfa, NfaBuilder};
    use shrike_schema::TypedValue;

    fn trivial_nfa() -> Nfa<()> {
        let mut b = NfaBuilder::<()>::new();
        let start = b.create_start_state("start").unwrap();
        let fin = b.create_final_state("final");
        let e = b.create_forward_edge(|_, _| true);
        b.create_forward_transition(start, e, fin).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_sequence_keys_are_fresh() {
        let mut p = Partitioner::sequence();
        let event = Event::new(1);
        assert_eq!(p.generate(&event), PartitionKey::Sequence(0));
        assert_eq!(p.generate(&event), PartitionKey::Sequence(1));
        assert_eq!(p.probe(&event), None);
        assert!(!p.is_attribute());
    }

    #[test]
    fn test_attribute_keys_follow_fields() {
        let mut p = Partitioner::by_fields(vec![7]);
        let a1 = Event::new(1).with_field(7, TypedValue::I64(10));
        let a2 = Event::new(2).with_field(7, TypedValue::I64(10));
        let b = Event::new(3).with_field(7, TypedValue::I64(11));

        assert_eq!(p.generate(&a1), p.generate(&a2));
        assert_ne!(p.generate(&a1), p.generate(&b));
        assert_eq!(p.probe(&a1), Some(p.generate(&a1)));
        assert!(p.is_attribute());
    }

    #[test]
    fn test_missing_field_hashes_as_null() {
        let mut p = Partitioner::by_fields(vec![7]);
        let missing1 = Event::new(1);
        let missing2 = Event::new(2).with_field(3, TypedValue::Bool(true));
        assert_eq!(p.generate(&missing1), p.generate(&missing2));
    }

    #[test]
    fn test_pool_insert_range_remove() {
        let nfa = trivial_nfa();
        let mut pool = StructurePool::new();
        let key = PartitionKey::Attribute(42);

        let id1 = pool.insert(PartialMatch::new(&nfa, key));
        let id2 = pool.insert(PartialMatch::new(&nfa, key));
        let id3 = pool.insert(PartialMatch::new(&nfa, PartitionKey::Attribute(7)));

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.num_insertions(), 3);
        assert_eq!(pool.range(&key).count(), 2);
        assert_eq!(pool.scan().count(), 3);
        assert_ne!(id1, id2);

        let removed = pool.remove(&key, id1).unwrap();
        assert_eq!(removed.structure_id(), id1);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.range(&key).count(), 1);

        assert!(pool.remove(&key, id1).is_none());
        assert!(pool.remove(&PartitionKey::Attribute(7), id3).is_some());
        assert_eq!(pool.range(&PartitionKey::Attribute(7)).count(), 0);
    }

    #[test]
    fn test_pool_clear() {
        let nfa = trivial_nfa();
        let mut pool = StructurePool::new();
        pool.insert(PartialMatch::new(&nfa, PartitionKey::Sequence(0)));
        pool.insert(PartialMatch::new(&nfa, PartitionKey::Sequence(1)));

        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.scan().count(), 0);
        // insertion history survives a clear
        assert_eq!(pool.num_insertions(), 2);
    }

    #[test]
    fn test_first_mut() {
        let nfa = trivial_nfa();
        let mut pool: StructurePool<()> = StructurePool::new();
        assert!(pool.first_mut().is_none());
        let id = pool.insert(PartialMatch::new(&nfa, PartitionKey::Sequence(0)));
        assert_eq!(pool.first_mut().unwrap().structure_id(), id);
    }
}
