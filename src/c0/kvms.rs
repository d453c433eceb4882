// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The in-memory key-value multiset.
//!
//! A KVMS stages mutations in lock-free skiplist stripes until it is full,
//! then drains through an ingest work unit. Striping keeps concurrent
//! writers off each other's cache lines; a key always lands in the same
//! stripe, so per-stripe iterators stay individually ordered.

use crate::{key::InternalKey, InternalValue, SeqNo, UserKey, UserValue, ValueType};
use crossbeam_skiplist::SkipMap;
use rustc_hash::FxHasher;
use std::hash::Hasher;
use std::sync::atomic::{
    AtomicU64,
    Ordering::{AcqRel, Acquire},
};

/// Usage counters of one KVMS
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct C0Usage {
    /// Live keys staged (including tombstones)
    pub keys: u64,

    /// Tombstones staged
    pub tombs: u64,

    /// Total key bytes staged
    pub key_bytes: u64,

    /// Total value bytes staged
    pub val_bytes: u64,
}

/// A striped in-memory key-value multiset
pub struct Kvms {
    stripes: Vec<SkipMap<InternalKey, UserValue>>,

    keys: AtomicU64,
    tombs: AtomicU64,
    key_bytes: AtomicU64,
    val_bytes: AtomicU64,

    highest_seqno: AtomicU64,

    generation: u64,
}

impl Kvms {
    /// Creates a KVMS with `width` stripes for ingest generation
    /// `generation`.
    ///
    /// # Panics
    ///
    /// Panics if `width` is zero.
    #[must_use]
    pub fn new(generation: u64, width: usize) -> Self {
        assert!(width > 0, "a KVMS needs at least one stripe");

        Self {
            stripes: (0..width).map(|_| SkipMap::new()).collect(),
            keys: AtomicU64::new(0),
            tombs: AtomicU64::new(0),
            key_bytes: AtomicU64::new(0),
            val_bytes: AtomicU64::new(0),
            highest_seqno: AtomicU64::new(0),
            generation,
        }
    }

    /// The ingest generation this KVMS belongs to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of stripes.
    #[must_use]
    pub fn width(&self) -> usize {
        self.stripes.len()
    }

    fn stripe(&self, key: &[u8]) -> &SkipMap<InternalKey, UserValue> {
        let mut hasher = FxHasher::default();
        hasher.write(key);

        #[allow(clippy::expect_used, clippy::cast_possible_truncation)]
        let stripe = self
            .stripes
            .get(hasher.finish() as usize % self.stripes.len())
            .expect("stripe index is in range");

        stripe
    }

    /// Stages one mutation.
    pub fn put(&self, item: InternalValue) {
        self.keys.fetch_add(1, AcqRel);
        self.key_bytes
            .fetch_add(item.key.user_key.len() as u64, AcqRel);

        if item.is_tombstone() {
            self.tombs.fetch_add(1, AcqRel);
        } else {
            self.val_bytes.fetch_add(item.value.len() as u64, AcqRel);
        }

        self.highest_seqno.fetch_max(item.key.seqno, AcqRel);

        self.stripe(&item.key.user_key)
            .insert(item.key, item.value);
    }

    /// Stages a tombstone for `key`.
    pub fn delete<K: Into<UserKey>>(&self, key: K, seqno: SeqNo) {
        self.put(InternalValue::new_tombstone(key, seqno));
    }

    /// Returns the newest mutation of `key` visible at `seqno`.
    #[must_use]
    pub fn get(&self, key: &[u8], seqno: SeqNo) -> Option<InternalValue> {
        if seqno == 0 {
            return None;
        }

        let lower_bound = InternalKey::new(key, seqno - 1, ValueType::Value);

        self.stripe(key)
            .range(lower_bound..)
            .take_while(|entry| &*entry.key().user_key == key)
            .next()
            .map(|entry| InternalValue {
                key: entry.key().clone(),
                value: entry.value().clone(),
            })
    }

    /// Number of staged mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stripes.iter().map(SkipMap::len).sum()
    }

    /// Returns `true` if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stripes.iter().all(SkipMap::is_empty)
    }

    /// Point-in-time usage counters.
    #[must_use]
    pub fn usage(&self) -> C0Usage {
        C0Usage {
            keys: self.keys.load(Acquire),
            tombs: self.tombs.load(Acquire),
            key_bytes: self.key_bytes.load(Acquire),
            val_bytes: self.val_bytes.load(Acquire),
        }
    }

    /// Highest staged sequence number, if anything is staged.
    #[must_use]
    pub fn highest_seqno(&self) -> Option<SeqNo> {
        if self.is_empty() {
            None
        } else {
            Some(self.highest_seqno.load(Acquire))
        }
    }

    /// One ordered iterator per non-empty stripe, for the ingest merge.
    pub fn ingest_iters(&self) -> Vec<crate::BoxedIterator<'_>> {
        self.stripes
            .iter()
            .filter(|stripe| !stripe.is_empty())
            .map(|stripe| {
                Box::new(stripe.iter().map(|entry| {
                    Ok(InternalValue {
                        key: entry.key().clone(),
                        value: entry.value().clone(),
                    })
                })) as crate::BoxedIterator<'_>
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn put_get_mvcc() {
        let kvms = Kvms::new(1, 4);

        kvms.put(InternalValue::from_components(
            *b"abc",
            *b"old",
            1,
            ValueType::Value,
        ));
        kvms.put(InternalValue::from_components(
            *b"abc",
            *b"new",
            5,
            ValueType::Value,
        ));

        #[allow(clippy::unwrap_used)]
        {
            assert_eq!(*b"new", &*kvms.get(b"abc", SeqNo::MAX).unwrap().value);
            assert_eq!(*b"old", &*kvms.get(b"abc", 2).unwrap().value);
        }
        assert_eq!(None, kvms.get(b"abc", 1));
        assert_eq!(None, kvms.get(b"missing", SeqNo::MAX));
    }

    #[test]
    fn usage_tracks_tombs_and_bytes() {
        let kvms = Kvms::new(1, 2);

        kvms.put(InternalValue::from_components(
            *b"key1",
            *b"value1",
            1,
            ValueType::Value,
        ));
        kvms.delete(*b"key2", 2);

        let usage = kvms.usage();
        assert_eq!(2, usage.keys);
        assert_eq!(1, usage.tombs);
        assert_eq!(8, usage.key_bytes);
        assert_eq!(6, usage.val_bytes);

        assert_eq!(Some(2), kvms.highest_seqno());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn ingest_iters_are_individually_ordered() {
        let kvms = Kvms::new(1, 3);

        for i in 0u64..64 {
            kvms.put(InternalValue::from_components(
                i.to_be_bytes(),
                *b"v",
                i,
                ValueType::Value,
            ));
        }

        let iters = kvms.ingest_iters();
        assert!(!iters.is_empty());

        for iter in iters {
            let keys = iter
                .map(|v| v.unwrap().key.user_key.to_vec())
                .collect::<Vec<_>>();

            let mut sorted = keys.clone();
            sorted.sort();
            assert_eq!(sorted, keys);
        }
    }
}
