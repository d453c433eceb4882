// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::InternalValue;
use interval_heap::IntervalHeap as Heap;

/// A fallible KV iterator handed to the merge
pub type BoxedIterator<'a> = Box<dyn Iterator<Item = crate::Result<InternalValue>> + 'a>;

#[derive(Eq)]
struct HeapItem(usize, InternalValue);

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.1.key == other.1.key
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // InternalKey orders by (user key asc, seqno desc), which is exactly
        // the newest-first tie-break the ingest needs
        self.1.key.cmp(&other.1.key)
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Merges a bounded number of KV iterators into one ordered stream.
///
/// Sources must be individually ordered; entries for the same user key are
/// yielded newest seqno first across all sources.
pub struct BoundedMerger<'a> {
    iterators: Vec<BoxedIterator<'a>>,
    heap: Heap<HeapItem>,

    initialized: bool,
}

impl<'a> BoundedMerger<'a> {
    /// Creates a merger over `iterators`.
    ///
    /// # Errors
    ///
    /// Fails with `BadArgument` when more than `capacity` sources are given.
    pub fn new(capacity: usize, iterators: Vec<BoxedIterator<'a>>) -> crate::Result<Self> {
        if iterators.len() > capacity {
            return Err(crate::Error::BadArgument("too many merge sources"));
        }

        let heap = Heap::with_capacity(capacity);

        Ok(Self {
            iterators,
            heap,
            initialized: false,
        })
    }

    /// Number of source iterators.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.iterators.len()
    }

    #[allow(clippy::indexing_slicing)]
    fn initialize(&mut self) -> crate::Result<()> {
        for idx in 0..self.iterators.len() {
            if let Some(item) = self.iterators[idx].next() {
                let item = item?;
                self.heap.push(HeapItem(idx, item));
            }
        }
        self.initialized = true;
        Ok(())
    }
}

impl<'a> Iterator for BoundedMerger<'a> {
    type Item = crate::Result<InternalValue>;

    #[allow(clippy::indexing_slicing)]
    fn next(&mut self) -> Option<Self::Item> {
        if !self.initialized {
            fail_iter!(self.initialize());
        }

        let min_item = self.heap.pop_min()?;

        if let Some(next_item) = self.iterators[min_item.0].next() {
            let next_item = fail_iter!(next_item);
            self.heap.push(HeapItem(min_item.0, next_item));
        }

        Some(Ok(min_item.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InternalValue, ValueType};
    use test_log::test;

    fn iter_of(items: Vec<InternalValue>) -> BoxedIterator<'static> {
        Box::new(items.into_iter().map(Ok))
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn merge_interleaved() {
        let a = iter_of(vec![
            InternalValue::from_components(*b"a", *b"0", 1, ValueType::Value),
            InternalValue::from_components(*b"c", *b"0", 1, ValueType::Value),
        ]);
        let b = iter_of(vec![InternalValue::from_components(
            *b"b",
            *b"0",
            1,
            ValueType::Value,
        )]);

        let merger = BoundedMerger::new(4, vec![a, b]).unwrap();
        let keys = merger
            .map(|v| v.unwrap().key.user_key.to_vec())
            .collect::<Vec<_>>();

        assert_eq!(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()], keys);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn merge_newest_seqno_first() {
        let a = iter_of(vec![InternalValue::from_components(
            *b"k",
            *b"old",
            1,
            ValueType::Value,
        )]);
        let b = iter_of(vec![InternalValue::from_components(
            *b"k",
            *b"new",
            9,
            ValueType::Value,
        )]);

        let merger = BoundedMerger::new(4, vec![a, b]).unwrap();
        let seqnos = merger.map(|v| v.unwrap().key.seqno).collect::<Vec<_>>();

        assert_eq!(vec![9, 1], seqnos);
    }

    #[test]
    fn merge_too_many_sources() {
        let iters = (0..3).map(|_| iter_of(vec![])).collect::<Vec<_>>();

        assert!(matches!(
            BoundedMerger::new(2, iters),
            Err(crate::Error::BadArgument(_))
        ));
    }
}
