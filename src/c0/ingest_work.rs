// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The per-drain ingest work unit.
//!
//! One work unit carries everything a KVMS drain needs: the bounded merge
//! over the multiset's stripe iterators, the usage counters of the drained
//! data, generation numbers, and a chain of phase timestamps that is
//! logged once when the unit is finalized.

use crate::c0::kvms::{C0Usage, Kvms};
use crate::merge::BoundedMerger;
use crate::perfc::{CounterDef, CounterKind, CounterSet};
use crate::{clock, BoxedIterator, Error, Result};

/// Most source iterators one drain may merge
pub const MAX_KVSET_ITERS: usize = 16;

const MAGIC_POISON: usize = 0xdead_c0de;

/// Drain phases, in pipeline order; each owns one timestamp slot
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(usize)]
#[allow(missing_docs)]
pub enum IngestPhase {
    Enqueued = 0,
    BuilderReady = 1,
    RcuQuiesced = 2,
    HeapPrepared = 3,
    IngestStarted = 4,
    IngestFinished = 5,
    FinishWaited = 6,
    CnIngestStarted = 7,
    CnIngestFinished = 8,
    Destroyed = 9,
}

const PHASE_COUNT: usize = 10;

/// Counter index: keys drained (basic)
pub const PERFC_BA_C0ING_KEYS: usize = 0;

/// Counter index: tombstones drained (basic)
pub const PERFC_BA_C0ING_TOMBS: usize = 1;

/// Counter index: drains finished (rate)
pub const PERFC_RA_C0ING_INGESTS: usize = 2;

/// Counter index: whole-drain wall time (distribution, ns)
pub const PERFC_DI_C0ING_DURATION: usize = 3;

/// Counter definitions for the c0 ingest set.
#[must_use]
pub fn ingest_perfc_defs() -> Vec<CounterDef> {
    vec![
        CounterDef::new(CounterKind::Basic, "c0ing_keys"),
        CounterDef::new(CounterKind::Basic, "c0ing_tombs"),
        CounterDef::new(CounterKind::Rate, "c0ing_ingests"),
        CounterDef::new(CounterKind::Distribution, "c0ing_duration"),
    ]
}

/// Context of one KVMS drain
pub struct IngestWork<'a> {
    magic: usize,

    sources: Vec<BoxedIterator<'a>>,
    iterc: u32,

    usage: C0Usage,
    kvms_count: u32,

    generation: u64,
    generation_current: u64,

    ts: [u64; PHASE_COUNT],

    perfc: Option<CounterSet>,
}

impl<'a> IngestWork<'a> {
    /// Allocates a fresh work unit.
    ///
    /// The unit is boxed so its magic tag (its own address) stays valid
    /// for its whole life.
    #[must_use]
    pub fn init() -> Box<Self> {
        let mut work = Box::new(Self {
            magic: 0,
            sources: Vec::with_capacity(MAX_KVSET_ITERS),
            iterc: 0,
            usage: C0Usage::default(),
            kvms_count: 0,
            generation: 0,
            generation_current: 0,
            ts: [0; PHASE_COUNT],
            perfc: None,
        });

        work.magic = std::ptr::from_ref::<Self>(work.as_ref()) as usize;

        work
    }

    fn assert_magic(&self) {
        assert_eq!(
            self.magic,
            std::ptr::from_ref::<Self>(self) as usize,
            "ingest work unit used after teardown"
        );
    }

    /// Wires a counter set that receives the drain's totals at finish.
    pub fn set_perfc(&mut self, set: CounterSet) {
        self.assert_magic();
        self.perfc = Some(set);
    }

    /// Attaches every stripe iterator of `kvms` and folds its usage into
    /// the unit.
    ///
    /// # Errors
    ///
    /// `BadArgument` when the iterator budget would be exceeded.
    pub fn attach_kvms(&mut self, kvms: &'a Kvms) -> Result<()> {
        self.assert_magic();

        let iters = kvms.ingest_iters();

        if self.sources.len() + iters.len() > MAX_KVSET_ITERS {
            return Err(Error::BadArgument("too many ingest iterators"));
        }

        let usage = kvms.usage();
        self.usage.keys += usage.keys;
        self.usage.tombs += usage.tombs;
        self.usage.key_bytes += usage.key_bytes;
        self.usage.val_bytes += usage.val_bytes;

        self.kvms_count += 1;
        self.generation = self.generation.max(kvms.generation());

        #[allow(clippy::cast_possible_truncation)]
        {
            self.iterc += iters.len() as u32;
        }
        self.sources.extend(iters);

        Ok(())
    }

    /// Number of attached source iterators.
    #[must_use]
    pub fn iter_count(&self) -> usize {
        self.sources.len()
    }

    /// Usage totals of everything attached.
    #[must_use]
    pub fn usage(&self) -> C0Usage {
        self.usage
    }

    /// Sets the currently stable ingest generation, for the log line.
    pub fn set_current_generation(&mut self, generation: u64) {
        self.generation_current = generation;
    }

    /// Stamps `phase` with the current time.
    pub fn record_phase(&mut self, phase: IngestPhase) {
        self.assert_magic();

        if let Some(slot) = self.ts.get_mut(phase as usize) {
            *slot = clock::monotonic_ns();
        }
    }

    /// Takes the attached sources and builds the bounded merge the drain
    /// pulls from, stamping [`IngestPhase::HeapPrepared`].
    ///
    /// # Errors
    ///
    /// `BadArgument` if more sources were attached than the heap bound
    /// (prevented by [`Self::attach_kvms`]).
    pub fn prepare_merge(&mut self) -> Result<BoundedMerger<'a>> {
        self.assert_magic();

        let sources = std::mem::take(&mut self.sources);
        let merger = BoundedMerger::new(MAX_KVSET_ITERS, sources)?;

        self.record_phase(IngestPhase::HeapPrepared);

        Ok(merger)
    }

    /// Clears the unit for reuse: sources, usage, and timestamps.
    pub fn reset(&mut self) {
        self.assert_magic();

        self.sources.clear();
        self.iterc = 0;
        self.usage = C0Usage::default();
        self.kvms_count = 0;
        self.ts = [0; PHASE_COUNT];
    }

    /// Finalizes the unit: clamps the timestamp chain monotone, logs one
    /// phase-timing line, and feeds the counter set. The unit is unusable
    /// afterwards.
    pub fn fini(mut self: Box<Self>) {
        self.assert_magic();
        self.finish();
    }

    fn finish(&mut self) {
        self.magic = MAGIC_POISON;

        if self.ts[0] == 0 {
            return;
        }

        // later phases may be stamped by other threads; hide clock skew by
        // clamping the chain monotone before computing deltas
        let mut prev = 0u64;
        for slot in &mut self.ts {
            *slot = (*slot).max(prev);
            prev = *slot;
        }

        let us = |a: usize, b: usize| {
            let lo = self.ts.get(a).copied().unwrap_or(0);
            let hi = self.ts.get(b).copied().unwrap_or(0);
            hi.saturating_sub(lo) / 1_000
        };

        log::debug!(
            "c0_ingest: gen {}/{} width {}/{} keys {} tombs {} keykb {} valkb {} \
             queue {} rcu {} bhprep {} build {} c0ingest {} finwait {} cningest {} \
             destroy {} total {}",
            self.generation,
            self.generation_current,
            self.kvms_count,
            self.iterc,
            self.usage.keys,
            self.usage.tombs,
            self.usage.key_bytes / 1024,
            self.usage.val_bytes / 1024,
            us(0, 1),
            us(1, 2),
            us(2, 3),
            us(3, 4),
            us(4, 5),
            us(5, 6),
            us(6, 8),
            us(8, 9),
            us(0, 9),
        );

        if let Some(set) = &self.perfc {
            set.add(PERFC_BA_C0ING_KEYS, self.usage.keys);
            set.add(PERFC_BA_C0ING_TOMBS, self.usage.tombs);
            set.inc(PERFC_RA_C0ING_INGESTS);
            set.dis_record(PERFC_DI_C0ING_DURATION, self.ts[9] - self.ts[0]);
        }
    }
}

impl Drop for IngestWork<'_> {
    fn drop(&mut self) {
        if self.magic != MAGIC_POISON {
            self.finish();
        }
    }
}
