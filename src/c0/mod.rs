// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The in-memory write layer.
//!
//! Mutations stage in a striped key-value multiset ([`Kvms`]) until it
//! fills; a drain then bundles the multiset's stripe iterators into an
//! [`IngestWork`] unit whose bounded merge feeds the persistent layer.

pub mod ingest_work;
pub mod kvms;

pub use {
    ingest_work::{
        ingest_perfc_defs, IngestPhase, IngestWork, MAX_KVSET_ITERS, PERFC_BA_C0ING_KEYS,
        PERFC_BA_C0ING_TOMBS, PERFC_DI_C0ING_DURATION, PERFC_RA_C0ING_INGESTS,
    },
    kvms::{C0Usage, Kvms},
};
