// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Data-plane core of a log-structured key-value storage engine for tiered
//! block storage.
//!
//! This crate bundles the pieces that sit between an in-memory write layer
//! and a media-class block device:
//!
//! - **c0**: a striped in-memory key-value multiset ([`c0::Kvms`]) and the
//!   ingest work unit ([`c0::IngestWork`]) that drains a full multiset
//!   through a bounded merge iterator.
//! - **mpool**: a per-file fixed-width block allocator
//!   ([`mpool::MblockFile`]) over a sparse data file, backed by an
//!   interval free-space map and a crash-safe memory-mapped slot table,
//!   plus a memory-mapped read descriptor ([`mpool::MblkDesc`]).
//! - **perfc**: lock-free per-CPU performance counters (basic, rate,
//!   latency, distribution) surfaced as a JSON tree through a hierarchical
//!   in-process registry ([`data_tree`]).
//! - **params**: declarative, self-describing parameter sets with typed
//!   conversion, validation and JSON round-tripping, driving everything
//!   above.
//! - **kvdb_meta**: the top-level persisted KVDB descriptor.
//!
//! The compaction scheduler, write-ahead log, and persistent read path are
//! external collaborators; this crate exposes the surfaces they call.

#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

macro_rules! fail_iter {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        }
    };
}

pub mod c0;

pub mod clock;

pub mod data_tree;

mod error;

mod key;

pub mod kvdb_meta;

mod mclass;

#[doc(hidden)]
pub mod merge;

pub mod mpool;

mod omf_version;

pub mod params;

pub mod perfc;

mod slice;

mod value;

/// KV-tuple, typically yielded by an ingest merge
pub type KvPair = (UserKey, UserValue);

#[doc(hidden)]
pub use merge::BoxedIterator;

pub use {
    error::{Error, Result},
    key::InternalKey,
    mclass::{Mclass, MCLASS_COUNT},
    omf_version::{GlobalOmfVersion, KvdbMetaVersion, MblockMetaHdrVersion},
    slice::Slice,
    value::{InternalValue, SeqNo, UserKey, UserValue, ValueType},
};
