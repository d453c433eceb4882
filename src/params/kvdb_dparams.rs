// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! KVDB destroy-time parameters.

use crate::params::{pspec_string, ParamSpec};
use crate::Mclass;

/// KVDB destroy parameter record
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KvdbDparams {
    /// Per-mclass storage paths to tear down
    pub storage_path: [String; 3],
}

static PSPECS: &[ParamSpec<KvdbDparams>] = &[
    pspec_string!(
        KvdbDparams,
        "storage.capacity.path", "location of capacity media",
        0, storage_path[0]
    ),
    pspec_string!(
        KvdbDparams,
        "storage.staging.path", "location of staging media",
        0, storage_path[1]
    ),
    pspec_string!(
        KvdbDparams,
        "storage.pmem.path", "location of pmem media",
        0, storage_path[2]
    ),
];

impl KvdbDparams {
    /// The parameter spec table for this record type.
    #[must_use]
    pub fn pspecs() -> &'static [ParamSpec<Self>] {
        PSPECS
    }

    /// The configured path for `mclass`, if any.
    #[must_use]
    pub fn path(&self, mclass: Mclass) -> Option<&str> {
        self.storage_path
            .get(usize::from(u8::from(mclass)))
            .map(String::as_str)
            .filter(|p| !p.is_empty())
    }
}
