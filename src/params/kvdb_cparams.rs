// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! KVDB creation-time parameters.

use crate::params::{pspec_string, ParamSpec, PARAM_EXPERIMENTAL};
use crate::Mclass;

/// KVDB creation parameter record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvdbCparams {
    /// Per-mclass storage paths; empty means the class is not configured
    pub storage_path: [String; 3],
}

impl Default for KvdbCparams {
    fn default() -> Self {
        Self {
            // capacity media defaults to a directory inside the KVDB home
            storage_path: ["capacity".into(), String::new(), String::new()],
        }
    }
}

static PSPECS: &[ParamSpec<KvdbCparams>] = &[
    pspec_string!(
        KvdbCparams,
        "storage.capacity.path", "location of capacity media",
        0, storage_path[0]
    ),
    pspec_string!(
        KvdbCparams,
        "storage.staging.path", "location of staging media",
        0, storage_path[1]
    ),
    pspec_string!(
        KvdbCparams,
        "storage.pmem.path", "location of pmem media",
        PARAM_EXPERIMENTAL, storage_path[2]
    ),
];

impl KvdbCparams {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;
    use test_log::test;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn capacity_defaults_to_home_relative_dir() {
        let p = KvdbCparams::default();

        assert_eq!(Some("capacity"), p.path(Mclass::Capacity));
        assert_eq!(None, p.path(Mclass::Staging));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn paths_deserialize() {
        let mut p = KvdbCparams::default();

        params::deserialize(
            KvdbCparams::pspecs(),
            &mut p,
            &["storage.staging.path=/mnt/fast"],
        )
        .unwrap();

        assert_eq!(Some("/mnt/fast"), p.path(Mclass::Staging));
    }
}
