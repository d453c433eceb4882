// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The top-level persisted KVDB descriptor.
//!
//! One `kvdb.meta` JSON document per KVDB home anchors everything the
//! engine needs to find its persistent state: the CNDB and WAL object id
//! pairs and the per-media-class storage paths. The file is rewritten
//! atomically; a load rejects any unknown version.

use crate::omf_version::{KvdbMetaVersion, KVDB_META_VERSION_CURRENT};
use crate::params::{KvdbCparams, KvdbDparams, KvdbRparams};
use crate::{Error, Mclass, Result, MCLASS_COUNT};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// File name of the descriptor inside the KVDB home
pub const KVDB_META_FILE: &str = "kvdb.meta";

/// A pair of metadata container object ids
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct OidPair {
    /// First object id
    pub oid1: u64,

    /// Second object id
    pub oid2: u64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
struct StorageEntry {
    path: String,
}

#[derive(Serialize, Deserialize)]
struct MetaDocument {
    version: u32,
    cndb: OidPair,
    wal: OidPair,
    #[serde(default)]
    storage: Vec<StorageEntry>,
}

/// In-memory image of the `kvdb.meta` document
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KvdbMeta {
    /// CNDB object ids
    pub cndb: OidPair,

    /// WAL object ids
    pub wal: OidPair,

    /// Per-mclass storage paths, absolute or home-relative
    pub storage: [String; MCLASS_COUNT],
}

fn meta_path(home: &Path) -> std::path::PathBuf {
    home.join(KVDB_META_FILE)
}

impl KvdbMeta {
    /// Creates an empty descriptor file in `home`.
    ///
    /// # Errors
    ///
    /// - `Exists` if the home already holds a descriptor
    /// - `Io` on filesystem failure
    pub fn create(home: &Path) -> Result<()> {
        std::fs::File::create_new(meta_path(home)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                Error::Exists
            } else {
                Error::Io(e)
            }
        })?;

        Ok(())
    }

    /// Removes the descriptor file from `home`.
    ///
    /// # Errors
    ///
    /// `NotFound` if there is none.
    pub fn destroy(home: &Path) -> Result<()> {
        std::fs::remove_file(meta_path(home)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound
            } else {
                Error::Io(e)
            }
        })
    }

    /// Size of the descriptor file in bytes.
    ///
    /// # Errors
    ///
    /// `NotFound` if there is none.
    pub fn usage(home: &Path) -> Result<u64> {
        let md = std::fs::metadata(meta_path(home)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound
            } else {
                Error::Io(e)
            }
        })?;

        Ok(md.len())
    }

    /// Atomically rewrites the descriptor file in `home`.
    ///
    /// # Errors
    ///
    /// `Io` on filesystem failure.
    pub fn serialize(&self, home: &Path) -> Result<()> {
        let document = MetaDocument {
            version: KVDB_META_VERSION_CURRENT.into(),
            cndb: self.cndb,
            wal: self.wal,
            storage: self
                .storage
                .iter()
                .map(|path| StorageEntry { path: path.clone() })
                .collect(),
        };

        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| Error::BadMetadata(e.to_string()))?;

        // temp file + rename so a crash never leaves a torn descriptor
        let mut temp = tempfile::NamedTempFile::new_in(home)?;
        temp.write_all(&bytes)?;
        temp.flush()?;
        temp.as_file_mut().sync_all()?;
        temp.persist(meta_path(home))
            .map_err(|e| Error::Io(e.error))?;

        let dir = std::fs::File::open(home)?;
        dir.sync_all()?;

        Ok(())
    }

    /// Loads the descriptor file from `home`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if there is none
    /// - `BadMetadata` for unparsable content or a version outside the
    ///   known set
    pub fn deserialize(home: &Path) -> Result<Self> {
        let bytes = std::fs::read(meta_path(home)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound
            } else {
                Error::Io(e)
            }
        })?;

        let document: MetaDocument = serde_json::from_slice(&bytes)
            .map_err(|e| Error::BadMetadata(format!("kvdb.meta does not parse: {e}")))?;

        let version = KvdbMetaVersion::try_from(document.version).map_err(|()| {
            Error::BadMetadata(format!("unknown kvdb.meta version {}", document.version))
        })?;

        let mut storage = <[String; MCLASS_COUNT]>::default();

        if version >= KvdbMetaVersion::V2 {
            if document.storage.len() != storage.len() {
                return Err(Error::BadMetadata(format!(
                    "kvdb.meta names {} storage classes instead of {}",
                    document.storage.len(),
                    storage.len()
                )));
            }

            for (slot, entry) in storage.iter_mut().zip(document.storage) {
                *slot = entry.path;
            }
        }

        Ok(Self {
            cndb: document.cndb,
            wal: document.wal,
            storage,
        })
    }

    /// Applies runtime path overrides and rewrites the descriptor.
    ///
    /// # Errors
    ///
    /// `Io` on filesystem failure.
    pub fn sync(&mut self, home: &Path, rparams: &KvdbRparams) -> Result<()> {
        for (slot, path) in self.storage.iter_mut().zip(&rparams.storage_path) {
            if !path.is_empty() {
                slot.clone_from(path);
            }
        }

        self.serialize(home)
    }

    /// Fills the per-mclass paths from creation parameters.
    pub fn from_cparams(&mut self, cparams: &KvdbCparams) {
        for (slot, path) in self.storage.iter_mut().zip(&cparams.storage_path) {
            slot.clone_from(path);
        }
    }

    /// Projects the persisted paths into a runtime parameter record.
    pub fn to_rparams(&self, rparams: &mut KvdbRparams) {
        for (slot, path) in rparams.storage_path.iter_mut().zip(&self.storage) {
            slot.clone_from(path);
        }
    }

    /// Projects the persisted paths into a destroy parameter record.
    pub fn to_dparams(&self, dparams: &mut KvdbDparams) {
        for (slot, path) in dparams.storage_path.iter_mut().zip(&self.storage) {
            slot.clone_from(path);
        }
    }

    /// The persisted path for `mclass`, if one is configured.
    #[must_use]
    pub fn storage_path(&self, mclass: Mclass) -> Option<&str> {
        self.storage
            .get(usize::from(u8::from(mclass)))
            .map(String::as_str)
            .filter(|p| !p.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn sample_meta() -> KvdbMeta {
        KvdbMeta {
            cndb: OidPair { oid1: 11, oid2: 12 },
            wal: OidPair { oid1: 21, oid2: 22 },
            storage: ["capacity".into(), "/mnt/staging".into(), String::new()],
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn create_serialize_deserialize_destroy() {
        let home = tempfile::tempdir().unwrap();

        KvdbMeta::create(home.path()).unwrap();
        assert!(matches!(KvdbMeta::create(home.path()), Err(Error::Exists)));

        let meta = sample_meta();
        meta.serialize(home.path()).unwrap();

        assert!(KvdbMeta::usage(home.path()).unwrap() > 0);

        let loaded = KvdbMeta::deserialize(home.path()).unwrap();
        assert_eq!(meta, loaded);

        KvdbMeta::destroy(home.path()).unwrap();
        assert!(matches!(
            KvdbMeta::deserialize(home.path()),
            Err(Error::NotFound)
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn unknown_version_is_rejected() {
        let home = tempfile::tempdir().unwrap();

        std::fs::write(
            home.path().join(KVDB_META_FILE),
            r#"{"version":9,"cndb":{"oid1":0,"oid2":0},"wal":{"oid1":0,"oid2":0},"storage":[]}"#,
        )
        .unwrap();

        assert!(matches!(
            KvdbMeta::deserialize(home.path()),
            Err(Error::BadMetadata(_))
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn garbage_is_bad_metadata() {
        let home = tempfile::tempdir().unwrap();

        std::fs::write(home.path().join(KVDB_META_FILE), b"not json").unwrap();

        assert!(matches!(
            KvdbMeta::deserialize(home.path()),
            Err(Error::BadMetadata(_))
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn params_projections() {
        let mut meta = KvdbMeta::default();

        let mut cparams = KvdbCparams::default();
        crate::params::deserialize(
            KvdbCparams::pspecs(),
            &mut cparams,
            &["storage.staging.path=/mnt/fast"],
        )
        .unwrap();

        meta.from_cparams(&cparams);
        assert_eq!(Some("/mnt/fast"), meta.storage_path(Mclass::Staging));
        assert_eq!(Some("capacity"), meta.storage_path(Mclass::Capacity));

        let mut rparams = KvdbRparams::default();
        meta.to_rparams(&mut rparams);
        assert_eq!("/mnt/fast", rparams.storage_path[1]);

        let mut dparams = KvdbDparams::default();
        meta.to_dparams(&mut dparams);
        assert_eq!("capacity", dparams.storage_path[0]);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn sync_applies_runtime_overrides() {
        let home = tempfile::tempdir().unwrap();

        let mut meta = sample_meta();

        let mut rparams = KvdbRparams::default();
        crate::params::deserialize(
            KvdbRparams::pspecs(),
            &mut rparams,
            &["storage.pmem.path=/dev/pmem0"],
        )
        .unwrap();

        meta.sync(home.path(), &rparams).unwrap();

        let loaded = KvdbMeta::deserialize(home.path()).unwrap();
        assert_eq!(Some("/dev/pmem0"), loaded.storage_path(Mclass::Pmem));
        assert_eq!(Some("/mnt/staging"), loaded.storage_path(Mclass::Staging));
    }
}
