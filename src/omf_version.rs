// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! On-media format versions.
//!
//! Each enumeration is a closed set; loading persisted state whose version
//! byte falls outside the set is a metadata error, never a best-effort parse.

/// Version of the overall on-media format
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GlobalOmfVersion {
    /// Initial layout
    V1,

    /// Adds the per-mclass storage section to the KVDB descriptor
    V2,
}

impl From<GlobalOmfVersion> for u32 {
    fn from(value: GlobalOmfVersion) -> Self {
        match value {
            GlobalOmfVersion::V1 => 1,
            GlobalOmfVersion::V2 => 2,
        }
    }
}

impl TryFrom<u32> for GlobalOmfVersion {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            _ => Err(()),
        }
    }
}

/// Version of the per-file mblock metadata region layout
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MblockMetaHdrVersion {
    /// Header page + packed OID slot table
    V1,

    /// Same layout, uniq persisted coarsely
    V2,
}

impl From<MblockMetaHdrVersion> for u32 {
    fn from(value: MblockMetaHdrVersion) -> Self {
        match value {
            MblockMetaHdrVersion::V1 => 1,
            MblockMetaHdrVersion::V2 => 2,
        }
    }
}

impl TryFrom<u32> for MblockMetaHdrVersion {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            _ => Err(()),
        }
    }
}

/// Version of the `kvdb.meta` descriptor document
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum KvdbMetaVersion {
    /// CNDB + WAL object ids only
    V1,

    /// Adds per-mclass storage paths
    V2,
}

/// Version written by newly created descriptors
pub const KVDB_META_VERSION_CURRENT: KvdbMetaVersion = KvdbMetaVersion::V2;

impl From<KvdbMetaVersion> for u32 {
    fn from(value: KvdbMetaVersion) -> Self {
        match value {
            KvdbMetaVersion::V1 => 1,
            KvdbMetaVersion::V2 => 2,
        }
    }
}

impl TryFrom<u32> for KvdbMetaVersion {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn version_closed_sets() {
        assert!(KvdbMetaVersion::try_from(0).is_err());
        assert!(KvdbMetaVersion::try_from(3).is_err());
        assert_eq!(Ok(KvdbMetaVersion::V2), KvdbMetaVersion::try_from(2));

        assert!(MblockMetaHdrVersion::try_from(9).is_err());
        assert_eq!(Ok(MblockMetaHdrVersion::V1), MblockMetaHdrVersion::try_from(1));

        assert!(GlobalOmfVersion::try_from(7).is_err());
    }
}
