// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Packed mblock id.
//!
//! A committed block is addressed by a 64-bit id packed as
//! `[uniq:32 | fileid:12 | mclass:4 | block:16]`. `block` is the region-map
//! allocator key minus one; `uniq` makes ids unique across block reuse
//! after delete/recovery.

use crate::{Error, Mclass, Result};

/// Bits of the block field
pub const MBID_BLOCK_BITS: u32 = 16;

/// Bits of the media-class field
pub const MBID_MCLASS_BITS: u32 = 4;

/// Bits of the file-id field
pub const MBID_FILEID_BITS: u32 = 12;

const MBID_BLOCK_MASK: u64 = (1 << MBID_BLOCK_BITS) - 1;
const MBID_MCLASS_SHIFT: u32 = MBID_BLOCK_BITS;
const MBID_MCLASS_MASK: u64 = ((1 << MBID_MCLASS_BITS) - 1) << MBID_MCLASS_SHIFT;
const MBID_FILEID_SHIFT: u32 = MBID_MCLASS_SHIFT + MBID_MCLASS_BITS;
const MBID_FILEID_MASK: u64 = ((1 << MBID_FILEID_BITS) - 1) << MBID_FILEID_SHIFT;
const MBID_UNIQ_SHIFT: u32 = MBID_FILEID_SHIFT + MBID_FILEID_BITS;

/// Block size is `1 << MBLOCK_SIZE_SHIFT` bytes (32 MiB)
pub const MBLOCK_SIZE_SHIFT: u32 = 25;

/// Bytes per block
pub const MBLOCK_SIZE_BYTES: u64 = 1 << MBLOCK_SIZE_SHIFT;

/// Most blocks a single mblock file can hold
pub const MBLOCK_FILE_BLOCKS_MAX: u32 = 1 << MBID_BLOCK_BITS;

/// Packed mblock id
pub type Mbid = u64;

/// Packs an mblock id.
///
/// `block` is the 1-based allocator key.
///
/// # Errors
///
/// `Internal` if any field does not fit its width.
pub fn pack(uniq: u32, fileid: u32, mclass: Mclass, block: u32) -> Result<Mbid> {
    let mcid = u64::from(u8::from(mclass));

    let fileid_ok = u64::from(fileid) <= MBID_FILEID_MASK >> MBID_FILEID_SHIFT;
    let mcid_ok = mcid <= MBID_MCLASS_MASK >> MBID_MCLASS_SHIFT;
    let block_ok = block >= 1 && u64::from(block - 1) <= MBID_BLOCK_MASK;

    if !(fileid_ok && mcid_ok && block_ok) {
        return Err(Error::Internal("mbid field overflow"));
    }

    let mut mbid: u64 = 0;
    mbid |= u64::from(uniq) << MBID_UNIQ_SHIFT;
    mbid |= u64::from(fileid) << MBID_FILEID_SHIFT;
    mbid |= mcid << MBID_MCLASS_SHIFT;
    mbid |= u64::from(block - 1);

    Ok(mbid)
}

/// The 0-based block id.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn block_id(mbid: Mbid) -> u32 {
    (mbid & MBID_BLOCK_MASK) as u32
}

/// Byte offset of the block in the data file.
#[must_use]
pub fn block_off(mbid: Mbid) -> u64 {
    u64::from(block_id(mbid)) << MBLOCK_SIZE_SHIFT
}

/// The file id the block lives in.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn fileid(mbid: Mbid) -> u32 {
    ((mbid & MBID_FILEID_MASK) >> MBID_FILEID_SHIFT) as u32
}

/// The media class the block lives on, if the field is valid.
#[must_use]
pub fn mclass(mbid: Mbid) -> Option<Mclass> {
    #[allow(clippy::cast_possible_truncation)]
    let mcid = ((mbid & MBID_MCLASS_MASK) >> MBID_MCLASS_SHIFT) as u8;

    Mclass::try_from(mcid).ok()
}

/// The uniquifier of the allocation.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn uniq(mbid: Mbid) -> u32 {
    (mbid >> MBID_UNIQ_SHIFT) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn pack_unpack_round_trip() {
        let mbid = pack(77, 3, Mclass::Staging, 42).unwrap();

        assert_eq!(77, uniq(mbid));
        assert_eq!(3, fileid(mbid));
        assert_eq!(Some(Mclass::Staging), mclass(mbid));
        assert_eq!(41, block_id(mbid));
        assert_eq!(41 << MBLOCK_SIZE_SHIFT, block_off(mbid));
    }

    #[test]
    fn pack_rejects_overflow() {
        // block key 0 is reserved
        assert!(pack(1, 0, Mclass::Capacity, 0).is_err());

        // fileid wider than 12 bits
        assert!(pack(1, 1 << MBID_FILEID_BITS, Mclass::Capacity, 1).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn uniq_occupies_high_bits() {
        let lo = pack(1, 0, Mclass::Capacity, 1).unwrap();
        let hi = pack(2, 0, Mclass::Capacity, 1).unwrap();

        assert!(hi > lo);
        assert_eq!(1u64 << 32, hi - lo);
    }
}
