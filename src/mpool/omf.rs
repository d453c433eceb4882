// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! On-media layout of the mblock meta region.
//!
//! The meta region is one header page followed by a packed OID slot table,
//! one little-endian u64 per block id. A zero slot is unused; a non-zero
//! slot holds the committed mblock id. Explicit codecs only; host record
//! layout is never written to media.

use crate::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Bytes reserved for the per-file header page
pub const META_HDR_LEN: usize = 4096;

/// Bytes per OID slot
pub const META_OID_LEN: usize = 8;

/// Per-file header, stored at offset 0 of the meta region
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FileHdr {
    /// Id of the file inside its media class
    pub fileid: u32,

    /// Last persisted uniquifier
    pub uniq: u32,
}

impl FileHdr {
    /// Encoded length
    pub const LEN: usize = 8;

    /// Packs the header little-endian into `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than [`Self::LEN`].
    pub fn pack_into(&self, buf: &mut [u8]) {
        assert!(buf.len() >= Self::LEN);

        LittleEndian::write_u32(buf, self.fileid);
        #[allow(clippy::indexing_slicing)]
        LittleEndian::write_u32(&mut buf[4..], self.uniq);
    }

    /// Unpacks a little-endian header from `buf`.
    ///
    /// # Errors
    ///
    /// `BadMetadata` if `buf` is too short.
    pub fn unpack_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LEN {
            return Err(Error::BadMetadata("short mblock file header".into()));
        }

        #[allow(clippy::indexing_slicing)]
        let hdr = Self {
            fileid: LittleEndian::read_u32(buf),
            uniq: LittleEndian::read_u32(&buf[4..]),
        };

        Ok(hdr)
    }
}

/// Byte length of a meta region holding `max_blocks` slots.
#[must_use]
pub fn meta_len(max_blocks: u32) -> usize {
    META_HDR_LEN + max_blocks as usize * META_OID_LEN
}

/// Byte offset of the OID slot for `block_id`.
#[must_use]
pub fn slot_off(block_id: u32) -> usize {
    META_HDR_LEN + block_id as usize * META_OID_LEN
}

/// Writes `oid` into the slot at `slot_off(block_id)`.
///
/// # Panics
///
/// Panics if the region is too short for the slot.
pub fn slot_pack(region: &mut [u8], block_id: u32, oid: u64) {
    let off = slot_off(block_id);

    #[allow(clippy::indexing_slicing)]
    LittleEndian::write_u64(&mut region[off..off + META_OID_LEN], oid);
}

/// Reads the slot at `slot_off(block_id)`.
///
/// # Errors
///
/// `BadMetadata` if the region is too short for the slot.
pub fn slot_unpack(region: &[u8], block_id: u32) -> Result<u64> {
    let off = slot_off(block_id);

    region
        .get(off..off + META_OID_LEN)
        .map(LittleEndian::read_u64)
        .ok_or_else(|| Error::BadMetadata("oid slot out of bounds".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    #[allow(clippy::unwrap_used, clippy::indexing_slicing)]
    fn header_round_trip_little_endian() {
        let hdr = FileHdr {
            fileid: 0x0102_0304,
            uniq: 0x0a0b_0c0d,
        };

        let mut buf = [0u8; FileHdr::LEN];
        hdr.pack_into(&mut buf);

        assert_eq!([0x04, 0x03, 0x02, 0x01, 0x0d, 0x0c, 0x0b, 0x0a], buf);
        assert_eq!(hdr, FileHdr::unpack_from(&buf).unwrap());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn slot_round_trip() {
        let mut region = vec![0u8; meta_len(4)];

        slot_pack(&mut region, 2, 0xdead_beef_cafe_f00d);

        assert_eq!(0, slot_unpack(&region, 1).unwrap());
        assert_eq!(0xdead_beef_cafe_f00d, slot_unpack(&region, 2).unwrap());

        assert!(slot_unpack(&region, 4).is_err());
    }
}
