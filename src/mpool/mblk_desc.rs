// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Memory-mapped handle to a committed mblock.
//!
//! The read path maps the block's written pages once and serves lookups
//! from the mapping, steering the page cache with `madvise` hints chunked
//! by the media class's read-ahead window.

use crate::mpool::{
    mbid::{self, Mbid, MBLOCK_SIZE_BYTES},
    MblockFile,
};
use crate::{Error, Mclass, Result};
use memmap2::{Advice, Mmap, MmapOptions};

/// Memory-mapped block descriptor
pub struct MblkDesc {
    map: Mmap,

    alen_pages: usize,
    wlen_pages: usize,
    ra_pages: usize,

    mclass: Mclass,
    mbid: Mbid,
}

fn page_size() -> usize {
    #[expect(unsafe_code, reason = "sysconf has no memory effects")]
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

    usize::try_from(sz).unwrap_or(4096)
}

impl MblkDesc {
    /// Maps the first `wlen` bytes of a committed block read-only.
    ///
    /// `wlen` must be a whole number of pages. `ra_pages` is the
    /// read-ahead chunk used by `WillNeed` advice.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the block is not allocated
    /// - `BadArgument` for a ragged or oversized `wlen`
    /// - `Io` if the mapping fails
    pub fn mmap(file: &MblockFile, mbid: Mbid, wlen: u64, ra_pages: usize) -> Result<Self> {
        file.find(mbid)?;

        let page = page_size() as u64;

        if wlen == 0 || wlen % page != 0 || wlen > MBLOCK_SIZE_BYTES {
            return Err(Error::BadArgument("write length is not a page multiple"));
        }

        #[expect(
            unsafe_code,
            reason = "read-only file-backed mapping of a committed block"
        )]
        let map = unsafe {
            MmapOptions::new()
                .offset(mbid::block_off(mbid))
                .len(wlen as usize)
                .map(file.data_file())?
        };

        Ok(Self {
            map,
            alen_pages: (MBLOCK_SIZE_BYTES / page) as usize,
            wlen_pages: (wlen / page) as usize,
            ra_pages,
            mclass: file.mclass(),
            mbid,
        })
    }

    /// The mapped bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.map
    }

    /// The block's mblock id.
    #[must_use]
    pub fn mbid(&self) -> Mbid {
        self.mbid
    }

    /// Media class the block lives on.
    #[must_use]
    pub fn mclass(&self) -> Mclass {
        self.mclass
    }

    /// Allocated pages of the block.
    #[must_use]
    pub fn alen_pages(&self) -> usize {
        self.alen_pages
    }

    /// Written (mapped) pages of the block.
    #[must_use]
    pub fn wlen_pages(&self) -> usize {
        self.wlen_pages
    }

    /// Advises the kernel about pages `[pg, pg + pg_cnt)`.
    ///
    /// `WillNeed` is issued in read-ahead-sized chunks so a huge advice
    /// does not stall the caller; other advice covers the range in one
    /// call. The range is silently clipped to the written pages.
    ///
    /// # Errors
    ///
    /// - `BadArgument` if `pg` is past the written pages
    /// - `Io` if the kernel rejects the advice
    pub fn madvise_pages(&self, pg: usize, mut pg_cnt: usize, advice: Advice) -> Result<()> {
        let wlen_pages = self.wlen_pages;

        if pg >= wlen_pages {
            return Err(Error::BadArgument("page offset past written length"));
        }

        if pg_cnt > wlen_pages - pg {
            pg_cnt = wlen_pages - pg;
        }

        if pg_cnt == 0 {
            return Ok(());
        }

        let ra_pages = if advice == Advice::WillNeed {
            self.ra_pages
        } else {
            pg_cnt
        };

        if ra_pages == 0 {
            return Ok(());
        }

        let page = page_size();
        let pg_end = pg + pg_cnt;
        let mut pg = pg;

        while pg < pg_end {
            let chunk = (pg_end - pg).min(ra_pages);

            self.map.advise_range(advice, pg * page, chunk * page)?;

            pg += chunk;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpool::MblockFileParams;
    use test_log::test;

    fn open_file(dir: &std::path::Path) -> MblockFile {
        #[allow(clippy::unwrap_used)]
        MblockFile::create(
            dir,
            &MblockFileParams {
                mclass: Mclass::Capacity,
                fileid: 0,
                max_blocks: 8,
                directio: false,
            },
        )
        .unwrap()
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn maps_written_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_file(dir.path());

        let mbid = file.alloc().unwrap();
        file.write(mbid, &[&[7u8; 8192]], 0).unwrap();
        file.commit(mbid).unwrap();

        let desc = MblkDesc::mmap(&file, mbid, 8192, 4).unwrap();

        assert_eq!(8192 / page_size(), desc.wlen_pages());
        assert!(desc.as_bytes().iter().all(|&b| b == 7));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn madvise_clips_and_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_file(dir.path());

        let mbid = file.alloc().unwrap();
        file.write(mbid, &[&vec![1u8; 4 * page_size()]], 0).unwrap();
        file.commit(mbid).unwrap();

        let desc = MblkDesc::mmap(&file, mbid, 4 * page_size() as u64, 1).unwrap();

        // clipped past wlen silently
        desc.madvise_pages(1, usize::MAX, Advice::WillNeed).unwrap();

        // out of range start fails
        assert!(matches!(
            desc.madvise_pages(4, 1, Advice::WillNeed),
            Err(Error::BadArgument(_))
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn uncommitted_block_cannot_be_mapped() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_file(dir.path());

        let mbid = file.alloc().unwrap();
        file.abort(mbid).unwrap();

        assert!(matches!(
            MblkDesc::mmap(&file, mbid, 8192, 4),
            Err(Error::NotFound)
        ));
    }
}
