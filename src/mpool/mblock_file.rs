// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! One mblock file: a sparse data file of fixed-width block slots plus a
//! memory-mapped metadata region recording which slots are committed.
//!
//! The data file is truncated to its maximum logical size at creation so
//! it stays sparse; blocks live at `BLOCK_SIZE`-aligned offsets. The meta
//! region is a header page (`{fileid, uniq}`) followed by one 8-byte OID
//! slot per block id. Commit writes the mblock id into its slot and syncs
//! the page; delete writes the zero sentinel, punches a hole in the data
//! range, and frees the allocator key.
//!
//! Multi-block allocation is not implemented; every operation takes
//! exactly one mblock id.

use crate::mpool::{
    io,
    mbid::{self, Mbid, MBLOCK_FILE_BLOCKS_MAX, MBLOCK_SIZE_BYTES},
    omf::{self, FileHdr},
    rgnmap::RgnMap,
};
use crate::{Error, Mclass, Result};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The persisted uniquifier leads the in-memory one by at most this much;
/// a reload bumps by the same amount so ids never repeat after a crash
pub const MBLOCK_UNIQ_DELTA: u32 = 1024;

const DATA_FILE_PFX: &str = "mblock-data";
const META_FILE_PFX: &str = "mblock-meta";

/// Identity and shape of an mblock file
#[derive(Clone, Debug)]
pub struct MblockFileParams {
    /// Media class the file belongs to
    pub mclass: Mclass,

    /// File id inside the media class
    pub fileid: u32,

    /// Block slots in the file
    pub max_blocks: u32,

    /// Open the data fd with `O_DIRECT`
    pub directio: bool,
}

/// Handle to one open mblock file
pub struct MblockFile {
    rgnmap: RgnMap,

    data: File,

    // meta_lock; all slot/header writes and their syncs happen under it
    meta: Mutex<MmapMut>,

    // uniq_lock; acquired before the meta lock when both are needed
    uniq: Mutex<u32>,

    mclass: Mclass,
    fileid: u32,
    max_blocks: u32,
}

// Unlinks freshly created files if open does not reach success
struct UnlinkGuard {
    paths: Vec<PathBuf>,
    armed: bool,
}

impl UnlinkGuard {
    fn new() -> Self {
        Self {
            paths: Vec::new(),
            armed: true,
        }
    }

    fn push(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for UnlinkGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        for path in &self.paths {
            if let Err(e) = std::fs::remove_file(path) {
                log::warn!("could not unlink {}: {e}", path.display());
            }
        }
    }
}

fn data_file_name(mclass: Mclass, fileid: u32) -> String {
    format!("{DATA_FILE_PFX}-{}-{fileid}", u8::from(mclass))
}

fn meta_file_name(mclass: Mclass, fileid: u32) -> String {
    format!("{META_FILE_PFX}-{}-{fileid}", u8::from(mclass))
}

#[allow(clippy::cast_possible_truncation)]
fn page_size() -> usize {
    // effectively constant per process
    #[expect(unsafe_code, reason = "sysconf has no memory effects")]
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

    if sz <= 0 {
        4096
    } else {
        sz as usize
    }
}

// Syncs the page(s) containing region bytes [off, off + len)
fn flush_meta_page(meta: &MmapMut, off: usize, len: usize) -> Result<()> {
    let page = page_size();
    let start = off / page * page;
    let end = (off + len).div_ceil(page) * page;

    meta.flush_range(start, (end - start).min(meta.len() - start))?;

    Ok(())
}

impl MblockFile {
    /// Formats and opens a fresh mblock file pair in `dir`.
    ///
    /// # Errors
    ///
    /// - `BadArgument` for out-of-range identity fields
    /// - `Exists` if the data file is already there
    /// - `Io` on filesystem failure; partially created files are unlinked
    pub fn create(dir: &Path, params: &MblockFileParams) -> Result<Self> {
        Self::open_impl(dir, params, true)
    }

    /// Loads an existing mblock file pair from `dir`, rebuilding the
    /// region map from the slot table.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the files are missing
    /// - `BadMetadata` if the header or slot table is inconsistent
    pub fn open(dir: &Path, params: &MblockFileParams) -> Result<Self> {
        Self::open_impl(dir, params, false)
    }

    fn open_impl(dir: &Path, params: &MblockFileParams, create: bool) -> Result<Self> {
        if params.max_blocks == 0 || params.max_blocks > MBLOCK_FILE_BLOCKS_MAX {
            return Err(Error::BadArgument("bad mblock file block count"));
        }

        // catch identity overflow at open so alloc cannot hit it later
        mbid::pack(0, params.fileid, params.mclass, 1)?;

        let data_path = dir.join(data_file_name(params.mclass, params.fileid));
        let meta_path = dir.join(meta_file_name(params.mclass, params.fileid));

        let mut guard = UnlinkGuard::new();
        if !create {
            guard.disarm();
        }

        let meta_file = if create {
            if data_path.exists() {
                return Err(Error::Exists);
            }

            // read+write so the shared mapping can be established
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&meta_path)
                .map_err(|e| {
                    if e.kind() == std::io::ErrorKind::AlreadyExists {
                        Error::Exists
                    } else {
                        Error::Io(e)
                    }
                })?;
            guard.push(meta_path.clone());

            file.set_len(omf::meta_len(params.max_blocks) as u64)?;
            file
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(&meta_path)
                .map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        Error::NotFound
                    } else {
                        Error::Io(e)
                    }
                })?
        };

        if meta_file.metadata()?.len() != omf::meta_len(params.max_blocks) as u64 {
            return Err(Error::BadMetadata("mblock meta region has the wrong size".into()));
        }

        #[expect(
            unsafe_code,
            reason = "file-backed mutable mapping; the meta file is exclusively ours"
        )]
        let mut meta = unsafe { MmapMut::map_mut(&meta_file)? };

        let rgnmap = RgnMap::new(params.max_blocks);
        let mut uniq = 0u32;

        if create {
            let hdr = FileHdr {
                fileid: params.fileid,
                uniq: 0,
            };
            hdr.pack_into(&mut meta);
            flush_meta_page(&meta, 0, FileHdr::LEN)?;
        } else {
            let hdr = FileHdr::unpack_from(&meta)?;

            if hdr.fileid != params.fileid {
                return Err(Error::BadMetadata(format!(
                    "mblock meta header names file {} instead of {}",
                    hdr.fileid, params.fileid
                )));
            }

            // never reuse a uniq that may have been handed out unflushed
            uniq = hdr.uniq + MBLOCK_UNIQ_DELTA;

            let mut mblkc = 0u64;

            for block_id in 0..params.max_blocks {
                let oid = omf::slot_unpack(&meta, block_id)?;
                if oid == 0 {
                    continue;
                }

                if mbid::block_id(oid) != block_id {
                    return Err(Error::BadMetadata(format!(
                        "oid slot {block_id} holds a foreign mblock id {oid:#x}"
                    )));
                }

                rgnmap
                    .insert(block_id + 1)
                    .map_err(|_| Error::BadMetadata(format!("oid slot {block_id} doubly used")))?;

                mblkc += 1;
            }

            log::info!(
                "mclass {}, file-id {} found {mblkc} valid mblocks, uniq {uniq}",
                u8::from(params.mclass),
                params.fileid,
            );
        }

        let mut options = OpenOptions::new();
        options.read(true).write(true);

        if create {
            options.create_new(true);
        }

        let mut flags = libc::O_SYNC;
        if params.directio {
            flags |= libc::O_DIRECT;
        }
        options.custom_flags(flags);

        let data = options.open(&data_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound
            } else {
                Error::Io(e)
            }
        })?;

        if create {
            guard.push(data_path.clone());
        }

        // keep the data file sparse at its full logical size
        data.set_len(u64::from(params.max_blocks) * MBLOCK_SIZE_BYTES)?;

        guard.disarm();

        Ok(Self {
            rgnmap,
            data,
            meta: Mutex::new(meta),
            uniq: Mutex::new(uniq),
            mclass: params.mclass,
            fileid: params.fileid,
            max_blocks: params.max_blocks,
        })
    }

    /// Media class of this file.
    #[must_use]
    pub fn mclass(&self) -> Mclass {
        self.mclass
    }

    /// File id of this file.
    #[must_use]
    pub fn fileid(&self) -> u32 {
        self.fileid
    }

    /// Block slots in this file.
    #[must_use]
    pub fn max_blocks(&self) -> u32 {
        self.max_blocks
    }

    /// The underlying data file (read-path mappings borrow it).
    #[must_use]
    pub fn data_file(&self) -> &File {
        &self.data
    }

    #[allow(clippy::expect_used)]
    fn uniq_gen(&self) -> Result<u32> {
        let mut uniq = self.uniq.lock().expect("lock is poisoned");

        *uniq += 1;

        if *uniq % MBLOCK_UNIQ_DELTA == 0 {
            // uniq_lock -> meta_lock
            let mut meta = self.meta.lock().expect("lock is poisoned");

            let hdr = FileHdr {
                fileid: self.fileid,
                uniq: *uniq,
            };
            hdr.pack_into(&mut meta);
            flush_meta_page(&meta, 0, FileHdr::LEN)?;
        }

        Ok(*uniq)
    }

    #[allow(clippy::expect_used)]
    fn meta_log(&self, mbid: Mbid, delete: bool) -> Result<()> {
        let block_id = mbid::block_id(mbid);

        let mut meta = self.meta.lock().expect("lock is poisoned");

        omf::slot_pack(&mut meta, block_id, if delete { 0 } else { mbid });
        flush_meta_page(&meta, omf::slot_off(block_id), omf::META_OID_LEN)?;

        Ok(())
    }

    /// Allocates one block and returns its mblock id.
    ///
    /// The allocation is volatile until [`Self::commit`]; an aborted or
    /// never-committed allocation leaves no trace on media.
    ///
    /// # Errors
    ///
    /// - `OutOfSpace` when the file is full
    /// - `Internal` if a packed field overflows its width
    pub fn alloc(&self) -> Result<Mbid> {
        let block = self.rgnmap.alloc()?;

        let uniq = match self.uniq_gen() {
            Ok(uniq) => uniq,
            Err(e) => {
                let _ = self.rgnmap.free(block);
                return Err(e);
            }
        };

        match mbid::pack(uniq, self.fileid, self.mclass, block) {
            Ok(mbid) => Ok(mbid),
            Err(e) => {
                let _ = self.rgnmap.free(block);
                Err(e)
            }
        }
    }

    /// Confirms `mbid` addresses an allocated block of this file.
    ///
    /// # Errors
    ///
    /// `NotFound` iff the block is free.
    pub fn find(&self, mbid: Mbid) -> Result<()> {
        let block_id = mbid::block_id(mbid);

        if block_id >= self.max_blocks {
            return Err(Error::NotFound);
        }

        if self.rgnmap.contains(block_id + 1) {
            return Err(Error::NotFound);
        }

        Ok(())
    }

    /// Durably records the allocation in the slot table.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the block is not allocated
    /// - `Io` if the slot sync fails
    pub fn commit(&self, mbid: Mbid) -> Result<()> {
        self.find(mbid)?;
        self.meta_log(mbid, false)
    }

    /// Releases an uncommitted allocation; metadata is untouched because
    /// the slot was never written.
    ///
    /// # Errors
    ///
    /// `NotFound` if the block is not allocated.
    pub fn abort(&self, mbid: Mbid) -> Result<()> {
        self.rgnmap.free(mbid::block_id(mbid) + 1)
    }

    /// Deletes a committed block: zeroes its slot, punches a hole in the
    /// data range, and frees the allocator key.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the block is not allocated
    /// - `Io` if the slot sync fails
    pub fn delete(&self, mbid: Mbid) -> Result<()> {
        // log the delete first; an orphaned data range is reclaimable,
        // a slot naming a freed block is not
        self.meta_log(mbid, true)?;

        self.punch_hole(mbid::block_off(mbid));

        self.rgnmap.free(mbid::block_id(mbid) + 1)
    }

    #[cfg(target_os = "linux")]
    fn punch_hole(&self, offset: u64) {
        use std::os::unix::io::AsRawFd;

        #[expect(unsafe_code, reason = "fallocate on our own fd")]
        let rc = unsafe {
            libc::fallocate(
                self.data.as_raw_fd(),
                libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE,
                offset as libc::off_t,
                MBLOCK_SIZE_BYTES as libc::off_t,
            )
        };

        if rc != 0 {
            log::warn!(
                "could not punch hole at {offset} in mblock data file {}-{}",
                u8::from(self.mclass),
                self.fileid
            );
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn punch_hole(&self, _offset: u64) {}

    fn io_bounds_check(&self, iov_len: u64, off: u64) -> Result<()> {
        if off
            .checked_add(iov_len)
            .is_none_or(|end| end > MBLOCK_SIZE_BYTES)
        {
            return Err(Error::BadArgument("I/O range exceeds the block"));
        }

        Ok(())
    }

    /// Reads into `iov` from byte `off` of the block.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the block is not allocated
    /// - `BadArgument` if the range leaves the block
    /// - `Io` on filesystem failure
    pub fn read(&self, mbid: Mbid, iov: &mut [&mut [u8]], off: u64) -> Result<()> {
        if iov.is_empty() {
            return Ok(());
        }

        self.find(mbid)?;
        self.io_bounds_check(iov.iter().map(|b| b.len() as u64).sum(), off)?;

        io::read_vectored_at(&self.data, mbid::block_off(mbid) + off, iov)
    }

    /// Writes `iov` at byte `off` of the block.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the block is not allocated
    /// - `BadArgument` if the range leaves the block
    /// - `Io` on filesystem failure
    pub fn write(&self, mbid: Mbid, iov: &[&[u8]], off: u64) -> Result<()> {
        if iov.is_empty() {
            return Ok(());
        }

        self.find(mbid)?;
        self.io_bounds_check(iov.iter().map(|b| b.len() as u64).sum(), off)?;

        io::write_vectored_at(&self.data, mbid::block_off(mbid) + off, iov)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn params() -> MblockFileParams {
        MblockFileParams {
            mclass: Mclass::Capacity,
            fileid: 0,
            max_blocks: 64,
            directio: false,
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn create_then_reopen_checks_identity() {
        let dir = tempfile::tempdir().unwrap();

        drop(MblockFile::create(dir.path(), &params()).unwrap());

        // wrong fileid must be rejected by the header check
        let wrong = MblockFileParams {
            fileid: 7,
            ..params()
        };
        assert!(MblockFile::open(dir.path(), &wrong).is_err());

        drop(MblockFile::open(dir.path(), &params()).unwrap());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn double_create_is_exists() {
        let dir = tempfile::tempdir().unwrap();

        let _file = MblockFile::create(dir.path(), &params()).unwrap();

        assert!(matches!(
            MblockFile::create(dir.path(), &params()),
            Err(Error::Exists)
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn failed_create_unlinks_files() {
        let dir = tempfile::tempdir().unwrap();

        // fileid too wide for its packed field fails before any file lands
        let bad = MblockFileParams {
            fileid: 1 << 12,
            ..params()
        };
        assert!(MblockFile::create(dir.path(), &bad).is_err());

        assert_eq!(0, std::fs::read_dir(dir.path()).unwrap().count());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn alloc_abort_leaves_slot_zero() {
        let dir = tempfile::tempdir().unwrap();
        let file = MblockFile::create(dir.path(), &params()).unwrap();

        let mbid = file.alloc().unwrap();
        file.abort(mbid).unwrap();

        assert!(matches!(file.find(mbid), Err(Error::NotFound)));

        // the slot was never written
        let meta = file.meta.lock().unwrap();
        assert_eq!(0, omf::slot_unpack(&meta, mbid::block_id(mbid)).unwrap());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn commit_records_slot() {
        let dir = tempfile::tempdir().unwrap();
        let file = MblockFile::create(dir.path(), &params()).unwrap();

        let mbid = file.alloc().unwrap();
        assert_eq!(1, mbid::uniq(mbid));

        file.commit(mbid).unwrap();
        file.find(mbid).unwrap();

        let meta = file.meta.lock().unwrap();
        assert_eq!(mbid, omf::slot_unpack(&meta, mbid::block_id(mbid)).unwrap());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn delete_frees_slot_and_key() {
        let dir = tempfile::tempdir().unwrap();
        let file = MblockFile::create(dir.path(), &params()).unwrap();

        let mbid = file.alloc().unwrap();
        file.commit(mbid).unwrap();
        file.write(mbid, &[b"payload"], 0).unwrap();

        file.delete(mbid).unwrap();

        assert!(matches!(file.find(mbid), Err(Error::NotFound)));
        assert!(matches!(file.delete(mbid), Err(Error::NotFound)));

        {
            let meta = file.meta.lock().unwrap();
            assert_eq!(0, omf::slot_unpack(&meta, mbid::block_id(mbid)).unwrap());
        }

        // the key is reusable
        let mbid2 = file.alloc().unwrap();
        assert_eq!(mbid::block_id(mbid), mbid::block_id(mbid2));
        assert!(mbid::uniq(mbid2) > mbid::uniq(mbid));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn io_requires_allocated_block_and_sane_range() {
        let dir = tempfile::tempdir().unwrap();
        let file = MblockFile::create(dir.path(), &params()).unwrap();

        let mbid = file.alloc().unwrap();

        // zero iovecs is a success no-op even on a bogus id
        file.write(mbid + 1, &[], 0).unwrap();

        assert!(matches!(
            file.write(mbid, &[b"x"], MBLOCK_SIZE_BYTES),
            Err(Error::BadArgument(_))
        ));

        file.abort(mbid).unwrap();
        assert!(matches!(
            file.write(mbid, &[b"x"], 0),
            Err(Error::NotFound)
        ));
    }
}
