// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Block manager for media-class files.
//!
//! A media class owns one or more mblock files; each file pairs a sparse
//! data file of fixed-width block slots with a crash-safe memory-mapped
//! slot table. Free space is tracked per file by an interval map of
//! allocator keys.

pub mod io;
pub mod mbid;
pub mod mblk_desc;
pub mod mblock_file;
pub mod omf;
pub mod rgnmap;

pub use {
    mbid::{Mbid, MBLOCK_FILE_BLOCKS_MAX, MBLOCK_SIZE_BYTES, MBLOCK_SIZE_SHIFT},
    mblk_desc::MblkDesc,
    mblock_file::{MblockFile, MblockFileParams, MBLOCK_UNIQ_DELTA},
    rgnmap::RgnMap,
};
