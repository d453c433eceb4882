// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Synchronous vectored I/O at an absolute offset.
//!
//! Reads loop until every buffer is filled; a file that ends early is an
//! `UnexpectedEof` I/O error, never a short success. Zero buffers is a
//! success no-op for both directions.

use crate::Result;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

/// Writes all of `iov`, starting at `offset`.
///
/// # Errors
///
/// Any underlying filesystem failure.
pub fn write_vectored_at(file: &File, offset: u64, iov: &[&[u8]]) -> Result<()> {
    let mut off = offset;

    for buf in iov {
        file.write_all_at(buf, off)?;
        off += buf.len() as u64;
    }

    Ok(())
}

/// Fills all of `iov`, starting at `offset`.
///
/// # Errors
///
/// Any underlying filesystem failure, including `UnexpectedEof` when the
/// file ends before the buffers are full.
pub fn read_vectored_at(file: &File, offset: u64, iov: &mut [&mut [u8]]) -> Result<()> {
    let mut off = offset;

    for buf in iov.iter_mut() {
        let mut filled = 0usize;

        while filled < buf.len() {
            #[allow(clippy::indexing_slicing)]
            let n = file.read_at(&mut buf[filled..], off + filled as u64)?;

            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("read at {off} stopped {} bytes short", buf.len() - filled),
                )
                .into());
            }

            filled += n;
        }

        off += buf.len() as u64;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn round_trip_two_iovecs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("io.dat");

        drop(File::create_new(&path).unwrap());
        let file = File::options().read(true).write(true).open(&path).unwrap();

        let a = vec![0xaa; 4096];
        let b = vec![0xbb; 4096];
        write_vectored_at(&file, 8192, &[&a, &b]).unwrap();

        let mut x = vec![0u8; 4096];
        let mut y = vec![0u8; 4096];
        read_vectored_at(&file, 8192, &mut [&mut x, &mut y]).unwrap();

        assert_eq!(a, x);
        assert_eq!(b, y);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn zero_iovecs_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::create_new(dir.path().join("io.dat")).unwrap();

        write_vectored_at(&file, 0, &[]).unwrap();
        read_vectored_at(&file, 0, &mut []).unwrap();
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn short_file_is_unexpected_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("io.dat");

        std::fs::write(&path, b"abc").unwrap();
        let file = File::open(&path).unwrap();

        let mut buf = vec![0u8; 8];
        assert!(read_vectored_at(&file, 0, &mut [&mut buf]).is_err());
    }
}
