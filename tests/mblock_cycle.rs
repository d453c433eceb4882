use test_log::test;
use tiered_kv::mpool::{mbid, MblockFile, MblockFileParams};
use tiered_kv::{Error, Mclass};

fn params() -> MblockFileParams {
    MblockFileParams {
        mclass: Mclass::Staging,
        fileid: 0,
        max_blocks: 64,
        directio: false,
    }
}

#[test]
fn alloc_commit_read_cycle_across_reopen() -> tiered_kv::Result<()> {
    let dir = tempfile::tempdir()?;

    let mbid0 = {
        let file = MblockFile::create(dir.path(), &params())?;

        let mbid0 = file.alloc()?;
        assert_eq!(1, mbid::uniq(mbid0));
        assert_eq!(Some(Mclass::Staging), mbid::mclass(mbid0));

        let head = vec![0xa5u8; 4096];
        let tail = vec![0x5au8; 4096];
        file.write(mbid0, &[&head, &tail], 0)?;

        file.commit(mbid0)?;

        mbid0
        // close
    };

    let file = MblockFile::open(dir.path(), &params())?;

    file.find(mbid0)?;

    let mut buf = vec![0u8; 8192];
    file.read(mbid0, &mut [&mut buf], 0)?;

    assert!(buf.iter().take(4096).all(|&b| b == 0xa5));
    assert!(buf.iter().skip(4096).all(|&b| b == 0x5a));

    Ok(())
}

#[test]
fn abort_leaves_no_trace_across_reopen() -> tiered_kv::Result<()> {
    let dir = tempfile::tempdir()?;

    let aborted = {
        let file = MblockFile::create(dir.path(), &params())?;

        let committed = file.alloc()?;
        file.commit(committed)?;

        let aborted = file.alloc()?;
        file.write(aborted, &[&[1u8; 512]], 0)?;
        file.abort(aborted)?;

        aborted
    };

    let file = MblockFile::open(dir.path(), &params())?;

    assert!(matches!(file.find(aborted), Err(Error::NotFound)));

    Ok(())
}

#[test]
fn exhaustion_returns_out_of_space() -> tiered_kv::Result<()> {
    let dir = tempfile::tempdir()?;

    let small = MblockFileParams {
        max_blocks: 4,
        ..params()
    };
    let file = MblockFile::create(dir.path(), &small)?;

    for _ in 0..4 {
        let mbid = file.alloc()?;
        file.commit(mbid)?;
    }

    assert!(matches!(file.alloc(), Err(Error::OutOfSpace)));

    Ok(())
}

#[test]
fn delete_then_delete_again_is_not_found() -> tiered_kv::Result<()> {
    let dir = tempfile::tempdir()?;

    let file = MblockFile::create(dir.path(), &params())?;

    let mbid = file.alloc()?;
    file.commit(mbid)?;

    file.delete(mbid)?;
    assert!(matches!(file.delete(mbid), Err(Error::NotFound)));

    Ok(())
}

#[test]
fn committed_blocks_survive_with_region_map_rebuilt() -> tiered_kv::Result<()> {
    let dir = tempfile::tempdir()?;

    let (kept, deleted) = {
        let file = MblockFile::create(dir.path(), &params())?;

        let kept = file.alloc()?;
        file.commit(kept)?;

        let deleted = file.alloc()?;
        file.commit(deleted)?;
        file.delete(deleted)?;

        (kept, deleted)
    };

    let file = MblockFile::open(dir.path(), &params())?;

    file.find(kept)?;
    assert!(matches!(file.find(deleted), Err(Error::NotFound)));

    // the deleted block's key is allocatable again
    let fresh = file.alloc()?;
    assert_eq!(mbid::block_id(deleted), mbid::block_id(fresh));

    Ok(())
}
