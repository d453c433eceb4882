use test_log::test;
use tiered_kv::mpool::{mbid, MblockFile, MblockFileParams, MBLOCK_UNIQ_DELTA};
use tiered_kv::Mclass;

fn params() -> MblockFileParams {
    MblockFileParams {
        mclass: Mclass::Capacity,
        fileid: 1,
        max_blocks: 16,
        directio: false,
    }
}

#[test]
fn uniq_never_repeats_after_crash() -> tiered_kv::Result<()> {
    let dir = tempfile::tempdir()?;

    {
        let file = MblockFile::create(dir.path(), &params())?;

        // churn past one persistence delta; the header only records uniq
        // at every UNIQ_DELTA'th allocation
        for _ in 0..MBLOCK_UNIQ_DELTA + 2 {
            let mbid = file.alloc()?;
            file.abort(mbid)?;
        }

        // drop without teardown: the in-memory uniq (delta + 2) is lost
    }

    let file = MblockFile::open(dir.path(), &params())?;

    let fresh = file.alloc()?;
    assert!(
        mbid::uniq(fresh) >= 2 * MBLOCK_UNIQ_DELTA,
        "uniq {} may collide with pre-crash ids",
        mbid::uniq(fresh)
    );

    Ok(())
}

#[test]
fn reload_bumps_uniq_even_without_churn() -> tiered_kv::Result<()> {
    let dir = tempfile::tempdir()?;

    {
        let file = MblockFile::create(dir.path(), &params())?;
        let mbid = file.alloc()?;
        assert_eq!(1, mbid::uniq(mbid));
        file.commit(mbid)?;
    }

    let file = MblockFile::open(dir.path(), &params())?;

    let next = file.alloc()?;
    assert_eq!(MBLOCK_UNIQ_DELTA + 1, mbid::uniq(next));

    Ok(())
}
