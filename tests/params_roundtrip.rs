use test_log::test;
use tiered_kv::params::{self, KvdbRparams, KvsRparams};

#[test]
fn kvdb_defaults_survive_json_round_trip() -> tiered_kv::Result<()> {
    let p = KvdbRparams::default();

    let json = params::to_json(KvdbRparams::pspecs(), &p);

    let paramv = json
        .as_object()
        .expect("record serializes as an object")
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>();
    let paramv = paramv.iter().map(String::as_str).collect::<Vec<_>>();

    let mut q = KvdbRparams::default();
    params::deserialize(KvdbRparams::pspecs(), &mut q, &paramv)?;

    assert_eq!(p, q);

    Ok(())
}

#[test]
fn runtime_set_equals_bulk_deserialize() -> tiered_kv::Result<()> {
    let mut p = KvdbRparams::default();
    params::set(KvdbRparams::pspecs(), &mut p, "csched_hi_th_pct", "76")?;

    let json = params::get(KvdbRparams::pspecs(), &p, Some("csched_hi_th_pct"))?;
    assert_eq!("76", json);

    let mut q = KvdbRparams::default();
    params::deserialize(KvdbRparams::pspecs(), &mut q, &["csched_hi_th_pct=76"])?;

    assert_eq!(p, q);

    Ok(())
}

#[test]
fn mclass_policy_array_round_trips_through_the_record() -> tiered_kv::Result<()> {
    let mut p = KvdbRparams::default();

    params::deserialize(
        KvdbRparams::pspecs(),
        &mut p,
        &[concat!(
            r#"mclass_policies=[{"name":"yolo","config":"#,
            r#"{"leaf":{"keys":"capacity","values":"staging"},"#,
            r#""root":{"keys":"capacity","values":"staging"}}}]"#
        )],
    )?;

    let text = params::get(KvdbRparams::pspecs(), &p, Some("mclass_policies"))?;
    assert_eq!(120, text.len());

    let mut q = KvdbRparams::default();
    params::deserialize(
        KvdbRparams::pspecs(),
        &mut q,
        &[&format!("mclass_policies={text}")],
    )?;

    assert_eq!(p, q);

    Ok(())
}

#[test]
fn bad_entries_reject_the_whole_batch() {
    let mut p = KvsRparams::default();

    let err = params::deserialize(
        KvsRparams::pspecs(),
        &mut p,
        &["transactions.enabled=true", "perfc.level=99"],
    );

    assert!(err.is_err());
    assert_eq!(KvsRparams::default(), p);
}
