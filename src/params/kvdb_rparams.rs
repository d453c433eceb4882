// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! KVDB runtime parameters.

use crate::params::{
    as_str, mclass_policy::MclassPolicies, pspec_bool, pspec_string, pspec_uscalar, Bounds,
    ParamKind, ParamSpec, PARAM_DEFAULT_BUILDER, PARAM_EXPERIMENTAL, PARAM_WRITABLE,
};
use crate::perfc::{PERFC_LEVEL_DEFAULT, PERFC_LEVEL_MAX, PERFC_LEVEL_MIN};
use crate::{Error, Mclass};
use serde_json::Value;

/// KVDB open mode
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KvdbOpenMode {
    /// Read-only, no recovery
    Rdonly,

    /// Diagnostic mode: no background work
    Diag,

    /// Read-only with WAL replay
    RdonlyReplay,

    /// Normal read-write (default)
    Rdwr,
}

impl KvdbOpenMode {
    /// Canonical mode name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Rdonly => "rdonly",
            Self::Diag => "diag",
            Self::RdonlyReplay => "rdonly_replay",
            Self::Rdwr => "rdwr",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "rdonly" => Some(Self::Rdonly),
            "diag" => Some(Self::Diag),
            "rdonly_replay" => Some(Self::RdonlyReplay),
            "rdwr" => Some(Self::Rdwr),
            _ => None,
        }
    }
}

/// Media class receiving durability (WAL) writes
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DurabilityMclass {
    /// Pick the fastest configured class
    Auto,

    /// A specific configured class
    Fixed(Mclass),
}

impl DurabilityMclass {
    fn name(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Fixed(mc) => mc.name(),
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        if name == "auto" {
            return Some(Self::Auto);
        }

        Mclass::from_name(name).map(Self::Fixed)
    }
}

/// Starting point of the write throttle
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum ThrottleInitPolicy {
    Auto,
    Light,
    Medium,
    Heavy,
}

impl ThrottleInitPolicy {
    fn name(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Light => "light",
            Self::Medium => "medium",
            Self::Heavy => "heavy",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "auto" => Some(Self::Auto),
            "light" => Some(Self::Light),
            "medium" => Some(Self::Medium),
            // historical alias
            "heavy" | "default" => Some(Self::Heavy),
            _ => None,
        }
    }
}

/// KVDB runtime parameter record
#[derive(Clone, Debug, PartialEq)]
pub struct KvdbRparams {
    /// Open mode
    pub mode: KvdbOpenMode,

    /// Perf counter engagement level
    pub perfc_level: u8,

    /// c0 debug flags
    pub c0_debug: u8,

    /// Disable c0 spill
    pub c0_diag_mode: bool,

    /// Number of KVMS stripes
    pub c0_ingest_width: u32,

    /// Transaction timeout (ms)
    pub txn_timeout_ms: u64,

    /// Compaction scheduler policy id
    pub csched_policy: u32,

    /// Max space amplification sample
    pub csched_samp_max: u64,

    /// Low water mark (percent)
    pub csched_lo_th_pct: u8,

    /// High water mark (percent)
    pub csched_hi_th_pct: u8,

    /// Leaf percent target
    pub csched_leaf_pct: u8,

    /// Durability (WAL) enabled
    pub dur_enabled: bool,

    /// Durability flush interval (ms)
    pub dur_interval_ms: u32,

    /// Media class for durability writes
    pub dur_mclass: DurabilityMclass,

    /// Initial throttle position
    pub throttle_init_policy: ThrottleInitPolicy,

    /// Disable the write throttle entirely
    pub throttle_disable: bool,

    /// Media-class placement policies
    pub mclass_policies: MclassPolicies,

    /// Per-mclass storage path overrides (empty = from kvdb.meta)
    pub storage_path: [String; 3],

    /// Per-mclass direct I/O toggles
    pub storage_directio: [bool; 3],
}

impl Default for KvdbRparams {
    fn default() -> Self {
        Self {
            mode: KvdbOpenMode::Rdwr,
            perfc_level: PERFC_LEVEL_DEFAULT,
            c0_debug: 0,
            c0_diag_mode: false,
            c0_ingest_width: 8,
            txn_timeout_ms: 1000 * 60 * 5,
            csched_policy: 3,
            csched_samp_max: 150,
            csched_lo_th_pct: 70,
            csched_hi_th_pct: 85,
            csched_leaf_pct: 90,
            dur_enabled: true,
            dur_interval_ms: 100,
            dur_mclass: DurabilityMclass::Auto,
            throttle_init_policy: ThrottleInitPolicy::Auto,
            throttle_disable: false,
            mclass_policies: MclassPolicies::default(),
            storage_path: [String::new(), String::new(), String::new()],
            storage_directio: [false, false, false],
        }
    }
}

static PSPECS: &[ParamSpec<KvdbRparams>] = &[
    ParamSpec {
        name: "mode",
        description: "open mode",
        flags: 0,
        kind: ParamKind::Enum,
        bounds: Bounds::U { min: 0, max: 3 },
        convert: |spec, node, p| {
            let name = as_str(spec.name, node)?;

            p.mode = KvdbOpenMode::from_name(name).ok_or_else(|| {
                Error::BadValue(format!(
                    "invalid value: {name}, must be one of rdonly, diag, rdonly_replay, rdwr"
                ))
            })?;

            Ok(())
        },
        validate: |_, _| Ok(()),
        jsonify: |_, p| Value::from(p.mode.name()),
    },
    pspec_uscalar!(
        KvdbRparams, u8, U8,
        "perfc.level", "set kvdb perf counter engagement level",
        PARAM_EXPERIMENTAL, perfc_level, PERFC_LEVEL_MIN, PERFC_LEVEL_MAX
    ),
    pspec_uscalar!(
        KvdbRparams, u8, U8,
        "c0_debug", "c0 debug flags",
        PARAM_EXPERIMENTAL | PARAM_WRITABLE, c0_debug, 0, u8::MAX
    ),
    pspec_bool!(
        KvdbRparams,
        "c0_diag_mode", "disable c0 spill",
        PARAM_EXPERIMENTAL, c0_diag_mode
    ),
    pspec_uscalar!(
        KvdbRparams, u32, U32,
        "c0_ingest_width", "number of c0 ingest stripes",
        PARAM_EXPERIMENTAL, c0_ingest_width, 1, 32
    ),
    pspec_uscalar!(
        KvdbRparams, u64, U64,
        "txn_timeout", "transaction timeout (ms)",
        PARAM_EXPERIMENTAL, txn_timeout_ms, 0, u64::MAX
    ),
    pspec_uscalar!(
        KvdbRparams, u32, U32,
        "csched_policy", "csched (compaction scheduler) policy",
        PARAM_EXPERIMENTAL, csched_policy, 0, u32::MAX
    ),
    pspec_uscalar!(
        KvdbRparams, u64, U64,
        "csched_samp_max", "csched max space amp (0x100)",
        PARAM_EXPERIMENTAL | PARAM_WRITABLE, csched_samp_max, 0, u64::MAX
    ),
    pspec_uscalar!(
        KvdbRparams, u8, U8,
        "csched_lo_th_pct", "csched low water mark percentage",
        PARAM_EXPERIMENTAL | PARAM_WRITABLE, csched_lo_th_pct, 0, 100
    ),
    pspec_uscalar!(
        KvdbRparams, u8, U8,
        "csched_hi_th_pct", "csched hwm percentage",
        PARAM_EXPERIMENTAL | PARAM_WRITABLE, csched_hi_th_pct, 0, 100
    ),
    pspec_uscalar!(
        KvdbRparams, u8, U8,
        "csched_leaf_pct", "csched percent data in leaves",
        PARAM_EXPERIMENTAL | PARAM_WRITABLE, csched_leaf_pct, 0, 100
    ),
    pspec_bool!(
        KvdbRparams,
        "durability.enabled", "enable durability",
        0, dur_enabled
    ),
    pspec_uscalar!(
        KvdbRparams, u32, U32,
        "durability.interval_ms", "durability lag in ms",
        PARAM_WRITABLE, dur_interval_ms, 1, 1_000
    ),
    ParamSpec {
        name: "durability.mclass",
        description: "media class to use for WAL files",
        flags: 0,
        kind: ParamKind::Enum,
        bounds: Bounds::U { min: 0, max: 3 },
        convert: |spec, node, p| {
            let name = as_str(spec.name, node)?;

            p.dur_mclass = DurabilityMclass::from_name(name).ok_or_else(|| {
                Error::BadValue(format!(
                    "invalid value: {name}, must be one of capacity, staging, pmem or auto"
                ))
            })?;

            Ok(())
        },
        validate: |_, _| Ok(()),
        jsonify: |_, p| Value::from(p.dur_mclass.name()),
    },
    ParamSpec {
        name: "throttling.init_policy",
        description: "throttle initialization policy",
        flags: 0,
        kind: ParamKind::Enum,
        bounds: Bounds::U { min: 0, max: 3 },
        convert: |spec, node, p| {
            let name = as_str(spec.name, node)?;

            p.throttle_init_policy = ThrottleInitPolicy::from_name(name).ok_or_else(|| {
                Error::BadValue(format!(
                    "invalid value: {name}, must be one of light, medium, heavy or auto"
                ))
            })?;

            Ok(())
        },
        validate: |_, _| Ok(()),
        jsonify: |_, p| Value::from(p.throttle_init_policy.name()),
    },
    pspec_bool!(
        KvdbRparams,
        "throttle_disable", "disable sleep throttle",
        PARAM_EXPERIMENTAL, throttle_disable
    ),
    ParamSpec {
        name: "mclass_policies",
        description: "media class policy definitions",
        flags: PARAM_DEFAULT_BUILDER,
        kind: ParamKind::Array,
        bounds: Bounds::Len {
            max_len: crate::params::mclass_policy::MPOLICY_COUNT,
        },
        convert: |_, node, p| p.mclass_policies.convert(node),
        validate: |_, p| p.mclass_policies.validate(),
        jsonify: |_, p| p.mclass_policies.jsonify(),
    },
    pspec_string!(
        KvdbRparams,
        "storage.capacity.path", "capacity storage path override",
        PARAM_EXPERIMENTAL, storage_path[0]
    ),
    pspec_string!(
        KvdbRparams,
        "storage.staging.path", "staging storage path override",
        PARAM_EXPERIMENTAL, storage_path[1]
    ),
    pspec_string!(
        KvdbRparams,
        "storage.pmem.path", "pmem storage path override",
        PARAM_EXPERIMENTAL, storage_path[2]
    ),
    pspec_bool!(
        KvdbRparams,
        "storage.capacity.directio.enabled", "enable direct I/O for capacity media",
        PARAM_EXPERIMENTAL, storage_directio[0]
    ),
    pspec_bool!(
        KvdbRparams,
        "storage.staging.directio.enabled", "enable direct I/O for staging media",
        PARAM_EXPERIMENTAL, storage_directio[1]
    ),
    pspec_bool!(
        KvdbRparams,
        "storage.pmem.directio.enabled", "enable direct I/O for pmem media",
        PARAM_EXPERIMENTAL, storage_directio[2]
    ),
];

impl KvdbRparams {
    /// The parameter spec table for this record type.
    #[must_use]
    pub fn pspecs() -> &'static [ParamSpec<Self>] {
        PSPECS
    }

    /// Direct I/O toggle for `mclass`.
    #[must_use]
    pub fn directio(&self, mclass: Mclass) -> bool {
        self.storage_directio
            .get(usize::from(u8::from(mclass)))
            .copied()
            .unwrap_or(false)
    }
}
