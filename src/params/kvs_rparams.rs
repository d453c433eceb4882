// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-KVS runtime parameters.

use crate::params::{
    as_str, pspec_bool, pspec_uscalar, Bounds, ParamKind, ParamSpec, PARAM_EXPERIMENTAL,
    PARAM_WRITABLE,
};
use crate::perfc::{PERFC_LEVEL_DEFAULT, PERFC_LEVEL_MAX, PERFC_LEVEL_MIN};
use crate::Error;
use serde_json::Value;

/// Compression applied to value blocks
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValueCompression {
    /// Values stored verbatim
    None,

    /// LZ4 block compression
    Lz4,
}

impl ValueCompression {
    fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lz4 => "lz4",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::None),
            "lz4" => Some(Self::Lz4),
            _ => None,
        }
    }
}

/// KVS runtime parameter record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvsRparams {
    /// Enable transactions for this KVS
    pub transactions_enabled: bool,

    /// Perf counter engagement level
    pub perfc_level: u8,

    /// Disable cn maintenance work
    pub cn_maint_disable: bool,

    /// Create bloom filters on kblocks
    pub cn_bloom_create: bool,

    /// cn compaction debug flags
    pub cn_compaction_debug: u8,

    /// Value block compression
    pub value_compression: ValueCompression,
}

impl Default for KvsRparams {
    fn default() -> Self {
        Self {
            transactions_enabled: false,
            perfc_level: PERFC_LEVEL_DEFAULT,
            cn_maint_disable: false,
            cn_bloom_create: true,
            cn_compaction_debug: 0,
            value_compression: ValueCompression::None,
        }
    }
}

static PSPECS: &[ParamSpec<KvsRparams>] = &[
    pspec_bool!(
        KvsRparams,
        "transactions.enabled", "enable transactions for the kvs",
        0, transactions_enabled
    ),
    pspec_uscalar!(
        KvsRparams, u8, U8,
        "perfc.level", "set kvs perf counter engagement level",
        PARAM_EXPERIMENTAL, perfc_level, PERFC_LEVEL_MIN, PERFC_LEVEL_MAX
    ),
    pspec_bool!(
        KvsRparams,
        "cn_maint_disable", "disable cn maintenance",
        PARAM_EXPERIMENTAL | PARAM_WRITABLE, cn_maint_disable
    ),
    pspec_bool!(
        KvsRparams,
        "cn_bloom_create", "enable bloom creation",
        PARAM_EXPERIMENTAL, cn_bloom_create
    ),
    pspec_uscalar!(
        KvsRparams, u8, U8,
        "cn_compaction_debug", "cn compaction debug flags",
        PARAM_EXPERIMENTAL | PARAM_WRITABLE, cn_compaction_debug, 0, u8::MAX
    ),
    ParamSpec {
        name: "compression.value.algorithm",
        description: "value compression algorithm",
        flags: 0,
        kind: ParamKind::Enum,
        bounds: Bounds::U { min: 0, max: 1 },
        convert: |spec, node, p| {
            let name = as_str(spec.name, node)?;

            p.value_compression = ValueCompression::from_name(name).ok_or_else(|| {
                Error::BadValue(format!("invalid value: {name}, must be one of none or lz4"))
            })?;

            Ok(())
        },
        validate: |_, _| Ok(()),
        jsonify: |_, p| Value::from(p.value_compression.name()),
    },
];

impl KvsRparams {
    /// The parameter spec table for this record type.
    #[must_use]
    pub fn pspecs() -> &'static [ParamSpec<Self>] {
        PSPECS
    }
}
