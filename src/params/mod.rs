// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Declarative, introspectable parameter layer.
//!
//! Every configuration record type exposes a static table of [`ParamSpec`]s.
//! A spec names one field and carries the callbacks that convert incoming
//! JSON into the field, validate the record afterwards, and project the
//! field back out as JSON. Scalar specs are generated by the macros at the
//! bottom of this module; enums and the media-class policy array have
//! hand-written callbacks.
//!
//! Set/deserialize semantics are transactional per call: conversion and
//! validation run against a scratch copy, and the record is only replaced
//! when everything passed, so a failed call leaves the prior value intact.

pub mod kvdb_cparams;
pub mod kvdb_dparams;
pub mod kvdb_rparams;
pub mod kvs_rparams;
pub mod mclass_policy;

pub use kvdb_cparams::KvdbCparams;
pub use kvdb_dparams::KvdbDparams;
pub use kvdb_rparams::{DurabilityMclass, KvdbOpenMode, KvdbRparams, ThrottleInitPolicy};
pub use kvs_rparams::{KvsRparams, ValueCompression};
pub use mclass_policy::{MclassPolicies, MclassPolicy, PolicyAge, PolicyDtype};

use crate::{Error, Result};
use serde_json::Value;

/// Bit set describing a spec
pub type ParamFlags = u32;

/// The parameter is unstable and hidden from stable tooling
pub const PARAM_EXPERIMENTAL: ParamFlags = 1 << 0;

/// The parameter may be changed after construction
pub const PARAM_WRITABLE: ParamFlags = 1 << 1;

/// The default value is produced by a builder callback, not a literal
pub const PARAM_DEFAULT_BUILDER: ParamFlags = 1 << 2;

/// Wire type of a parameter
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum ParamKind {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I32,
    I64,
    Double,
    Enum,
    String,
    Array,
}

/// Value bounds of a parameter
#[derive(Copy, Clone, Debug)]
pub enum Bounds {
    /// No bounds apply (bool, string)
    None,

    /// Inclusive unsigned range
    U {
        /// Smallest accepted value
        min: u64,
        /// Largest accepted value
        max: u64,
    },

    /// Inclusive signed range
    I {
        /// Smallest accepted value
        min: i64,
        /// Largest accepted value
        max: i64,
    },

    /// Inclusive floating-point range
    F {
        /// Smallest accepted value
        min: f64,
        /// Largest accepted value
        max: f64,
    },

    /// Maximum element count of an array parameter
    Len {
        /// Largest accepted element count
        max_len: usize,
    },
}

/// Specification of one parameter of record type `P`
pub struct ParamSpec<P: 'static> {
    /// Parameter name; dots group related parameters
    pub name: &'static str,

    /// Human-readable description
    pub description: &'static str,

    /// Spec flags
    pub flags: ParamFlags,

    /// Wire type
    pub kind: ParamKind,

    /// Value bounds
    pub bounds: Bounds,

    /// Parses a JSON node, checks it, and writes the field
    pub convert: fn(&ParamSpec<P>, &Value, &mut P) -> Result<()>,

    /// Re-checks the record after a field was written
    pub validate: fn(&ParamSpec<P>, &P) -> Result<()>,

    /// Projects the field as JSON
    pub jsonify: fn(&ParamSpec<P>, &P) -> Value,
}

impl<P> ParamSpec<P> {
    /// Returns `true` if the parameter may be changed after construction.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.flags & PARAM_WRITABLE != 0
    }

    /// Compact JSON text of the current field value.
    #[must_use]
    pub fn stringify(&self, params: &P) -> String {
        (self.jsonify)(self, params).to_string()
    }
}

/// Finds the spec for `name`.
#[must_use]
pub fn find<'a, P>(specs: &'a [ParamSpec<P>], name: &str) -> Option<&'a ParamSpec<P>> {
    specs.iter().find(|s| s.name == name)
}

/// Sets one writable parameter from JSON text.
///
/// # Errors
///
/// - `NotFound` for an unknown name
/// - `ReadOnly` if the spec lacks the writable flag
/// - `BadValue` if the text does not parse, convert, or validate; the
///   record keeps its prior value
pub fn set<P: Clone>(
    specs: &[ParamSpec<P>],
    params: &mut P,
    name: &str,
    value: &str,
) -> Result<()> {
    let spec = find(specs, name).ok_or(Error::NotFound)?;

    if !spec.is_writable() {
        return Err(Error::ReadOnly);
    }

    let node: Value = serde_json::from_str(value)
        .map_err(|e| Error::BadValue(format!("{name}: not valid JSON: {e}")))?;

    let mut scratch = params.clone();
    (spec.convert)(spec, &node, &mut scratch)?;
    (spec.validate)(spec, &scratch)?;
    *params = scratch;

    Ok(())
}

/// Serializes one named field, or the whole record when `name` is empty.
///
/// # Errors
///
/// `NotFound` for an unknown name.
pub fn get<P>(specs: &[ParamSpec<P>], params: &P, name: Option<&str>) -> Result<String> {
    match name {
        None | Some("") => Ok(to_json(specs, params).to_string()),
        Some(name) => {
            let spec = find(specs, name).ok_or(Error::NotFound)?;
            Ok(spec.stringify(params))
        }
    }
}

/// Builds a JSON object with one property per spec, in spec order.
#[must_use]
pub fn to_json<P>(specs: &[ParamSpec<P>], params: &P) -> Value {
    let mut obj = serde_json::Map::new();

    for spec in specs {
        obj.insert(spec.name.into(), (spec.jsonify)(spec, params));
    }

    Value::Object(obj)
}

/// Applies a batch of `key=value` strings to a record under construction.
///
/// The value part is JSON text; an unparsable value is taken as a bare
/// string (so `mode=rdwr` works without quoting). The batch is atomic: the
/// record is only replaced when every entry converted and validated.
///
/// # Errors
///
/// - `NotFound` for an unknown key
/// - `BadValue` for a malformed entry or a failed conversion/validation
pub fn deserialize<P: Clone>(
    specs: &[ParamSpec<P>],
    params: &mut P,
    paramv: &[&str],
) -> Result<()> {
    let mut scratch = params.clone();

    for arg in paramv {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| Error::BadValue(format!("missing '=' in {arg:?}")))?;

        let spec = find(specs, key).ok_or(Error::NotFound)?;

        let node: Value =
            serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.into()));

        (spec.convert)(spec, &node, &mut scratch)?;
        (spec.validate)(spec, &scratch)?;
    }

    *params = scratch;

    Ok(())
}

pub(crate) fn as_u64(spec_name: &str, node: &Value) -> Result<u64> {
    node.as_u64()
        .ok_or_else(|| Error::BadValue(format!("{spec_name}: expected an unsigned number")))
}

pub(crate) fn as_bool(spec_name: &str, node: &Value) -> Result<bool> {
    node.as_bool()
        .ok_or_else(|| Error::BadValue(format!("{spec_name}: expected a boolean")))
}

pub(crate) fn as_str<'v>(spec_name: &str, node: &'v Value) -> Result<&'v str> {
    node.as_str()
        .ok_or_else(|| Error::BadValue(format!("{spec_name}: expected a string")))
}

pub(crate) fn check_bounds_u(spec_name: &str, value: u64, bounds: Bounds) -> Result<()> {
    if let Bounds::U { min, max } = bounds {
        if value < min || value > max {
            return Err(Error::BadValue(format!(
                "{spec_name}: {value} out of bounds [{min}, {max}]"
            )));
        }
    }

    Ok(())
}

// Spec entry for an unsigned scalar field: JSON number in, bounds-checked,
// JSON number out
macro_rules! pspec_uscalar {
    ($P:ty, $ty:ty, $kind:ident, $name:literal, $desc:literal, $flags:expr,
     $field:ident, $min:expr, $max:expr) => {
        $crate::params::ParamSpec::<$P> {
            name: $name,
            description: $desc,
            flags: $flags,
            kind: $crate::params::ParamKind::$kind,
            bounds: $crate::params::Bounds::U {
                min: $min as u64,
                max: $max as u64,
            },
            convert: |spec, node, p| {
                let v = $crate::params::as_u64(spec.name, node)?;
                $crate::params::check_bounds_u(spec.name, v, spec.bounds)?;
                #[allow(clippy::cast_possible_truncation)]
                {
                    p.$field = v as $ty;
                }
                Ok(())
            },
            validate: |spec, p| {
                $crate::params::check_bounds_u(spec.name, u64::from(p.$field), spec.bounds)
            },
            jsonify: |_, p| serde_json::Value::from(p.$field),
        }
    };
}

// Spec entry for a bool field
macro_rules! pspec_bool {
    ($P:ty, $name:literal, $desc:literal, $flags:expr, $($field:tt)+) => {
        $crate::params::ParamSpec::<$P> {
            name: $name,
            description: $desc,
            flags: $flags,
            kind: $crate::params::ParamKind::Bool,
            bounds: $crate::params::Bounds::None,
            convert: |spec, node, p| {
                p.$($field)+ = $crate::params::as_bool(spec.name, node)?;
                Ok(())
            },
            validate: |_, _| Ok(()),
            jsonify: |_, p| serde_json::Value::from(p.$($field)+),
        }
    };
}

// Spec entry for a free-form string field
macro_rules! pspec_string {
    ($P:ty, $name:literal, $desc:literal, $flags:expr, $($field:tt)+) => {
        $crate::params::ParamSpec::<$P> {
            name: $name,
            description: $desc,
            flags: $flags,
            kind: $crate::params::ParamKind::String,
            bounds: $crate::params::Bounds::None,
            convert: |spec, node, p| {
                p.$($field)+ = $crate::params::as_str(spec.name, node)?.to_owned();
                Ok(())
            },
            validate: |_, _| Ok(()),
            jsonify: |_, p| serde_json::Value::from(p.$($field)+.clone()),
        }
    };
}

pub(crate) use {pspec_bool, pspec_string, pspec_uscalar};
