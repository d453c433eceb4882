// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Media-class placement policies.
//!
//! A policy names a 2x2 matrix: for each tree age (root or leaf) and data
//! type (keys or values), the media class the data goes to. The first six
//! array entries are reserved built-ins; the rest of the array is free for
//! user definitions, with unused slots carrying a sentinel name.

use crate::{Error, Mclass, Result};
use serde_json::Value;

/// Total policy slots (built-ins plus user definitions)
pub const MPOLICY_COUNT: usize = 32;

/// Longest accepted policy name (bytes)
pub const MPOLICY_NAME_MAX: usize = 32;

/// Name carried by unused policy slots
pub const MPOLICY_DEFAULT_NAME: &str = "default_policy";

/// Number of reserved built-in policies
pub const MPOLICY_BUILTIN_COUNT: usize = 6;

/// Tree age group of a placement decision
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PolicyAge {
    /// Root (young) nodes
    Root,

    /// Leaf (old) nodes
    Leaf,
}

impl PolicyAge {
    fn json_key(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Leaf => "leaf",
        }
    }

    fn from_json_key(key: &str) -> Option<Self> {
        match key {
            "root" => Some(Self::Root),
            "leaf" => Some(Self::Leaf),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Root => 0,
            Self::Leaf => 1,
        }
    }
}

/// Data type of a placement decision
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PolicyDtype {
    /// Key blocks
    Keys,

    /// Value blocks
    Values,
}

impl PolicyDtype {
    fn json_key(self) -> &'static str {
        match self {
            Self::Keys => "keys",
            Self::Values => "values",
        }
    }

    fn from_json_key(key: &str) -> Option<Self> {
        match key {
            "keys" => Some(Self::Keys),
            "values" => Some(Self::Values),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Keys => 0,
            Self::Values => 1,
        }
    }
}

/// One named placement policy
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MclassPolicy {
    /// Unique policy name
    pub name: String,

    /// `[age][dtype]` placement matrix
    pub table: [[Mclass; 2]; 2],
}

impl MclassPolicy {
    fn uniform(name: &str, mclass: Mclass) -> Self {
        Self {
            name: name.into(),
            table: [[mclass; 2]; 2],
        }
    }

    /// The media class for `(age, dtype)`.
    #[must_use]
    pub fn mclass(&self, age: PolicyAge, dtype: PolicyDtype) -> Mclass {
        #[allow(clippy::indexing_slicing)]
        let mclass = self.table[age.index()][dtype.index()];

        mclass
    }

    fn set(&mut self, age: PolicyAge, dtype: PolicyDtype, mclass: Mclass) {
        #[allow(clippy::indexing_slicing)]
        {
            self.table[age.index()][dtype.index()] = mclass;
        }
    }

    fn is_free_slot(&self) -> bool {
        self.name == MPOLICY_DEFAULT_NAME
    }
}

/// The fixed-size policy array of a KVDB
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MclassPolicies(Vec<MclassPolicy>);

impl Default for MclassPolicies {
    // The default builder: the six reserved built-ins, then sentinel-named
    // free slots
    fn default() -> Self {
        let mut policies = Vec::with_capacity(MPOLICY_COUNT);

        policies.push(MclassPolicy::uniform("capacity_only", Mclass::Capacity));
        policies.push(MclassPolicy::uniform("staging_only", Mclass::Staging));

        let mut policy = MclassPolicy::uniform("staging_max_capacity", Mclass::Staging);
        policy.set(PolicyAge::Leaf, PolicyDtype::Values, Mclass::Capacity);
        policies.push(policy);

        let mut policy = MclassPolicy::uniform("staging_min_capacity", Mclass::Staging);
        policy.set(PolicyAge::Leaf, PolicyDtype::Keys, Mclass::Capacity);
        policy.set(PolicyAge::Leaf, PolicyDtype::Values, Mclass::Capacity);
        policies.push(policy);

        policies.push(MclassPolicy::uniform("pmem_only", Mclass::Pmem));

        let mut policy = MclassPolicy::uniform("pmem_max_capacity", Mclass::Pmem);
        policy.set(PolicyAge::Leaf, PolicyDtype::Values, Mclass::Capacity);
        policies.push(policy);

        for _ in MPOLICY_BUILTIN_COUNT..MPOLICY_COUNT {
            let mut policy = MclassPolicy::uniform(MPOLICY_DEFAULT_NAME, Mclass::Staging);
            policy.set(PolicyAge::Leaf, PolicyDtype::Values, Mclass::Capacity);
            policies.push(policy);
        }

        Self(policies)
    }
}

impl MclassPolicies {
    /// Looks a policy up by name (built-in or user-defined).
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&MclassPolicy> {
        self.0
            .iter()
            .take_while(|p| !p.is_free_slot())
            .find(|p| p.name == name)
    }

    /// The user-defined policies (everything after the built-ins, up to the
    /// first free slot).
    #[must_use]
    pub fn user_defined(&self) -> &[MclassPolicy] {
        let defined = self
            .0
            .iter()
            .skip(MPOLICY_BUILTIN_COUNT)
            .take_while(|p| !p.is_free_slot())
            .count();

        self.0
            .get(MPOLICY_BUILTIN_COUNT..MPOLICY_BUILTIN_COUNT + defined)
            .unwrap_or(&[])
    }

    /// Converts a JSON array of policy objects, appending after the
    /// built-ins.
    ///
    /// # Errors
    ///
    /// `BadValue` naming the offending key or value; the array is replaced
    /// wholesale only by the caller's transactional write.
    pub fn convert(&mut self, node: &Value) -> Result<()> {
        let incoming = node
            .as_array()
            .ok_or_else(|| Error::BadValue("mclass_policies: expected an array".into()))?;

        let mut slot = MPOLICY_BUILTIN_COUNT;

        for policy_json in incoming {
            if slot >= MPOLICY_COUNT {
                return Err(Error::BadValue(format!(
                    "mclass_policies: more than {} policies",
                    MPOLICY_COUNT - MPOLICY_BUILTIN_COUNT
                )));
            }

            let obj = policy_json
                .as_object()
                .ok_or_else(|| Error::BadValue("mclass policy must be an object".into()))?;

            for key in obj.keys() {
                if key != "name" && key != "config" {
                    return Err(Error::BadValue(format!(
                        "unknown key in mclass policy object: {key}"
                    )));
                }
            }

            let name = obj
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    Error::BadValue("key 'name' in mclass policy object must be a string".into())
                })?;

            if name.len() >= MPOLICY_NAME_MAX {
                return Err(Error::BadValue(format!(
                    "mclass policy name '{name}' is longer than {} bytes",
                    MPOLICY_NAME_MAX - 1
                )));
            }

            let config = obj
                .get("config")
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    Error::BadValue("key 'config' in mclass policy object must be an object".into())
                })?;

            let mut policy = MclassPolicy::uniform(name, Mclass::Capacity);

            for (age_key, age_json) in config {
                let age = PolicyAge::from_json_key(age_key).ok_or_else(|| {
                    Error::BadValue(format!(
                        "invalid mclass policy age group: {age_key}, must be root or leaf"
                    ))
                })?;

                let dtypes = age_json.as_object().ok_or_else(|| {
                    Error::BadValue("mclass policy age group must be an object".into())
                })?;

                for (dtype_key, mclass_json) in dtypes {
                    let dtype = PolicyDtype::from_json_key(dtype_key).ok_or_else(|| {
                        Error::BadValue(format!(
                            "invalid mclass policy data type: {dtype_key}, must be keys or values"
                        ))
                    })?;

                    let mclass_name = mclass_json.as_str().ok_or_else(|| {
                        Error::BadValue("mclass policy entry must be a string".into())
                    })?;

                    let mclass = Mclass::from_name(mclass_name).ok_or_else(|| {
                        Error::BadValue(format!(
                            "unknown media class in mclass policy: {mclass_name}, \
                             must be one of capacity, staging or pmem"
                        ))
                    })?;

                    policy.set(age, dtype, mclass);
                }
            }

            if let Some(entry) = self.0.get_mut(slot) {
                *entry = policy;
            }
            slot += 1;
        }

        Ok(())
    }

    /// Checks that all defined policies have unique names.
    ///
    /// # Errors
    ///
    /// `BadValue` naming the first duplicate.
    pub fn validate(&self) -> Result<()> {
        let defined = self
            .0
            .iter()
            .take_while(|p| !p.is_free_slot())
            .collect::<Vec<_>>();

        for policy in &defined {
            let dups = defined.iter().filter(|p| p.name == policy.name).count();

            if dups > 1 {
                return Err(Error::BadValue(format!(
                    "duplicate media class policy name found: {}",
                    policy.name
                )));
            }
        }

        Ok(())
    }

    /// Emits the user-defined policies as a JSON array; built-ins and free
    /// slots are not emitted.
    #[must_use]
    pub fn jsonify(&self) -> Value {
        let mut arr = Vec::new();

        for policy in self.user_defined() {
            let mut config = serde_json::Map::new();

            for age in [PolicyAge::Leaf, PolicyAge::Root] {
                let mut by_dtype = serde_json::Map::new();

                for dtype in [PolicyDtype::Keys, PolicyDtype::Values] {
                    by_dtype.insert(
                        dtype.json_key().into(),
                        policy.mclass(age, dtype).name().into(),
                    );
                }

                config.insert(age.json_key().into(), Value::Object(by_dtype));
            }

            let mut obj = serde_json::Map::new();
            obj.insert("name".into(), policy.name.clone().into());
            obj.insert("config".into(), Value::Object(config));

            arr.push(Value::Object(obj));
        }

        Value::Array(arr)
    }
}
