// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Hierarchical in-process registry keyed by slash-delimited paths.
//!
//! Counter sets register themselves here; a management surface walks a
//! subtree and asks every element to emit itself as JSON. The tree owns the
//! registered element, so removal drops the backing storage.

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Longest accepted element path, including the root prefix
pub const DT_PATH_MAX: usize = 192;

/// An element registered in a data tree
pub trait DtElement: Send + Sync {
    /// Emits the element as one JSON value.
    ///
    /// # Errors
    ///
    /// Any failure inside an element fails the whole subtree emission.
    fn emit(&self) -> Result<serde_json::Value>;
}

/// Path-keyed registry of [`DtElement`]s
pub struct DataTree {
    elements: RwLock<BTreeMap<String, Arc<dyn DtElement>>>,
}

impl Default for DataTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DataTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self {
            elements: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers `element` at `path`.
    ///
    /// # Errors
    ///
    /// - `BadArgument` if the path is overlong or not slash-rooted
    /// - `Exists` if the path is already registered
    #[allow(clippy::expect_used)]
    pub fn add(&self, path: &str, element: Arc<dyn DtElement>) -> Result<()> {
        if path.len() >= DT_PATH_MAX || !path.starts_with('/') {
            return Err(Error::BadArgument("invalid data tree path"));
        }

        let mut elements = self.elements.write().expect("lock is poisoned");

        if elements.contains_key(path) {
            return Err(Error::Exists);
        }

        elements.insert(path.into(), element);

        Ok(())
    }

    /// Returns the element at exactly `path`.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn find(&self, path: &str) -> Option<Arc<dyn DtElement>> {
        let elements = self.elements.read().expect("lock is poisoned");
        elements.get(path).cloned()
    }

    /// Unregisters the element at `path`, dropping the tree's ownership.
    ///
    /// # Errors
    ///
    /// `NotFound` if nothing is registered at `path`.
    #[allow(clippy::expect_used)]
    pub fn remove(&self, path: &str) -> Result<()> {
        let mut elements = self.elements.write().expect("lock is poisoned");

        elements.remove(path).map(|_| ()).ok_or(Error::NotFound)
    }

    /// Unregisters every element at or below `prefix`.
    #[allow(clippy::expect_used)]
    pub fn remove_recursive(&self, prefix: &str) {
        let mut elements = self.elements.write().expect("lock is poisoned");
        elements.retain(|path, _| !path_in_subtree(path, prefix));
    }

    /// Emits all elements at or below `prefix` as a JSON array, ordered by
    /// path.
    ///
    /// # Errors
    ///
    /// Any element emission failure fails the whole walk.
    #[allow(clippy::expect_used)]
    pub fn emit(&self, prefix: &str) -> Result<serde_json::Value> {
        // Clone the matching elements out so no element emits under the lock
        let matches = {
            let elements = self.elements.read().expect("lock is poisoned");

            elements
                .iter()
                .filter(|(path, _)| path_in_subtree(path, prefix))
                .map(|(_, elem)| elem.clone())
                .collect::<Vec<_>>()
        };

        let mut out = Vec::with_capacity(matches.len());

        for elem in matches {
            out.push(elem.emit()?);
        }

        Ok(serde_json::Value::Array(out))
    }
}

fn path_in_subtree(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

/// The process-wide tree all counter sets register in by default.
pub fn global() -> &'static DataTree {
    static TREE: OnceLock<DataTree> = OnceLock::new();
    TREE.get_or_init(DataTree::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    struct Leaf(u64);

    impl DtElement for Leaf {
        fn emit(&self) -> Result<serde_json::Value> {
            Ok(serde_json::json!({ "value": self.0 }))
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn add_find_remove() {
        let tree = DataTree::new();

        tree.add("/data/perfc/kvdb/a", Arc::new(Leaf(1))).unwrap();

        assert!(tree.find("/data/perfc/kvdb/a").is_some());
        assert!(tree.find("/data/perfc/kvdb").is_none());

        assert!(matches!(
            tree.add("/data/perfc/kvdb/a", Arc::new(Leaf(2))),
            Err(Error::Exists)
        ));

        tree.remove("/data/perfc/kvdb/a").unwrap();
        assert!(matches!(
            tree.remove("/data/perfc/kvdb/a"),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn rejects_bad_paths() {
        let tree = DataTree::new();

        assert!(tree.add("no-slash", Arc::new(Leaf(0))).is_err());

        let long = format!("/{}", "x".repeat(DT_PATH_MAX));
        assert!(tree.add(&long, Arc::new(Leaf(0))).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn subtree_emission_respects_boundaries() {
        let tree = DataTree::new();

        tree.add("/data/perfc/kvdb/a", Arc::new(Leaf(1))).unwrap();
        tree.add("/data/perfc/kvdb/b", Arc::new(Leaf(2))).unwrap();
        tree.add("/data/perfc/kvdb2/c", Arc::new(Leaf(3))).unwrap();

        let subtree = tree.emit("/data/perfc/kvdb").unwrap();
        assert_eq!(2, subtree.as_array().unwrap().len());

        let all = tree.emit("/data/perfc").unwrap();
        assert_eq!(3, all.as_array().unwrap().len());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn remove_recursive() {
        let tree = DataTree::new();

        tree.add("/data/perfc/kvdb/a", Arc::new(Leaf(1))).unwrap();
        tree.add("/data/perfc/kvdb/b", Arc::new(Leaf(2))).unwrap();

        tree.remove_recursive("/data/perfc/kvdb");

        assert!(tree.find("/data/perfc/kvdb/a").is_none());
        assert!(tree.find("/data/perfc/kvdb/b").is_none());
    }
}
