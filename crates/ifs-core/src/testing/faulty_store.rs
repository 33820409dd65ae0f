// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Fault-injecting content store for error-path tests
//!
//! `FaultyStore` wraps a real `ContentStore` and fails selected operations
//! according to a `FailureBehavior`. Operation names are `"create_content"`
//! and `"delete_content"`.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use libc::{EIO, ENOSPC};

use crate::error::{IfsError, IfsResult};
use crate::store::ContentStore;
use crate::types::NodeId;

/// Custom predicate function type for fault injection
pub type FaultPredicate = Arc<dyn Fn(&str, u64) -> Option<IfsError> + Send + Sync>;

type ErrorFn = Arc<dyn Fn() -> IfsError + Send + Sync>;

/// Configurable failure behavior for store operations
#[derive(Default)]
pub enum FailureBehavior {
    /// Never fail
    #[default]
    AlwaysSucceed,

    /// Fail once `count` calls to `op` have succeeded
    FailAfter {
        op: &'static str,
        count: u64,
        error_fn: ErrorFn,
    },

    /// Fail the first `count` calls to `op`
    FailFor {
        op: &'static str,
        count: u64,
        error_fn: ErrorFn,
    },

    AlwaysFail {
        op: &'static str,
        error_fn: ErrorFn,
    },

    /// Receives (operation, call index) and returns the error to raise
    Custom(FaultPredicate),
}

pub struct FaultyStore {
    inner: Arc<dyn ContentStore>,
    behavior: Mutex<FailureBehavior>,
    call_counts: Mutex<HashMap<String, AtomicU64>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn ContentStore>) -> Self {
        Self::with_behavior(inner, FailureBehavior::AlwaysSucceed)
    }

    pub fn with_behavior(inner: Arc<dyn ContentStore>, behavior: FailureBehavior) -> Self {
        Self {
            inner,
            behavior: Mutex::new(behavior),
            call_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_behavior(&self, behavior: FailureBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn call_count(&self, op: &str) -> u64 {
        self.call_counts
            .lock()
            .unwrap()
            .get(op)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn check_fault(&self, op: &str) -> IfsResult<()> {
        let mut counts = self.call_counts.lock().unwrap();
        let counter = counts.entry(op.to_string()).or_insert_with(|| AtomicU64::new(0));
        let current = counter.fetch_add(1, Ordering::SeqCst);
        drop(counts);

        let behavior = self.behavior.lock().unwrap();
        let failure = match &*behavior {
            FailureBehavior::AlwaysSucceed => None,
            FailureBehavior::FailAfter {
                op: target,
                count,
                error_fn,
            } => (op == *target && current >= *count).then(|| error_fn()),
            FailureBehavior::FailFor {
                op: target,
                count,
                error_fn,
            } => (op == *target && current < *count).then(|| error_fn()),
            FailureBehavior::AlwaysFail { op: target, error_fn } => (op == *target).then(|| error_fn()),
            FailureBehavior::Custom(predicate) => predicate(op, current),
        };
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl ContentStore for FaultyStore {
    fn id(&self) -> String {
        self.inner.id()
    }

    fn base_dir(&self) -> PathBuf {
        self.inner.base_dir()
    }

    fn create_content(&self, owner: &str, node: NodeId) -> IfsResult<String> {
        self.check_fault("create_content")?;
        self.inner.create_content(owner, node)
    }

    fn local_path(&self, key: &str) -> PathBuf {
        self.inner.local_path(key)
    }

    fn delete_content(&self, key: &str) -> IfsResult<()> {
        self.check_fault("delete_content")?;
        self.inner.delete_content(key)
    }
}

pub fn eio_error() -> IfsError {
    IfsError::Io(io::Error::from_raw_os_error(EIO))
}

pub fn enospc_error() -> IfsError {
    IfsError::Io(io::Error::from_raw_os_error(ENOSPC))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalContentStore;

    fn local(dir: &tempfile::TempDir) -> Arc<dyn ContentStore> {
        Arc::new(LocalContentStore::new("default", dir.path()))
    }

    #[test]
    fn faulty_store_fail_after_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = FaultyStore::with_behavior(
            local(&dir),
            FailureBehavior::FailAfter {
                op: "create_content",
                count: 1,
                error_fn: Arc::new(enospc_error),
            },
        );
        store.create_content("o", NodeId(1)).unwrap();
        assert!(matches!(store.create_content("o", NodeId(2)), Err(IfsError::Io(_))));
        assert_eq!(store.call_count("create_content"), 2);
    }

    #[test]
    fn faulty_store_fail_for_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = FaultyStore::with_behavior(
            local(&dir),
            FailureBehavior::FailFor {
                op: "delete_content",
                count: 1,
                error_fn: Arc::new(eio_error),
            },
        );
        let key = store.create_content("o", NodeId(1)).unwrap();
        assert!(store.delete_content(&key).is_err());
        store.delete_content(&key).unwrap();
        assert!(!store.local_path(&key).exists());
    }

    #[test]
    fn faulty_store_custom_predicate() {
        let dir = tempfile::tempdir().unwrap();
        let store = FaultyStore::new(local(&dir));
        store.set_behavior(FailureBehavior::Custom(Arc::new(|op, n| {
            (op == "create_content" && n % 2 == 1).then(eio_error)
        })));
        assert!(store.create_content("o", NodeId(1)).is_ok());
        assert!(store.create_content("o", NodeId(2)).is_err());
        assert!(store.create_content("o", NodeId(3)).is_ok());
    }
}
