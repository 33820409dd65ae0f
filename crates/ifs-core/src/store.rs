// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Content stores: named physical backends holding file bytes

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{IfsError, IfsResult};
use crate::types::NodeId;

/// Physical storage backend for file content
///
/// A store hands out one local file per File node. The key it returns is
/// persisted in the node and is the only handle the tree keeps.
#[cfg_attr(test, mockall::automock)]
pub trait ContentStore: Send + Sync {
    /// Store identifier, unique within a registry
    fn id(&self) -> String;

    /// Directory under which all content of this store lives
    fn base_dir(&self) -> PathBuf;

    /// Create an empty content container for a new node and return its key
    fn create_content(&self, owner: &str, node: NodeId) -> IfsResult<String>;

    /// Local file holding the bytes for `key`
    fn local_path(&self, key: &str) -> PathBuf;

    /// Remove the bytes for `key`
    fn delete_content(&self, key: &str) -> IfsResult<()>;
}

/// Content store backed by a directory on the host filesystem
///
/// Layout: `<base>/<owner>/<node-id as 16 hex digits>`.
pub struct LocalContentStore {
    id: String,
    base: PathBuf,
}

impl LocalContentStore {
    /// The base directory is created lazily on first content creation
    pub fn new(id: impl Into<String>, base: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            base: base.into(),
        }
    }
}

impl ContentStore for LocalContentStore {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn base_dir(&self) -> PathBuf {
        self.base.clone()
    }

    fn create_content(&self, owner: &str, node: NodeId) -> IfsResult<String> {
        let mut components = Path::new(owner).components();
        if !matches!((components.next(), components.next()), (Some(Component::Normal(_)), None)) {
            return Err(IfsError::invalid(format!("owner {owner:?} is not a plain directory name")));
        }
        let owner_dir = self.base.join(owner);
        std::fs::create_dir_all(&owner_dir)?;
        let key = format!("{owner}/{node}");
        let path = self.local_path(&key);
        std::fs::OpenOptions::new().write(true).create_new(true).open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                IfsError::already_exists(path.display())
            } else {
                IfsError::Io(e)
            }
        })?;
        debug!(store = %self.id, key = %key, "created content");
        Ok(key)
    }

    fn local_path(&self, key: &str) -> PathBuf {
        self.base.join(key)
    }

    fn delete_content(&self, key: &str) -> IfsResult<()> {
        let path = self.local_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(store = %self.id, key = %key, "content already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Named content stores plus the one new files go to
pub struct StoreRegistry {
    stores: HashMap<String, Arc<dyn ContentStore>>,
    default_id: String,
}

impl StoreRegistry {
    pub fn new(default_id: impl Into<String>) -> Self {
        Self {
            stores: HashMap::new(),
            default_id: default_id.into(),
        }
    }

    pub fn register(&mut self, store: Arc<dyn ContentStore>) -> IfsResult<()> {
        let id = store.id();
        if self.stores.contains_key(&id) {
            return Err(IfsError::Config(format!("duplicate content store id {id}")));
        }
        self.stores.insert(id, store);
        Ok(())
    }

    pub fn get(&self, id: &str) -> IfsResult<Arc<dyn ContentStore>> {
        self.stores
            .get(id)
            .cloned()
            .ok_or_else(|| IfsError::not_found(format!("content store {id}")))
    }

    pub fn default_store(&self) -> IfsResult<Arc<dyn ContentStore>> {
        self.get(&self.default_id)
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.stores.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Fail unless the default store is registered
    pub fn check(&self) -> IfsResult<()> {
        if !self.stores.contains_key(&self.default_id) {
            return Err(IfsError::Config(format!(
                "default content store {} is not registered",
                self.default_id
            )));
        }
        Ok(())
    }
}

/// First existing directory at or above `path`
///
/// A relative path that runs out of components falls back to the current
/// directory.
pub(crate) fn nearest_existing_ancestor(path: &Path) -> Option<PathBuf> {
    let mut current = Some(path);
    while let Some(p) = current {
        if p.as_os_str().is_empty() {
            return Some(PathBuf::from("."));
        }
        if p.exists() {
            return Some(p.to_path_buf());
        }
        current = p.parent();
    }
    None
}
