// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! FileStore adapters over content stores
//!
//! A content store's base directory may not exist yet, so capacity figures
//! are taken from the device of its nearest existing ancestor.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use moka::sync::Cache;
use nix::sys::statvfs::{statvfs, FsFlags, Statvfs};
use tracing::debug;

use crate::attrs::AttributeView;
use crate::error::{IfsError, IfsResult};
use crate::store::{nearest_existing_ancestor, ContentStore};

/// Capacity and attribute-support view of one content store
#[derive(Debug)]
pub struct IfsFileStore {
    name: String,
    base_dir: PathBuf,
    device_path: PathBuf,
}

impl IfsFileStore {
    /// Fails when no ancestor of the base directory exists
    pub fn for_store(store: &dyn ContentStore) -> IfsResult<Self> {
        let base_dir = store.base_dir();
        let device_path = nearest_existing_ancestor(&base_dir).ok_or_else(|| {
            IfsError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no file store for {}", base_dir.display()),
            ))
        })?;
        Ok(Self {
            name: store.id(),
            base_dir,
            device_path,
        })
    }

    /// The content store ID
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn stat(&self) -> IfsResult<Statvfs> {
        // Re-resolve: the base directory may have appeared since construction
        let path = nearest_existing_ancestor(&self.base_dir).unwrap_or_else(|| self.device_path.clone());
        statvfs(&path).map_err(|errno| IfsError::Io(std::io::Error::from(errno)))
    }

    pub fn total_space(&self) -> IfsResult<u64> {
        let st = self.stat()?;
        Ok(st.blocks() as u64 * st.fragment_size() as u64)
    }

    pub fn usable_space(&self) -> IfsResult<u64> {
        let st = self.stat()?;
        Ok(st.blocks_available() as u64 * st.fragment_size() as u64)
    }

    pub fn unallocated_space(&self) -> IfsResult<u64> {
        let st = self.stat()?;
        Ok(st.blocks_free() as u64 * st.fragment_size() as u64)
    }

    pub fn is_read_only(&self) -> IfsResult<bool> {
        Ok(self.stat()?.flags().contains(FsFlags::ST_RDONLY))
    }

    pub fn supports_file_attribute_view(&self, name: &str) -> bool {
        AttributeView::from_name(name).is_ok()
    }
}

/// Bounded cache of FileStore adapters keyed by content store ID
///
/// Concurrent first access for one ID builds a single adapter.
pub struct FileStoreCache {
    cache: Cache<String, Arc<IfsFileStore>>,
}

impl FileStoreCache {
    pub fn new(capacity: usize) -> Self {
        let cache = Cache::builder()
            .name("file_store_cache")
            .max_capacity(capacity.max(1) as u64)
            .build();
        Self { cache }
    }

    pub fn get(&self, store: &dyn ContentStore) -> IfsResult<Arc<IfsFileStore>> {
        let id = store.id();
        self.cache
            .try_get_with(id.clone(), || -> IfsResult<Arc<IfsFileStore>> {
                let created = Arc::new(IfsFileStore::for_store(store)?);
                debug!(store = %id, device = %created.device_path.display(), "file store adapter created");
                Ok(created)
            })
            .map_err(|e: Arc<IfsError>| {
                Arc::try_unwrap(e).unwrap_or_else(|shared| IfsError::Io(std::io::Error::other(shared.to_string())))
            })
    }

    pub fn evict(&self, id: &str) {
        self.cache.invalidate(id);
        debug!(store = %id, "file store adapter evicted");
    }

    pub fn contains(&self, id: &str) -> bool {
        self.cache.contains_key(id)
    }

    /// Entry count after pending evictions have been applied
    pub fn len(&self) -> usize {
        self.cache.run_pending_tasks();
        self.cache.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalContentStore;

    #[test]
    fn test_capacity_for_missing_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalContentStore::new("default", dir.path().join("not/yet/there"));
        let fs = IfsFileStore::for_store(&store).unwrap();
        assert_eq!(fs.name(), "default");
        assert!(fs.type_name().ends_with("IfsFileStore"));
        assert!(fs.total_space().unwrap() > 0);
        assert!(fs.usable_space().unwrap() <= fs.total_space().unwrap());
        assert!(fs.unallocated_space().unwrap() <= fs.total_space().unwrap());
        assert!(fs.supports_file_attribute_view("basic"));
        assert!(fs.supports_file_attribute_view("md5"));
        assert!(!fs.supports_file_attribute_view("posix"));
    }

    #[test]
    fn test_capacity_for_missing_relative_base_dir() {
        let store = LocalContentStore::new("rel", "ifs_store_not_created_yet/sub");
        let fs = IfsFileStore::for_store(&store).unwrap();
        assert!(fs.total_space().unwrap() > 0);
        assert!(!fs.is_read_only().unwrap());
    }

    #[test]
    fn test_cache_returns_same_instance() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalContentStore::new("default", dir.path());
        let cache = FileStoreCache::new(2);
        let a = cache.get(&store).unwrap();
        let b = cache.get(&store).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_cache_is_bounded_and_evicts() {
        let dir = tempfile::tempdir().unwrap();
        let s1 = LocalContentStore::new("s1", dir.path());
        let s2 = LocalContentStore::new("s2", dir.path());
        let s3 = LocalContentStore::new("s3", dir.path());
        let cache = FileStoreCache::new(2);
        let first = cache.get(&s1).unwrap();
        cache.get(&s2).unwrap();
        cache.get(&s3).unwrap();
        assert!(cache.len() <= 2);

        cache.evict("s1");
        assert!(!cache.contains("s1"));
        let rebuilt = cache.get(&s1).unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
    }

    #[test]
    fn test_concurrent_first_access_builds_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalContentStore::new("default", dir.path()));
        let cache = Arc::new(FileStoreCache::new(4));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let store = store.clone();
                std::thread::spawn(move || cache.get(store.as_ref()).unwrap())
            })
            .collect();
        let results: Vec<Arc<IfsFileStore>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for r in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], r));
        }
    }
}
