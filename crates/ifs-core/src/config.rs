// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Provider configuration

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IfsError, IfsResult};

/// Memory-map window offsets must stay page aligned on every supported platform
pub const CHECKSUM_WINDOW_ALIGNMENT: usize = 64 * 1024;
pub const DEFAULT_CHECKSUM_WINDOW: usize = 64 * 1024 * 1024;
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// One local content store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub id: String,
    pub base_dir: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IfsConfig {
    /// Store new files are created in
    pub default_store: String,
    pub stores: Vec<StoreConfig>,
    /// Window size used when recomputing checksums on channel close
    pub checksum_window_bytes: usize,
    /// Maximum number of cached FileStore adapters
    pub file_store_cache_capacity: usize,
    /// Content type that marks a file's type as unknown
    pub default_content_type: String,
    /// SQLite file the node tree is persisted to
    pub catalog: Option<PathBuf>,
}

impl Default for IfsConfig {
    fn default() -> Self {
        Self {
            default_store: "default".to_string(),
            stores: Vec::new(),
            checksum_window_bytes: DEFAULT_CHECKSUM_WINDOW,
            file_store_cache_capacity: 16,
            default_content_type: DEFAULT_CONTENT_TYPE.to_string(),
            catalog: None,
        }
    }
}

impl IfsConfig {
    /// Single local store rooted at `base_dir`, no catalog
    pub fn with_local_store(base_dir: impl Into<PathBuf>) -> Self {
        let config = Self::default();
        Self {
            stores: vec![StoreConfig {
                id: config.default_store.clone(),
                base_dir: base_dir.into(),
            }],
            ..config
        }
    }

    pub fn from_toml_str(s: &str) -> IfsResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| IfsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> IfsResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| IfsError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> IfsResult<()> {
        if self.stores.is_empty() {
            return Err(IfsError::Config("at least one content store is required".into()));
        }
        let mut seen = HashSet::new();
        for store in &self.stores {
            if store.id.is_empty() {
                return Err(IfsError::Config("content store id must not be empty".into()));
            }
            if !seen.insert(store.id.as_str()) {
                return Err(IfsError::Config(format!("duplicate content store id {}", store.id)));
            }
        }
        if !seen.contains(self.default_store.as_str()) {
            return Err(IfsError::Config(format!(
                "default store {} is not configured",
                self.default_store
            )));
        }
        if self.checksum_window_bytes == 0
            || self.checksum_window_bytes % CHECKSUM_WINDOW_ALIGNMENT != 0
        {
            return Err(IfsError::Config(format!(
                "checksum_window_bytes must be a non-zero multiple of {CHECKSUM_WINDOW_ALIGNMENT}"
            )));
        }
        if self.file_store_cache_capacity == 0 {
            return Err(IfsError::Config("file_store_cache_capacity must be positive".into()));
        }
        if self.default_content_type.is_empty() {
            return Err(IfsError::Config("default_content_type must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let config = IfsConfig::from_toml_str(
            r#"
            [[stores]]
            id = "default"
            base_dir = "/var/lib/ifs/default"
            "#,
        )
        .unwrap();
        assert_eq!(config.default_store, "default");
        assert_eq!(config.checksum_window_bytes, DEFAULT_CHECKSUM_WINDOW);
        assert_eq!(config.default_content_type, DEFAULT_CONTENT_TYPE);
        assert!(config.catalog.is_none());
    }

    #[test]
    fn test_parse_full() {
        let config = IfsConfig::from_toml_str(
            r#"
            default_store = "archive"
            checksum_window_bytes = 131072
            file_store_cache_capacity = 4
            default_content_type = "application/x-unknown"
            catalog = "/var/lib/ifs/catalog.sqlite"

            [[stores]]
            id = "default"
            base_dir = "/a"

            [[stores]]
            id = "archive"
            base_dir = "/b"
            "#,
        )
        .unwrap();
        assert_eq!(config.stores.len(), 2);
        assert_eq!(config.default_store, "archive");
        assert_eq!(config.catalog, Some(PathBuf::from("/var/lib/ifs/catalog.sqlite")));
    }

    #[test]
    fn test_validation_failures() {
        let no_stores = IfsConfig::default();
        assert!(matches!(no_stores.validate(), Err(IfsError::Config(_))));

        let mut bad_default = IfsConfig::with_local_store("/x");
        bad_default.default_store = "missing".into();
        assert!(bad_default.validate().is_err());

        let mut bad_window = IfsConfig::with_local_store("/x");
        bad_window.checksum_window_bytes = 1000;
        assert!(bad_window.validate().is_err());

        let mut dup = IfsConfig::with_local_store("/x");
        dup.stores.push(dup.stores[0].clone());
        assert!(dup.validate().is_err());

        let mut no_cache = IfsConfig::with_local_store("/x");
        no_cache.file_store_cache_capacity = 0;
        assert!(no_cache.validate().is_err());

        IfsConfig::with_local_store("/x").validate().unwrap();
    }
}
