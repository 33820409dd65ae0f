// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Secure directory streams
//!
//! A stream is scoped to one directory. Relative paths given to its
//! operations resolve against that directory and may not climb above it.
//! The iterator is single use and works on a snapshot of the children.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::attrs::Md5FileAttributes;
use crate::channel::IfsChannel;
use crate::error::{IfsError, IfsResult};
use crate::path::IfsPath;
use crate::provider::IfsProvider;
use crate::types::{FileAttribute, NodeId, OpenOption};

pub struct IfsDirectoryStream {
    provider: IfsProvider,
    path: IfsPath,
    dir: NodeId,
    iterated: AtomicBool,
    closed: Arc<AtomicBool>,
}

impl IfsDirectoryStream {
    pub(crate) fn new(provider: IfsProvider, path: IfsPath, dir: NodeId) -> Self {
        debug!(path = %path, "opened directory stream");
        Self {
            provider,
            path,
            dir,
            iterated: AtomicBool::new(false),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Directory this stream is scoped to
    pub fn path(&self) -> &IfsPath {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> IfsResult<()> {
        if self.is_closed() {
            return Err(IfsError::ClosedDirectoryStream);
        }
        Ok(())
    }

    /// Closing is idempotent
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(path = %self.path, "closed directory stream");
        }
    }

    /// Entries as absolute paths, snapshotted now; callable once
    pub fn iter(&self) -> IfsResult<DirectoryEntries> {
        self.ensure_open()?;
        if self.iterated.swap(true, Ordering::SeqCst) {
            return Err(IfsError::IllegalState("iterator already obtained".into()));
        }
        let entries = self
            .provider
            .tree()
            .children(self.dir)?
            .into_iter()
            .map(|(name, _)| self.path.join(&name))
            .collect::<IfsResult<Vec<_>>>()?;
        Ok(DirectoryEntries {
            entries: entries.into_iter(),
            closed: self.closed.clone(),
        })
    }

    /// Resolve `path` against this directory; absolute paths are taken as is
    fn resolve(&self, path: &IfsPath) -> IfsResult<IfsPath> {
        self.ensure_open()?;
        if path.is_absolute() {
            return path.normalize();
        }
        let relative = path.normalize()?;
        if relative.segments().first().map(String::as_str) == Some("..") {
            return Err(IfsError::invalid(format!(
                "{path} escapes directory stream {}",
                self.path
            )));
        }
        self.path.resolve(&relative).normalize()
    }

    /// Nested stream over a subdirectory
    pub fn new_directory_stream(&self, path: &IfsPath) -> IfsResult<IfsDirectoryStream> {
        let target = self.resolve(path)?;
        self.provider.new_directory_stream(&target)
    }

    pub fn new_byte_channel(
        &self,
        path: &IfsPath,
        options: &[OpenOption],
        attrs: &[FileAttribute],
    ) -> IfsResult<IfsChannel> {
        let target = self.resolve(path)?;
        self.provider.new_byte_channel(&target, options, attrs)
    }

    pub fn delete_file(&self, path: &IfsPath) -> IfsResult<()> {
        let target = self.resolve(path)?;
        let id = self.provider.tree().resolve(&target)?;
        if self.provider.tree().get(id)?.is_directory() {
            return Err(IfsError::is_a_directory(&target));
        }
        self.provider.delete_path(&target)
    }

    pub fn delete_directory(&self, path: &IfsPath) -> IfsResult<()> {
        let target = self.resolve(path)?;
        let id = self.provider.tree().resolve(&target)?;
        if self.provider.tree().get(id)?.is_file() {
            return Err(IfsError::not_a_directory(&target));
        }
        self.provider.delete_path(&target)
    }

    /// Moves between streams are not supported
    pub fn move_entry(
        &self,
        _source: &IfsPath,
        _target_dir: &IfsDirectoryStream,
        _target: &IfsPath,
    ) -> IfsResult<()> {
        self.ensure_open()?;
        Err(IfsError::unsupported("atomic move not supported"))
    }

    pub fn read_attributes(&self, path: &IfsPath) -> IfsResult<Md5FileAttributes> {
        let target = self.resolve(path)?;
        self.provider.read_md5_attributes(&target)
    }

    /// Attributes of the stream's own directory
    pub fn directory_attributes(&self) -> IfsResult<Md5FileAttributes> {
        self.ensure_open()?;
        self.provider.md5_attributes_of(self.dir)
    }
}

impl Drop for IfsDirectoryStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Snapshot iterator; yields nothing once its stream is closed
pub struct DirectoryEntries {
    entries: std::vec::IntoIter<IfsPath>,
    closed: Arc<AtomicBool>,
}

impl Iterator for DirectoryEntries {
    type Item = IfsPath;

    fn next(&mut self) -> Option<IfsPath> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        self.entries.next()
    }
}
