// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Byte channel over a File node's local content
//!
//! I/O goes straight to the local file. When a channel that was opened for
//! writing is closed, the content checksum is recomputed in memory-mapped
//! windows and written back to the node together with size and mtime.

use std::fs::{File, OpenOptions as StdOpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use memmap2::{Mmap, MmapOptions};
use tracing::{debug, warn};

use crate::content_type;
use crate::error::{IfsError, IfsResult};
use crate::events::EventKind;
use crate::path::IfsPath;
use crate::provider::IfsProvider;
use crate::types::{system_time_millis, NodeId, OpenOption};

/// Reject options a File node's content target cannot honor
pub(crate) fn validate_options(options: &[OpenOption]) -> IfsResult<()> {
    let has = |o: OpenOption| options.contains(&o);
    if has(OpenOption::DeleteOnClose) {
        return Err(IfsError::unsupported("DELETE_ON_CLOSE on IFS content"));
    }
    if has(OpenOption::Append) && has(OpenOption::Read) {
        return Err(IfsError::invalid("READ and APPEND are mutually exclusive"));
    }
    if has(OpenOption::Append) && has(OpenOption::TruncateExisting) {
        return Err(IfsError::invalid("APPEND and TRUNCATE_EXISTING are mutually exclusive"));
    }
    Ok(())
}

fn std_options(options: &[OpenOption]) -> (StdOpenOptions, bool) {
    let has = |o: OpenOption| options.contains(&o);
    let append = has(OpenOption::Append);
    let writable = append || has(OpenOption::Write);
    let readable = has(OpenOption::Read) || !writable;

    let mut open = StdOpenOptions::new();
    open.read(readable);
    if append {
        open.append(true);
    } else if writable {
        open.write(true);
    }
    if writable && has(OpenOption::TruncateExisting) {
        open.truncate(true);
    }
    let mut flags = 0;
    if has(OpenOption::Sync) {
        flags |= libc::O_SYNC;
    }
    if has(OpenOption::Dsync) {
        flags |= libc::O_DSYNC;
    }
    open.custom_flags(flags);
    (open, writable)
}

/// MD5 (hex) and length of a local file, hashed through mmap windows
pub(crate) fn md5_of_file(path: &Path, window: usize) -> IfsResult<(String, u64)> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    let mut hasher = Md5::new();
    let mut offset = 0u64;
    while offset < len {
        let chunk = (len - offset).min(window as u64) as usize;
        // SAFETY: the writer has closed its handle; content files are private to their node
        let map = unsafe { MmapOptions::new().offset(offset).len(chunk).map(&file)? };
        hasher.update(&map[..]);
        offset += chunk as u64;
    }
    Ok((hex::encode(hasher.finalize()), len))
}

/// Open byte channel on one File node
pub struct IfsChannel {
    provider: IfsProvider,
    node: NodeId,
    path: IfsPath,
    local: PathBuf,
    file: Option<File>,
    writable: bool,
}

impl IfsChannel {
    pub(crate) fn open(
        provider: IfsProvider,
        node: NodeId,
        path: IfsPath,
        options: &[OpenOption],
    ) -> IfsResult<Self> {
        validate_options(options)?;
        let local = provider.local_path(node)?;
        let (open, writable) = std_options(options);
        let file = open.open(&local)?;
        debug!(path = %path, writable, "opened channel");
        Ok(Self {
            provider,
            node,
            path,
            local,
            file: Some(file),
            writable,
        })
    }

    pub fn path(&self) -> &IfsPath {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn file(&self) -> IfsResult<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| IfsError::IllegalState(format!("channel closed: {}", self.path)))
    }

    fn file_mut(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("channel is closed"))
    }

    fn require_writable(&self) -> IfsResult<()> {
        if !self.writable {
            return Err(IfsError::AccessDenied(format!("channel not open for writing: {}", self.path)));
        }
        Ok(())
    }

    pub fn position(&mut self) -> IfsResult<u64> {
        Ok(self.file_mut()?.stream_position()?)
    }

    pub fn set_position(&mut self, position: u64) -> IfsResult<()> {
        self.file_mut()?.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    pub fn size(&self) -> IfsResult<u64> {
        Ok(self.file()?.metadata()?.len())
    }

    /// Shrink to `size` if larger; the position is clamped to the new size
    pub fn truncate(&mut self, size: u64) -> IfsResult<()> {
        self.require_writable()?;
        if size < self.size()? {
            self.file()?.set_len(size)?;
        }
        if self.position()? > size {
            self.set_position(size)?;
        }
        Ok(())
    }

    /// Flush to the device; `metadata` also syncs file metadata
    pub fn force(&self, metadata: bool) -> IfsResult<()> {
        let file = self.file()?;
        if metadata {
            file.sync_all()?;
        } else {
            file.sync_data()?;
        }
        Ok(())
    }

    fn flock(&self, operation: libc::c_int) -> IfsResult<bool> {
        let fd = self.file()?.as_raw_fd();
        // SAFETY: fd is owned by the open File for the duration of the call
        let rc = unsafe { libc::flock(fd, operation) };
        if rc == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(false);
        }
        Err(err.into())
    }

    /// Block until an exclusive advisory lock is held
    pub fn lock_exclusive(&self) -> IfsResult<()> {
        self.flock(libc::LOCK_EX).map(|_| ())
    }

    pub fn lock_shared(&self) -> IfsResult<()> {
        self.flock(libc::LOCK_SH).map(|_| ())
    }

    /// Returns false when another holder has a conflicting lock
    pub fn try_lock(&self, exclusive: bool) -> IfsResult<bool> {
        let mode = if exclusive { libc::LOCK_EX } else { libc::LOCK_SH };
        self.flock(mode | libc::LOCK_NB)
    }

    pub fn unlock(&self) -> IfsResult<()> {
        self.flock(libc::LOCK_UN).map(|_| ())
    }

    /// Read-only map of `len` bytes at `offset`
    pub fn map(&self, offset: u64, len: usize) -> IfsResult<Mmap> {
        let file = self.file()?;
        if offset.saturating_add(len as u64) > file.metadata()?.len() {
            return Err(IfsError::invalid(format!(
                "map range {offset}+{len} exceeds the size of {}",
                self.path
            )));
        }
        // SAFETY: mapping is read-only; concurrent writers through other channels are the caller's concern
        let map = unsafe { MmapOptions::new().offset(offset).len(len).map(file)? };
        Ok(map)
    }

    /// Copy up to `count` bytes starting at `position` into `target`;
    /// the channel position is unchanged
    pub fn transfer_to<W: Write>(&self, position: u64, count: u64, target: &mut W) -> IfsResult<u64> {
        let file = self.file()?;
        let mut buf = vec![0u8; 64 * 1024];
        let mut done = 0u64;
        while done < count {
            let want = (count - done).min(buf.len() as u64) as usize;
            let n = file.read_at(&mut buf[..want], position + done)?;
            if n == 0 {
                break;
            }
            target.write_all(&buf[..n])?;
            done += n as u64;
        }
        Ok(done)
    }

    /// Write up to `count` bytes from `source` at `position`; nothing is
    /// transferred if `position` lies beyond the current size
    pub fn transfer_from<R: Read>(&self, source: &mut R, position: u64, count: u64) -> IfsResult<u64> {
        self.require_writable()?;
        let file = self.file()?;
        if position > file.metadata()?.len() {
            return Ok(0);
        }
        let mut buf = vec![0u8; 64 * 1024];
        let mut done = 0u64;
        while done < count {
            let want = (count - done).min(buf.len() as u64) as usize;
            let n = source.read(&mut buf[..want])?;
            if n == 0 {
                break;
            }
            file.write_all_at(&buf[..n], position + done)?;
            done += n as u64;
        }
        Ok(done)
    }

    /// Close the local file, then resync node metadata if it was writable
    pub fn close(mut self) -> IfsResult<()> {
        self.finish()
    }

    fn finish(&mut self) -> IfsResult<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        drop(file);
        if !self.writable {
            return Ok(());
        }
        let window = self.provider.config().checksum_window_bytes;
        let (md5, size) = md5_of_file(&self.local, window)?;
        let modified = system_time_millis(std::fs::metadata(&self.local)?.modified()?);
        let tree = self.provider.tree();
        tree.update_content(self.node, &md5, size, modified)?;
        match content_type::image_dimensions(&self.local) {
            Some((width, height)) => {
                tree.set_additional_data(self.node, "width", &width.to_string())?;
                tree.set_additional_data(self.node, "height", &height.to_string())?;
            }
            None => {
                tree.remove_additional_data(self.node, "width")?;
                tree.remove_additional_data(self.node, "height")?;
            }
        }
        debug!(path = %self.path, md5 = %md5, size, "synchronized content metadata");
        self.provider.emit(EventKind::Updated {
            path: self.path.to_string(),
        });
        Ok(())
    }
}

impl Read for IfsChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file_mut()?.read(buf)
    }
}

impl Write for IfsChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "channel not open for writing"));
        }
        self.file_mut()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file_mut()?.flush()
    }
}

impl Seek for IfsChannel {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file_mut()?.seek(pos)
    }
}

impl Drop for IfsChannel {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!(path = %self.path, error = %e, "metadata resync on drop failed");
        }
    }
}

impl std::fmt::Debug for IfsChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IfsChannel")
            .field("path", &self.path)
            .field("node", &self.node)
            .field("writable", &self.writable)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EMPTY_MD5;

    #[test]
    fn test_validate_options() {
        validate_options(&[OpenOption::Write, OpenOption::Sparse, OpenOption::Sync]).unwrap();
        assert!(matches!(
            validate_options(&[OpenOption::DeleteOnClose]),
            Err(IfsError::Unsupported(_))
        ));
        assert!(matches!(
            validate_options(&[OpenOption::Read, OpenOption::Append]),
            Err(IfsError::InvalidArgument(_))
        ));
        assert!(validate_options(&[OpenOption::Append, OpenOption::TruncateExisting]).is_err());
    }

    #[test]
    fn test_md5_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();
        let (md5, len) = md5_of_file(&path, 64 * 1024).unwrap();
        assert_eq!(md5, EMPTY_MD5);
        assert_eq!(len, 0);
    }

    #[test]
    fn test_md5_spans_windows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        let (windowed, len) = md5_of_file(&path, 64 * 1024).unwrap();
        let (single, _) = md5_of_file(&path, 1024 * 1024).unwrap();
        assert_eq!(len, data.len() as u64);
        assert_eq!(windowed, single);
        assert_eq!(windowed, hex::encode(Md5::digest(&data)));
    }

    #[test]
    fn test_md5_hello() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello");
        std::fs::write(&path, b"hello").unwrap();
        let (md5, _) = md5_of_file(&path, 64 * 1024).unwrap();
        assert_eq!(md5, "5d41402abc4b2a76b9719d911017c592");
    }
}
