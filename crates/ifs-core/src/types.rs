// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for the Internal File System

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable node identifier; doubles as the attribute `fileKey`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Node timestamps in milliseconds since the Unix epoch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTimes {
    pub created: i64,
    pub modified: i64,
    pub accessed: i64,
}

impl FileTimes {
    pub fn now() -> Self {
        let now = now_millis();
        Self {
            created: now,
            modified: now,
            accessed: now,
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    system_time_millis(SystemTime::now())
}

pub(crate) fn system_time_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Options accepted when opening a byte channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpenOption {
    Read,
    Write,
    Append,
    TruncateExisting,
    Create,
    CreateNew,
    DeleteOnClose,
    Sparse,
    Sync,
    Dsync,
}

impl OpenOption {
    pub fn is_creation(&self) -> bool {
        matches!(self, OpenOption::Create | OpenOption::CreateNew)
    }
}

/// Options accepted by copy and move
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CopyOption {
    ReplaceExisting,
    CopyAttributes,
    AtomicMove,
    NoFollowLinks,
}

/// Access modes checked by `check_access`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
    Execute,
}

/// Attribute requested to be set atomically when a file is created
#[derive(Clone, Debug, PartialEq)]
pub struct FileAttribute {
    pub name: String,
    pub value: String,
}

/// Physical location of a file's bytes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentLocation {
    pub store_id: String,
    pub key: String,
}

/// MD5 of zero bytes, the checksum of every freshly created file
pub const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";
