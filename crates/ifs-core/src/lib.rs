// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Internal File System
//!
//! A virtual filesystem whose directory tree is a metadata node tree rooted
//! per owner, and whose file bytes live in named content stores. The
//! [`IfsProvider`] resolves [`IfsPath`]s to nodes and implements channels,
//! directory streams, copy/move/delete and the `basic`/`md5` attribute views.

pub mod attrs;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod content_type;
mod creation;
pub mod dir_stream;
pub mod error;
pub mod events;
pub mod file_store;
pub mod node;
pub mod path;
pub mod provider;
pub mod store;
pub mod testing;
pub mod types;


pub use attrs::{AttrValue, AttributeView, BasicFileAttributes, Md5FileAttributes};
pub use catalog::Catalog;
pub use channel::IfsChannel;
pub use config::{IfsConfig, StoreConfig};
pub use dir_stream::{DirectoryEntries, IfsDirectoryStream};
pub use error::{IfsError, IfsResult};
pub use events::{EventKind, EventSink, RecordingSink, SubscriptionId};
pub use file_store::{FileStoreCache, IfsFileStore};
pub use node::{FileContent, Node, NodeKind, NodeTree};
pub use path::IfsPath;
pub use provider::{IfsProvider, VirtualFileSystem};
pub use store::{ContentStore, LocalContentStore, StoreRegistry};
pub use types::{AccessMode, ContentLocation, CopyOption, FileAttribute, FileTimes, NodeId, OpenOption, EMPTY_MD5};
