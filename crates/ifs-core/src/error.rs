// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the Internal File System

use std::io;

/// Core IFS error type
///
/// Structural variants carry the path (or owner) they were raised for.
#[derive(thiserror::Error, Debug)]
pub enum IfsError {
    #[error("no such file: {0}")]
    NotFound(String),
    #[error("file already exists: {0}")]
    AlreadyExists(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("closed directory stream")]
    ClosedDirectoryStream,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

impl IfsError {
    pub(crate) fn not_found(path: impl ToString) -> Self {
        IfsError::NotFound(path.to_string())
    }

    pub(crate) fn already_exists(path: impl ToString) -> Self {
        IfsError::AlreadyExists(path.to_string())
    }

    pub(crate) fn not_a_directory(path: impl ToString) -> Self {
        IfsError::NotADirectory(path.to_string())
    }

    pub(crate) fn is_a_directory(path: impl ToString) -> Self {
        IfsError::IsADirectory(path.to_string())
    }

    pub(crate) fn directory_not_empty(path: impl ToString) -> Self {
        IfsError::DirectoryNotEmpty(path.to_string())
    }

    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        IfsError::Unsupported(what.into())
    }

    pub(crate) fn invalid(what: impl Into<String>) -> Self {
        IfsError::InvalidArgument(what.into())
    }
}

pub type IfsResult<T> = Result<T, IfsError>;
