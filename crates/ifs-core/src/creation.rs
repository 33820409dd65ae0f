// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Node resolution with create-if-absent and rollback of partial creation
//!
//! Every node created inside [`transactional`] is recorded. If the body
//! fails, the recorded nodes are deleted newest first before the original
//! error is returned. Rollback failures are logged and swallowed.

use scopeguard::ScopeGuard;
use tracing::{debug, warn};

use crate::error::{IfsError, IfsResult};
use crate::node::Lookup;
use crate::path::IfsPath;
use crate::provider::IfsProvider;
use crate::types::NodeId;

/// Nodes created so far in the current transaction, oldest first
#[derive(Default)]
pub(crate) struct CreatedNodes {
    ids: Vec<NodeId>,
}

impl CreatedNodes {
    pub(crate) fn push(&mut self, id: NodeId) {
        self.ids.push(id);
    }
}

/// Run `body`; on error roll back every node it recorded
pub(crate) fn transactional<T, F>(provider: &IfsProvider, body: F) -> IfsResult<T>
where
    F: FnOnce(&mut CreatedNodes) -> IfsResult<T>,
{
    let mut created = scopeguard::guard(CreatedNodes::default(), |created| {
        rollback(provider, created)
    });
    let value = body(&mut *created)?;
    let created = ScopeGuard::into_inner(created);
    if !created.ids.is_empty() {
        debug!(count = created.ids.len(), "committed created nodes");
    }
    Ok(value)
}

fn rollback(provider: &IfsProvider, created: CreatedNodes) {
    for id in created.ids.into_iter().rev() {
        match provider.delete_node(id) {
            Ok(()) => debug!(node = %id, "rolled back created node"),
            Err(e) => warn!(node = %id, error = %e, "rollback of created node failed"),
        }
    }
}

/// Resolve the File at `path`, creating it (and its parent chain and owner
/// root) when a creation flag is set
pub(crate) fn get_file(
    provider: &IfsProvider,
    path: &IfsPath,
    create: bool,
    create_new: bool,
) -> IfsResult<NodeId> {
    transactional(provider, |created| {
        get_file_in(provider, created, path, create, create_new)
    })
}

/// Like [`get_file`] but records into an enclosing transaction
pub(crate) fn get_file_in(
    provider: &IfsProvider,
    created: &mut CreatedNodes,
    path: &IfsPath,
    create: bool,
    create_new: bool,
) -> IfsResult<NodeId> {
    let tree = provider.tree();
    let owner = path
        .owner()
        .ok_or_else(|| IfsError::invalid(format!("path is not absolute: {path}")))?;
    let Some(name) = path.file_name() else {
        return Err(IfsError::is_a_directory(path));
    };

    // Everything that can fail without creating anything is checked first
    match tree.lookup(path)? {
        Lookup::Found(id) => {
            if create_new {
                return Err(IfsError::already_exists(path));
            }
            if tree.get(id)?.is_directory() {
                return Err(IfsError::is_a_directory(path));
            }
            return Ok(id);
        }
        Lookup::NotADirectory { at } => {
            let prefix = IfsPath::absolute(owner, path.segments()[..=at].iter().cloned())?;
            return Err(IfsError::not_a_directory(prefix));
        }
        Lookup::Missing { .. } | Lookup::NoRoot if !(create || create_new) => {
            return Err(IfsError::not_found(path));
        }
        Lookup::Missing { .. } | Lookup::NoRoot => {}
    }

    let parent_path = path
        .parent()
        .ok_or_else(|| IfsError::is_a_directory(path))?;
    let parent = ensure_directories(provider, created, &parent_path)?;
    if let Some(existing) = tree.child(parent, name)? {
        // Lost a race with a concurrent creator
        if create_new || tree.get(existing)?.is_directory() {
            return Err(IfsError::already_exists(path));
        }
        return Ok(existing);
    }
    let id = provider.create_file_node(parent, name)?;
    created.push(id);
    Ok(id)
}

/// Walk `dir_path`, creating the owner root and any missing directories
pub(crate) fn ensure_directories(
    provider: &IfsProvider,
    created: &mut CreatedNodes,
    dir_path: &IfsPath,
) -> IfsResult<NodeId> {
    let tree = provider.tree();
    let owner = dir_path
        .owner()
        .ok_or_else(|| IfsError::invalid(format!("path is not absolute: {dir_path}")))?;
    let mut current = match tree.root_of(owner) {
        Some(root) => root,
        None => {
            let root = provider.create_root_node(owner)?;
            created.push(root);
            root
        }
    };
    for (i, segment) in dir_path.segments().iter().enumerate() {
        current = match tree.child(current, segment)? {
            Some(child) if tree.get(child)?.is_directory() => child,
            Some(_) => {
                let prefix = IfsPath::absolute(owner, dir_path.segments()[..=i].iter().cloned())?;
                return Err(IfsError::not_a_directory(prefix));
            }
            None => {
                let child = provider.create_directory_node(current, segment)?;
                created.push(child);
                child
            }
        };
    }
    Ok(current)
}
