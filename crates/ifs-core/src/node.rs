// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Owner-rooted node tree
//!
//! Nodes live in one table keyed by `NodeId`. Children are referenced by ID
//! and parents by an optional ID, so the tree has no owning cycles. Every
//! public method takes the table lock for the duration of a single change;
//! there is no cross-call locking.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::error::{IfsError, IfsResult};
use crate::path::IfsPath;
use crate::types::{ContentLocation, FileTimes, NodeId, EMPTY_MD5};

/// File-specific node state
#[derive(Clone, Debug, PartialEq)]
pub struct FileContent {
    pub size: u64,
    pub content_type: String,
    pub md5: String,
    pub location: ContentLocation,
    /// Extracted metadata cached next to the file (e.g. image dimensions)
    pub additional_data: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    File(FileContent),
    Directory { children: BTreeMap<String, NodeId> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub owner: String,
    pub parent: Option<NodeId>,
    pub times: FileTimes,
    pub kind: NodeKind,
}

impl Node {
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File(_))
    }

    pub fn file(&self) -> Option<&FileContent> {
        match &self.kind {
            NodeKind::File(content) => Some(content),
            NodeKind::Directory { .. } => None,
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<String, NodeId>> {
        match &self.kind {
            NodeKind::Directory { children } => Some(children),
            NodeKind::File(_) => None,
        }
    }

    pub fn has_children(&self) -> bool {
        self.children().map(|c| !c.is_empty()).unwrap_or(false)
    }
}

/// Outcome of walking a path without creating anything
#[derive(Clone, Debug, PartialEq)]
pub enum Lookup {
    Found(NodeId),
    /// The walk stopped at a missing segment; the deepest existing
    /// directory and the index of the first missing segment are returned
    Missing { deepest: NodeId, missing_at: usize },
    /// A non-final segment resolved to a File
    NotADirectory { at: usize },
    /// The owner has no root directory
    NoRoot,
}

struct TreeState {
    nodes: HashMap<NodeId, Node>,
    roots: HashMap<String, NodeId>,
    next_id: u64,
}

impl TreeState {
    fn allocate_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn get(&self, id: NodeId) -> IfsResult<&Node> {
        self.nodes.get(&id).ok_or_else(|| IfsError::not_found(format!("node {id}")))
    }

    fn path_of(&self, id: NodeId) -> IfsResult<IfsPath> {
        let mut names = Vec::new();
        let mut current = self.get(id)?;
        while let Some(parent) = current.parent {
            names.push(current.name.clone());
            current = self.get(parent)?;
        }
        names.reverse();
        IfsPath::absolute(&current.owner, names)
    }

    fn link_child(&mut self, parent: NodeId, node: Node) -> IfsResult<NodeId> {
        let id = node.id;
        let name = node.name.clone();
        let parent_path = self.path_of(parent)?;
        let parent_node = self
            .nodes
            .get_mut(&parent)
            .ok_or_else(|| IfsError::not_found(format!("node {parent}")))?;
        match &mut parent_node.kind {
            NodeKind::Directory { children } => {
                if children.contains_key(&name) {
                    return Err(IfsError::already_exists(parent_path.join(&name)?));
                }
                children.insert(name, id);
                parent_node.times.modified = crate::types::now_millis();
            }
            NodeKind::File(_) => return Err(IfsError::not_a_directory(parent_path)),
        }
        self.nodes.insert(id, node);
        Ok(id)
    }
}

/// Hierarchical metadata store for every owner's tree
pub struct NodeTree {
    state: Mutex<TreeState>,
}

impl NodeTree {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TreeState {
                nodes: HashMap::new(),
                roots: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Rebuild a tree from persisted nodes; parents must be listed in the set
    pub(crate) fn from_nodes(nodes: Vec<Node>) -> IfsResult<Self> {
        let mut state = TreeState {
            nodes: HashMap::with_capacity(nodes.len()),
            roots: HashMap::new(),
            next_id: 1,
        };
        for node in nodes {
            state.next_id = state.next_id.max(node.id.0 + 1);
            if node.parent.is_none() {
                if state.roots.insert(node.owner.clone(), node.id).is_some() {
                    return Err(IfsError::invalid(format!(
                        "owner {} has more than one root",
                        node.owner
                    )));
                }
            }
            state.nodes.insert(node.id, node);
        }
        // Children maps are derived from parent links
        let links: Vec<(NodeId, String, NodeId)> = state
            .nodes
            .values()
            .filter_map(|n| n.parent.map(|p| (p, n.name.clone(), n.id)))
            .collect();
        for (parent, name, child) in links {
            match state.nodes.get_mut(&parent).map(|n| &mut n.kind) {
                Some(NodeKind::Directory { children }) => {
                    children.insert(name, child);
                }
                Some(NodeKind::File(_)) => {
                    return Err(IfsError::invalid(format!("node {child} has a file as parent")));
                }
                None => {
                    return Err(IfsError::invalid(format!("node {child} has a missing parent")));
                }
            }
        }
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Snapshot of every node, parents before children
    pub(crate) fn all_nodes(&self) -> Vec<Node> {
        let state = self.state.lock().unwrap();
        let mut out = Vec::with_capacity(state.nodes.len());
        let mut roots: Vec<NodeId> = state.roots.values().copied().collect();
        roots.sort();
        let mut stack = roots;
        while let Some(id) = stack.pop() {
            if let Some(node) = state.nodes.get(&id) {
                if let Some(children) = node.children() {
                    stack.extend(children.values().rev().copied());
                }
                out.push(node.clone());
            }
        }
        out
    }

    pub fn root_of(&self, owner: &str) -> Option<NodeId> {
        self.state.lock().unwrap().roots.get(owner).copied()
    }

    pub fn list_roots(&self) -> Vec<String> {
        let mut owners: Vec<String> = self.state.lock().unwrap().roots.keys().cloned().collect();
        owners.sort();
        owners
    }

    pub fn create_root(&self, owner: &str) -> IfsResult<NodeId> {
        let root_path = IfsPath::root(owner)?;
        let mut state = self.state.lock().unwrap();
        if state.roots.contains_key(owner) {
            return Err(IfsError::already_exists(root_path));
        }
        let id = state.allocate_id();
        state.nodes.insert(
            id,
            Node {
                id,
                name: String::new(),
                owner: owner.to_string(),
                parent: None,
                times: FileTimes::now(),
                kind: NodeKind::Directory {
                    children: BTreeMap::new(),
                },
            },
        );
        state.roots.insert(owner.to_string(), id);
        Ok(id)
    }

    pub fn remove_root(&self, owner: &str) -> IfsResult<()> {
        let root_path = IfsPath::root(owner)?;
        let mut state = self.state.lock().unwrap();
        let id = *state.roots.get(owner).ok_or_else(|| IfsError::not_found(&root_path))?;
        if state.get(id)?.has_children() {
            return Err(IfsError::directory_not_empty(root_path));
        }
        state.roots.remove(owner);
        state.nodes.remove(&id);
        Ok(())
    }

    pub fn get(&self, id: NodeId) -> IfsResult<Node> {
        self.state.lock().unwrap().get(id).cloned()
    }

    pub fn path_of(&self, id: NodeId) -> IfsResult<IfsPath> {
        self.state.lock().unwrap().path_of(id)
    }

    pub fn child(&self, dir: NodeId, name: &str) -> IfsResult<Option<NodeId>> {
        let state = self.state.lock().unwrap();
        let node = state.get(dir)?;
        match &node.kind {
            NodeKind::Directory { children } => Ok(children.get(name).copied()),
            NodeKind::File(_) => Err(IfsError::not_a_directory(state.path_of(dir)?)),
        }
    }

    /// Child names and IDs in name order
    pub fn children(&self, dir: NodeId) -> IfsResult<Vec<(String, NodeId)>> {
        let state = self.state.lock().unwrap();
        let node = state.get(dir)?;
        match &node.kind {
            NodeKind::Directory { children } => {
                Ok(children.iter().map(|(name, id)| (name.clone(), *id)).collect())
            }
            NodeKind::File(_) => Err(IfsError::not_a_directory(state.path_of(dir)?)),
        }
    }

    /// Walk an absolute path without creating anything
    pub fn lookup(&self, path: &IfsPath) -> IfsResult<Lookup> {
        let owner = path
            .owner()
            .ok_or_else(|| IfsError::invalid(format!("path is not absolute: {path}")))?;
        let state = self.state.lock().unwrap();
        let Some(mut current) = state.roots.get(owner).copied() else {
            return Ok(Lookup::NoRoot);
        };
        for (i, segment) in path.segments().iter().enumerate() {
            match &state.get(current)?.kind {
                NodeKind::Directory { children } => match children.get(segment) {
                    Some(child) => current = *child,
                    None => {
                        return Ok(Lookup::Missing {
                            deepest: current,
                            missing_at: i,
                        })
                    }
                },
                NodeKind::File(_) => return Ok(Lookup::NotADirectory { at: i - 1 }),
            }
        }
        Ok(Lookup::Found(current))
    }

    /// Resolve an absolute path to an existing node
    pub fn resolve(&self, path: &IfsPath) -> IfsResult<NodeId> {
        match self.lookup(path)? {
            Lookup::Found(id) => Ok(id),
            Lookup::NotADirectory { at } => {
                let prefix = IfsPath::absolute(
                    path.owner().unwrap_or_default(),
                    path.segments()[..=at].iter().cloned(),
                )?;
                Err(IfsError::not_a_directory(prefix))
            }
            Lookup::Missing { .. } | Lookup::NoRoot => Err(IfsError::not_found(path)),
        }
    }

    pub fn add_directory(&self, parent: NodeId, name: &str) -> IfsResult<NodeId> {
        let mut state = self.state.lock().unwrap();
        let owner = state.get(parent)?.owner.clone();
        let id = state.allocate_id();
        state.link_child(
            parent,
            Node {
                id,
                name: name.to_string(),
                owner,
                parent: Some(parent),
                times: FileTimes::now(),
                kind: NodeKind::Directory {
                    children: BTreeMap::new(),
                },
            },
        )
    }

    /// Reserve an ID for a file whose content must exist before it is linked
    pub fn allocate_id(&self) -> NodeId {
        self.state.lock().unwrap().allocate_id()
    }

    pub fn add_file(
        &self,
        id: NodeId,
        parent: NodeId,
        name: &str,
        location: ContentLocation,
        content_type: &str,
    ) -> IfsResult<NodeId> {
        let mut state = self.state.lock().unwrap();
        let owner = state.get(parent)?.owner.clone();
        state.link_child(
            parent,
            Node {
                id,
                name: name.to_string(),
                owner,
                parent: Some(parent),
                times: FileTimes::now(),
                kind: NodeKind::File(FileContent {
                    size: 0,
                    content_type: content_type.to_string(),
                    md5: EMPTY_MD5.to_string(),
                    location,
                    additional_data: BTreeMap::new(),
                }),
            },
        )
    }

    /// Remove a leaf node; directories with children are refused
    pub fn remove(&self, id: NodeId) -> IfsResult<Node> {
        let mut state = self.state.lock().unwrap();
        let node = state.get(id)?.clone();
        if node.has_children() {
            return Err(IfsError::directory_not_empty(state.path_of(id)?));
        }
        match node.parent {
            Some(parent) => {
                if let Some(parent_node) = state.nodes.get_mut(&parent) {
                    if let NodeKind::Directory { children } = &mut parent_node.kind {
                        children.remove(&node.name);
                        parent_node.times.modified = crate::types::now_millis();
                    }
                }
            }
            None => {
                state.roots.remove(&node.owner);
            }
        }
        state.nodes.remove(&id);
        Ok(node)
    }

    /// Write back checksum, size and modification time after a write session
    pub fn update_content(&self, id: NodeId, md5: &str, size: u64, modified: i64) -> IfsResult<()> {
        self.with_file_mut(id, |node, content| {
            content.md5 = md5.to_string();
            content.size = size;
            node.modified = modified;
            node.accessed = modified;
        })
    }

    pub fn set_md5(&self, id: NodeId, md5: &str) -> IfsResult<()> {
        self.with_file_mut(id, |_, content| content.md5 = md5.to_string())
    }

    pub fn set_content_type(&self, id: NodeId, content_type: &str) -> IfsResult<()> {
        self.with_file_mut(id, |_, content| content.content_type = content_type.to_string())
    }

    pub fn set_additional_data(&self, id: NodeId, key: &str, value: &str) -> IfsResult<()> {
        self.with_file_mut(id, |_, content| {
            content.additional_data.insert(key.to_string(), value.to_string());
        })
    }

    pub fn remove_additional_data(&self, id: NodeId, key: &str) -> IfsResult<()> {
        self.with_file_mut(id, |_, content| {
            content.additional_data.remove(key);
        })
    }

    pub fn set_times(
        &self,
        id: NodeId,
        modified: Option<i64>,
        accessed: Option<i64>,
        created: Option<i64>,
    ) -> IfsResult<()> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(&id)
            .ok_or_else(|| IfsError::not_found(format!("node {id}")))?;
        if let Some(t) = modified {
            node.times.modified = t;
        }
        if let Some(t) = accessed {
            node.times.accessed = t;
        }
        if let Some(t) = created {
            node.times.created = t;
        }
        Ok(())
    }

    /// Size as reported to attribute readers; directories sum their files
    pub fn total_size(&self, id: NodeId) -> IfsResult<u64> {
        let state = self.state.lock().unwrap();
        let mut total = 0u64;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            match &state.get(current)?.kind {
                NodeKind::File(content) => total += content.size,
                NodeKind::Directory { children } => stack.extend(children.values().copied()),
            }
        }
        Ok(total)
    }

    fn with_file_mut<F>(&self, id: NodeId, f: F) -> IfsResult<()>
    where
        F: FnOnce(&mut FileTimes, &mut FileContent),
    {
        let mut state = self.state.lock().unwrap();
        let path = state.path_of(id)?;
        let node = state
            .nodes
            .get_mut(&id)
            .ok_or_else(|| IfsError::not_found(format!("node {id}")))?;
        match &mut node.kind {
            NodeKind::File(content) => {
                f(&mut node.times, content);
                Ok(())
            }
            NodeKind::Directory { .. } => Err(IfsError::is_a_directory(path)),
        }
    }
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}
