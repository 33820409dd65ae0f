// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Filesystem provider: path resolution and every tree-level operation
//!
//! The provider is a cheap handle (`Arc` inside) so channels and directory
//! streams keep their own clone. Mutations take no lock spanning more than one
//! tree call; concurrent creators of the same path race and the loser sees
//! `AlreadyExists` from the tree.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions as StdOpenOptions};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use md5::{Digest, Md5};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::attrs::{parse_attribute_spec, AttrValue, BasicFileAttributes, Md5FileAttributes, SettableAttribute};
use crate::catalog::Catalog;
use crate::channel::{self, IfsChannel};
use crate::config::IfsConfig;
use crate::content_type;
use crate::creation::{self, transactional};
use crate::dir_stream::IfsDirectoryStream;
use crate::error::{IfsError, IfsResult};
use crate::events::{EventBus, EventKind};
#[cfg(feature = "events")]
use crate::events::{EventSink, SubscriptionId};
use crate::file_store::{FileStoreCache, IfsFileStore};
use crate::node::{Lookup, Node, NodeKind, NodeTree};
use crate::path::IfsPath;
use crate::store::{ContentStore, LocalContentStore, StoreRegistry};
use crate::types::{
    now_millis, AccessMode, ContentLocation, CopyOption, FileAttribute, NodeId, OpenOption,
};

const COPY_BUFFER: usize = 64 * 1024;

static GLOBAL: OnceCell<IfsProvider> = OnceCell::new();

/// Operations of a virtual filesystem over IFS paths
pub trait VirtualFileSystem {
    fn open(&self, path: &IfsPath, options: &[OpenOption], attrs: &[FileAttribute]) -> IfsResult<IfsChannel>;
    fn list(&self, path: &IfsPath) -> IfsResult<IfsDirectoryStream>;
    fn create_dir(&self, path: &IfsPath) -> IfsResult<()>;
    fn delete(&self, path: &IfsPath) -> IfsResult<()>;
    fn copy(&self, source: &IfsPath, target: &IfsPath, options: &[CopyOption]) -> IfsResult<()>;
    fn move_entry(&self, source: &IfsPath, target: &IfsPath, options: &[CopyOption]) -> IfsResult<()>;
    fn read_attrs(&self, path: &IfsPath) -> IfsResult<Md5FileAttributes>;
    fn write_attr(&self, path: &IfsPath, attribute: &str, value: AttrValue) -> IfsResult<()>;
}

struct ProviderInner {
    config: IfsConfig,
    tree: NodeTree,
    stores: StoreRegistry,
    file_stores: FileStoreCache,
    events: EventBus,
    catalog: Option<Mutex<Catalog>>,
}

#[derive(Clone)]
pub struct IfsProvider {
    inner: Arc<ProviderInner>,
}

impl IfsProvider {
    /// Build a provider with one local content store per configured store
    pub fn new(config: IfsConfig) -> IfsResult<Self> {
        config.validate()?;
        let mut stores = StoreRegistry::new(config.default_store.clone());
        for store in &config.stores {
            stores.register(Arc::new(LocalContentStore::new(store.id.clone(), store.base_dir.clone())))?;
        }
        Self::with_stores(config, stores)
    }

    /// Build a provider over caller-supplied content stores
    pub fn with_stores(config: IfsConfig, stores: StoreRegistry) -> IfsResult<Self> {
        stores.check()?;
        let (tree, catalog) = match &config.catalog {
            Some(path) => {
                let catalog = Catalog::open(path)?;
                let tree = catalog.load()?;
                info!(catalog = %path.display(), roots = tree.list_roots().len(), "loaded node catalog");
                (tree, Some(Mutex::new(catalog)))
            }
            None => (NodeTree::new(), None),
        };
        let file_stores = FileStoreCache::new(config.file_store_cache_capacity);
        Ok(Self {
            inner: Arc::new(ProviderInner {
                config,
                tree,
                stores,
                file_stores,
                events: EventBus::default(),
                catalog,
            }),
        })
    }

    /// Install the process-wide provider; later calls return the first one
    pub fn install(config: IfsConfig) -> IfsResult<&'static IfsProvider> {
        GLOBAL.get_or_try_init(|| {
            info!("installing process-wide IFS provider");
            IfsProvider::new(config)
        })
    }

    pub fn global() -> Option<&'static IfsProvider> {
        GLOBAL.get()
    }

    /// Write the node tree to the catalog; a no-op without one
    pub fn persist(&self) -> IfsResult<()> {
        if let Some(catalog) = &self.inner.catalog {
            let mut catalog = catalog.lock().unwrap();
            catalog.save(&self.inner.tree)?;
            debug!("persisted node catalog");
        }
        Ok(())
    }

    pub fn config(&self) -> &IfsConfig {
        &self.inner.config
    }

    pub(crate) fn tree(&self) -> &NodeTree {
        &self.inner.tree
    }

    pub fn stores(&self) -> &StoreRegistry {
        &self.inner.stores
    }

    pub(crate) fn emit(&self, event: EventKind) {
        self.inner.events.emit(event);
    }

    #[cfg(feature = "events")]
    pub fn subscribe_events(&self, sink: Arc<dyn EventSink>) -> IfsResult<SubscriptionId> {
        Ok(self.inner.events.subscribe(sink))
    }

    #[cfg(feature = "events")]
    pub fn unsubscribe_events(&self, sub: SubscriptionId) -> IfsResult<()> {
        self.inner.events.unsubscribe(sub)
    }

    /// Parse an `ifs:///owner:/path` URI
    pub fn resolve_uri(&self, uri: &str) -> IfsResult<IfsPath> {
        IfsPath::from_uri(uri)
    }

    /// Mutating operations only accept absolute paths of this filesystem
    pub fn check_absolute(&self, path: &IfsPath) -> IfsResult<()> {
        if !path.is_absolute() {
            return Err(IfsError::invalid(format!("path is not absolute: {path}")));
        }
        Ok(())
    }

    fn absolute(&self, path: &IfsPath) -> IfsResult<IfsPath> {
        self.check_absolute(path)?;
        path.normalize()
    }

    fn node_at(&self, path: &IfsPath) -> IfsResult<NodeId> {
        let path = self.absolute(path)?;
        self.inner.tree.resolve(&path)
    }

    // Node lifecycle shared by the creation helper and the tree operations

    pub(crate) fn create_root_node(&self, owner: &str) -> IfsResult<NodeId> {
        let id = self.inner.tree.create_root(owner)?;
        info!(owner = %owner, "created owner root");
        self.emit_created(id);
        Ok(id)
    }

    pub(crate) fn create_directory_node(&self, parent: NodeId, name: &str) -> IfsResult<NodeId> {
        let id = self.inner.tree.add_directory(parent, name)?;
        self.emit_created(id);
        Ok(id)
    }

    /// Create the content container first, then link the node
    pub(crate) fn create_file_node(&self, parent: NodeId, name: &str) -> IfsResult<NodeId> {
        let tree = &self.inner.tree;
        let owner = tree.get(parent)?.owner;
        let store = self.inner.stores.default_store()?;
        let id = tree.allocate_id();
        let key = store.create_content(&owner, id)?;
        let location = ContentLocation {
            store_id: store.id(),
            key: key.clone(),
        };
        if let Err(e) = tree.add_file(id, parent, name, location, &self.inner.config.default_content_type) {
            if let Err(cleanup) = store.delete_content(&key) {
                warn!(key = %key, error = %cleanup, "failed to remove orphaned content");
            }
            return Err(e);
        }
        self.emit_created(id);
        Ok(id)
    }

    /// Remove a leaf node; file content is deleted before the node
    pub(crate) fn delete_node(&self, id: NodeId) -> IfsResult<()> {
        let tree = &self.inner.tree;
        let node = tree.get(id)?;
        if node.has_children() {
            return Err(IfsError::directory_not_empty(tree.path_of(id)?));
        }
        let path = tree.path_of(id)?;
        if let NodeKind::File(content) = &node.kind {
            let store = self.inner.stores.get(&content.location.store_id)?;
            store.delete_content(&content.location.key)?;
        }
        tree.remove(id)?;
        debug!(path = %path, "deleted node");
        self.emit(EventKind::Deleted {
            path: path.to_string(),
        });
        Ok(())
    }

    fn emit_created(&self, id: NodeId) {
        if let Ok(path) = self.inner.tree.path_of(id) {
            self.emit(EventKind::Created {
                path: path.to_string(),
            });
        }
    }

    fn emit_updated(&self, id: NodeId) {
        if let Ok(path) = self.inner.tree.path_of(id) {
            self.emit(EventKind::Updated {
                path: path.to_string(),
            });
        }
    }

    pub(crate) fn store_for(&self, location: &ContentLocation) -> IfsResult<Arc<dyn ContentStore>> {
        self.inner.stores.get(&location.store_id)
    }

    pub(crate) fn local_path(&self, id: NodeId) -> IfsResult<PathBuf> {
        let node = self.inner.tree.get(id)?;
        let Some(content) = node.file() else {
            return Err(IfsError::is_a_directory(self.inner.tree.path_of(id)?));
        };
        Ok(self.store_for(&content.location)?.local_path(&content.location.key))
    }

    // Owner roots

    pub fn create_root(&self, owner: &str) -> IfsResult<()> {
        self.create_root_node(owner).map(|_| ())
    }

    pub fn remove_root(&self, owner: &str) -> IfsResult<()> {
        self.inner.tree.remove_root(owner)?;
        info!(owner = %owner, "removed owner root");
        self.emit(EventKind::Deleted {
            path: IfsPath::root(owner)?.to_string(),
        });
        Ok(())
    }

    pub fn list_roots(&self) -> Vec<String> {
        self.inner.tree.list_roots()
    }

    // Channels and streams

    pub fn new_byte_channel(
        &self,
        path: &IfsPath,
        options: &[OpenOption],
        attrs: &[FileAttribute],
    ) -> IfsResult<IfsChannel> {
        let path = self.absolute(path)?;
        if !attrs.is_empty() {
            return Err(IfsError::unsupported("setting file attributes atomically on open"));
        }
        let (creation, rest): (Vec<OpenOption>, Vec<OpenOption>) =
            options.iter().copied().partition(OpenOption::is_creation);
        let create = creation.contains(&OpenOption::Create);
        let create_new = creation.contains(&OpenOption::CreateNew);
        if create || create_new {
            // Fail before the tree is touched
            channel::validate_options(&rest)?;
        }
        let id = creation::get_file(self, &path, create, create_new)?;
        IfsChannel::open(self.clone(), id, path, &rest)
    }

    pub fn new_directory_stream(&self, path: &IfsPath) -> IfsResult<IfsDirectoryStream> {
        let path = self.absolute(path)?;
        let id = self.inner.tree.resolve(&path)?;
        if !self.inner.tree.get(id)?.is_directory() {
            return Err(IfsError::not_a_directory(&path));
        }
        Ok(IfsDirectoryStream::new(self.clone(), path, id))
    }

    // Structural operations

    pub fn create_directory(&self, path: &IfsPath) -> IfsResult<()> {
        let path = self.absolute(path)?;
        let tree = &self.inner.tree;
        let Some(name) = path.file_name() else {
            let owner = path.owner().unwrap_or_default();
            if tree.root_of(owner).is_some() {
                return Err(IfsError::already_exists(&path));
            }
            return self.create_root(owner);
        };
        let parent_path = path.parent().ok_or_else(|| IfsError::not_found(&path))?;
        let parent = tree.resolve(&parent_path)?;
        if !tree.get(parent)?.is_directory() {
            return Err(IfsError::not_a_directory(&parent_path));
        }
        if tree.child(parent, name)?.is_some() {
            return Err(IfsError::already_exists(&path));
        }
        self.create_directory_node(parent, name)?;
        Ok(())
    }

    pub fn delete_path(&self, path: &IfsPath) -> IfsResult<()> {
        let path = self.absolute(path)?;
        let tree = &self.inner.tree;
        let Some(name) = path.file_name() else {
            return self.remove_root(path.owner().unwrap_or_default());
        };
        let parent_path = path.parent().ok_or_else(|| IfsError::not_found(&path))?;
        let parent = tree.resolve(&parent_path)?;
        let id = tree.child(parent, name)?.ok_or_else(|| IfsError::not_found(&path))?;
        if tree.get(id)?.has_children() {
            return Err(IfsError::directory_not_empty(&path));
        }
        self.delete_node(id)
    }

    pub fn copy_path(&self, source: &IfsPath, target: &IfsPath, options: &[CopyOption]) -> IfsResult<()> {
        let source = self.absolute(source)?;
        let target = self.absolute(target)?;
        for option in options {
            if !matches!(option, CopyOption::CopyAttributes | CopyOption::ReplaceExisting) {
                return Err(IfsError::unsupported(format!("copy option {option:?}")));
            }
        }
        if self.is_same_file(&source, &target)? {
            return Ok(());
        }
        let replace = options.contains(&CopyOption::ReplaceExisting);
        let copy_attributes = options.contains(&CopyOption::CopyAttributes);
        let src_id = self.inner.tree.resolve(&source)?;
        if self.inner.tree.get(src_id)?.is_directory() {
            self.copy_directory(src_id, &target, replace, copy_attributes)
        } else {
            self.copy_file(src_id, &target, replace, copy_attributes)
        }
    }

    fn copy_file(&self, src_id: NodeId, target: &IfsPath, replace: bool, copy_attributes: bool) -> IfsResult<()> {
        let tree = &self.inner.tree;
        let src = tree.get(src_id)?;
        let Some(src_content) = src.file().cloned() else {
            return Err(IfsError::is_a_directory(tree.path_of(src_id)?));
        };

        if target.is_root() {
            return Err(IfsError::is_a_directory(target));
        }

        // An existing empty directory may be replaced by the file
        let mut replaced = None;
        if let Lookup::Found(existing) = tree.lookup(target)? {
            let node = tree.get(existing)?;
            if node.is_directory() {
                if !replace {
                    return Err(IfsError::already_exists(target));
                }
                if node.has_children() {
                    return Err(IfsError::directory_not_empty(target));
                }
                replaced = Some(node);
            }
        }

        let result = transactional(self, |created| {
            if let Some(dir) = &replaced {
                self.delete_node(dir.id)?;
            }
            let dst_id = creation::get_file_in(self, created, target, true, !replace)?;
            let src_local = self.store_for(&src_content.location)?.local_path(&src_content.location.key);
            let dst_local = self.local_path(dst_id)?;
            let (md5, size) = copy_content(&src_local, &dst_local)?;
            if copy_attributes {
                tree.update_content(dst_id, &src_content.md5, size, src.times.modified)?;
                for (key, value) in &src_content.additional_data {
                    tree.set_additional_data(dst_id, key, value)?;
                }
            } else {
                tree.update_content(dst_id, &md5, size, now_millis())?;
            }
            tree.set_content_type(dst_id, &src_content.content_type)?;
            debug!(target = %target, size, "copied file content");
            self.emit_updated(dst_id);
            Ok(())
        });
        if let (Err(_), Some(dir)) = (&result, &replaced) {
            self.restore_directory(target, dir);
        }
        result
    }

    /// Put back an empty directory that a failed copy had replaced
    fn restore_directory(&self, path: &IfsPath, dir: &Node) {
        let tree = &self.inner.tree;
        let restore = || -> IfsResult<()> {
            if let Lookup::Found(_) = tree.lookup(path)? {
                return Ok(());
            }
            let parent_path = path.parent().ok_or_else(|| IfsError::not_found(path))?;
            let parent = tree.resolve(&parent_path)?;
            let id = self.create_directory_node(parent, &dir.name)?;
            tree.set_times(id, Some(dir.times.modified), Some(dir.times.accessed), Some(dir.times.created))
        };
        match restore() {
            Ok(()) => debug!(path = %path, "restored replaced directory"),
            Err(e) => warn!(path = %path, error = %e, "failed to restore replaced directory"),
        }
    }

    fn copy_directory(
        &self,
        src_id: NodeId,
        target: &IfsPath,
        replace: bool,
        copy_attributes: bool,
    ) -> IfsResult<()> {
        let tree = &self.inner.tree;
        if let Lookup::Found(existing) = tree.lookup(target)? {
            let node = tree.get(existing)?;
            if node.is_file() {
                return Err(IfsError::not_a_directory(target));
            }
            if node.has_children() {
                return Err(if replace {
                    IfsError::directory_not_empty(target)
                } else {
                    IfsError::already_exists(target)
                });
            }
            if !replace {
                return Err(IfsError::already_exists(target));
            }
            if target.is_root() {
                self.remove_root(target.owner().unwrap_or_default())?;
            } else {
                self.delete_node(existing)?;
            }
        }
        // Children are not copied
        self.create_directory(target)?;
        if copy_attributes {
            let src = tree.get(src_id)?;
            let dst_id = tree.resolve(target)?;
            tree.set_times(dst_id, Some(src.times.modified), None, None)?;
        }
        debug!(target = %target, "copied directory");
        Ok(())
    }

    /// Copy then delete the source; not atomic
    pub fn move_path(&self, source: &IfsPath, target: &IfsPath, options: &[CopyOption]) -> IfsResult<()> {
        let source = self.absolute(source)?;
        let target = self.absolute(target)?;
        if options.contains(&CopyOption::AtomicMove) {
            return Err(IfsError::unsupported("atomic move"));
        }
        if self.is_same_file(&source, &target)? {
            return Ok(());
        }
        let src_id = self.inner.tree.resolve(&source)?;
        if self.inner.tree.get(src_id)?.has_children() {
            return Err(IfsError::Io(io::Error::other("directory is not empty")));
        }
        let mut copy_options: Vec<CopyOption> = options.to_vec();
        if !copy_options.contains(&CopyOption::CopyAttributes) {
            copy_options.push(CopyOption::CopyAttributes);
        }
        self.copy_path(&source, &target, &copy_options)?;
        self.delete_path(&source)?;
        info!(source = %source, target = %target, "moved");
        Ok(())
    }

    // Attributes

    pub fn check_access(&self, path: &IfsPath, modes: &[AccessMode]) -> IfsResult<()> {
        let id = self.node_at(path)?;
        if self.inner.tree.get(id)?.is_file() && modes.contains(&AccessMode::Execute) {
            return Err(IfsError::AccessDenied(path.to_string()));
        }
        Ok(())
    }

    pub fn read_attributes(&self, path: &IfsPath) -> IfsResult<BasicFileAttributes> {
        Ok(self.read_md5_attributes(path)?.basic)
    }

    pub fn read_md5_attributes(&self, path: &IfsPath) -> IfsResult<Md5FileAttributes> {
        let id = self.node_at(path)?;
        self.md5_attributes_of(id)
    }

    pub(crate) fn md5_attributes_of(&self, id: NodeId) -> IfsResult<Md5FileAttributes> {
        let tree = &self.inner.tree;
        let node = tree.get(id)?;
        let size = tree.total_size(id)?;
        Ok(Md5FileAttributes::from_node(&node, size))
    }

    /// Read `view:attr,...` (or `view:*`) into a name/value map
    pub fn read_attributes_map(&self, path: &IfsPath, spec: &str) -> IfsResult<BTreeMap<String, AttrValue>> {
        let (view, names) = parse_attribute_spec(spec)?;
        self.read_md5_attributes(path)?.to_map(view, &names)
    }

    pub fn set_attribute(&self, path: &IfsPath, spec: &str, value: AttrValue) -> IfsResult<()> {
        let attribute = SettableAttribute::parse(spec, value)?;
        let id = self.node_at(path)?;
        let tree = &self.inner.tree;
        match attribute {
            SettableAttribute::LastModifiedTime(t) => tree.set_times(id, Some(t), None, None)?,
            SettableAttribute::LastAccessTime(t) => tree.set_times(id, None, Some(t), None)?,
            SettableAttribute::CreationTime(t) => tree.set_times(id, None, None, Some(t))?,
            SettableAttribute::Md5(md5) => {
                if tree.get(id)?.is_directory() {
                    return Err(IfsError::unsupported(format!("checksum on directory {path}")));
                }
                tree.set_md5(id, &md5)?;
            }
        }
        self.emit_updated(id);
        Ok(())
    }

    /// Set any subset of the three timestamps (milliseconds since the epoch)
    pub fn set_times(
        &self,
        path: &IfsPath,
        modified: Option<i64>,
        accessed: Option<i64>,
        created: Option<i64>,
    ) -> IfsResult<()> {
        let id = self.node_at(path)?;
        self.inner.tree.set_times(id, modified, accessed, created)?;
        self.emit_updated(id);
        Ok(())
    }

    pub fn additional_data(&self, path: &IfsPath) -> IfsResult<BTreeMap<String, String>> {
        let id = self.node_at(path)?;
        let node = self.inner.tree.get(id)?;
        match node.file() {
            Some(content) => Ok(content.additional_data.clone()),
            None => Err(IfsError::is_a_directory(path)),
        }
    }

    pub fn set_additional_data(&self, path: &IfsPath, key: &str, value: &str) -> IfsResult<()> {
        let id = self.node_at(path)?;
        self.inner.tree.set_additional_data(id, key, value)
    }

    pub fn is_same_file(&self, a: &IfsPath, b: &IfsPath) -> IfsResult<bool> {
        Ok(self.absolute(a)? == self.absolute(b)?)
    }

    /// FileStore of the content store holding `path`; directories report the default store
    pub fn file_store(&self, path: &IfsPath) -> IfsResult<Arc<IfsFileStore>> {
        let id = self.node_at(path)?;
        let store = match self.inner.tree.get(id)?.file() {
            Some(content) => self.store_for(&content.location)?,
            None => self.inner.stores.default_store()?,
        };
        self.inner.file_stores.get(store.as_ref())
    }

    pub fn file_store_by_id(&self, store_id: &str) -> IfsResult<Arc<IfsFileStore>> {
        let store = self.inner.stores.get(store_id)?;
        self.inner.file_stores.get(store.as_ref())
    }

    /// Content type of a File; `None` for directories
    pub fn probe_content_type(&self, path: &IfsPath) -> IfsResult<Option<String>> {
        let id = self.node_at(path)?;
        let node = self.inner.tree.get(id)?;
        let Some(content) = node.file() else {
            return Ok(None);
        };
        let local = self.store_for(&content.location)?.local_path(&content.location.key);
        Ok(Some(content_type::probe(
            &content.content_type,
            &self.inner.config.default_content_type,
            &node.name,
            &local,
        )))
    }
}

impl VirtualFileSystem for IfsProvider {
    fn open(&self, path: &IfsPath, options: &[OpenOption], attrs: &[FileAttribute]) -> IfsResult<IfsChannel> {
        self.new_byte_channel(path, options, attrs)
    }

    fn list(&self, path: &IfsPath) -> IfsResult<IfsDirectoryStream> {
        self.new_directory_stream(path)
    }

    fn create_dir(&self, path: &IfsPath) -> IfsResult<()> {
        self.create_directory(path)
    }

    fn delete(&self, path: &IfsPath) -> IfsResult<()> {
        self.delete_path(path)
    }

    fn copy(&self, source: &IfsPath, target: &IfsPath, options: &[CopyOption]) -> IfsResult<()> {
        self.copy_path(source, target, options)
    }

    fn move_entry(&self, source: &IfsPath, target: &IfsPath, options: &[CopyOption]) -> IfsResult<()> {
        self.move_path(source, target, options)
    }

    fn read_attrs(&self, path: &IfsPath) -> IfsResult<Md5FileAttributes> {
        self.read_md5_attributes(path)
    }

    fn write_attr(&self, path: &IfsPath, attribute: &str, value: AttrValue) -> IfsResult<()> {
        self.set_attribute(path, attribute, value)
    }
}

/// Stream `src` into `dst` (truncating it) and return the MD5 and length
fn copy_content(src: &std::path::Path, dst: &std::path::Path) -> IfsResult<(String, u64)> {
    let mut input = File::open(src)?;
    let mut output = StdOpenOptions::new().write(true).truncate(true).open(dst)?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        output.write_all(&buf[..n])?;
        total += n as u64;
    }
    output.flush()?;
    Ok((hex::encode(hasher.finalize()), total))
}
