// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! SQLite persistence of the node tree

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::{IfsError, IfsResult};
use crate::node::{FileContent, Node, NodeKind, NodeTree};
use crate::types::{ContentLocation, FileTimes, NodeId};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    id           INTEGER PRIMARY KEY,
    parent       INTEGER,
    owner        TEXT NOT NULL,
    name         TEXT NOT NULL,
    kind         TEXT NOT NULL CHECK (kind IN ('file', 'directory')),
    created      INTEGER NOT NULL,
    modified     INTEGER NOT NULL,
    accessed     INTEGER NOT NULL,
    size         INTEGER,
    content_type TEXT,
    md5          TEXT,
    store_id     TEXT,
    content_key  TEXT
);
CREATE TABLE IF NOT EXISTS additional_data (
    node_id INTEGER NOT NULL,
    key     TEXT NOT NULL,
    value   TEXT NOT NULL,
    PRIMARY KEY (node_id, key)
);
";

pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    /// Open (or create) the catalog database and ensure its schema
    pub fn open(path: &Path) -> IfsResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "opened catalog");
        Ok(Self { conn })
    }

    /// Replace the stored snapshot with `tree` in one transaction
    pub fn save(&mut self, tree: &NodeTree) -> IfsResult<()> {
        let nodes = tree.all_nodes();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM additional_data", [])?;
        tx.execute("DELETE FROM nodes", [])?;
        {
            let mut insert_node = tx.prepare(
                "INSERT INTO nodes (id, parent, owner, name, kind, created, modified, accessed,
                                    size, content_type, md5, store_id, content_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            let mut insert_data =
                tx.prepare("INSERT INTO additional_data (node_id, key, value) VALUES (?1, ?2, ?3)")?;
            for node in &nodes {
                let id = node.id.as_u64() as i64;
                let parent = node.parent.map(|p| p.as_u64() as i64);
                match &node.kind {
                    NodeKind::Directory { .. } => {
                        insert_node.execute(params![
                            id,
                            parent,
                            node.owner,
                            node.name,
                            "directory",
                            node.times.created,
                            node.times.modified,
                            node.times.accessed,
                            None::<i64>,
                            None::<String>,
                            None::<String>,
                            None::<String>,
                            None::<String>,
                        ])?;
                    }
                    NodeKind::File(content) => {
                        insert_node.execute(params![
                            id,
                            parent,
                            node.owner,
                            node.name,
                            "file",
                            node.times.created,
                            node.times.modified,
                            node.times.accessed,
                            content.size as i64,
                            content.content_type,
                            content.md5,
                            content.location.store_id,
                            content.location.key,
                        ])?;
                        for (key, value) in &content.additional_data {
                            insert_data.execute(params![id, key, value])?;
                        }
                    }
                }
            }
        }
        tx.commit()?;
        debug!(nodes = nodes.len(), "saved catalog");
        Ok(())
    }

    /// Rebuild the node tree from the stored snapshot
    pub fn load(&self) -> IfsResult<NodeTree> {
        let mut data: HashMap<u64, BTreeMap<String, String>> = HashMap::new();
        {
            let mut stmt = self.conn.prepare("SELECT node_id, key, value FROM additional_data")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?;
            for row in rows {
                let (id, key, value) = row?;
                data.entry(id as u64).or_default().insert(key, value);
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT id, parent, owner, name, kind, created, modified, accessed,
                    size, content_type, md5, store_id, content_key
             FROM nodes ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredNode {
                id: row.get::<_, i64>(0)? as u64,
                parent: row.get::<_, Option<i64>>(1)?.map(|p| p as u64),
                owner: row.get(2)?,
                name: row.get(3)?,
                kind: row.get(4)?,
                times: FileTimes {
                    created: row.get(5)?,
                    modified: row.get(6)?,
                    accessed: row.get(7)?,
                },
                size: row.get::<_, Option<i64>>(8)?.map(|s| s as u64),
                content_type: row.get(9)?,
                md5: row.get(10)?,
                store_id: row.get(11)?,
                content_key: row.get(12)?,
            })
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            let stored = row?;
            let additional_data = data.remove(&stored.id).unwrap_or_default();
            nodes.push(stored.into_node(additional_data)?);
        }
        debug!(nodes = nodes.len(), "loaded catalog");
        NodeTree::from_nodes(nodes)
    }
}

struct StoredNode {
    id: u64,
    parent: Option<u64>,
    owner: String,
    name: String,
    kind: String,
    times: FileTimes,
    size: Option<u64>,
    content_type: Option<String>,
    md5: Option<String>,
    store_id: Option<String>,
    content_key: Option<String>,
}

impl StoredNode {
    fn into_node(self, additional_data: BTreeMap<String, String>) -> IfsResult<Node> {
        let kind = match self.kind.as_str() {
            "directory" => NodeKind::Directory {
                children: BTreeMap::new(),
            },
            "file" => {
                let missing = |column: &str| {
                    IfsError::invalid(format!("catalog file node {} lacks {column}", self.id))
                };
                NodeKind::File(FileContent {
                    size: self.size.ok_or_else(|| missing("size"))?,
                    content_type: self.content_type.ok_or_else(|| missing("content_type"))?,
                    md5: self.md5.ok_or_else(|| missing("md5"))?,
                    location: ContentLocation {
                        store_id: self.store_id.ok_or_else(|| missing("store_id"))?,
                        key: self.content_key.ok_or_else(|| missing("content_key"))?,
                    },
                    additional_data,
                })
            }
            other => return Err(IfsError::invalid(format!("unknown node kind {other}"))),
        };
        Ok(Node {
            id: NodeId(self.id),
            name: self.name,
            owner: self.owner,
            parent: self.parent.map(NodeId),
            times: self.times,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::IfsPath;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("catalog/ifs.sqlite");

        let tree = NodeTree::new();
        let root = tree.create_root("derivate_1").unwrap();
        let a = tree.add_directory(root, "a").unwrap();
        let id = tree.allocate_id();
        let location = ContentLocation {
            store_id: "default".into(),
            key: "derivate_1/0000000000000003".into(),
        };
        let file = tree.add_file(id, a, "img.png", location, "image/png").unwrap();
        tree.update_content(file, "5d41402abc4b2a76b9719d911017c592", 5, 1234).unwrap();
        tree.set_additional_data(file, "width", "10").unwrap();
        tree.create_root("empty_owner").unwrap();

        let mut catalog = Catalog::open(&db).unwrap();
        catalog.save(&tree).unwrap();
        drop(catalog);

        let loaded = Catalog::open(&db).unwrap().load().unwrap();
        assert_eq!(loaded.list_roots(), vec!["derivate_1".to_string(), "empty_owner".to_string()]);
        let path = IfsPath::parse("derivate_1:/a/img.png").unwrap();
        let loaded_id = loaded.resolve(&path).unwrap();
        assert_eq!(loaded.get(loaded_id).unwrap(), tree.get(file).unwrap());
        assert!(loaded.allocate_id().0 > file.0);
    }

    #[test]
    fn test_save_replaces_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("ifs.sqlite");
        let tree = NodeTree::new();
        let root = tree.create_root("o").unwrap();
        let a = tree.add_directory(root, "a").unwrap();

        let mut catalog = Catalog::open(&db).unwrap();
        catalog.save(&tree).unwrap();
        tree.remove(a).unwrap();
        catalog.save(&tree).unwrap();

        let loaded = catalog.load().unwrap();
        let root = loaded.root_of("o").unwrap();
        assert!(loaded.children(root).unwrap().is_empty());
    }

    #[test]
    fn test_empty_catalog_loads_empty_tree() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&dir.path().join("new.sqlite")).unwrap();
        assert!(catalog.load().unwrap().list_roots().is_empty());
    }
}
