// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Attribute views: `basic` and `md5`

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{IfsError, IfsResult};
use crate::node::{Node, NodeKind};
use crate::types::NodeId;

pub const BASIC_ATTRIBUTES: &[&str] = &[
    "size",
    "creationTime",
    "lastAccessTime",
    "lastModifiedTime",
    "fileKey",
    "isDirectory",
    "isRegularFile",
    "isSymbolicLink",
    "isOther",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeView {
    Basic,
    Md5,
}

impl AttributeView {
    pub fn from_name(name: &str) -> IfsResult<Self> {
        match name {
            "basic" => Ok(AttributeView::Basic),
            "md5" => Ok(AttributeView::Md5),
            other => Err(IfsError::unsupported(format!("attribute view {other}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AttributeView::Basic => "basic",
            AttributeView::Md5 => "md5",
        }
    }

    fn attribute_names(&self) -> Vec<&'static str> {
        let mut names = BASIC_ATTRIBUTES.to_vec();
        if *self == AttributeView::Md5 {
            names.push("md5");
        }
        names
    }
}

/// Split `view:attr1,attr2` into a view and attribute names; no view means `basic`
pub fn parse_attribute_spec(spec: &str) -> IfsResult<(AttributeView, Vec<String>)> {
    let (view, attrs) = match spec.split_once(':') {
        Some((view, attrs)) => (AttributeView::from_name(view)?, attrs),
        None => (AttributeView::Basic, spec),
    };
    if attrs.is_empty() {
        return Err(IfsError::invalid(format!("no attributes named in {spec}")));
    }
    let names = attrs.split(',').map(|s| s.trim().to_string()).collect();
    Ok((view, names))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttrValue {
    Size(u64),
    /// Milliseconds since the Unix epoch
    Time(i64),
    Flag(bool),
    Key(NodeId),
    Text(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicFileAttributes {
    pub size: u64,
    pub creation_time: i64,
    pub last_access_time: i64,
    pub last_modified_time: i64,
    pub file_key: NodeId,
    pub is_directory: bool,
    pub is_regular_file: bool,
    pub is_symbolic_link: bool,
    pub is_other: bool,
}

impl BasicFileAttributes {
    /// `size` is passed in because directory sizes are aggregated by the tree
    pub fn from_node(node: &Node, size: u64) -> Self {
        Self {
            size,
            creation_time: node.times.created,
            last_access_time: node.times.accessed,
            last_modified_time: node.times.modified,
            file_key: node.id,
            is_directory: node.is_directory(),
            is_regular_file: node.is_file(),
            is_symbolic_link: false,
            is_other: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Md5FileAttributes {
    #[serde(flatten)]
    pub basic: BasicFileAttributes,
    /// Directories carry no checksum
    pub md5: Option<String>,
}

impl Md5FileAttributes {
    pub fn from_node(node: &Node, size: u64) -> Self {
        let md5 = match &node.kind {
            NodeKind::File(content) => Some(content.md5.clone()),
            NodeKind::Directory { .. } => None,
        };
        Self {
            basic: BasicFileAttributes::from_node(node, size),
            md5,
        }
    }

    fn value(&self, name: &str) -> IfsResult<AttrValue> {
        let b = &self.basic;
        Ok(match name {
            "size" => AttrValue::Size(b.size),
            "creationTime" => AttrValue::Time(b.creation_time),
            "lastAccessTime" => AttrValue::Time(b.last_access_time),
            "lastModifiedTime" => AttrValue::Time(b.last_modified_time),
            "fileKey" => AttrValue::Key(b.file_key),
            "isDirectory" => AttrValue::Flag(b.is_directory),
            "isRegularFile" => AttrValue::Flag(b.is_regular_file),
            "isSymbolicLink" => AttrValue::Flag(b.is_symbolic_link),
            "isOther" => AttrValue::Flag(b.is_other),
            "md5" => AttrValue::Text(self.md5.clone().unwrap_or_default()),
            other => return Err(IfsError::invalid(format!("unknown attribute {other}"))),
        })
    }

    /// Collect `names` (or every attribute for `*`) as seen through `view`
    pub fn to_map(&self, view: AttributeView, names: &[String]) -> IfsResult<BTreeMap<String, AttrValue>> {
        let available = view.attribute_names();
        let mut out = BTreeMap::new();
        for name in names {
            if name == "*" {
                for attr in &available {
                    out.insert(attr.to_string(), self.value(attr)?);
                }
            } else if available.iter().any(|a| *a == name.as_str()) {
                out.insert(name.clone(), self.value(name)?);
            } else {
                return Err(IfsError::invalid(format!(
                    "unknown attribute {name} in view {}",
                    view.name()
                )));
            }
        }
        Ok(out)
    }
}

/// Attributes that may be assigned through `set_attribute`
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SettableAttribute {
    LastModifiedTime(i64),
    LastAccessTime(i64),
    CreationTime(i64),
    Md5(String),
}

impl SettableAttribute {
    pub(crate) fn parse(spec: &str, value: AttrValue) -> IfsResult<Self> {
        let (view, names) = parse_attribute_spec(spec)?;
        let [name] = names.as_slice() else {
            return Err(IfsError::invalid(format!("exactly one attribute expected in {spec}")));
        };
        match (name.as_str(), value) {
            ("lastModifiedTime", AttrValue::Time(t)) => Ok(Self::LastModifiedTime(t)),
            ("lastAccessTime", AttrValue::Time(t)) => Ok(Self::LastAccessTime(t)),
            ("creationTime", AttrValue::Time(t)) => Ok(Self::CreationTime(t)),
            ("md5", AttrValue::Text(md5)) if view == AttributeView::Md5 => {
                if md5.len() != 32 || !md5.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(IfsError::invalid(format!("not an MD5 digest: {md5}")));
                }
                Ok(Self::Md5(md5.to_ascii_lowercase()))
            }
            (name, value) if view.attribute_names().iter().any(|a| *a == name) => Err(IfsError::invalid(
                format!("attribute {name} cannot be set to {value:?}"),
            )),
            (name, _) => Err(IfsError::invalid(format!(
                "unknown attribute {name} in view {}",
                view.name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::FileContent;
    use crate::types::{ContentLocation, FileTimes};

    fn file_node() -> Node {
        Node {
            id: NodeId(3),
            name: "a.txt".into(),
            owner: "o".into(),
            parent: Some(NodeId(1)),
            times: FileTimes {
                created: 1,
                modified: 2,
                accessed: 3,
            },
            kind: NodeKind::File(FileContent {
                size: 5,
                content_type: "text/plain".into(),
                md5: "5d41402abc4b2a76b9719d911017c592".into(),
                location: ContentLocation {
                    store_id: "default".into(),
                    key: "o/3".into(),
                },
                additional_data: BTreeMap::new(),
            }),
        }
    }

    #[test]
    fn test_parse_attribute_spec() {
        let (view, names) = parse_attribute_spec("md5:size,md5").unwrap();
        assert_eq!(view, AttributeView::Md5);
        assert_eq!(names, vec!["size", "md5"]);
        let (view, names) = parse_attribute_spec("lastModifiedTime").unwrap();
        assert_eq!(view, AttributeView::Basic);
        assert_eq!(names, vec!["lastModifiedTime"]);
        assert!(matches!(parse_attribute_spec("posix:*"), Err(IfsError::Unsupported(_))));
        assert!(parse_attribute_spec("basic:").is_err());
    }

    #[test]
    fn test_to_map_wildcard() {
        let attrs = Md5FileAttributes::from_node(&file_node(), 5);
        let basic = attrs.to_map(AttributeView::Basic, &["*".into()]).unwrap();
        assert_eq!(basic.len(), BASIC_ATTRIBUTES.len());
        assert!(!basic.contains_key("md5"));
        let md5 = attrs.to_map(AttributeView::Md5, &["*".into()]).unwrap();
        assert_eq!(
            md5.get("md5"),
            Some(&AttrValue::Text("5d41402abc4b2a76b9719d911017c592".into()))
        );
        assert_eq!(md5.get("size"), Some(&AttrValue::Size(5)));
        assert_eq!(md5.get("fileKey"), Some(&AttrValue::Key(NodeId(3))));
    }

    #[test]
    fn test_md5_not_in_basic_view() {
        let attrs = Md5FileAttributes::from_node(&file_node(), 5);
        assert!(attrs.to_map(AttributeView::Basic, &["md5".into()]).is_err());
    }

    #[test]
    fn test_settable_attributes() {
        assert_eq!(
            SettableAttribute::parse("basic:lastModifiedTime", AttrValue::Time(9)).unwrap(),
            SettableAttribute::LastModifiedTime(9)
        );
        assert_eq!(
            SettableAttribute::parse("md5:md5", AttrValue::Text("ABCDEF0123456789ABCDEF0123456789".into()))
                .unwrap(),
            SettableAttribute::Md5("abcdef0123456789abcdef0123456789".into())
        );
        assert!(SettableAttribute::parse("md5:md5", AttrValue::Text("xyz".into())).is_err());
        assert!(SettableAttribute::parse("basic:md5", AttrValue::Text("x".into())).is_err());
        assert!(SettableAttribute::parse("basic:size", AttrValue::Size(1)).is_err());
        assert!(SettableAttribute::parse("basic:lastModifiedTime", AttrValue::Flag(true)).is_err());
    }
}
