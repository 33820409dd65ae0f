// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Owner-qualified IFS paths and their `ifs:` URI form
//!
//! An absolute path always names an owner and renders as `owner:/a/b`.
//! A relative path has no owner and renders as `a/b`. The URI form of an
//! absolute path is `ifs:///owner:/a/b`; `ifs:///owner` names the owner's root.

use crate::error::{IfsError, IfsResult};

pub const SCHEME: &str = "ifs";
pub const SEPARATOR: char = '/';
const OWNER_TERMINATOR: char = ':';

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IfsPath {
    owner: Option<String>,
    segments: Vec<String>,
}

impl IfsPath {
    /// Absolute root path of `owner`
    pub fn root(owner: &str) -> IfsResult<Self> {
        validate_owner(owner)?;
        Ok(Self {
            owner: Some(owner.to_string()),
            segments: Vec::new(),
        })
    }

    /// Absolute path `owner:/segments...`
    pub fn absolute<I, S>(owner: &str, segments: I) -> IfsResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut path = Self::root(owner)?;
        for segment in segments {
            let segment = segment.into();
            validate_segment(&segment)?;
            path.segments.push(segment);
        }
        Ok(path)
    }

    /// Relative path from already split segments
    pub fn relative<I, S>(segments: I) -> IfsResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Vec::new();
        for segment in segments {
            let segment = segment.into();
            validate_segment(&segment)?;
            out.push(segment);
        }
        check_relative_head(&out)?;
        Ok(Self {
            owner: None,
            segments: out,
        })
    }

    /// Parse the string form produced by `Display`
    ///
    /// `owner:/a/b` and `owner:` are absolute, anything without an owner
    /// terminator ahead of the first separator is relative.
    pub fn parse(s: &str) -> IfsResult<Self> {
        let first_sep = s.find(SEPARATOR).unwrap_or(s.len());
        match s[..first_sep].find(OWNER_TERMINATOR) {
            Some(colon) => {
                let owner = &s[..colon];
                let rest = &s[colon + 1..];
                if !rest.is_empty() && !rest.starts_with(SEPARATOR) {
                    return Err(IfsError::invalid(format!(
                        "path after owner must be absolute: {s}"
                    )));
                }
                Self::absolute(owner, split_segments(rest))
            }
            None => {
                if s.starts_with(SEPARATOR) {
                    return Err(IfsError::invalid(format!("absolute path without owner: {s}")));
                }
                Self::relative(split_segments(s))
            }
        }
    }

    /// Parse an `ifs:///owner:/relative/path` URI
    ///
    /// A foreign scheme means the URI does not belong to this filesystem and
    /// fails with `NotFound`.
    pub fn from_uri(uri: &str) -> IfsResult<Self> {
        let (scheme, rest) = uri
            .split_once(':')
            .ok_or_else(|| IfsError::invalid(format!("not a URI: {uri}")))?;
        if !scheme.eq_ignore_ascii_case(SCHEME) {
            return Err(IfsError::not_found(format!("no filesystem for scheme {scheme}")));
        }
        let payload = rest
            .strip_prefix("///")
            .ok_or_else(|| IfsError::invalid(format!("URI must start with {SCHEME}:///: {uri}")))?;
        let first_sep = payload.find(SEPARATOR).unwrap_or(payload.len());
        match payload[..first_sep].find(OWNER_TERMINATOR) {
            Some(_) => Self::parse(payload),
            None if first_sep == payload.len() => Self::root(payload),
            None => {
                // owner/relative/path without the explicit terminator
                let owner = &payload[..first_sep];
                Self::absolute(owner, split_segments(&payload[first_sep..]))
            }
        }
    }

    pub fn to_uri(&self) -> IfsResult<String> {
        if !self.is_absolute() {
            return Err(IfsError::invalid(format!("relative path has no URI: {self}")));
        }
        Ok(format!("{SCHEME}:///{self}"))
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_absolute(&self) -> bool {
        self.owner.is_some()
    }

    /// True for the zero-segment path of an owner
    pub fn is_root(&self) -> bool {
        self.owner.is_some() && self.segments.is_empty()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut parent = self.clone();
        parent.segments.pop();
        Some(parent)
    }

    /// The owner's root path for absolute paths
    pub fn root_path(&self) -> Option<Self> {
        self.owner.as_ref().map(|owner| Self {
            owner: Some(owner.clone()),
            segments: Vec::new(),
        })
    }

    /// Resolve `other` against this path; absolute `other` wins
    pub fn resolve(&self, other: &IfsPath) -> IfsPath {
        if other.is_absolute() {
            return other.clone();
        }
        let mut out = self.clone();
        out.segments.extend(other.segments.iter().cloned());
        out
    }

    pub fn join(&self, name: &str) -> IfsResult<IfsPath> {
        validate_segment(name)?;
        let mut out = self.clone();
        out.segments.push(name.to_string());
        if !out.is_absolute() {
            check_relative_head(&out.segments)?;
        }
        Ok(out)
    }

    /// Drop `.` segments and fold `..` into the preceding segment
    ///
    /// Leading `..` on a relative path is preserved; `..` above an owner root
    /// is an error.
    pub fn normalize(&self) -> IfsResult<IfsPath> {
        let mut out: Vec<String> = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment.as_str() {
                "." => {}
                ".." => match out.last().map(String::as_str) {
                    Some(last) if last != ".." => {
                        out.pop();
                    }
                    _ if self.is_absolute() => {
                        return Err(IfsError::invalid(format!("path escapes its root: {self}")));
                    }
                    _ => out.push(segment.clone()),
                },
                _ => out.push(segment.clone()),
            }
        }
        if !self.is_absolute() {
            check_relative_head(&out)?;
        }
        Ok(IfsPath {
            owner: self.owner.clone(),
            segments: out,
        })
    }

    pub fn starts_with(&self, other: &IfsPath) -> bool {
        self.owner == other.owner
            && self.segments.len() >= other.segments.len()
            && self.segments.iter().zip(other.segments.iter()).all(|(a, b)| a == b)
    }
}

impl std::fmt::Display for IfsPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(owner) = &self.owner {
            write!(f, "{owner}{OWNER_TERMINATOR}{SEPARATOR}")?;
        }
        f.write_str(&self.segments.join("/"))
    }
}

impl std::str::FromStr for IfsPath {
    type Err = IfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn split_segments(s: &str) -> impl Iterator<Item = &str> {
    s.split(SEPARATOR).filter(|segment| !segment.is_empty())
}

fn validate_owner(owner: &str) -> IfsResult<()> {
    // `.` and `..` would name a directory outside the store's owner layout
    if owner.is_empty()
        || owner == "."
        || owner == ".."
        || owner.contains(SEPARATOR)
        || owner.contains(OWNER_TERMINATOR)
        || owner.contains('\0')
    {
        return Err(IfsError::invalid(format!("invalid owner: {owner:?}")));
    }
    Ok(())
}

/// A relative path may not start with an owner-like segment, or its string
/// form would parse back as absolute
fn check_relative_head(segments: &[String]) -> IfsResult<()> {
    match segments.first() {
        Some(first) if first.contains(OWNER_TERMINATOR) => Err(IfsError::invalid(format!(
            "relative path may not start with {first:?}"
        ))),
        _ => Ok(()),
    }
}

fn validate_segment(segment: &str) -> IfsResult<()> {
    if segment.is_empty() || segment.contains(SEPARATOR) || segment.contains('\0') {
        return Err(IfsError::invalid(format!("invalid path segment: {segment:?}")));
    }
    Ok(())
}
