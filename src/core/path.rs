//! Purpose: Virtual absolute paths addressing datasets and mounts.
//! Exports: `VPath`, `PathKind`.
//! Role: Shared path vocabulary for routing, mounts, and backends.
//! Invariants: A trailing slash means directory; no slash means file.
//! Invariants: Segments never contain `/` and never equal `.` or `..`.

use std::fmt;

use crate::core::error::{ApiResult, Error};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathKind {
    Dir,
    File,
}

/// An absolute path in the gateway's virtual filesystem.
///
/// Paths are typed: `/a/b/` is a directory, `/a/b` is a file, and the two
/// never compare equal. The root directory is the empty-segment `Dir`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VPath {
    segments: Vec<String>,
    kind: PathKind,
}

impl VPath {
    /// Parses a path, with or without a leading slash. Empty input and `/`
    /// both name the root directory. Repeated slashes collapse; `.` and `..`
    /// segments are rejected.
    pub fn parse(input: &str) -> ApiResult<VPath> {
        let kind = if input.is_empty() || input.ends_with('/') {
            PathKind::Dir
        } else {
            PathKind::File
        };
        let mut segments = Vec::new();
        for segment in input.split('/') {
            if segment.is_empty() {
                continue;
            }
            if segment == "." || segment == ".." {
                return Err(Error::path_invalid(
                    input,
                    "`.` and `..` segments are not allowed",
                ));
            }
            segments.push(segment.to_string());
        }
        Ok(VPath { segments, kind })
    }

    pub fn root() -> VPath {
        VPath {
            segments: Vec::new(),
            kind: PathKind::Dir,
        }
    }

    pub fn kind(&self) -> PathKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == PathKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == PathKind::File
    }

    pub fn is_root(&self) -> bool {
        self.kind == PathKind::Dir && self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, if any. The root directory has none.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Parent directory; `None` at the root.
    pub fn parent(&self) -> Option<VPath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(VPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
            kind: PathKind::Dir,
        })
    }

    /// Child file of a directory. The segment must not contain `/`.
    pub fn join_file(&self, name: &str) -> VPath {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        VPath {
            segments,
            kind: PathKind::File,
        }
    }

    /// Child directory of a directory. The segment must not contain `/`.
    pub fn join_dir(&self, name: &str) -> VPath {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        VPath {
            segments,
            kind: PathKind::Dir,
        }
    }

    /// True when `self` is a directory and `other` lives at or below it.
    /// A directory is ancestor-or-equal of itself but not of the same-named
    /// file: `/a/` covers `/a/`, `/a/b`, and `/a/b/`, never `/a`.
    pub fn is_ancestor_or_equal(&self, other: &VPath) -> bool {
        if self.kind != PathKind::Dir {
            return false;
        }
        if other.segments.len() < self.segments.len() {
            return false;
        }
        if other.segments[..self.segments.len()] != self.segments[..] {
            return false;
        }
        other.segments.len() > self.segments.len() || other.kind == PathKind::Dir
    }

    /// True when either path is ancestor-or-equal of the other.
    pub fn overlaps(&self, other: &VPath) -> bool {
        self.is_ancestor_or_equal(other) || other.is_ancestor_or_equal(self)
    }

    /// Strips a directory prefix, keeping the kind of `self`. Returns `None`
    /// when `base` is not an ancestor-or-equal of `self`.
    pub fn relative_to(&self, base: &VPath) -> Option<VPath> {
        if !base.is_ancestor_or_equal(self) {
            return None;
        }
        Some(VPath {
            segments: self.segments[base.segments.len()..].to_vec(),
            kind: self.kind,
        })
    }
}

impl fmt::Display for VPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/")?;
        for (index, segment) in self.segments.iter().enumerate() {
            if index > 0 {
                write!(f, "/")?;
            }
            write!(f, "{segment}")?;
        }
        if self.kind == PathKind::Dir && !self.segments.is_empty() {
            write!(f, "/")?;
        }
        Ok(())
    }
}
