//! Bounded virtual-path container.
//!
//! Paths use `/` as separator; leading and consecutive slashes are
//! ignored during normalization. The canonical form never starts or ends
//! with a slash, and the empty path names the volume root.

use std::fmt;

use lodestone_shared::errors::{LodestoneError, LodestoneResult};

/// Longest accepted canonical path, in bytes.
pub const VFS_PATH_CAPACITY: usize = 4096;

/// A normalized, bounded virtual path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VfsPath {
    text: String,
}

impl VfsPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Normalize and validate `path`.
    pub fn new(path: &str) -> LodestoneResult<Self> {
        let mut text = String::with_capacity(path.len());
        for component in path.split('/') {
            if component.is_empty() {
                continue;
            }
            if component == ".." {
                return Err(LodestoneError::PathInvalid(format!(
                    "'..' is not allowed in virtual paths: {path}"
                )));
            }
            if !text.is_empty() {
                text.push('/');
            }
            text.push_str(component);
        }

        if text.len() > VFS_PATH_CAPACITY {
            return Err(LodestoneError::PathInvalid(format!(
                "path exceeds {VFS_PATH_CAPACITY} bytes"
            )));
        }
        Ok(Self { text })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// True for the volume root.
    pub fn is_root(&self) -> bool {
        self.text.is_empty()
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.text.split('/').filter(|component| !component.is_empty())
    }

    /// Append one component, enforcing the capacity bound.
    pub fn push(&mut self, component: &str) -> LodestoneResult<()> {
        if component.is_empty() || component.contains('/') {
            return Err(LodestoneError::PathInvalid(format!(
                "bad path component '{component}'"
            )));
        }
        let extra = if self.text.is_empty() {
            component.len()
        } else {
            component.len() + 1
        };
        if self.text.len() + extra > VFS_PATH_CAPACITY {
            return Err(LodestoneError::PathInvalid(format!(
                "path exceeds {VFS_PATH_CAPACITY} bytes"
            )));
        }
        if !self.text.is_empty() {
            self.text.push('/');
        }
        self.text.push_str(component);
        Ok(())
    }

    pub fn join(&self, component: &str) -> LodestoneResult<VfsPath> {
        let mut joined = self.clone();
        joined.push(component)?;
        Ok(joined)
    }

    /// Split into parent path and final component; `None` for the root.
    pub fn split_last(&self) -> Option<(VfsPath, &str)> {
        if self.is_root() {
            return None;
        }
        match self.text.rfind('/') {
            Some(position) => {
                let parent = VfsPath {
                    text: self.text[..position].to_string(),
                };
                Some((parent, &self.text[position + 1..]))
            }
            None => Some((VfsPath::root(), self.text.as_str())),
        }
    }

    /// Whether `self` equals `prefix` or lies below it.
    pub fn starts_with(&self, prefix: &VfsPath) -> bool {
        if prefix.is_root() {
            return true;
        }
        self.text == prefix.text
            || (self.text.len() > prefix.text.len()
                && self.text.starts_with(&prefix.text)
                && self.text.as_bytes()[prefix.text.len()] == b'/')
    }

    /// Components of `self` below `prefix`, or `None` when not below it.
    pub fn strip_prefix(&self, prefix: &VfsPath) -> Option<&str> {
        if !self.starts_with(prefix) {
            return None;
        }
        if prefix.is_root() {
            return Some(&self.text);
        }
        if self.text.len() == prefix.text.len() {
            return Some("");
        }
        Some(&self.text[prefix.text.len() + 1..])
    }

    /// Number of components.
    pub fn depth(&self) -> usize {
        self.components().count()
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.text)
    }
}
