use crate::error::{ErrorKind, Result};
use std::fmt;

/// Deepest allowed path, counted in components below `/`.
pub const MAX_DEPTH: usize = 16;

/// A normalized absolute path inside the directory tree.
///
/// Empty and `.` segments are dropped. `..` is rejected rather than resolved,
/// as is any component containing NUL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DirPath {
    components: Vec<String>,
}

impl DirPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            exn::bail!(ErrorKind::PathInvalid(raw.to_string()));
        }
        let mut components = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => continue,
                ".." => exn::bail!(ErrorKind::PathInvalid(raw.to_string())),
                s if s.contains('\0') => exn::bail!(ErrorKind::PathInvalid(raw.to_string())),
                s => components.push(s.to_string()),
            }
        }
        if components.len() > MAX_DEPTH {
            exn::bail!(ErrorKind::PathInvalid(raw.to_string()));
        }
        Ok(Self { components })
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Final component; `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// Containing directory; `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.components.split_last()?;
        Some(Self { components: rest.to_vec() })
    }

    pub fn join(&self, name: &str) -> Self {
        let mut components = self.components.clone();
        components.push(name.to_string());
        Self { components }
    }

    /// `true` when `other` lies strictly below `self`.
    pub fn is_ancestor_of(&self, other: &DirPath) -> bool {
        other.components.len() > self.components.len() && other.components.starts_with(&self.components)
    }
}

impl fmt::Display for DirPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return f.write_str("/");
        }
        for component in &self.components {
            write!(f, "/{component}")?;
        }
        Ok(())
    }
}
