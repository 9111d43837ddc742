//! Safe path resolution inside the media root.
//!
//! Every filesystem access for user-supplied paths goes through [`MediaRoot`];
//! nothing else in the crate joins request input onto a directory.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

use crate::error::ServiceError;

static ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._-]+$").unwrap());
static DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{8}$").unwrap());

/// Canonicalized root of the recorded footage tree.
#[derive(Clone, Debug)]
pub struct MediaRoot {
    root: PathBuf,
}

impl MediaRoot {
    /// Canonicalize the configured root. Fails if the directory is missing.
    pub fn new(root: &Path) -> Result<Self, ServiceError> {
        let root = root.canonicalize().map_err(|e| {
            ServiceError::Internal(format!("media root {:?}: {}", root, e))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path to a verified absolute path inside the root.
    ///
    /// Parent-dir components are rejected before touching the filesystem; the
    /// joined candidate is then canonicalized and checked for component-wise
    /// containment, so a sibling like `root-evil` never passes. The target
    /// must exist (canonicalization resolves symlinks).
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, ServiceError> {
        let candidate = Path::new(relative);
        for component in candidate.components() {
            match component {
                Component::ParentDir => return Err(ServiceError::PathTraversal),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ServiceError::PathTraversal)
                }
                _ => {}
            }
        }

        let joined = self.root.join(candidate);
        let resolved = joined.canonicalize().map_err(|_| {
            ServiceError::NotFound(format!("no such file: {}", relative))
        })?;

        if !resolved.starts_with(&self.root) {
            return Err(ServiceError::PathTraversal);
        }
        Ok(resolved)
    }
}

/// Camera ids and filenames: dots, dashes, underscores, alphanumerics only.
pub fn validate_id(id: &str) -> Result<(), ServiceError> {
    if ID_RE.is_match(id) {
        Ok(())
    } else {
        Err(ServiceError::InvalidInput(format!("Invalid ID format: {:?}", id)))
    }
}

/// Date directories are yyyymmdd.
pub fn validate_date(date: &str) -> Result<(), ServiceError> {
    if DATE_RE.is_match(date) {
        Ok(())
    } else {
        Err(ServiceError::InvalidInput(format!(
            "Invalid date format: {:?}",
            date
        )))
    }
}
