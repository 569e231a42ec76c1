//! Filesystem naming for certificate/key pairs

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IdentityError, Result};

/// Squash a common name into a safe file stem
///
/// Every character outside `[A-Za-z0-9.-]` becomes `_`, so the result never
/// contains a path separator.
pub fn sanitize_common_name(cn: &str) -> String {
    cn.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Fail with `InvalidPath` unless `dir` exists and is a directory
pub fn ensure_directory(dir: &Path) -> Result<()> {
    let invalid = |reason: String| IdentityError::InvalidPath {
        path: dir.to_path_buf(),
        reason,
    };

    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(invalid("not a directory".into())),
        Err(e) => Err(invalid(format!("does not exist ({})", e))),
    }
}

/// Where one identity's certificate and private key live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl IdentityPaths {
    pub fn new(cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
        }
    }

    /// `{dir}/{name}.pem` and `{dir}/{name}-key.pem` for a common name
    pub fn in_directory(dir: &Path, cn: &str) -> Result<Self> {
        ensure_directory(dir)?;
        let name = sanitize_common_name(cn);
        Ok(Self::new(
            dir.join(format!("{}.pem", name)),
            dir.join(format!("{}-key.pem", name)),
        ))
    }

    /// Directory the certificate is written into
    pub fn cert_dir(&self) -> &Path {
        parent_dir(&self.cert)
    }

    /// Directory the key is written into
    pub fn key_dir(&self) -> &Path {
        parent_dir(&self.key)
    }

    /// First of the two files that already exists, if any
    pub fn existing(&self) -> Option<&Path> {
        [&self.cert, &self.key]
            .into_iter()
            .find(|p| p.exists())
            .map(PathBuf::as_path)
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
