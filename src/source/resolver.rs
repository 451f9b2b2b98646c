//! Source resolution for PDF data

use crate::error::{Error, Result};
use crate::source::PdfCache;
use base64::Engine;
use std::path::{Path, PathBuf};

/// Resolved PDF data
#[derive(Debug)]
pub struct ResolvedPdf {
    pub data: Vec<u8>,
    pub source_name: String,
}

fn check_header(data: &[u8], reason: &str) -> Result<()> {
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::InvalidPdf {
            reason: reason.to_string(),
        });
    }
    Ok(())
}

/// Resolve a file path to PDF data
pub fn resolve_path<P: AsRef<Path>>(path: P) -> Result<ResolvedPdf> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(Error::PdfNotFound {
            path: path.display().to_string(),
        });
    }

    let data = std::fs::read(path)?;
    check_header(&data, "Not a valid PDF file")?;

    Ok(ResolvedPdf {
        data,
        source_name: path.display().to_string(),
    })
}

/// Resolve base64 encoded data to PDF data
pub fn resolve_base64(base64_data: &str) -> Result<ResolvedPdf> {
    let data = base64::engine::general_purpose::STANDARD.decode(base64_data.trim())?;
    check_header(&data, "Decoded data is not a valid PDF file")?;

    Ok(ResolvedPdf {
        data,
        source_name: "<base64>".to_string(),
    })
}

/// Resolve a cache key to PDF data
pub fn resolve_cache(cache_key: &str, cache: &PdfCache) -> Result<ResolvedPdf> {
    let data = cache
        .get_bytes(cache_key)
        .ok_or_else(|| Error::CacheKeyNotFound {
            key: cache_key.to_string(),
        })?;

    Ok(ResolvedPdf {
        data,
        source_name: format!("<cache:{}>", cache_key),
    })
}

/// Directories that path sources may read from and outputs may be written
/// to. An empty list allows every path.
#[derive(Debug, Clone, Default)]
pub struct ResourceDirs {
    dirs: Vec<PathBuf>,
}

impl ResourceDirs {
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.dirs.is_empty()
    }

    fn allows(&self, canonical: &Path) -> bool {
        self.dirs.iter().any(|dir| {
            std::fs::canonicalize(dir)
                .map(|d| canonical.starts_with(d))
                .unwrap_or(false)
        })
    }

    /// Canonical path of an existing file inside the sandbox
    pub fn check_read(&self, path: &str) -> Result<PathBuf> {
        if self.is_unrestricted() {
            return Ok(PathBuf::from(path));
        }
        let denied = || Error::PathAccessDenied {
            path: path.to_string(),
        };

        let canonical = std::fs::canonicalize(path).map_err(|_| denied())?;
        if self.allows(&canonical) {
            Ok(canonical)
        } else {
            Err(denied())
        }
    }

    /// Canonical target of an output path inside the sandbox. Directories
    /// below the nearest existing ancestor may still be missing.
    pub fn check_write(&self, path: &str) -> Result<PathBuf> {
        if self.is_unrestricted() {
            return Ok(PathBuf::from(path));
        }
        let denied = || Error::PathAccessDenied {
            path: path.to_string(),
        };

        let target = Path::new(path);
        target.file_name().ok_or_else(denied)?;

        let mut existing = target;
        let mut missing = Vec::new();
        while !existing.exists() {
            let name = existing.file_name().ok_or_else(denied)?;
            missing.push(name);
            existing = match existing.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
        }

        let mut canonical = std::fs::canonicalize(existing).map_err(|_| denied())?;
        for name in missing.into_iter().rev() {
            canonical.push(name);
        }

        if self.allows(&canonical) {
            Ok(canonical)
        } else {
            Err(denied())
        }
    }
}
