//! Source locations and the path-normalization helper used at load time.
//!
//! Callers hand the registry either a file-system path or a URL. Both are reconciled into a
//! [`SourceLocation`] here:
//! - `file:` URLs (`file:/x`, `file:///x`, `file://localhost/x`) become file paths, with
//!   percent-escapes decoded.
//! - On Windows hosts a leading slash in front of a drive letter (`/C:/x`) is dropped.
//! - Other schemes (`http:`, `https:`, ...) stay URLs.
//! - Relative file paths are made absolute against the working directory.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Where a resource's samples come from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SourceLocation {
    File(PathBuf),
    Url(String),
}

impl SourceLocation {
    /// Diagnostic form used in logs and fatal errors.
    pub fn display_path(&self) -> String {
        match self {
            SourceLocation::File(path) => path.display().to_string(),
            SourceLocation::Url(url) => url.clone(),
        }
    }

    pub fn as_file(&self) -> Option<&Path> {
        match self {
            SourceLocation::File(path) => Some(path),
            SourceLocation::Url(_) => None,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_path())
    }
}

/// Path conventions that decide the leading-slash handling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostFlavor {
    Unix,
    Windows,
}

impl HostFlavor {
    pub fn current() -> Self {
        if cfg!(windows) {
            HostFlavor::Windows
        } else {
            HostFlavor::Unix
        }
    }
}

/// Normalize `raw` for the running host against the process working directory.
pub fn normalize_source(raw: &str) -> Result<SourceLocation> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    normalize_source_for(raw, HostFlavor::current(), &cwd)
}

/// Normalize `raw` for an explicit host flavor and working directory.
pub fn normalize_source_for(raw: &str, flavor: HostFlavor, cwd: &Path) -> Result<SourceLocation> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(EngineError::InvalidArgument(
            "source path is empty".to_string(),
        ));
    }

    if let Some(rest) = strip_prefix_ignore_case(raw, "file:") {
        let path = file_url_path(rest);
        let decoded = urlencoding::decode(path)
            .map_err(|err| EngineError::InvalidArgument(format!("bad file URL {raw}: {err}")))?;
        if decoded.is_empty() {
            return Err(EngineError::InvalidArgument(format!(
                "file URL without a path: {raw}"
            )));
        }
        return Ok(SourceLocation::File(absolutize(&decoded, flavor, cwd)));
    }

    if has_url_scheme(raw) {
        return Ok(SourceLocation::Url(raw.to_string()));
    }

    Ok(SourceLocation::File(absolutize(raw, flavor, cwd)))
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

/// Path part of a `file:` URL body (everything after `file:`).
fn file_url_path(rest: &str) -> &str {
    if let Some(after) = strip_prefix_ignore_case(rest, "//localhost/") {
        // keep the slash that starts the path
        &rest[rest.len() - after.len() - 1..]
    } else if rest.starts_with("///") {
        &rest[2..]
    } else {
        rest
    }
}

/// `scheme:` with at least two characters, so `C:` drive letters are never schemes.
fn has_url_scheme(s: &str) -> bool {
    let Some(idx) = s.find(':') else {
        return false;
    };
    let scheme = &s[..idx];
    scheme.len() >= 2
        && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn is_drive_path(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 2 && b[0].is_ascii_alphabetic() && b[1] == b':'
}

fn absolutize(path: &str, flavor: HostFlavor, cwd: &Path) -> PathBuf {
    match flavor {
        HostFlavor::Unix => {
            if path.starts_with('/') {
                PathBuf::from(path)
            } else {
                cwd.join(path)
            }
        }
        HostFlavor::Windows => {
            let trimmed = match path.strip_prefix('/') {
                Some(rest) if is_drive_path(rest) => rest,
                _ => path,
            };
            let absolute = is_drive_path(trimmed)
                || trimmed.starts_with("//")
                || trimmed.starts_with("\\\\");
            if absolute {
                PathBuf::from(trimmed)
            } else {
                cwd.join(trimmed)
            }
        }
    }
}
