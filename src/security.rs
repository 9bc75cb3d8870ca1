//! Path and command guards for sandboxed execution.
//!
//! Everything here is stateless: lexical path normalization, containment
//! checks against a restriction root, symlink detection, and glob-style
//! matching of shell commands against an allowlist.

use regex::Regex;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

use crate::sandbox::{Result, SandboxError};

/// Resolve `.` and `..` segments without touching the filesystem.
///
/// `..` never climbs above the root of an absolute path.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !path.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// True when `path` equals `root` or sits underneath it.
///
/// String-prefix check requiring either an exact match or `root` followed by
/// a separator, so `/work` does not contain `/workspace`.
pub fn is_within(path: &Path, root: &Path) -> bool {
    let path = path.to_string_lossy();
    let root = root.to_string_lossy();
    let root = root.trim_end_matches(MAIN_SEPARATOR);
    if root.is_empty() {
        // Filesystem root contains every absolute path.
        return path.starts_with(MAIN_SEPARATOR);
    }
    path == root
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with(MAIN_SEPARATOR))
}

/// Lexically resolve `path` against `base` and reject it if it escapes `root`.
pub fn ensure_within(path: &Path, base: &Path, root: &Path) -> Result<PathBuf> {
    let resolved = normalize_path(&base.join(path));
    if is_within(&resolved, &normalize_path(root)) {
        Ok(resolved)
    } else {
        Err(SandboxError::path_traversal(resolved, root))
    }
}

/// Canonicalize `path` even when its tail does not exist yet.
///
/// The deepest existing ancestor is canonicalized (resolving symlinked
/// directories) and the missing components are appended lexically.
pub async fn canonicalize_lenient(path: &Path) -> Result<PathBuf> {
    let normalized = normalize_path(path);
    let mut existing = normalized.as_path();
    let mut missing = Vec::new();

    loop {
        match tokio::fs::canonicalize(existing).await {
            Ok(canonical) => {
                let mut out = canonical;
                for part in missing.iter().rev() {
                    out.push(part);
                }
                return Ok(out);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
                    return Ok(normalized);
                };
                missing.push(name.to_os_string());
                existing = parent;
            }
            Err(err) => {
                return Err(SandboxError::io(
                    format!("Failed to resolve {}", existing.display()),
                    err,
                ))
            }
        }
    }
}

/// Reject `path` unless its canonical location is inside `root`.
///
/// Both sides are canonicalized so symlinked roots (e.g. `/tmp` on macOS)
/// compare correctly. Returns the canonical path.
pub async fn ensure_canonical_within(path: &Path, root: &Path) -> Result<PathBuf> {
    let canonical_root = canonicalize_lenient(root).await?;
    let canonical = canonicalize_lenient(path).await?;
    if is_within(&canonical, &canonical_root) {
        Ok(canonical)
    } else {
        Err(SandboxError::path_traversal(canonical, canonical_root))
    }
}

/// Fail with a symlink error if `path` itself is a symbolic link.
///
/// A missing path is not an error here; the subsequent IO reports it.
pub async fn ensure_not_symlink(path: &Path) -> Result<()> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.file_type().is_symlink() => Err(SandboxError::symlink(path)),
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SandboxError::io(
            format!("Failed to inspect {}", path.display()),
            err,
        )),
    }
}

/// Match a command against one glob-style pattern.
///
/// A pattern without `*` must equal the command exactly. Each `*` matches
/// any run of characters, including whitespace and the empty string.
pub fn glob_matches(pattern: &str, command: &str) -> bool {
    let pattern = pattern.trim();
    if !pattern.contains('*') {
        return pattern == command;
    }

    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("(?s)^{body}$")).is_ok_and(|re| re.is_match(command))
}

/// True when the trimmed `command` matches any allowlist pattern.
pub fn matches_allowlist<S: AsRef<str>>(command: &str, allowlist: &[S]) -> bool {
    let command = command.trim();
    allowlist
        .iter()
        .any(|pattern| glob_matches(pattern.as_ref(), command))
}
