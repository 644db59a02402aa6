//! Path normalization for tree keys
//!
//! Tree keys are relative, forward-slash separated, NFC-normalized paths with no
//! `.`/`..` segments. Every device must produce the same key for the same file,
//! otherwise root hashes diverge.

use crate::error::SyncError;
use std::path::{Component, Path};
use unicode_normalization::UnicodeNormalization;

/// Normalize a relative path into its canonical tree key
///
/// - Converts `\` to `/`
/// - Applies NFC unicode normalization
/// - Drops empty and `.` segments
/// - Rejects absolute paths, `..` segments and NUL bytes
pub fn normalize_path(raw: &str) -> Result<String, SyncError> {
    if raw.contains('\0') {
        return Err(SyncError::InvalidPath(format!("{:?} contains NUL", raw)));
    }
    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(SyncError::InvalidPath(format!("{} is absolute", raw)));
    }

    let nfc: String = unified.nfc().collect();
    let mut segments = Vec::new();
    for segment in nfc.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(SyncError::InvalidPath(format!(
                    "{} escapes the workspace",
                    raw
                )))
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(SyncError::InvalidPath(format!("{:?} is empty", raw)));
    }
    Ok(segments.join("/"))
}

/// Convert an absolute filesystem path under `root` into a tree key
pub fn relative_key(root: &Path, absolute: &Path) -> Result<String, SyncError> {
    let relative = absolute.strip_prefix(root).map_err(|_| {
        SyncError::InvalidPath(format!(
            "{} is outside workspace {}",
            absolute.display(),
            root.display()
        ))
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => {
                return Err(SyncError::InvalidPath(format!(
                    "{} is not a plain relative path",
                    relative.display()
                )))
            }
        }
    }
    normalize_path(&parts.join("/"))
}

/// Sibling path that preserves the losing side of a conflict
///
/// `docs/a.txt` with a loser hash starting `1f2e3d4c` becomes
/// `docs/a.conflict-1f2e3d4c.txt`. The name depends only on the path and the
/// losing content, so every device resolving the same conflict agrees on it.
pub fn conflict_copy_path(path: &str, loser_hash_short: &str) -> String {
    let (dir, file) = match path.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, path),
    };

    let renamed = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            format!("{}.conflict-{}.{}", stem, loser_hash_short, ext)
        }
        _ => format!("{}.conflict-{}", file, loser_hash_short),
    };

    match dir {
        Some(dir) => format!("{}/{}", dir, renamed),
        None => renamed,
    }
}
