//! Path normalization.
//!
//! Every caller-provided path is reduced to a canonical absolute POSIX
//! form before it touches the node table; nothing downstream ever sees an
//! unnormalized path.

use crate::error::{FsError, FsResult};

/// Normalize a caller-provided path to a canonical absolute form.
///
/// Backslashes are converted to `/`, empty input means the root, `.` and
/// redundant separators are dropped, and `..` pops one level. A `..` that
/// would climb above the root is rejected as a traversal attempt.
pub fn normalize_path(path: &str) -> FsResult<String> {
    let converted = path.replace('\\', "/");
    if converted.is_empty() {
        return Ok("/".to_string());
    }

    // Resolve step by step from depth 0; going negative means the caller
    // tried to escape the virtual root.
    let mut depth: i64 = 0;
    for part in converted.split('/') {
        match part {
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return Err(FsError::invalid_argument(format!(
                        "path traversal attempt detected: '{path}'"
                    )));
                }
            }
            "" | "." => {}
            _ => depth += 1,
        }
    }

    let mut segments: Vec<&str> = Vec::new();
    for part in converted.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(part),
        }
    }

    if segments.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(format!("/{}", segments.join("/")))
    }
}

/// Split a normalized path into its parent path and final name.
///
/// The root has no parent; callers must not pass `/`.
pub(crate) fn split_parent(npath: &str) -> (&str, &str) {
    debug_assert!(npath.starts_with('/') && npath != "/");
    let idx = npath.rfind('/').unwrap_or(0);
    let parent = if idx == 0 { "/" } else { &npath[..idx] };
    (parent, &npath[idx + 1..])
}

/// Join a normalized directory path and a child name.
pub(crate) fn join_child(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}
