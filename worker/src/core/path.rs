//! Lexical path helpers.
//!
//! Paths are resolved the way a shell resolves them (`.` and `..` folded,
//! relative paths joined onto a base) without touching the filesystem, so the
//! results are deterministic for any input.

use std::path::{Component, Path, PathBuf};

/// Strip a single leading `./` segment.
pub fn strip_current_dir(path: &str) -> &str {
    path.strip_prefix("./").unwrap_or(path)
}

/// Resolve `path` against `base` and fold `.`/`..` components.
///
/// `..` never climbs above the root, matching POSIX resolution of `/..`.
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    normalize(&joined)
}

/// Fold `.` and `..` components of an already-absolute path.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root = matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir | Component::Prefix(_))
                );
                if at_root {
                    if !out.has_root() {
                        out.push("..");
                    }
                } else if out.ends_with("..") {
                    out.push("..");
                } else {
                    out.pop();
                }
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// Compute `target` relative to `base`; both must be normalized absolute paths.
///
/// Returns `None` when no relative path exists (different prefixes or roots),
/// which callers treat as "outside". Escapes upward are returned with leading
/// `..` components.
pub fn relative_to(base: &Path, target: &Path) -> Option<PathBuf> {
    let base_parts: Vec<Component<'_>> = base.components().collect();
    let target_parts: Vec<Component<'_>> = target.components().collect();

    fn anchors<'a>(parts: &[Component<'a>]) -> Vec<Component<'a>> {
        parts
            .iter()
            .take_while(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
            .copied()
            .collect()
    }
    if anchors(&base_parts) != anchors(&target_parts) {
        return None;
    }

    let common = base_parts
        .iter()
        .zip(target_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..base_parts.len() {
        rel.push("..");
    }
    for part in &target_parts[common..] {
        rel.push(part.as_os_str());
    }
    Some(rel)
}

/// Split a relative path into its normal segments as strings.
pub fn segments(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect()
}
