//! Path helpers shared by settings, profile loading and working directories.

use std::path::{Component, Path, PathBuf};

/// Convert a path to a display string with forward slash separators.
pub fn path_to_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Normalize a path lexically, resolving `.` and `..` without touching the
/// filesystem.
///
/// Unlike `canonicalize`, this works for paths that don't exist yet and does
/// not resolve symlinks.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::Prefix(p) => components.push(Component::Prefix(p)),
            Component::RootDir => {
                components.retain(|c| matches!(c, Component::Prefix(_)));
                components.push(Component::RootDir);
            }
            Component::CurDir => {}
            Component::ParentDir => match components.last() {
                // Can't go above root
                Some(Component::RootDir | Component::Prefix(_)) => {}
                Some(Component::ParentDir) | None => components.push(Component::ParentDir),
                Some(Component::Normal(_) | Component::CurDir) => {
                    components.pop();
                }
            },
            Component::Normal(c) => components.push(Component::Normal(c)),
        }
    }

    if components.is_empty() {
        PathBuf::from(".")
    } else {
        components.iter().collect()
    }
}

/// Expand `~`, join relative paths onto `base`, and normalize.
pub fn absolutize(path: &Path, base: &Path) -> PathBuf {
    let expanded = expand_home(path);
    if expanded.is_absolute() {
        normalize_path(&expanded)
    } else {
        normalize_path(&base.join(expanded))
    }
}

/// Absolute form of `path` relative to the process working directory.
pub fn absolutize_from_cwd(path: &Path) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    absolutize(path, &cwd)
}

/// Canonicalize when the path exists, otherwise fall back to a lexical
/// absolute path.
pub fn resolve_existing_or_lexical(path: &Path) -> PathBuf {
    let absolute = absolutize_from_cwd(path);
    dunce::canonicalize(&absolute).unwrap_or(absolute)
}

/// Whether `path` is inside one of `roots` (component-wise).
pub fn is_within_any(path: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| path.starts_with(root))
}

/// Deterministic identifier for a project directory.
///
/// `/Users/ken/workspace/myapp` becomes `-Users-ken-workspace-myapp`.
pub fn project_slug(project_dir: &Path) -> String {
    let resolved = resolve_existing_or_lexical(project_dir);
    let mut slug = resolved
        .to_string_lossy()
        .replace(['/', '\\'], "-")
        .replace(':', "");
    if !slug.starts_with('-') {
        slug.insert(0, '-');
    }
    slug
}
