use crate::error::{GraphError, GraphResult};
use std::fs;
use std::path::{Component, Path};

pub fn normalize_rel_path(repo_root: &Path, path: &Path) -> GraphResult<String> {
    let rel = path.strip_prefix(repo_root).map_err(|_| {
        GraphError::InvalidArgument(format!(
            "{} is outside {}",
            path.display(),
            repo_root.display()
        ))
    })?;
    Ok(normalize_path(rel))
}

pub fn normalize_path(path: &Path) -> String {
    let mut parts = Vec::new();
    for comp in path.components() {
        match comp {
            Component::Normal(os) => parts.push(os.to_string_lossy().to_string()),
            Component::ParentDir => parts.push("..".to_string()),
            Component::CurDir => {}
            _ => {}
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Directory part of a normalized relative path, `""` for files at the root.
pub fn parent_dir(rel_path: &str) -> &str {
    rel_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

pub fn ensure_parent_dir(path: &Path) -> GraphResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| GraphError::io(parent, err))?;
        }
    }
    Ok(())
}

pub fn truncate_str_bytes(value: &str, max_bytes: usize) -> String {
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes.min(value.len());
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn normalizes_relative_paths() {
        let root = PathBuf::from("/repo");
        let rel = normalize_rel_path(&root, &root.join("pkg").join("./mod.py")).unwrap();
        assert_eq!(rel, "pkg/mod.py");
        assert!(normalize_rel_path(&root, Path::new("/elsewhere/x.py")).is_err());
    }

    #[test]
    fn parent_dir_of_root_file_is_empty() {
        assert_eq!(parent_dir("main.py"), "");
        assert_eq!(parent_dir("pkg/sub/mod.py"), "pkg/sub");
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate_str_bytes("héllo", 2), "h");
        assert_eq!(truncate_str_bytes("abc", 10), "abc");
    }
}
