use crate::error::{GraphError, GraphResult};
use crate::model::Language;
use blake3::Hasher;
use ignore::WalkBuilder;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub hash: String,
    pub size: i64,
    pub modified: i64,
    pub language: Language,
    /// Why the file could not be read. `hash` is empty when this is set.
    pub read_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LanguageSpec {
    pub language: Language,
    pub extensions: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    pub no_ignore: bool,
}

impl ScanOptions {
    pub fn new(no_ignore: bool) -> Self {
        Self { no_ignore }
    }
}

static LANGUAGE_SPECS: &[LanguageSpec] = &[
    LanguageSpec {
        language: Language::Python,
        extensions: &["py", "pyi"],
    },
    LanguageSpec {
        language: Language::Rust,
        extensions: &["rs"],
    },
];

/// Directory names that are never indexed, whatever the ignore files say.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    ".codegraph",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "env",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    "target",
    "build",
    "dist",
    "site-packages",
];

pub fn scan_repo_with_options(
    repo_root: &Path,
    options: ScanOptions,
) -> GraphResult<Vec<ScannedFile>> {
    fs::read_dir(repo_root).map_err(|err| GraphError::io(repo_root, err))?;

    let mut files = Vec::new();
    let mut builder = WalkBuilder::new(repo_root);
    if options.no_ignore {
        builder
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .parents(false);
    } else {
        builder
            .ignore(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .parents(true)
            .require_git(false);
    }
    let walker = builder
        .hidden(false)
        .filter_entry(|entry| !is_skipped_entry(entry))
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("walk error: {err}");
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        if let Some(file) = scan_path(repo_root, entry.path()) {
            files.push(file);
        }
    }
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

fn is_skipped_entry(entry: &ignore::DirEntry) -> bool {
    let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
    is_dir
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
}

fn scan_path(repo_root: &Path, path: &Path) -> Option<ScannedFile> {
    if !path.is_file() {
        return None;
    }
    let language = detect_language(path)?;
    let rel_path = crate::util::normalize_rel_path(repo_root, path).ok()?;
    if rel_path
        .split('/')
        .any(|segment| SKIP_DIRS.contains(&segment))
    {
        return None;
    }
    Some(scanned_file(rel_path, path, language, read_fingerprint(path)))
}

struct Fingerprint {
    hash: String,
    size: i64,
    modified: i64,
}

fn read_fingerprint(path: &Path) -> io::Result<Fingerprint> {
    let metadata = fs::metadata(path)?;
    let modified = metadata
        .modified()
        .ok()
        .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let data = fs::read(path)?;
    Ok(Fingerprint {
        hash: hash_bytes(&data),
        size: metadata.len() as i64,
        modified,
    })
}

/// An unreadable file is still reported, so the index records the failure
/// instead of treating the file as deleted.
fn scanned_file(
    rel_path: String,
    abs_path: &Path,
    language: Language,
    fingerprint: io::Result<Fingerprint>,
) -> ScannedFile {
    let (fingerprint, read_error) = match fingerprint {
        Ok(fingerprint) => (fingerprint, None),
        Err(err) => {
            tracing::warn!("cannot read {rel_path}: {err}");
            let empty = Fingerprint {
                hash: String::new(),
                size: 0,
                modified: 0,
            };
            (empty, Some(format!("read failed: {err}")))
        }
    };
    ScannedFile {
        rel_path,
        abs_path: abs_path.to_path_buf(),
        hash: fingerprint.hash,
        size: fingerprint.size,
        modified: fingerprint.modified,
        language,
        read_error,
    }
}

fn detect_language(path: &Path) -> Option<Language> {
    let ext = path.extension().and_then(|ext| ext.to_str())?;
    LANGUAGE_SPECS
        .iter()
        .find(|spec| spec.extensions.iter().any(|candidate| *candidate == ext))
        .map(|spec| spec.language)
}

pub fn language_for_path(path: &Path) -> Option<Language> {
    detect_language(path)
}

pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_source_files_and_skips_vendor_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("main.py"), "def a():\n    pass\n").unwrap();
        fs::write(root.join("notes.txt"), "ignored").unwrap();
        fs::write(root.join("lib.rs"), "fn c() {}\n").unwrap();
        fs::create_dir_all(root.join("target").join("debug")).unwrap();
        fs::write(root.join("target").join("debug").join("gen.rs"), "").unwrap();
        fs::create_dir_all(root.join("pkg")).unwrap();
        fs::write(root.join("pkg").join("mod.pyi"), "def b(): ...\n").unwrap();
        fs::create_dir_all(root.join("venv").join("lib")).unwrap();
        fs::write(root.join("venv").join("lib").join("dep.py"), "x = 1\n").unwrap();
        fs::create_dir_all(root.join("__pycache__")).unwrap();
        fs::write(root.join("__pycache__").join("main.py"), "").unwrap();

        let files = scan_repo_with_options(root, ScanOptions::default()).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["lib.rs", "main.py", "pkg/mod.pyi"]);
        let languages: Vec<_> = files.iter().map(|f| f.language).collect();
        assert_eq!(
            languages,
            vec![Language::Rust, Language::Python, Language::Python]
        );
        assert_eq!(files[1].hash.len(), 64);
        assert!(files.iter().all(|f| f.read_error.is_none()));
    }

    #[test]
    fn missing_root_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = scan_repo_with_options(&missing, ScanOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "io_error");
    }

    #[test]
    fn unreadable_file_is_kept_with_its_error() {
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "permission denied");
        let file = scanned_file(
            "pkg/locked.py".to_string(),
            Path::new("/repo/pkg/locked.py"),
            Language::Python,
            Err(denied),
        );
        assert_eq!(file.rel_path, "pkg/locked.py");
        assert!(file.hash.is_empty());
        assert_eq!(file.size, 0);
        assert_eq!(
            file.read_error.as_deref(),
            Some("read failed: permission denied")
        );
    }

    #[test]
    fn hash_tracks_content() {
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
        assert_ne!(hash_bytes(b"abc"), hash_bytes(b"abd"));
    }
}
