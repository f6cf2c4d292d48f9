//! Test file detection
//!
//! Impact analysis hides callers that live in test files unless asked to
//! include them. Detection is purely path based: a production function that
//! happens to be called `test_connection` is still production code.

/// Returns true when `path` follows a test layout convention:
/// a `test`/`tests` directory, a `test_*` module, a `*_test`/`*_tests` module,
/// or `conftest.py`.
pub fn is_test_file(path: &str) -> bool {
    let path_lower = path.to_lowercase();
    let file_name = path_lower.rsplit('/').next().unwrap_or(&path_lower);
    let stem = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem);
    let in_test_dir = path_lower
        .split('/')
        .rev()
        .skip(1)
        .any(|dir| matches!(dir, "test" | "tests" | "testing" | "__tests__"));
    in_test_dir
        || stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with("_tests")
        || file_name == "conftest.py"
}
