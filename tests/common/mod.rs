use std::path::{Path, PathBuf};

use linecov::model::{CoverageMap, LineHits};
use tempfile::TempDir;

/// Create a scratch project directory. The caller must hold onto the
/// `TempDir` to keep it alive.
pub fn setup_project(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in files {
        write_file(dir.path(), path, content);
    }
    dir
}

pub fn write_file(root: &Path, path: &str, content: &str) -> PathBuf {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&full, content).unwrap();
    full
}

pub fn coverage(entries: &[(&str, LineHits)]) -> CoverageMap {
    entries
        .iter()
        .map(|(file, lines)| (file.to_string(), lines.clone()))
        .collect()
}
