//! Target discovery.

use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

/// Directory names never descended into.
const SKIPPED_DIRS: [&str; 3] = ["venv", ".venv", "__pycache__"];

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

fn is_python_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "py")
}

/// Resolve `target` to the Python files to process, sorted.
///
/// A file is returned as-is regardless of extension. Unreadable directory
/// entries are skipped.
pub fn collect_targets(target: &Path) -> Vec<PathBuf> {
    if target.is_file() {
        return vec![target.to_path_buf()];
    }

    let mut files: Vec<PathBuf> = WalkDir::new(target)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_python_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}
