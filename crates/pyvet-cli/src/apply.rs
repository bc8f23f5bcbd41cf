//! Writing repaired code back to disk.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Path of the backup written next to `path`.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

/// Overwrite `path` with `contents`, keeping the previous version as `<path>.bak`.
///
/// The backup is written first; if it fails the target is left untouched.
/// The new contents are staged in a sibling temp file and renamed over the
/// target, so a failed write never leaves a truncated file.
pub fn write_with_backup(path: &Path, contents: &str) -> std::io::Result<PathBuf> {
    let backup = backup_path(path);
    fs::copy(path, &backup)?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(parent)?;
    staged.write_all(contents.as_bytes())?;
    staged.as_file().sync_all()?;

    let permissions = fs::metadata(path)?.permissions();
    fs::set_permissions(staged.path(), permissions)?;

    staged.persist(path).map_err(|e| e.error)?;
    Ok(backup)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_then_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calc.py");
        fs::write(&path, "def f(:\n").unwrap();

        let backup = write_with_backup(&path, "def f():\n    pass\n").unwrap();

        assert_eq!(backup, dir.path().join("calc.py.bak"));
        assert_eq!(fs::read_to_string(&backup).unwrap(), "def f(:\n");
        assert_eq!(fs::read_to_string(&path).unwrap(), "def f():\n    pass\n");
    }

    #[test]
    fn test_missing_target_fails_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.py");

        assert!(write_with_backup(&path, "x = 1\n").is_err());
        assert!(!path.exists());
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn test_failed_backup_leaves_original_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calc.py");
        fs::write(&path, "x = 1\n").unwrap();
        // A directory squatting on the backup name makes the copy fail.
        fs::create_dir(backup_path(&path)).unwrap();

        assert!(write_with_backup(&path, "x = 2\n").is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "x = 1\n");
    }
}
