//! Per-user image files under the upload root.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const ALLOWED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "heic"];

pub fn user_dir(upload_root: &Path, username: &str) -> PathBuf {
    upload_root.join(username)
}

/// Final path component of a client-supplied name, with the extension
/// checked against [`ALLOWED_EXTENSIONS`].
pub fn sanitize_filename(name: &str) -> Result<String> {
    let file_name = Path::new(name.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.starts_with('.'))
        .map(str::to_string);
    let Some(file_name) = file_name else {
        bail!("Invalid file name '{}'", name);
    };

    let extension = Path::new(&file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        bail!(
            "Unsupported file type '{}'. Use {}",
            file_name,
            ALLOWED_EXTENSIONS.join(", ")
        );
    }

    Ok(file_name)
}

pub fn save_upload(upload_root: &Path, username: &str, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let dir = user_dir(upload_root, username);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create upload directory {}", dir.display()))?;

    let path = dir.join(file_name);
    fs::write(&path, bytes)
        .with_context(|| format!("Failed to write upload {}", path.display()))?;
    Ok(path)
}

/// Delete a backing file. A file that is already gone is not an error.
pub fn remove_upload(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!("upload {} already missing", path.display());
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to delete upload {}", path.display())),
    }
}

/// Files directly inside the user's folder, creating the folder if needed.
pub fn scan_user_dir(upload_root: &Path, username: &str) -> Result<Vec<PathBuf>> {
    let dir = user_dir(upload_root, username);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create upload directory {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in fs::read_dir(&dir)
        .with_context(|| format!("Failed to list upload directory {}", dir.display()))?
    {
        let entry = entry.with_context(|| format!("Failed to read entry in {}", dir.display()))?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sanitize_strips_directories_and_checks_extension() {
        assert_eq!(sanitize_filename("../../etc/shirt.JPG").unwrap(), "shirt.JPG");
        assert_eq!(sanitize_filename("pants.heic").unwrap(), "pants.heic");
        assert!(sanitize_filename("notes.txt").is_err());
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename(".hidden.png").is_err());
    }

    #[test]
    fn save_then_scan_finds_file() {
        let root = TempDir::new().unwrap();
        let path = save_upload(root.path(), "alice", "top.png", b"png").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"png");

        let found = scan_user_dir(root.path(), "alice").unwrap();
        assert_eq!(found, vec![path]);
    }

    #[test]
    fn scan_creates_missing_user_dir() {
        let root = TempDir::new().unwrap();
        assert!(scan_user_dir(root.path(), "bob").unwrap().is_empty());
        assert!(root.path().join("bob").is_dir());
    }

    #[test]
    fn removing_missing_file_is_ok() {
        let root = TempDir::new().unwrap();
        assert!(remove_upload(&root.path().join("gone.png")).is_ok());
    }
}
