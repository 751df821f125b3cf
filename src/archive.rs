//! Backup and restore of the store file plus the upload tree.
//!
//! Archive layout: the store file at the root under its own file name, and
//! every upload under `<username>/<filename>` relative to the upload root.
//! Restore replaces the store file and union-merges user folders into the
//! live upload tree. The two steps are not atomic together.

use anyhow::{anyhow, bail, Context, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::storage::StoreData;
use zip::{write::FileOptions, CompressionMethod, DateTime, ZipArchive, ZipWriter};

pub const BACKUP_FILE_NAME: &str = "outfit_backup.zip";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPaths {
    pub store: PathBuf,
    pub upload_root: PathBuf,
    pub backup_dir: PathBuf,
}

impl BackupPaths {
    pub fn backup_file(&self) -> PathBuf {
        self.backup_dir.join(BACKUP_FILE_NAME)
    }

    fn store_name(&self) -> Result<String> {
        self.store
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Store path {} has no file name", self.store.display()))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub store_replaced: bool,
    pub user_dirs: Vec<String>,
    pub files_restored: usize,
}

/// Write the archive to the fixed backup path, replacing any previous one.
pub fn create_backup(paths: &BackupPaths) -> Result<PathBuf> {
    fs::create_dir_all(&paths.backup_dir)
        .with_context(|| format!("Failed to create backup directory {}", paths.backup_dir.display()))?;

    let store_name = paths.store_name()?;
    let target = paths.backup_file();
    let mut tmp = tempfile::NamedTempFile::new_in(&paths.backup_dir)
        .context("Failed to create temporary backup file")?;

    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());
    let mut count = 0;
    {
        let mut zip = ZipWriter::new(tmp.as_file_mut());
        add_file(&mut zip, &paths.store, &store_name, options)?;

        if paths.upload_root.is_dir() {
            for entry in WalkDir::new(&paths.upload_root)
                .min_depth(1)
                .sort_by_file_name()
            {
                let entry = entry.with_context(|| {
                    format!("Failed to walk upload directory {}", paths.upload_root.display())
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = archive_name(&paths.upload_root, entry.path())?;
                add_file(&mut zip, entry.path(), &name, options)?;
                count += 1;
            }
        }

        zip.finish().context("Failed to finish backup archive")?;
    }
    tmp.persist(&target)
        .with_context(|| format!("Failed to move backup into place at {}", target.display()))?;

    tracing::info!(files = count, "backup written to {}", target.display());
    Ok(target)
}

/// Restore from `archive`. Staging happens in a fresh directory under the
/// backup dir which is removed whether or not the restore succeeds.
pub fn restore_backup(archive: &Path, paths: &BackupPaths) -> Result<RestoreReport> {
    fs::create_dir_all(&paths.backup_dir)
        .with_context(|| format!("Failed to create backup directory {}", paths.backup_dir.display()))?;
    let staging = tempfile::Builder::new()
        .prefix("restore-")
        .tempdir_in(&paths.backup_dir)
        .context("Failed to create staging directory")?;

    extract(archive, staging.path())?;

    let store_name = paths.store_name()?;
    let mut report = RestoreReport::default();

    let staged_store = staging.path().join(&store_name);
    if staged_store.is_file() {
        check_store_file(&staged_store)?;
        move_file(&staged_store, &paths.store)?;
        report.store_replaced = true;
        tracing::info!("store file replaced from {}", archive.display());
    }

    if let Err(e) = merge_user_dirs(staging.path(), &store_name, &paths.upload_root, &mut report) {
        if report.store_replaced {
            tracing::error!(
                files_restored = report.files_restored,
                "partial restore: store replaced but upload merge failed: {:#}",
                e
            );
            return Err(e.context("Partial restore: store replaced but uploads only partly merged"));
        }
        return Err(e);
    }

    staging.close().context("Failed to remove staging directory")?;

    tracing::info!(
        users = report.user_dirs.len(),
        files = report.files_restored,
        "restore complete"
    );
    Ok(report)
}

/// Refuse archives whose store snapshot would not load.
fn check_store_file(path: &Path) -> Result<()> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read archived store {}", path.display()))?;
    serde_json::from_str::<StoreData>(&data)
        .context("Archived store file is not a valid store snapshot")?;
    Ok(())
}

fn add_file<W: Write + io::Seek>(
    zip: &mut ZipWriter<W>,
    source: &Path,
    name: &str,
    options: FileOptions,
) -> Result<()> {
    let mut file = File::open(source)
        .with_context(|| format!("Failed to open {} for backup", source.display()))?;
    zip.start_file(name, options)
        .with_context(|| format!("Failed to add {} to archive", name))?;
    io::copy(&mut file, zip).with_context(|| format!("Failed to write {} to archive", name))?;
    Ok(())
}

/// Archive entry name for a file under the upload root, `/`-separated.
fn archive_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| {
            c.as_os_str()
                .to_str()
                .ok_or_else(|| anyhow!("Non UTF-8 path {}", path.display()))
        })
        .collect::<Result<_>>()?;
    Ok(parts.join("/"))
}

fn extract(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)
        .with_context(|| format!("Failed to open archive {}", archive.display()))?;
    let mut zip = ZipArchive::new(file)
        .with_context(|| format!("Failed to read archive {}", archive.display()))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .with_context(|| format!("Failed to read entry {} of {}", i, archive.display()))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            bail!("Archive entry '{}' escapes the restore directory", entry.name());
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .with_context(|| format!("Failed to create {}", out_path.display()))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut out = File::create(&out_path)
            .with_context(|| format!("Failed to create {}", out_path.display()))?;
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("Failed to extract {}", out_path.display()))?;
    }
    Ok(())
}

fn merge_user_dirs(
    staging: &Path,
    store_name: &str,
    upload_root: &Path,
    report: &mut RestoreReport,
) -> Result<()> {
    let mut user_dirs = Vec::new();
    for entry in fs::read_dir(staging)
        .with_context(|| format!("Failed to list staging directory {}", staging.display()))?
    {
        let entry = entry.context("Failed to read staging entry")?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.path().is_dir() && name != store_name {
            user_dirs.push((name, entry.path()));
        }
    }
    user_dirs.sort();

    for (name, source) in user_dirs {
        let dest = upload_root.join(&name);
        report.files_restored += merge_dir(&source, &dest)?;
        report.user_dirs.push(name);
    }
    Ok(())
}

/// Copy every file under `source` into `dest`, overwriting same-named files
/// and leaving everything else in `dest` alone.
fn merge_dir(source: &Path, dest: &Path) -> Result<usize> {
    fs::create_dir_all(dest).with_context(|| format!("Failed to create {}", dest.display()))?;

    let mut copied = 0;
    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", source.display()))?;
        let relative = entry.path().strip_prefix(source)?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!("Failed to copy {} to {}", entry.path().display(), target.display())
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Rename, falling back to copy and delete across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)
        .with_context(|| format!("Failed to move {} to {}", from.display(), to.display()))?;
    fs::remove_file(from).with_context(|| format!("Failed to remove {}", from.display()))?;
    Ok(())
}
