// src/source/extract.rs

//! Source archive extraction with leading-directory stripping
//!
//! Upstream archives usually nest their content under a single release
//! directory (`app-1.2.3/...`). Extraction removes that prefix so the
//! build scripts see the tree directly under `srcdir`: when every
//! entry starts with the same directory chain, the chain is stripped,
//! however deep it is. Directory entries that merely contain other
//! entries do not count against the common prefix. Archives whose
//! entries live under different roots are extracted as-is.

use crate::compression::{self, CompressionFormat};
use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Check whether a file name has a recognized archive extension.
pub fn is_supported(name: &str) -> bool {
    name.ends_with(".zip") || CompressionFormat::from_tar_name(name).is_some()
}

/// Extract an archive into `dest`, stripping the common leading
/// directory. The archive file itself is left in place.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    if name.ends_with(".zip") {
        extract_zip(archive, dest)
    } else if let Some(format) = CompressionFormat::from_tar_name(name) {
        extract_tar(archive, dest, format)
    } else {
        Err(Error::Extract {
            archive: archive.to_path_buf(),
            message: "unsupported archive type".to_string(),
        })
    }
}

/// One archive entry, as seen by the prefix computation.
struct EntryInfo {
    path: PathBuf,
    is_dir: bool,
}

/// Compute the common leading directory shared by every entry.
///
/// Directory entries that are prefixes of another entry are excluded;
/// the prefix is bounded by each remaining entry's parent so a lone
/// top-level file never strips itself away.
fn common_prefix(entries: &[EntryInfo]) -> PathBuf {
    let significant: Vec<&EntryInfo> = entries
        .iter()
        .filter(|entry| {
            !(entry.is_dir
                && entries
                    .iter()
                    .any(|other| other.path != entry.path && other.path.starts_with(&entry.path)))
        })
        .collect();

    let mut prefix: Option<Vec<String>> = None;

    for entry in significant {
        let mut parent: Vec<String> = entry
            .path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        parent.pop();

        prefix = Some(match prefix {
            None => parent,
            Some(current) => current
                .iter()
                .zip(&parent)
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a.clone())
                .collect(),
        });

        if prefix.as_ref().is_some_and(|p| p.is_empty()) {
            break;
        }
    }

    prefix.unwrap_or_default().iter().collect()
}

/// Resolve the destination path for one entry, applying the prefix.
///
/// Returns `None` for entries fully consumed by the prefix (the roots
/// being stripped away).
fn target_path(dest: &Path, entry: &Path, prefix: &Path) -> Option<PathBuf> {
    let relative = entry.strip_prefix(prefix).ok()?;
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(dest.join(relative))
}

/// Validate that an entry path cannot escape the extraction root.
fn sanitize(archive: &Path, path: &Path) -> Result<()> {
    let safe = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));

    if safe {
        Ok(())
    } else {
        Err(Error::Extract {
            archive: archive.to_path_buf(),
            message: format!("entry '{}' escapes the extraction root", path.display()),
        })
    }
}

fn extract_error(archive: &Path, err: impl std::fmt::Display) -> Error {
    Error::Extract {
        archive: archive.to_path_buf(),
        message: err.to_string(),
    }
}

fn extract_tar(archive: &Path, dest: &Path, format: CompressionFormat) -> Result<()> {
    // First pass: collect entry paths to compute the shared prefix
    let file = File::open(archive)?;
    let mut reader = tar::Archive::new(compression::create_decoder(file, format));

    let mut entries = Vec::new();
    for entry in reader.entries().map_err(|e| extract_error(archive, e))? {
        let entry = entry.map_err(|e| extract_error(archive, e))?;
        let path = entry
            .path()
            .map_err(|e| extract_error(archive, e))?
            .into_owned();
        sanitize(archive, &path)?;
        entries.push(EntryInfo {
            is_dir: entry.header().entry_type().is_dir(),
            path,
        });
    }

    let prefix = common_prefix(&entries);
    debug!(
        "extracting {} (prefix: '{}')",
        archive.display(),
        prefix.display()
    );

    // Second pass: unpack with the prefix removed
    let file = File::open(archive)?;
    let mut reader = tar::Archive::new(compression::create_decoder(file, format));

    for entry in reader.entries().map_err(|e| extract_error(archive, e))? {
        let mut entry = entry.map_err(|e| extract_error(archive, e))?;
        let path = entry
            .path()
            .map_err(|e| extract_error(archive, e))?
            .into_owned();

        let Some(target) = target_path(dest, &path, &prefix) else {
            continue;
        };

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        entry
            .unpack(&target)
            .map_err(|e| extract_error(archive, e))?;
    }

    Ok(())
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| extract_error(archive, e))?;

    let mut entries = Vec::new();
    for index in 0..zip.len() {
        let entry = zip.by_index(index).map_err(|e| extract_error(archive, e))?;
        let path = entry.enclosed_name().ok_or_else(|| Error::Extract {
            archive: archive.to_path_buf(),
            message: format!("entry '{}' escapes the extraction root", entry.name()),
        })?;
        entries.push(EntryInfo {
            is_dir: entry.is_dir(),
            path,
        });
    }

    let prefix = common_prefix(&entries);
    debug!(
        "extracting {} (prefix: '{}')",
        archive.display(),
        prefix.display()
    );

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|e| extract_error(archive, e))?;
        let Some(path) = entry.enclosed_name() else {
            continue;
        };
        let Some(target) = target_path(dest, &path, &prefix) else {
            continue;
        };

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out).map_err(|e| extract_error(archive, e))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))?;
        }
    }

    Ok(())
}
