// src/source/mod.rs

//! Source acquisition
//!
//! Populates a recipe's `srcdir` with every declared source, fetched
//! in declaration order, checksum-verified, and auto-extracted unless
//! the recipe opts out via `noextract`. Remote transport is abstracted
//! behind the [`Fetcher`] trait; local sources are copied from the
//! recipe directory.

pub mod extract;

use crate::error::{Error, Result};
use crate::hash;
use crate::recipe::{SKIP_CHECKSUM, Source};
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// URL schemes handed to the fetch capability; anything else is a
/// path relative to the recipe directory
const REMOTE_SCHEMES: &[&str] = &["http://", "https://", "ftp://"];

/// Capability to stream a remote resource to a local file.
pub trait Fetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Default fetcher shelling out to curl.
pub struct CurlFetcher;

impl Fetcher for CurlFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        let dest_str = dest.to_str().ok_or_else(|| Error::Fetch {
            url: url.to_string(),
            message: format!("destination path is not valid UTF-8: {}", dest.display()),
        })?;

        let output = Command::new("curl")
            .args(["-fsSL", "-o", dest_str, url])
            .output()
            .map_err(|e| Error::Fetch {
                url: url.to_string(),
                message: format!("failed to run curl: {}", e),
            })?;

        if !output.status.success() {
            return Err(Error::Fetch {
                url: url.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

/// Check whether a source URL refers to a remote resource.
pub fn is_remote(url: &str) -> bool {
    REMOTE_SCHEMES.iter().any(|scheme| url.starts_with(scheme))
}

/// Fetch, verify, and extract every source into `src_dir`.
///
/// Sources are processed strictly in declaration order. Extracted
/// archives are deleted after extraction; everything else stays in
/// place under its basename.
pub fn acquire(
    recipe_dir: &Path,
    sources: &[Source],
    src_dir: &Path,
    fetcher: &dyn Fetcher,
) -> Result<()> {
    info!("fetching {} source file(s)", sources.len());

    for source in sources {
        let filename = source.filename();
        let local_path = src_dir.join(filename);

        if is_remote(&source.url) {
            debug!("downloading {}", source.url);
            fetcher.fetch(&source.url, &local_path)?;
        } else {
            let origin = recipe_dir.join(&source.url);
            debug!("copying {}", origin.display());
            fs::copy(&origin, &local_path).map_err(|e| Error::Fetch {
                url: source.url.clone(),
                message: format!("cannot copy '{}': {}", origin.display(), e),
            })?;
        }

        if source.checksum != SKIP_CHECKSUM {
            let actual = hash::sha256_file(&local_path)?;
            if actual != source.checksum {
                return Err(Error::ChecksumMismatch {
                    url: source.url.clone(),
                    expected: source.checksum.clone(),
                    actual,
                });
            }
        }

        if !source.noextract && extract::is_supported(filename) {
            extract::extract_archive(&local_path, src_dir)?;
            fs::remove_file(&local_path)?;
        } else if !source.noextract {
            debug!("not extracting {} (unsupported archive type)", filename);
        }
    }

    Ok(())
}
