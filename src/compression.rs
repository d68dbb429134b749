// src/compression.rs

//! Compression format handling for source archives
//!
//! Auto-extraction recognizes the compressed tar flavors a recipe may
//! list as sources (`.tar.gz`, `.tgz`, `.tar.bz2`, `.tar.xz`) plus
//! plain `.tar`; zip archives are handled separately by the extractor
//! since they are not a stream format.

use std::io::Read;

/// Compression applied to a tar stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    /// No compression (plain .tar)
    None,
    /// Gzip compression (.tar.gz, .tgz)
    Gzip,
    /// Bzip2 compression (.tar.bz2)
    Bzip2,
    /// XZ/LZMA compression (.tar.xz)
    Xz,
}

impl CompressionFormat {
    /// Detect the tar compression format from a file name.
    ///
    /// Returns `None` when the name does not look like a tar archive
    /// at all.
    pub fn from_tar_name(name: &str) -> Option<Self> {
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::Gzip)
        } else if name.ends_with(".tar.bz2") {
            Some(Self::Bzip2)
        } else if name.ends_with(".tar.xz") {
            Some(Self::Xz)
        } else if name.ends_with(".tar") {
            Some(Self::None)
        } else {
            None
        }
    }

    /// Get a human-readable name for this format
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
        }
    }
}

/// Wrap a reader in a decoder for the given format.
pub fn create_decoder<'a, R: Read + 'a>(
    reader: R,
    format: CompressionFormat,
) -> Box<dyn Read + 'a> {
    match format {
        CompressionFormat::None => Box::new(reader),
        CompressionFormat::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
        CompressionFormat::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
        CompressionFormat::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
    }
}
