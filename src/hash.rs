// src/hash.rs

//! Streaming SHA-256 for source integrity checks
//!
//! Source checksums are plain lowercase hex digests (no algorithm
//! prefix); `SKIP` disables verification for a source and is handled
//! by the caller, not here.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Number of hex characters in a SHA-256 digest
pub const SHA256_HEX_LEN: usize = 64;

/// Compute the SHA-256 digest of a byte slice as lowercase hex
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute the SHA-256 digest of a reader as lowercase hex
///
/// Streams in 8 KiB chunks so large source archives are never held in
/// memory.
pub fn sha256_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Compute the SHA-256 digest of a file as lowercase hex
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    sha256_reader(&mut file)
}

/// Check that a string is a well-formed lowercase SHA-256 hex digest
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == SHA256_HEX_LEN
        && s.chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}
