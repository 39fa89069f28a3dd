//! SHA-256 hashing for combined files and cache validation.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::TaskError;

const BUF_SIZE: usize = 128 * 1024;

/// Compute SHA-256 of a file and return the digest as lowercase hex.
/// Reads in chunks so multi-gigabyte artifacts don't blow up memory.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; BUF_SIZE];
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash `path` and compare against `want` (lowercase hex, case-insensitive).
pub fn verify_file(path: &Path, want: &str) -> Result<()> {
    let got = sha256_file(path)?;
    if !got.eq_ignore_ascii_case(want) {
        return Err(TaskError::ChecksumMismatch {
            got,
            want: want.to_ascii_lowercase(),
        }
        .into());
    }
    Ok(())
}
