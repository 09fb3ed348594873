//! Content hashing for cache validation
//!
//! A library is only considered unchanged when the SHA256 of its bytes
//! matches the hash recorded when its conversion was cached.

use crate::error::{DroidpackError, DroidpackResult};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const READ_CHUNK: usize = 64 * 1024;

/// Hash a file's contents with SHA256, returning the full lowercase hex digest
pub fn hash_file(path: &Path) -> DroidpackResult<String> {
    let file = File::open(path)
        .map_err(|e| DroidpackError::io(format!("opening {} for hashing", path.display()), e))?;
    hash_reader(file)
        .map_err(|e| DroidpackError::io(format!("hashing {}", path.display()), e))
}

/// Hash everything readable from `reader`
pub fn hash_reader(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Async wrapper around [`hash_file`] that runs on the blocking pool
pub async fn hash_file_async(path: &Path) -> DroidpackResult<String> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_file(&owned))
        .await
        .map_err(|e| DroidpackError::TaskPanicked(e.to_string()))?
}
