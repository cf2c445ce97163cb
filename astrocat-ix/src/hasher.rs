//! Content hashing for duplicate detection
//!
//! Computes a streaming XXH64 digest of file bytes. The digest is a pure
//! function of content (path and metadata never enter it) and is the
//! identity key for duplicate accounting.

use astrocat_common::{Error, Result};
use std::path::Path;

/// Block size for streamed reads; memory use stays bounded regardless of
/// file size.
const BLOCK_SIZE: usize = 64 * 1024;

/// Calculate the XXH64 digest of a file as a fixed-width hex string
///
/// The read is chunked rather than slurped so multi-gigabyte stacks of
/// subs hash without memory pressure. Runs on the blocking pool since it
/// is pure CPU + file I/O.
pub async fn calculate_hash(file_path: &Path) -> Result<String> {
    let path = file_path.to_path_buf();
    tracing::debug!(path = %path.display(), "Calculating content hash");

    let hash = tokio::task::spawn_blocking(move || hash_file_sync(&path))
        .await
        .map_err(|e| Error::Internal(format!("Hash task failed: {}", e)))??;

    Ok(hash)
}

/// Synchronous hashing core, shared by the async wrapper and tests
pub fn hash_file_sync(path: &Path) -> Result<String> {
    use std::hash::Hasher;
    use std::io::Read;

    let mut file = std::fs::File::open(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to open file for hashing: {}", e),
        ))
    })?;

    let mut hasher = twox_hash::XxHash64::with_seed(0);
    let mut buffer = vec![0u8; BLOCK_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read file for hashing: {}", e),
            ))
        })?;

        if bytes_read == 0 {
            break;
        }

        hasher.write(&buffer[..bytes_read]);
    }

    Ok(format!("{:016x}", hasher.finish()))
}
