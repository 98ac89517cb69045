//! Streaming checksums for copy verification.
//!
//! SHA256 is the default. BLAKE3 is faster on large raw files, and MD5
//! matches the digests recorded by older archive transfers.

use crate::config::CopyConfig;
use crate::{BiscuitError, Result};
use blake3::Hasher as Blake3Hasher;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::mpsc;

/// Checksum used to verify copied files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Blake3,
    Md5,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Blake3 => write!(f, "blake3"),
            ChecksumAlgorithm::Md5 => write!(f, "md5"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = BiscuitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "blake3" => Ok(ChecksumAlgorithm::Blake3),
            "md5" => Ok(ChecksumAlgorithm::Md5),
            other => Err(BiscuitError::Validation {
                field: "algorithm".to_string(),
                message: format!("unknown checksum algorithm {:?}", other),
            }),
        }
    }
}

/// Incremental hasher for any [`ChecksumAlgorithm`].
pub enum StreamHasher {
    Sha256(Sha256),
    Blake3(Box<Blake3Hasher>),
    Md5(Md5),
}

impl StreamHasher {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha256 => StreamHasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::Blake3 => StreamHasher::Blake3(Box::new(Blake3Hasher::new())),
            ChecksumAlgorithm::Md5 => StreamHasher::Md5(Md5::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            StreamHasher::Sha256(h) => h.update(data),
            StreamHasher::Md5(h) => h.update(data),
            StreamHasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    /// Lowercase hex digest.
    pub fn finalize(self) -> String {
        match self {
            StreamHasher::Sha256(h) => hex::encode(h.finalize()),
            StreamHasher::Blake3(h) => h.finalize().to_hex().to_string(),
            StreamHasher::Md5(h) => hex::encode(h.finalize()),
        }
    }
}

/// Progress update while hashing a file.
#[derive(Debug, Clone)]
pub struct HashProgress {
    pub bytes_processed: u64,
    pub total_bytes: u64,
}

/// Hash a file in [`CopyConfig::CHUNK_SIZE`] chunks.
pub fn hash_file(path: impl AsRef<Path>, algorithm: ChecksumAlgorithm) -> Result<String> {
    hash_file_inner(path.as_ref(), algorithm, |_| {})
}

/// Hash a file on the blocking pool, sending progress over `progress_tx`.
pub async fn hash_file_with_progress(
    path: impl AsRef<Path>,
    algorithm: ChecksumAlgorithm,
    progress_tx: Option<mpsc::Sender<HashProgress>>,
) -> Result<String> {
    let path = path.as_ref().to_path_buf();

    tokio::task::spawn_blocking(move || {
        hash_file_inner(&path, algorithm, |progress| {
            if let Some(ref tx) = progress_tx {
                let _ = tx.try_send(progress);
            }
        })
    })
    .await
    .map_err(|e| BiscuitError::Other(format!("Hash computation task failed: {}", e)))?
}

fn hash_file_inner(
    path: &Path,
    algorithm: ChecksumAlgorithm,
    mut on_progress: impl FnMut(HashProgress),
) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| BiscuitError::io_with_path(e, path))?;
    let total_bytes = file
        .metadata()
        .map_err(|e| BiscuitError::io_with_path(e, path))?
        .len();

    let mut hasher = StreamHasher::new(algorithm);
    let mut buffer = vec![0u8; CopyConfig::CHUNK_SIZE];
    let mut bytes_processed: u64 = 0;
    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| BiscuitError::io_with_path(e, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        bytes_processed += bytes_read as u64;
        on_progress(HashProgress {
            bytes_processed,
            total_bytes,
        });
    }
    Ok(hasher.finalize())
}

/// Check a file against an expected digest.
pub fn verify_checksum(
    path: impl AsRef<Path>,
    algorithm: ChecksumAlgorithm,
    expected: &str,
) -> Result<()> {
    let path = path.as_ref();
    let actual = hash_file(path, algorithm)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(BiscuitError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_lowercase(),
            actual,
        })
    }
}

/// Human readable file size, e.g. `1.5 Mb`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["b", "Kb", "Mb", "Gb", "Tb"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
