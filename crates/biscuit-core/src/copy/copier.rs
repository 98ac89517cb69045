//! Integrity-checked file copy.
//!
//! The source is hashed while it is written; with verification enabled the
//! destination is re-read and hashed afterwards. A mismatch triggers one more
//! copy, and a second mismatch is an error.

use crate::cancel::CancellationToken;
use crate::config::CopyConfig;
use crate::copy::hashing::{hash_file, ChecksumAlgorithm, StreamHasher};
use crate::{BiscuitError, Result};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where copied bytes are written. [`StdFsTarget`] outside of tests.
pub trait WriteTarget: Send + Sync {
    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;
}

/// Writes straight to the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFsTarget;

impl WriteTarget for StdFsTarget {
    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(File::create(path)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStage {
    Copying,
    /// Re-hashing the destination. Only reported for large files.
    Verifying,
    Retrying,
    Complete,
}

/// Byte-level progress of one file copy.
#[derive(Debug, Clone)]
pub struct CopyProgress {
    pub src: PathBuf,
    pub stage: CopyStage,
    pub bytes_copied: u64,
    pub total_bytes: u64,
}

/// Callback receiving [`CopyProgress`] updates.
pub type CopyProgressCallback = Arc<dyn Fn(CopyProgress) + Send + Sync + 'static>;

/// Result of a successful copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    pub bytes: u64,
    /// Digest of the source, when verification ran.
    pub checksum: Option<String>,
    /// Number of copy attempts made (1 or 2).
    pub attempts: u32,
}

/// Copies files, optionally verifying each one by checksum.
#[derive(Clone)]
pub struct VerifiedCopier {
    algorithm: ChecksumAlgorithm,
    verify: bool,
    target: Arc<dyn WriteTarget>,
    progress: Option<CopyProgressCallback>,
    cancel: Option<CancellationToken>,
}

impl Default for VerifiedCopier {
    fn default() -> Self {
        Self::new()
    }
}

impl VerifiedCopier {
    /// A verifying SHA256 copier writing to the filesystem.
    pub fn new() -> Self {
        Self {
            algorithm: ChecksumAlgorithm::default(),
            verify: true,
            target: Arc::new(StdFsTarget),
            progress: None,
            cancel: None,
        }
    }

    pub fn with_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_target(mut self, target: Arc<dyn WriteTarget>) -> Self {
        self.target = target;
        self
    }

    pub fn with_progress(mut self, progress: CopyProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn verifies(&self) -> bool {
        self.verify
    }

    /// Copy `src` to `dst`, replacing any existing file.
    pub fn copy(&self, src: &Path, dst: &Path) -> Result<CopyOutcome> {
        if !src.is_file() {
            return Err(BiscuitError::FileNotFound(src.to_path_buf()));
        }
        if is_same_file(src, dst) {
            return Err(BiscuitError::SameFile {
                src: src.to_path_buf(),
                dst: dst.to_path_buf(),
            });
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| BiscuitError::io_with_path(e, parent))?;
        }

        let max_attempts = 1 + CopyConfig::VERIFY_RETRIES;
        for attempt in 1..=max_attempts {
            let (bytes, src_digest) = self.copy_once(src, dst)?;

            if !self.verify {
                copy_permissions(src, dst);
                self.report(src, CopyStage::Complete, bytes, bytes);
                return Ok(CopyOutcome {
                    bytes,
                    checksum: None,
                    attempts: attempt,
                });
            }

            if bytes > CopyConfig::VERIFY_PROGRESS_THRESHOLD {
                self.report(src, CopyStage::Verifying, bytes, bytes);
            }
            let dst_digest = hash_file(dst, self.algorithm)?;
            if dst_digest == src_digest {
                copy_permissions(src, dst);
                self.report(src, CopyStage::Complete, bytes, bytes);
                debug!("Copied {} ({} bytes, {})", src.display(), bytes, self.algorithm);
                return Ok(CopyOutcome {
                    bytes,
                    checksum: Some(src_digest),
                    attempts: attempt,
                });
            }

            if attempt < max_attempts {
                warn!("{} was not copied correctly, retrying...", src.display());
                self.report(src, CopyStage::Retrying, 0, bytes);
            }
        }

        Err(BiscuitError::CopyVerificationFailed {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
            attempts: max_attempts,
        })
    }

    /// One pass of the copy; returns bytes written and the source digest.
    fn copy_once(&self, src: &Path, dst: &Path) -> Result<(u64, String)> {
        let mut reader = File::open(src).map_err(|e| BiscuitError::io_with_path(e, src))?;
        let total_bytes = reader
            .metadata()
            .map_err(|e| BiscuitError::io_with_path(e, src))?
            .len();
        let mut writer = self
            .target
            .create(dst)
            .map_err(|e| BiscuitError::io_with_path(e, dst))?;

        let mut hasher = StreamHasher::new(self.algorithm);
        let mut buffer = vec![0u8; CopyConfig::CHUNK_SIZE];
        let mut bytes_copied: u64 = 0;
        loop {
            if let Some(cancel) = &self.cancel {
                cancel.check()?;
            }
            let bytes_read = reader
                .read(&mut buffer)
                .map_err(|e| BiscuitError::io_with_path(e, src))?;
            if bytes_read == 0 {
                break;
            }
            let chunk = &buffer[..bytes_read];
            writer
                .write_all(chunk)
                .map_err(|e| BiscuitError::io_with_path(e, dst))?;
            if self.verify {
                hasher.update(chunk);
            }
            bytes_copied += bytes_read as u64;
            self.report(src, CopyStage::Copying, bytes_copied, total_bytes);
        }
        writer
            .flush()
            .map_err(|e| BiscuitError::io_with_path(e, dst))?;

        Ok((bytes_copied, hasher.finalize()))
    }

    fn report(&self, src: &Path, stage: CopyStage, bytes_copied: u64, total_bytes: u64) {
        if let Some(progress) = &self.progress {
            progress(CopyProgress {
                src: src.to_path_buf(),
                stage,
                bytes_copied,
                total_bytes,
            });
        }
    }
}

/// True when both paths exist and resolve to the same file.
pub fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Copy permission bits. Failure is logged; some shares reject chmod.
fn copy_permissions(src: &Path, dst: &Path) {
    let result = fs::metadata(src).and_then(|meta| fs::set_permissions(dst, meta.permissions()));
    if let Err(e) = result {
        warn!("Could not copy permissions to {}: {}", dst.display(), e);
    }
}
