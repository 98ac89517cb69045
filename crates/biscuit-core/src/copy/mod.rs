//! Integrity-checked copying.

mod copier;
mod hashing;

pub use copier::{
    is_same_file, CopyOutcome, CopyProgress, CopyProgressCallback, CopyStage, StdFsTarget,
    VerifiedCopier, WriteTarget,
};
pub use hashing::{
    format_size, hash_file, hash_file_with_progress, verify_checksum, ChecksumAlgorithm,
    HashProgress, StreamHasher,
};
