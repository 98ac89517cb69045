//! Centralized configuration for the Biscuit core library.
//!
//! Constants for copy behaviour, BIDS file naming and on-disk settings
//! locations.

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const COPIED_SUFFIX: &'static str = "_copied";
}

/// Configuration for verified file copies.
pub struct CopyConfig;

impl CopyConfig {
    /// Size of each read/write chunk.
    pub const CHUNK_SIZE: usize = 1024 * 1024; // 1MB
    /// Copies re-attempted after a checksum mismatch before failing.
    pub const VERIFY_RETRIES: u32 = 1;
    /// Files above this size report a separate verifying stage.
    pub const VERIFY_PROGRESS_THRESHOLD: u64 = 1024 * 1024;
}

/// BIDS naming constants.
pub struct BidsConfig;

impl BidsConfig {
    pub const PARTICIPANTS_FILENAME: &'static str = "participants.tsv";
    pub const DESCRIPTION_FILENAME: &'static str = "dataset_description.json";
    pub const PARTICIPANT_ID_COLUMN: &'static str = "participant_id";
    pub const FILENAME_COLUMN: &'static str = "filename";
    pub const ACQ_TIME_COLUMN: &'static str = "acq_time";
    pub const ACQ_TIME_FORMAT: &'static str = "%Y-%m-%dT%H:%M:%S";
    pub const NOT_AVAILABLE: &'static str = "n/a";
    pub const SUBJECT_PREFIX: &'static str = "sub";
    pub const SESSION_PREFIX: &'static str = "ses";
    pub const SCANS_SUFFIX: &'static str = "scans";
    pub const DEFAULT_KIND: &'static str = "meg";
    /// Indentation of rewritten sidecar and description files.
    pub const JSON_INDENT: &'static [u8] = b"    ";
}

/// Shared directory and path configurations.
pub struct PathsConfig;

impl PathsConfig {
    pub const CONFIG_DIR_NAME: &'static str = "biscuit";
    pub const SETTINGS_FILENAME: &'static str = "settings.json";
    pub const PROJECT_SETTINGS_FILENAME: &'static str = "proj_settings.json";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_limits_are_reasonable() {
        assert!(CopyConfig::CHUNK_SIZE >= 64 * 1024);
        assert_eq!(CopyConfig::VERIFY_RETRIES, 1);
    }
}
