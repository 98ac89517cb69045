//! Atomic file writes for JSON settings and merged BIDS metadata.
//!
//! Writes go to a sibling temp file with a PID+TID suffix, are synced to
//! disk and then renamed over the target, so a crash never leaves a
//! half-written `participants.tsv` or settings file behind.

use crate::{BiscuitError, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::ser::{PrettyFormatter, Serializer};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use tracing::{debug, warn};

/// Read and parse a JSON file.
///
/// Returns `None` if the file doesn't exist, or an error if parsing fails.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).map_err(|e| BiscuitError::Io {
        message: format!("Failed to read {}", path.display()),
        path: Some(path.to_path_buf()),
        source: Some(e),
    })?;

    let data: T = serde_json::from_str(&contents).map_err(|e| BiscuitError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;

    Ok(Some(data))
}

/// Serialize `data` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T, keep_backup: bool) -> Result<()> {
    atomic_write_json_indented(path, data, b"  ", keep_backup)
}

/// Like [`atomic_write_json`], indenting nested values by `indent`.
pub fn atomic_write_json_indented<T: Serialize>(
    path: &Path,
    data: &T,
    indent: &[u8],
    keep_backup: bool,
) -> Result<()> {
    let mut serialized = Vec::new();
    let formatter = PrettyFormatter::with_indent(indent);
    let mut serializer = Serializer::with_formatter(&mut serialized, formatter);
    data.serialize(&mut serializer).map_err(|e| BiscuitError::Json {
        message: format!("Failed to serialize data: {}", e),
        source: Some(e),
    })?;
    serialized.push(b'\n');

    atomic_write_bytes(path, &serialized, keep_backup)
}

/// Write raw bytes to `path` atomically.
///
/// 1. Writes to a temp file with PID+TID suffix
/// 2. Syncs it to disk
/// 3. Optionally copies the old target to `<name>.bak`
/// 4. Renames the temp file over the target
pub fn atomic_write_bytes(path: &Path, contents: &[u8], keep_backup: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| BiscuitError::Io {
                message: format!("Failed to create directory {}", parent.display()),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }
    }

    let temp_path = temp_path_for(path);

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| BiscuitError::Io {
                message: format!("Failed to create temp file {}", temp_path.display()),
                path: Some(temp_path.clone()),
                source: Some(e),
            })?;

        file.write_all(contents).map_err(|e| BiscuitError::Io {
            message: format!("Failed to write temp file {}", temp_path.display()),
            path: Some(temp_path.clone()),
            source: Some(e),
        })?;

        file.sync_all().map_err(|e| BiscuitError::Io {
            message: format!("Failed to sync temp file {}", temp_path.display()),
            path: Some(temp_path.clone()),
            source: Some(e),
        })?;
    }

    if keep_backup && path.exists() {
        let backup_path = append_extension(path, "bak");
        if let Err(e) = fs::copy(path, &backup_path) {
            warn!("Failed to create backup {}: {}", backup_path.display(), e);
        } else {
            debug!("Created backup: {}", backup_path.display());
        }
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        BiscuitError::Io {
            message: format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                path.display()
            ),
            path: Some(path.to_path_buf()),
            source: Some(e),
        }
    })?;

    debug!("Atomically wrote {}", path.display());
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    append_extension(path, &format!("{}.{}.tmp", process::id(), thread_id()))
}

/// `participants.tsv` + `bak` -> `participants.tsv.bak`
fn append_extension(path: &Path, extra: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(extra);
    path.with_file_name(name)
}

fn thread_id() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    format!("{:?}", thread::current().id()).hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestData {
        name: String,
        value: i32,
    }

    #[test]
    fn test_atomic_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");

        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };
        atomic_write_json(&path, &data, false).unwrap();

        let read_back: Option<TestData> = atomic_read_json(&path).unwrap();
        assert_eq!(read_back, Some(data));
    }

    #[test]
    fn test_atomic_write_json_indented() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sidecar.json");

        let data = TestData {
            name: "meg".to_string(),
            value: 1,
        };
        atomic_write_json_indented(&path, &data, b"    ", false).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "{\n    \"name\": \"meg\",\n    \"value\": 1\n}\n");
    }

    #[test]
    fn test_backup_keeps_previous_contents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("participants.tsv");

        atomic_write_bytes(&path, b"participant_id\nsub-01\n", true).unwrap();
        atomic_write_bytes(&path, b"participant_id\nsub-02\n", true).unwrap();

        let backup = temp_dir.path().join("participants.tsv.bak");
        assert_eq!(
            fs::read_to_string(backup).unwrap(),
            "participant_id\nsub-01\n"
        );
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "participant_id\nsub-02\n"
        );
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("file.json");
        atomic_write_json(&path, &serde_json::json!({"a": 1}), false).unwrap();

        let entries: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_atomic_read_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let result: Option<TestData> =
            atomic_read_json(&temp_dir.path().join("missing.json")).unwrap();
        assert!(result.is_none());
    }
}
