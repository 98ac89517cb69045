//! Metadata persistence.
//!
//! - Atomic JSON/byte writes
//! - Application and project settings

mod atomic;
mod settings;

pub use atomic::{
    atomic_read_json, atomic_write_bytes, atomic_write_json, atomic_write_json_indented,
};
pub use settings::{ProjectSettings, Settings, SettingsStore};
