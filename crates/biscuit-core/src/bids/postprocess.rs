//! In-place updates of BIDS metadata files after conversion.

use crate::bids::tsv::TsvTable;
use crate::config::BidsConfig;
use crate::metadata::{
    atomic_read_json, atomic_write_bytes, atomic_write_json_indented, ProjectSettings,
};
use crate::{BiscuitError, Result};
use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::path::Path;
use tracing::{debug, info};

/// Sidecar keys that may be set by [`update_sidecar`].
pub const SIDECAR_FIELDS: &[&str] = &[
    "InstitutionName",
    "ManufacturersModelName",
    "DeviceSerialNumber",
    "DewarPosition",
    "DigitizedLandmarks",
    "DigitizedHeadPoints",
    "ContinuousHeadLocalization",
    "AssociatedEmptyRoom",
];

fn read_object(path: &Path) -> Result<Map<String, Value>> {
    match atomic_read_json::<Value>(path)? {
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(BiscuitError::Json {
            message: format!("{} does not contain a JSON object", path.display()),
            source: None,
        }),
        None => Err(BiscuitError::FileNotFound(path.to_path_buf())),
    }
}

/// Set `Name` in a `dataset_description.json`. Other keys keep their order.
pub fn set_dataset_name(description_path: &Path, name: &str) -> Result<()> {
    let mut data = read_object(description_path)?;
    data.insert("Name".to_string(), Value::String(name.to_string()));
    atomic_write_json_indented(
        description_path,
        &Value::Object(data),
        BidsConfig::JSON_INDENT,
        false,
    )?;
    info!("Set dataset name of {} to {:?}", description_path.display(), name);
    Ok(())
}

/// Merge whitelisted `fields` into a sidecar JSON. Null values and keys not
/// in [`SIDECAR_FIELDS`] are ignored. Returns the keys that were written.
pub fn update_sidecar(sidecar_path: &Path, fields: &Map<String, Value>) -> Result<Vec<String>> {
    let mut sidecar = read_object(sidecar_path)?;
    let mut written = Vec::new();
    for key in SIDECAR_FIELDS {
        match fields.get(*key) {
            Some(Value::Null) | None => {}
            Some(value) => {
                sidecar.insert(key.to_string(), value.clone());
                written.push(key.to_string());
            }
        }
    }
    for key in fields.keys().filter(|k| !SIDECAR_FIELDS.contains(&k.as_str())) {
        debug!("Ignoring non-editable sidecar field {}", key);
    }
    atomic_write_json_indented(
        sidecar_path,
        &Value::Object(sidecar),
        BidsConfig::JSON_INDENT,
        false,
    )?;
    Ok(written)
}

/// Set the `group` of one participant.
///
/// A table without a `group` column only accepts a new one when it has a
/// single row. Returns `false` when no row matches `participant_id`.
pub fn update_participant_group(
    participants_path: &Path,
    participant_id: &str,
    group: &str,
) -> Result<bool> {
    let mut table = TsvTable::read(participants_path)?;

    if !table.has_column("group") {
        if table.len() != 1 {
            return Err(BiscuitError::Validation {
                field: "group".to_string(),
                message: format!(
                    "cannot add a group column to a table with {} participants",
                    table.len()
                ),
            });
        }
        table.add_column("group", BidsConfig::NOT_AVAILABLE);
    }

    let Some(row) = table.find_row(BidsConfig::PARTICIPANT_ID_COLUMN, participant_id) else {
        return Ok(false);
    };
    table.set(row, "group", group)?;
    table.write(participants_path)?;
    Ok(true)
}

/// Build the project README from its settings.
pub fn generate_readme(settings: &ProjectSettings) -> String {
    fn date(parts: &Option<Vec<String>>) -> String {
        match parts {
            Some(parts) if !parts.is_empty() => parts.join("/"),
            _ => "Unknown".to_string(),
        }
    }

    let mut text = String::new();
    let title = settings.project_title.as_deref().unwrap_or_default();
    let _ = writeln!(text, "Project Title:\t\t{}", title);
    let _ = writeln!(text, "Project ID:\t\t{}\n", settings.project_id);
    text.push_str("Expected experimentation period:\n");
    let _ = writeln!(text, "Start date:\t\t{}", date(&settings.start_date));
    let _ = writeln!(text, "End date:\t\t{}\n", date(&settings.end_date));
    text.push_str("Project Description:\n");
    text.push_str(settings.description.as_deref().unwrap_or_default());
    text.push_str("\n\n");

    if !settings.groups.is_empty() {
        text.push_str("Participant groups:\n");
        for group in &settings.groups {
            let _ = writeln!(text, " - {}", group);
        }
        text.push('\n');
    }
    if !settings.default_triggers.is_empty() {
        text.push_str("Trigger channels:\n");
        for (channel, description) in &settings.default_triggers {
            let _ = writeln!(text, "{}:\t{}", channel, description);
        }
    }
    text
}

pub fn write_readme(path: &Path, text: &str) -> Result<()> {
    atomic_write_bytes(path, text.as_bytes(), false)
}
