//! BIDS filename entity parsing.
//!
//! A BIDS filename is a `_`-separated list of `key-value` entities followed
//! by a suffix and an extension, e.g. `sub-01_ses-02_task-rest_meg.con`.

use crate::{BiscuitError, Result};
use std::collections::BTreeMap;

/// Entities, suffix and extension parsed from one filename.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BidsParams {
    entities: BTreeMap<String, String>,
    suffix: Option<String>,
    extension: String,
}

impl BidsParams {
    /// Parse a file name (not a path) into its BIDS parts.
    ///
    /// ```
    /// use biscuit_core::bids::BidsParams;
    ///
    /// let params = BidsParams::parse("sub-01_ses-1_task-rest_meg.con");
    /// assert_eq!(params.subject(), Some("01"));
    /// assert_eq!(params.suffix(), Some("meg"));
    /// assert_eq!(params.extension(), ".con");
    /// ```
    pub fn parse(file_name: &str) -> Self {
        let (stem, extension) = split_extension(file_name);
        let mut params = BidsParams {
            extension: extension.to_string(),
            ..Default::default()
        };

        for token in stem.split('_').filter(|t| !t.is_empty()) {
            match token.split_once('-') {
                Some((key, value)) => {
                    params.entities.insert(key.to_string(), value.to_string());
                }
                None => params.suffix = Some(token.to_string()),
            }
        }
        params
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entities.get(key).map(String::as_str)
    }

    pub fn entities(&self) -> &BTreeMap<String, String> {
        &self.entities
    }

    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    /// Extension including the leading dot, or empty.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn subject(&self) -> Option<&str> {
        self.get("sub")
    }

    pub fn session(&self) -> Option<&str> {
        self.get("ses")
    }

    pub fn task(&self) -> Option<&str> {
        self.get("task")
    }

    pub fn acquisition(&self) -> Option<&str> {
        self.get("acq")
    }

    pub fn run(&self) -> Option<&str> {
        self.get("run")
    }

    /// True when every entity of `other` appears in `self` with the same
    /// value. Suffix and extension are not compared.
    ///
    /// A raw file `sub-01_ses-1_task-a_run-1_meg.con` is a superset of the
    /// session-level `sub-01_ses-1_coordsystem.json`, so the coordinate
    /// system file is associated with the scan.
    pub fn is_superset_of(&self, other: &BidsParams) -> bool {
        other
            .entities
            .iter()
            .all(|(key, value)| self.entities.get(key) == Some(value))
    }
}

/// Split `name` at its last `.`; a leading dot does not start an extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

/// Extract the id from a `prefix-<id>` folder name.
pub fn parse_id(name: &str, prefix: &str) -> Result<String> {
    let invalid = || BiscuitError::InvalidId {
        name: name.to_string(),
        expected_prefix: prefix.to_string(),
    };
    let (found_prefix, rest) = name.split_once('-').ok_or_else(invalid)?;
    if found_prefix != prefix {
        return Err(invalid());
    }
    // Only the id itself; any trailing entities belong to a filename.
    let id = rest.split('_').next().unwrap_or_default();
    if id.is_empty() {
        return Err(invalid());
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scans_file() {
        let params = BidsParams::parse("sub-1111_ses-aab_scans.tsv");
        assert_eq!(params.subject(), Some("1111"));
        assert_eq!(params.session(), Some("aab"));
        assert_eq!(params.suffix(), Some("scans"));
        assert_eq!(params.extension(), ".tsv");
    }

    #[test]
    fn test_parse_without_extension() {
        let params = BidsParams::parse("sub-01_ses-1_task-rest_run-01_meg");
        assert_eq!(params.run(), Some("01"));
        assert_eq!(params.extension(), "");
        assert_eq!(params.suffix(), Some("meg"));
    }

    #[test]
    fn test_parse_hidden_file() {
        let params = BidsParams::parse(".bidsignore");
        assert_eq!(params.extension(), "");
        assert_eq!(params.suffix(), Some(".bidsignore"));
    }

    #[test]
    fn test_value_keeps_inner_hyphens() {
        let params = BidsParams::parse("sub-01_acq-pre-scan_markers.mrk");
        assert_eq!(params.acquisition(), Some("pre-scan"));
    }

    #[test]
    fn test_superset_matching() {
        let raw = BidsParams::parse("sub-01_ses-1_task-a_run-1_meg.con");
        let coords = BidsParams::parse("sub-01_ses-1_coordsystem.json");
        let channels = BidsParams::parse("sub-01_ses-1_task-a_run-1_channels.tsv");
        let other_run = BidsParams::parse("sub-01_ses-1_task-a_run-2_channels.tsv");
        let extra_entity = BidsParams::parse("sub-01_ses-1_task-a_run-1_acq-x_markers.mrk");

        assert!(raw.is_superset_of(&coords));
        assert!(raw.is_superset_of(&channels));
        assert!(!raw.is_superset_of(&other_run));
        assert!(!raw.is_superset_of(&extra_entity));
        assert!(raw.is_superset_of(&raw));
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("sub-01", "sub").unwrap(), "01");
        assert_eq!(parse_id("ses-pre", "ses").unwrap(), "pre");
        assert!(parse_id("ses-1", "sub").is_err());
        assert!(parse_id("sub-", "sub").is_err());
        assert!(parse_id("subject01", "sub").is_err());
    }
}
