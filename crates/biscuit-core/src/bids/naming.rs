//! BIDS-compatible file and folder names for converted recordings.
//!
//! Each kind of output file only carries a fixed subset of entities; a
//! `scans.tsv` for example is named by subject and session only.

use crate::config::BidsConfig;
use crate::{BiscuitError, Result};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Entity values may not contain BIDS separators.
static INVALID_VALUE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-_\s/\\]").unwrap());

/// The files produced for one recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BidsFile {
    CoordSystem,
    Channels,
    /// `<entities>_<kind>.json`
    Sidecar,
    Scans,
    Events,
    /// Headshape file with the given extension (`.elp`, `.hsp`).
    Headshape(String),
    /// Raw data file with the given extension (`.con`, `.fif`, ...).
    Raw(String),
    /// Folder holding the raw data of one run.
    Folder,
}

impl BidsFile {
    /// Entities allowed in the name, besides `sub`.
    fn allowed_entities(&self) -> &'static [&'static str] {
        match self {
            BidsFile::CoordSystem => &["ses", "acq"],
            BidsFile::Channels | BidsFile::Sidecar | BidsFile::Raw(_) | BidsFile::Folder => {
                &["task", "ses", "acq", "run", "proc"]
            }
            BidsFile::Scans => &["ses"],
            BidsFile::Events => &["ses", "task"],
            BidsFile::Headshape(_) => &["ses"],
        }
    }
}

/// Builder for the BIDS names of one recording.
///
/// ```
/// use biscuit_core::bids::{BidsFile, BidsName};
///
/// let name = BidsName::new("01").session("1").task("rest").run(2);
/// assert_eq!(
///     name.filename(&BidsFile::Raw(".con".into())).unwrap(),
///     "sub-01_ses-1_task-rest_run-02_meg.con"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidsName {
    subject: String,
    session: Option<String>,
    task: Option<String>,
    acquisition: Option<String>,
    run: Option<String>,
    processing: Option<String>,
    space: Option<String>,
    recording: Option<String>,
    kind: String,
}

impl BidsName {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            session: None,
            task: None,
            acquisition: None,
            run: None,
            processing: None,
            space: None,
            recording: None,
            kind: BidsConfig::DEFAULT_KIND.to_string(),
        }
    }

    pub fn session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn acquisition(mut self, acq: impl Into<String>) -> Self {
        self.acquisition = Some(acq.into());
        self
    }

    /// Numeric runs are zero-padded to two digits.
    pub fn run(mut self, run: u32) -> Self {
        self.run = Some(format!("{:02}", run));
        self
    }

    pub fn run_label(mut self, run: impl Into<String>) -> Self {
        self.run = Some(run.into());
        self
    }

    pub fn processing(mut self, proc_label: impl Into<String>) -> Self {
        self.processing = Some(proc_label.into());
        self
    }

    pub fn space(mut self, space: impl Into<String>) -> Self {
        self.space = Some(space.into());
        self
    }

    pub fn recording(mut self, recording: impl Into<String>) -> Self {
        self.recording = Some(recording.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    fn ordered(&self) -> [(&'static str, Option<&str>); 8] {
        [
            ("sub", Some(self.subject.as_str())),
            ("ses", self.session.as_deref()),
            ("task", self.task.as_deref()),
            ("acq", self.acquisition.as_deref()),
            ("run", self.run.as_deref()),
            ("proc", self.processing.as_deref()),
            ("space", self.space.as_deref()),
            ("recording", self.recording.as_deref()),
        ]
    }

    fn validate(&self) -> Result<()> {
        if self.subject.is_empty() {
            return Err(BiscuitError::Validation {
                field: "sub".to_string(),
                message: "a subject id is required".to_string(),
            });
        }
        for (key, value) in self.ordered() {
            if let Some(value) = value {
                if value.is_empty() || INVALID_VALUE.is_match(value) {
                    return Err(BiscuitError::Validation {
                        field: key.to_string(),
                        message: format!("{:?} is not a valid BIDS label", value),
                    });
                }
            }
        }
        Ok(())
    }

    /// The BIDS file name for `file`.
    pub fn filename(&self, file: &BidsFile) -> Result<String> {
        self.validate()?;
        let allowed = file.allowed_entities();
        let fields: Vec<String> = self
            .ordered()
            .into_iter()
            .filter(|(key, _)| *key == "sub" || allowed.contains(key))
            .filter_map(|(key, value)| value.map(|v| format!("{}-{}", key, v)))
            .collect();
        let prefix = fields.join("_");

        Ok(match file {
            BidsFile::CoordSystem => format!("{}_coordsystem.json", prefix),
            BidsFile::Channels => format!("{}_channels.tsv", prefix),
            BidsFile::Sidecar => format!("{}_{}.json", prefix, self.kind),
            BidsFile::Scans => format!("{}_scans.tsv", prefix),
            BidsFile::Events => format!("{}_events.tsv", prefix),
            BidsFile::Headshape(ext) => format!("{}_headshape{}", prefix, ext),
            BidsFile::Raw(ext) => format!("{}_{}{}", prefix, self.kind, ext),
            BidsFile::Folder => format!("{}_{}", prefix, self.kind),
        })
    }

    /// `sub-<id>[/ses-<id>]`
    pub fn base_path(&self) -> PathBuf {
        let mut path = PathBuf::from(format!("sub-{}", self.subject));
        if let Some(session) = &self.session {
            path.push(format!("ses-{}", session));
        }
        path
    }

    /// Path of `file` relative to the project root.
    pub fn relative_path(&self, file: &BidsFile) -> Result<PathBuf> {
        let filename = self.filename(file)?;
        let base = self.base_path();
        Ok(match file {
            BidsFile::Scans => base.join(filename),
            BidsFile::Raw(_) => base
                .join(&self.kind)
                .join(self.filename(&BidsFile::Folder)?)
                .join(filename),
            _ => base.join(&self.kind).join(filename),
        })
    }

    /// Relative paths of the files written for one recording whose raw data
    /// has the extension `raw_ext`.
    pub fn recording_files(&self, raw_ext: &str) -> Result<Vec<(BidsFile, PathBuf)>> {
        [
            BidsFile::Raw(raw_ext.to_string()),
            BidsFile::Sidecar,
            BidsFile::Channels,
            BidsFile::Events,
            BidsFile::CoordSystem,
            BidsFile::Scans,
        ]
        .into_iter()
        .map(|file| {
            let path = self.relative_path(&file)?;
            Ok((file, path))
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BidsName {
        BidsName::new("01")
            .session("1")
            .task("rest")
            .acquisition("pre")
            .run(1)
    }

    #[test]
    fn test_file_specific_entities() {
        let name = sample();
        assert_eq!(
            name.filename(&BidsFile::Scans).unwrap(),
            "sub-01_ses-1_scans.tsv"
        );
        assert_eq!(
            name.filename(&BidsFile::CoordSystem).unwrap(),
            "sub-01_ses-1_acq-pre_coordsystem.json"
        );
        assert_eq!(
            name.filename(&BidsFile::Events).unwrap(),
            "sub-01_ses-1_task-rest_events.tsv"
        );
        assert_eq!(
            name.filename(&BidsFile::Sidecar).unwrap(),
            "sub-01_ses-1_task-rest_acq-pre_run-01_meg.json"
        );
        assert_eq!(
            name.filename(&BidsFile::Headshape(".elp".into())).unwrap(),
            "sub-01_ses-1_headshape.elp"
        );
    }

    #[test]
    fn test_relative_paths() {
        let name = sample();
        assert_eq!(
            name.relative_path(&BidsFile::Scans).unwrap(),
            PathBuf::from("sub-01/ses-1/sub-01_ses-1_scans.tsv")
        );
        assert_eq!(
            name.relative_path(&BidsFile::Channels).unwrap(),
            PathBuf::from("sub-01/ses-1/meg/sub-01_ses-1_task-rest_acq-pre_run-01_channels.tsv")
        );
        assert_eq!(
            name.relative_path(&BidsFile::Raw(".con".into())).unwrap(),
            PathBuf::from(
                "sub-01/ses-1/meg/sub-01_ses-1_task-rest_acq-pre_run-01_meg/\
                 sub-01_ses-1_task-rest_acq-pre_run-01_meg.con"
            )
        );
    }

    #[test]
    fn test_recording_files() {
        let files = sample().kind("meg").recording_files(".con").unwrap();
        assert_eq!(files.len(), 6);
        assert_eq!(files[0].0, BidsFile::Raw(".con".into()));
        assert_eq!(
            files[1].1,
            PathBuf::from("sub-01/ses-1/meg/sub-01_ses-1_task-rest_acq-pre_run-01_meg.json")
        );
        assert_eq!(
            files[5].1,
            PathBuf::from("sub-01/ses-1/sub-01_ses-1_scans.tsv")
        );
        assert!(BidsName::new("01").task("a b").recording_files(".con").is_err());
    }

    #[test]
    fn test_no_session() {
        let name = BidsName::new("07").task("words");
        assert_eq!(name.base_path(), PathBuf::from("sub-07"));
        assert_eq!(name.filename(&BidsFile::Scans).unwrap(), "sub-07_scans.tsv");
    }

    #[test]
    fn test_invalid_labels_rejected() {
        assert!(BidsName::new("0_1").filename(&BidsFile::Scans).is_err());
        assert!(BidsName::new("01")
            .task("resting-state")
            .filename(&BidsFile::Channels)
            .is_err());
        assert!(BidsName::new("").filename(&BidsFile::Scans).is_err());
    }
}
