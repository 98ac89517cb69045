//! File categories used to decide how a file is merged.

use serde::Serialize;
use std::fmt;

/// Raw MEG data extensions (KIT, Elekta, CTF).
const RAW_EXTENSIONS: &[&str] = &[".con", ".fif", ".sqd", ".ds"];

/// Category of a file inside a BIDS project, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Participants,
    Scans,
    Description,
    CoordSystem,
    Channels,
    Events,
    Sidecar,
    Markers,
    Raw,
    Readme,
    Headshape,
    Other,
}

impl FileCategory {
    pub fn classify(file_name: &str) -> Self {
        let ends = |suffix: &str| file_name.ends_with(suffix);

        if ends("participants.tsv") {
            FileCategory::Participants
        } else if ends("scans.tsv") {
            FileCategory::Scans
        } else if ends("description.json") {
            FileCategory::Description
        } else if ends("coordsystem.json") {
            FileCategory::CoordSystem
        } else if ends("channels.tsv") {
            FileCategory::Channels
        } else if ends("events.tsv") {
            FileCategory::Events
        } else if ends("_meg.json") {
            FileCategory::Sidecar
        } else if ends(".mrk") {
            FileCategory::Markers
        } else if RAW_EXTENSIONS.iter().any(|ext| ends(ext)) {
            FileCategory::Raw
        } else if file_name.starts_with("README") {
            FileCategory::Readme
        } else if ends(".elp") || ends(".hsp") {
            FileCategory::Headshape
        } else {
            FileCategory::Other
        }
    }

    /// Categories that may exist in both trees without being a conflict.
    pub fn is_mergeable(self) -> bool {
        matches!(
            self,
            FileCategory::Participants
                | FileCategory::Scans
                | FileCategory::Description
                | FileCategory::Readme
        )
    }

    /// Tables merged row-wise rather than copied.
    pub fn is_table(self) -> bool {
        matches!(self, FileCategory::Participants | FileCategory::Scans)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileCategory::Participants => "participants",
            FileCategory::Scans => "scans",
            FileCategory::Description => "description",
            FileCategory::CoordSystem => "coordsystem",
            FileCategory::Channels => "channels",
            FileCategory::Events => "events",
            FileCategory::Sidecar => "sidecar",
            FileCategory::Markers => "markers",
            FileCategory::Raw => "raw",
            FileCategory::Readme => "readme",
            FileCategory::Headshape => "headshape",
            FileCategory::Other => "other",
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
