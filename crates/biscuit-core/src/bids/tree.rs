//! The BIDS hierarchy: projects, subjects, sessions and scans.
//!
//! Records are stored in flat ordered maps keyed by path-derived keys, so
//! a child never holds a pointer to its parent. Parents are resolved by
//! truncating the key (`ScanKey` -> `SessionKey` -> `SubjectKey` ->
//! project id).
//!
//! # Layout
//!
//! ```text
//! <project>/participants.tsv
//! <project>/sub-<id>/ses-<id>/sub-<id>_ses-<id>_scans.tsv
//! <project>/sub-<id>/ses-<id>/<kind>/<raw files, sidecars, ...>
//! ```

use crate::bids::entities::{parse_id, BidsParams};
use crate::bids::tsv::TsvTable;
use crate::config::BidsConfig;
use crate::metadata::atomic_read_json;
use crate::{BiscuitError, Result};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Key of a subject within a tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubjectKey {
    pub project: String,
    pub subject: String,
}

impl SubjectKey {
    pub fn new(project: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            subject: subject.into(),
        }
    }

    pub fn session(&self, session: impl Into<String>) -> SessionKey {
        SessionKey {
            project: self.project.clone(),
            subject: self.subject.clone(),
            session: session.into(),
        }
    }

    /// `participant_id` value of this subject.
    pub fn participant_id(&self) -> String {
        format!("{}-{}", BidsConfig::SUBJECT_PREFIX, self.subject)
    }
}

/// Key of a session within a tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionKey {
    pub project: String,
    pub subject: String,
    pub session: String,
}

impl SessionKey {
    pub fn subject_key(&self) -> SubjectKey {
        SubjectKey::new(&self.project, &self.subject)
    }

    pub fn scan(&self, filename: impl Into<String>) -> ScanKey {
        ScanKey {
            session: self.clone(),
            filename: filename.into(),
        }
    }
}

/// Key of a scan: its session plus the `filename` entry of `scans.tsv`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScanKey {
    pub session: SessionKey,
    /// Path relative to the session folder, `/`-separated.
    pub filename: String,
}

/// Any node of the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKey {
    Project(String),
    Subject(SubjectKey),
    Session(SessionKey),
    Scan(ScanKey),
}

/// A BIDS project folder.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub id: String,
    pub path: PathBuf,
    /// `Name` from `dataset_description.json`.
    pub name: Option<String>,
    pub bids_version: Option<String>,
    pub readme: Option<PathBuf>,
    pub participants: TsvTable,
}

/// A `sub-<id>` folder and its `participants.tsv` row.
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub key: SubjectKey,
    pub path: PathBuf,
    pub age: String,
    pub sex: String,
    pub group: String,
}

/// A `ses-<id>` folder.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub key: SessionKey,
    pub path: PathBuf,
    /// Names of the data-type subfolders (`meg`, `anat`, ...).
    pub recording_types: Vec<String>,
    pub scans_files: Vec<PathBuf>,
}

/// One raw recording listed in a session's `scans.tsv`.
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    pub key: ScanKey,
    pub raw_file: PathBuf,
    pub acq_time: Option<NaiveDateTime>,
    pub task: Option<String>,
    pub run: Option<String>,
    pub acquisition: Option<String>,
    /// Data kind suffix of the raw file (`meg`).
    pub suffix: Option<String>,
    /// Folder holding the scan's metadata files.
    pub folder: PathBuf,
    pub sidecar: Option<PathBuf>,
    /// Other metadata files matching the scan's entities, by suffix.
    pub associated_files: BTreeMap<String, Vec<PathBuf>>,
}

impl Scan {
    pub fn associated(&self, suffix: &str) -> &[PathBuf] {
        self.associated_files
            .get(suffix)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Filter for [`BidsTree::find_scans`]. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanQuery {
    pub project: Option<String>,
    pub subject: Option<String>,
    pub session: Option<String>,
    pub task: Option<String>,
    pub acquisition: Option<String>,
    pub run: Option<String>,
}

impl ScanQuery {
    pub fn matches(&self, scan: &Scan) -> bool {
        fn check(want: &Option<String>, have: Option<&str>) -> bool {
            want.as_deref().map_or(true, |w| have == Some(w))
        }
        check(&self.project, Some(&scan.key.session.project))
            && check(&self.subject, Some(&scan.key.session.subject))
            && check(&self.session, Some(&scan.key.session.session))
            && check(&self.task, scan.task.as_deref())
            && check(&self.acquisition, scan.acquisition.as_deref())
            && check(&self.run, scan.run.as_deref())
    }
}

/// A parsed folder of one or more BIDS projects.
#[derive(Debug, Clone, PartialEq)]
pub struct BidsTree {
    root: PathBuf,
    projects: BTreeMap<String, Project>,
    subjects: BTreeMap<SubjectKey, Subject>,
    sessions: BTreeMap<SessionKey, Session>,
    scans: BTreeMap<ScanKey, Scan>,
}

impl BidsTree {
    /// Parse `root`.
    ///
    /// When `root` is itself a project (it has a `participants.tsv` or
    /// `sub-*` folders) it is the only project; otherwise each subfolder
    /// that parses as a project is added and the others are skipped.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(BiscuitError::NotADirectory(root));
        }

        let mut tree = Self::empty(root.clone());
        if looks_like_project(&root)? {
            tree.insert_project(&root)?;
            return Ok(tree);
        }

        for entry in list_dir(&root)? {
            if !entry.is_dir {
                continue;
            }
            match tree.insert_project(&entry.path) {
                Ok(()) => {}
                Err(e) if e.is_structural() => {
                    debug!("Skipping {}: {}", entry.path.display(), e);
                }
                Err(e) => return Err(e),
            }
        }

        if tree.projects.is_empty() {
            return Err(BiscuitError::mapping(
                &root,
                "the folder does not contain any valid BIDS project",
            ));
        }
        Ok(tree)
    }

    /// Parse a single project folder; structural problems are errors.
    pub fn open_project(project_dir: impl Into<PathBuf>) -> Result<Self> {
        let project_dir = project_dir.into();
        if !project_dir.is_dir() {
            return Err(BiscuitError::NotADirectory(project_dir));
        }
        let mut tree = Self::empty(project_dir.clone());
        tree.insert_project(&project_dir)?;
        Ok(tree)
    }

    fn empty(root: PathBuf) -> Self {
        Self {
            root,
            projects: BTreeMap::new(),
            subjects: BTreeMap::new(),
            sessions: BTreeMap::new(),
            scans: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn projects(&self) -> impl Iterator<Item = &Project> {
        self.projects.values()
    }

    pub fn subjects(&self) -> impl Iterator<Item = &Subject> {
        self.subjects.values()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn scans(&self) -> impl Iterator<Item = &Scan> {
        self.scans.values()
    }

    pub fn project(&self, id: &str) -> Result<&Project> {
        self.projects
            .get(id)
            .ok_or_else(|| BiscuitError::NoProject(id.to_string()))
    }

    pub fn subject(&self, key: &SubjectKey) -> Result<&Subject> {
        self.subjects
            .get(key)
            .ok_or_else(|| BiscuitError::NoSubject {
                project: key.project.clone(),
                subject: key.subject.clone(),
            })
    }

    pub fn session(&self, key: &SessionKey) -> Result<&Session> {
        self.sessions
            .get(key)
            .ok_or_else(|| BiscuitError::NoSession {
                subject: key.subject.clone(),
                session: key.session.clone(),
            })
    }

    pub fn scan(&self, key: &ScanKey) -> Result<&Scan> {
        self.scans.get(key).ok_or_else(|| BiscuitError::NoScan {
            session: key.session.session.clone(),
            filename: key.filename.clone(),
        })
    }

    pub fn subjects_of<'a>(&'a self, project: &'a str) -> impl Iterator<Item = &'a Subject> + 'a {
        self.subjects
            .values()
            .filter(move |s| s.key.project == project)
    }

    pub fn sessions_of<'a>(
        &'a self,
        subject: &'a SubjectKey,
    ) -> impl Iterator<Item = &'a Session> + 'a {
        self.sessions
            .values()
            .filter(move |s| s.key.project == subject.project && s.key.subject == subject.subject)
    }

    pub fn scans_of<'a>(&'a self, session: &'a SessionKey) -> impl Iterator<Item = &'a Scan> + 'a {
        self.scans
            .values()
            .filter(move |s| &s.key.session == session)
    }

    /// Project a subject belongs to.
    pub fn project_of(&self, subject: &SubjectKey) -> Result<&Project> {
        self.project(&subject.project)
    }

    /// Subject a session belongs to.
    pub fn subject_of(&self, session: &SessionKey) -> Result<&Subject> {
        self.subject(&session.subject_key())
    }

    /// Session a scan belongs to.
    pub fn session_of(&self, scan: &ScanKey) -> Result<&Session> {
        self.session(&scan.session)
    }

    /// All scans matching `query`, in key order.
    pub fn find_scans<'a>(&'a self, query: &'a ScanQuery) -> impl Iterator<Item = &'a Scan> + 'a {
        self.scans.values().filter(move |s| query.matches(s))
    }

    /// The node whose folder (or raw file) is `path`, if any.
    pub fn locate(&self, path: &Path) -> Option<NodeKey> {
        if let Some(p) = self.projects.values().find(|p| p.path == path) {
            return Some(NodeKey::Project(p.id.clone()));
        }
        if let Some(s) = self.subjects.values().find(|s| s.path == path) {
            return Some(NodeKey::Subject(s.key.clone()));
        }
        if let Some(s) = self.sessions.values().find(|s| s.path == path) {
            return Some(NodeKey::Session(s.key.clone()));
        }
        self.scans
            .values()
            .find(|s| s.raw_file == path)
            .map(|s| NodeKey::Scan(s.key.clone()))
    }

    // ========================================
    // Parsing
    // ========================================

    /// Parse one project folder and add all of its records, or nothing.
    fn insert_project(&mut self, dir: &Path) -> Result<()> {
        let parsed = ParsedProject::parse(dir)?;
        debug!(
            "Parsed project {} ({} subjects, {} sessions, {} scans)",
            parsed.project.id,
            parsed.subjects.len(),
            parsed.sessions.len(),
            parsed.scans.len()
        );
        self.projects
            .insert(parsed.project.id.clone(), parsed.project);
        self.subjects
            .extend(parsed.subjects.into_iter().map(|s| (s.key.clone(), s)));
        self.sessions
            .extend(parsed.sessions.into_iter().map(|s| (s.key.clone(), s)));
        self.scans
            .extend(parsed.scans.into_iter().map(|s| (s.key.clone(), s)));
        Ok(())
    }
}

struct ParsedProject {
    project: Project,
    subjects: Vec<Subject>,
    sessions: Vec<Session>,
    scans: Vec<Scan>,
}

impl ParsedProject {
    fn parse(dir: &Path) -> Result<Self> {
        let id = dir_name(dir);
        let entries = list_dir(dir)?;

        let subject_dirs: Vec<&DirItem> = entries
            .iter()
            .filter(|e| e.is_dir && e.name.starts_with("sub-"))
            .collect();
        if subject_dirs.is_empty() {
            return Err(BiscuitError::mapping(dir, "project has no subjects"));
        }

        let participants_path = dir.join(BidsConfig::PARTICIPANTS_FILENAME);
        if !participants_path.is_file() {
            return Err(BiscuitError::mapping(
                dir,
                "project has no participants.tsv",
            ));
        }
        let participants = TsvTable::read(&participants_path)?;

        let (name, bids_version) = read_description(&dir.join(BidsConfig::DESCRIPTION_FILENAME));
        let readme = entries
            .iter()
            .find(|e| !e.is_dir && e.name.to_ascii_uppercase().starts_with("README"))
            .map(|e| e.path.clone());

        let mut parsed = ParsedProject {
            project: Project {
                id: id.clone(),
                path: dir.to_path_buf(),
                name,
                bids_version,
                readme,
                participants,
            },
            subjects: Vec::new(),
            sessions: Vec::new(),
            scans: Vec::new(),
        };

        for subject_dir in subject_dirs {
            parsed.parse_subject(&id, &subject_dir.path)?;
        }
        Ok(parsed)
    }

    fn parse_subject(&mut self, project_id: &str, dir: &Path) -> Result<()> {
        let subject_id = parse_id(&dir_name(dir), BidsConfig::SUBJECT_PREFIX)?;
        let key = SubjectKey::new(project_id, subject_id);

        let participants = &self.project.participants;
        let row = participants.find_row(BidsConfig::PARTICIPANT_ID_COLUMN, &key.participant_id());
        let field = |column: &str| {
            row.and_then(|r| participants.get(r, column))
                .unwrap_or(BidsConfig::NOT_AVAILABLE)
                .to_string()
        };
        let subject = Subject {
            key: key.clone(),
            path: dir.to_path_buf(),
            age: field("age"),
            sex: field("sex"),
            group: field("group"),
        };

        let session_dirs: Vec<DirItem> = list_dir(dir)?
            .into_iter()
            .filter(|e| e.is_dir && e.name.starts_with("ses-"))
            .collect();
        if session_dirs.is_empty() {
            return Err(BiscuitError::mapping(dir, "subject has no sessions"));
        }

        self.subjects.push(subject);
        for session_dir in session_dirs {
            self.parse_session(&key, &session_dir.path)?;
        }
        Ok(())
    }

    fn parse_session(&mut self, subject: &SubjectKey, dir: &Path) -> Result<()> {
        let session_id = parse_id(&dir_name(dir), BidsConfig::SESSION_PREFIX)?;
        let key = subject.session(session_id);

        let mut recording_types = Vec::new();
        let mut scans_files = Vec::new();
        let mut scans = Vec::new();

        for entry in list_dir(dir)? {
            if entry.is_dir {
                recording_types.push(entry.name);
                continue;
            }
            let params = BidsParams::parse(&entry.name);
            if params.suffix() != Some(BidsConfig::SCANS_SUFFIX) || params.extension() != ".tsv" {
                continue;
            }
            let table = TsvTable::read(&entry.path)?;
            if !table.has_column(BidsConfig::FILENAME_COLUMN) {
                return Err(BiscuitError::mapping(
                    &entry.path,
                    "scans file has no filename column",
                ));
            }
            for row in 0..table.len() {
                let filename = table
                    .get(row, BidsConfig::FILENAME_COLUMN)
                    .unwrap_or_default()
                    .replace('\\', "/");
                let acq_time = table
                    .get(row, BidsConfig::ACQ_TIME_COLUMN)
                    .and_then(parse_acq_time);
                scans.push(parse_scan(&key, dir, &filename, acq_time));
            }
            scans_files.push(entry.path);
        }

        if scans.is_empty() {
            return Err(BiscuitError::mapping(dir, "session has no scans"));
        }

        self.sessions.push(Session {
            key,
            path: dir.to_path_buf(),
            recording_types,
            scans_files,
        });
        self.scans.extend(scans);
        Ok(())
    }
}

fn parse_scan(
    session: &SessionKey,
    session_dir: &Path,
    filename: &str,
    acq_time: Option<NaiveDateTime>,
) -> Scan {
    let raw_file = session_dir.join(filename);
    let raw_name = raw_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let raw_params = BidsParams::parse(&raw_name);

    // `meg/<raw>` or, for KIT data, `meg/<run folder>/<raw>`.
    let first_component = Path::new(filename)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .next();
    let folder = match first_component {
        Some(part) if Path::new(filename).components().count() > 1 => session_dir.join(part),
        _ => session_dir.to_path_buf(),
    };

    let mut associated_files: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    let mut sidecar = None;
    match list_dir(&folder) {
        Ok(entries) => {
            for entry in entries {
                if entry.is_dir || entry.path == raw_file {
                    continue;
                }
                let params = BidsParams::parse(&entry.name);
                let Some(suffix) = params.suffix() else {
                    continue;
                };
                if !raw_params.is_superset_of(&params) {
                    continue;
                }
                if params.extension() == ".json" && Some(suffix) == raw_params.suffix() {
                    sidecar = Some(entry.path);
                } else {
                    associated_files
                        .entry(suffix.to_string())
                        .or_default()
                        .push(entry.path);
                }
            }
        }
        Err(e) => warn!("Could not list scan folder {}: {}", folder.display(), e),
    }

    Scan {
        key: session.scan(filename),
        raw_file,
        acq_time,
        task: raw_params.task().map(str::to_string),
        run: raw_params.run().map(str::to_string),
        acquisition: raw_params.acquisition().map(str::to_string),
        suffix: raw_params.suffix().map(str::to_string),
        folder,
        sidecar,
        associated_files,
    }
}

/// Parse an `acq_time` cell; `n/a` and unparseable values give `None`.
pub fn parse_acq_time(value: &str) -> Option<NaiveDateTime> {
    if value == BidsConfig::NOT_AVAILABLE {
        return None;
    }
    NaiveDateTime::parse_from_str(value, BidsConfig::ACQ_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

fn read_description(path: &Path) -> (Option<String>, Option<String>) {
    match atomic_read_json::<serde_json::Value>(path) {
        Ok(Some(value)) => {
            let field = |key: &str| value.get(key).and_then(|v| v.as_str()).map(str::to_string);
            (field("Name"), field("BIDSVersion"))
        }
        Ok(None) => (None, None),
        Err(e) => {
            warn!("Ignoring unreadable {}: {}", path.display(), e);
            (None, None)
        }
    }
}

/// True when `dir` itself holds a project rather than a set of projects.
fn looks_like_project(dir: &Path) -> Result<bool> {
    if dir.join(BidsConfig::PARTICIPANTS_FILENAME).is_file() {
        return Ok(true);
    }
    Ok(list_dir(dir)?
        .iter()
        .any(|e| e.is_dir && e.name.starts_with("sub-")))
}

struct DirItem {
    name: String,
    path: PathBuf,
    is_dir: bool,
}

/// Immediate children of `dir`, sorted by name.
fn list_dir(dir: &Path) -> Result<Vec<DirItem>> {
    let mut items = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            match e.into_io_error() {
                Some(io) => BiscuitError::io_with_path(io, path),
                None => BiscuitError::Other(format!("Failed to list {}", path.display())),
            }
        })?;
        items.push(DirItem {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path().to_path_buf(),
            is_dir: entry.file_type().is_dir(),
        });
    }
    Ok(items)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ========================================
// Display
// ========================================

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProjectID: {}", self.id)?;
        if let Some(name) = &self.name {
            write!(f, " ({})", name)?;
        }
        Ok(())
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sub-{} [age: {}, sex: {}, group: {}]",
            self.key.subject, self.age, self.sex, self.group
        )
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ses-{}", self.key.session)?;
        if !self.recording_types.is_empty() {
            write!(f, " [{}]", self.recording_types.join(", "))?;
        }
        Ok(())
    }
}

impl fmt::Display for Scan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key.filename)?;
        match self.acq_time {
            Some(t) => write!(f, " @ {}", t.format(BidsConfig::ACQ_TIME_FORMAT)),
            None => write!(f, " @ {}", BidsConfig::NOT_AVAILABLE),
        }
    }
}

impl fmt::Display for BidsTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "BIDS folder {} containing {} project(s)",
            self.root.display(),
            self.projects.len()
        )?;
        for project in self.projects.values() {
            writeln!(f, "{}", project)?;
            for subject in self.subjects_of(&project.id) {
                writeln!(f, "  {}", subject)?;
                for session in self.sessions_of(&subject.key) {
                    let count = self.scans_of(&session.key).count();
                    writeln!(f, "    {} ({} scans)", session, count)?;
                    for scan in self.scans_of(&session.key) {
                        writeln!(f, "      {}", scan)?;
                    }
                }
            }
        }
        Ok(())
    }
}
