//! Core data model for verified transfers.
//!
//! This module defines the records passed between pipeline stages:
//! - FileRecord: one enumerated file (relative path + size)
//! - DigestMapping: relative path -> digest for one tree at one point in time
//! - RunContext: per-run identity and tunables, passed explicitly to each stage
//! - TransferRequest: the resolved parameters of a copy
//! - LedgerRole, Verdict: small enums with fixed on-disk spellings

use crate::config::PipelineConfig;
use crate::fs_ops::to_relative_string;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Sentinel written to ledgers in place of a digest that could not be computed.
pub const NO_DIGEST: &str = "ERROR_NO_SHA";

/// A single regular file found under a tree root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the tree root, always `/`-separated. This is the
    /// ledger and comparison key; see [`to_relative_string`] for how names
    /// that are not valid UTF-8 are spelled.
    pub relative_path: String,

    /// The same relative path as the filesystem names it. Used for all I/O.
    #[serde(skip)]
    pub native_path: PathBuf,

    /// Size in bytes, `None` if the entry could not be stat'ed or is a symlink.
    pub size: Option<u64>,
}

impl FileRecord {
    /// Build a record from a path relative to its tree root.
    pub fn from_native(native_path: PathBuf, size: Option<u64>) -> Self {
        FileRecord {
            relative_path: to_relative_string(&native_path),
            native_path,
            size,
        }
    }
}

/// Relative path -> hex digest for one tree at one point in time.
///
/// `None` marks a file whose digest could not be computed. Iteration order is
/// lexicographic by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestMapping {
    entries: BTreeMap<String, Option<String>>,
}

impl DigestMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the digest for a path, replacing any earlier entry.
    pub fn insert(&mut self, relative_path: impl Into<String>, digest: Option<String>) {
        self.entries.insert(relative_path.into(), digest);
    }

    /// Look up a path. The outer `Option` is presence, the inner is the digest.
    pub fn get(&self, relative_path: &str) -> Option<Option<&str>> {
        self.entries.get(relative_path).map(|d| d.as_deref())
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.entries.contains_key(relative_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries that have no digest.
    pub fn unhashed_count(&self) -> usize {
        self.entries.values().filter(|d| d.is_none()).count()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }
}

impl FromIterator<(String, Option<String>)> for DigestMapping {
    fn from_iter<I: IntoIterator<Item = (String, Option<String>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for DigestMapping {
    type Item = (String, Option<String>);
    type IntoIter = btree_map::IntoIter<String, Option<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Which side of a transfer a ledger describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerRole {
    /// Computed before the copy, over the source tree.
    Source,
    /// Computed after the copy, over the destination tree.
    Destination,
}

impl LedgerRole {
    pub fn tag(&self) -> &'static str {
        match self {
            LedgerRole::Source => "source",
            LedgerRole::Destination => "destination",
        }
    }

    /// Ledger file name for this role and run stamp: `<role>_<stamp>.txt`.
    pub fn ledger_file_name(&self, stamp: &str) -> String {
        format!("{}_{}.txt", self.tag(), stamp)
    }
}

impl fmt::Display for LedgerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Manifest file name for a run stamp: `manifest_<stamp>.json`.
pub fn manifest_file_name(stamp: &str) -> String {
    format!("manifest_{}.json", stamp)
}

/// Returns true if `s` has the shape `YYYYMMDD_HHMMSS`.
pub fn is_run_stamp(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 15
        && bytes[8] == b'_'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 8 || b.is_ascii_digit())
}

/// Returns true if a file name is one of the artifacts a run writes:
/// `source_<stamp>.txt`, `destination_<stamp>.txt` or `manifest_<stamp>.json`.
///
/// This is the default exclusion predicate for enumeration and copy, so
/// artifacts from this or earlier runs are never treated as payload.
pub fn is_operational_artifact(name: &str) -> bool {
    let stamped = |prefix: &str, suffix: &str| {
        name.strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(suffix))
            .is_some_and(is_run_stamp)
    };
    stamped("source_", ".txt") || stamped("destination_", ".txt") || stamped("manifest_", ".json")
}

/// Overall judgment of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
        }
    }
}

/// Current local time as ISO-8601 with seconds precision and UTC offset.
pub fn local_timestamp() -> String {
    iso_seconds(&Local::now())
}

fn iso_seconds(at: &DateTime<Local>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

/// Per-run identity and tunables.
///
/// Built once by the caller and passed by reference to every stage.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Correlates log lines of one run
    pub run_id: Uuid,

    /// Operator identity recorded in ledgers and the manifest.
    pub technician: String,

    /// Local wall-clock time the run started.
    pub created_at: DateTime<Local>,

    /// `YYYYMMDD_HHMMSS` derived from `created_at`; makes artifact names unique per run.
    pub stamp: String,

    pub config: PipelineConfig,
}

impl RunContext {
    /// Create a context stamped with the current local time.
    pub fn new(technician: impl Into<String>, config: PipelineConfig) -> Self {
        Self::at(technician, config, Local::now())
    }

    /// Create a context stamped with a specific time.
    pub fn at(
        technician: impl Into<String>,
        config: PipelineConfig,
        created_at: DateTime<Local>,
    ) -> Self {
        RunContext {
            run_id: Uuid::new_v4(),
            technician: technician.into(),
            stamp: created_at.format("%Y%m%d_%H%M%S").to_string(),
            created_at,
            config,
        }
    }

    /// ISO-8601 creation time with seconds precision and UTC offset.
    pub fn created_at_iso(&self) -> String {
        iso_seconds(&self.created_at)
    }
}

/// Resolved parameters of a verified copy.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Top folder to copy.
    pub source: PathBuf,

    /// Directory the top folder is copied into.
    pub destination_parent: PathBuf,

    /// Consent to copy into an already existing destination root.
    pub allow_overwrite: bool,
}
