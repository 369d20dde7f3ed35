//! Retention sweeps: age-based pruning of files and symlinks, and
//! count-based pruning of checkpoint-style child directories.
//!
//! A sweep never fails as a whole. Entries that cannot be removed are
//! collected in the [`SweepReport`] and the sweep moves on; the next
//! scheduled sweep picks up whatever was left behind.

use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use cron::Schedule;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::ConfigError;

/// Which directory entries an age rule considers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryMatch {
    /// Regular files only.
    #[default]
    File,
    Symlink,
    Both,
}

impl EntryMatch {
    fn accepts(&self, file_type: &fs::FileType) -> bool {
        match self {
            EntryMatch::File => file_type.is_file(),
            EntryMatch::Symlink => file_type.is_symlink(),
            EntryMatch::Both => file_type.is_file() || file_type.is_symlink(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Delete matching entries last modified more than `max_age_secs` ago.
    Age {
        max_age_secs: u64,
        #[serde(rename = "match", default)]
        matches: EntryMatch,
        /// Descend into subdirectories. Directories themselves are kept.
        #[serde(default)]
        recursive: bool,
    },
    /// Keep the `keep` newest child directories, ordered by name.
    Count { keep: usize },
}

impl RetentionPolicy {
    pub(crate) fn validate(&self, rule: &str) -> Result<(), ConfigError> {
        match self {
            RetentionPolicy::Age { max_age_secs: 0, .. } => Err(ConfigError::Invalid(format!(
                "retention rule '{}': max_age_secs must be greater than 0",
                rule
            ))),
            RetentionPolicy::Count { keep: 0 } => Err(ConfigError::Invalid(format!(
                "retention rule '{}': keep must be at least 1",
                rule
            ))),
            _ => Ok(()),
        }
    }
}

/// A validated retention rule.
#[derive(Debug, Clone)]
pub struct RetentionRule {
    pub name: String,
    pub dir: PathBuf,
    pub policy: RetentionPolicy,
    pub schedule: Schedule,
}

/// An entry that could not be listed or removed.
#[derive(Debug, Error)]
#[error("Failed to sweep {path}: {source}")]
pub struct SweepEntryError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Outcome of one rule's sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub rule: String,
    pub removed: Vec<PathBuf>,
    /// Entries that disappeared between listing and deletion.
    pub vanished: usize,
    pub errors: Vec<SweepEntryError>,
}

impl SweepReport {
    fn new(rule: &str) -> Self {
        Self {
            rule: rule.to_string(),
            ..Self::default()
        }
    }

    fn record(&mut self, path: PathBuf, result: io::Result<()>) {
        match result {
            Ok(()) => {
                debug!("retention[{}]: removed {}", self.rule, path.display());
                self.removed.push(path);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.vanished += 1,
            Err(source) => {
                warn!(
                    "retention[{}]: could not remove {}: {}",
                    self.rule,
                    path.display(),
                    source
                );
                self.errors.push(SweepEntryError { path, source });
            }
        }
    }

    fn fail(&mut self, path: PathBuf, source: io::Error) {
        warn!(
            "retention[{}]: could not read {}: {}",
            self.rule,
            path.display(),
            source
        );
        self.errors.push(SweepEntryError { path, source });
    }
}

/// Stateless executor for [`RetentionRule`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionSweeper;

impl RetentionSweeper {
    pub fn new() -> Self {
        Self
    }

    pub fn sweep(&self, rule: &RetentionRule) -> SweepReport {
        self.sweep_at(rule, SystemTime::now())
    }

    /// Sweep `rule` as if the current time were `now`.
    pub fn sweep_at(&self, rule: &RetentionRule, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::new(&rule.name);

        match fs::symlink_metadata(&rule.dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                report.fail(
                    rule.dir.clone(),
                    io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
                );
                return report;
            }
            // Nothing to sweep yet
            Err(e) if e.kind() == io::ErrorKind::NotFound => return report,
            Err(e) => {
                report.fail(rule.dir.clone(), e);
                return report;
            }
        }

        match &rule.policy {
            RetentionPolicy::Age {
                max_age_secs,
                matches,
                recursive,
            } => sweep_by_age(
                &rule.dir,
                now,
                Duration::from_secs(*max_age_secs),
                *matches,
                *recursive,
                &mut report,
            ),
            RetentionPolicy::Count { keep } => sweep_by_count(&rule.dir, *keep, &mut report),
        }

        if !report.removed.is_empty() || !report.errors.is_empty() {
            info!(
                "retention[{}]: removed {} entries from {} ({} errors)",
                rule.name,
                report.removed.len(),
                rule.dir.display(),
                report.errors.len()
            );
        }
        report
    }
}

fn sweep_by_age(
    dir: &Path,
    now: SystemTime,
    max_age: Duration,
    matches: EntryMatch,
    recursive: bool,
    report: &mut SweepReport,
) {
    let cutoff = now.checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);
    let max_depth = if recursive { usize::MAX } else { 1 };

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(false)
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                match e.into_io_error() {
                    Some(io) if io.kind() == io::ErrorKind::NotFound => report.vanished += 1,
                    Some(io) => report.fail(path, io),
                    None => report.fail(path, io::Error::other("filesystem loop")),
                }
                continue;
            }
        };

        if !matches.accepts(&entry.file_type()) {
            continue;
        }

        // walkdir does not follow links here, so this is the entry's own mtime
        let modified = match entry.metadata().map_err(io::Error::from).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                report.vanished += 1;
                continue;
            }
            Err(e) => {
                report.fail(entry.path().to_path_buf(), e);
                continue;
            }
        };

        if modified < cutoff {
            let path = entry.into_path();
            let result = fs::remove_file(&path);
            report.record(path, result);
        }
    }
}

/// Newest first: numeric names by value, ranked above non-numeric names,
/// which sort lexicographically.
fn newest_first(a: &str, b: &str) -> Ordering {
    let key = |s: &str| s.parse::<u64>().ok();
    key(b).cmp(&key(a)).then_with(|| b.cmp(a))
}

fn sweep_by_count(dir: &Path, keep: usize, report: &mut SweepReport) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            report.fail(dir.to_path_buf(), e);
            return;
        }
    };

    let mut children: Vec<(String, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                report.fail(dir.to_path_buf(), e);
                continue;
            }
        };
        // Only real directories; a symlink to a directory is not a checkpoint
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => {}
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                report.fail(entry.path(), e);
                continue;
            }
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        children.push((name, entry.path()));
    }

    children.sort_by(|a, b| newest_first(&a.0, &b.0));

    for (_, path) in children.into_iter().skip(keep) {
        let result = fs::remove_dir_all(&path);
        report.record(path, result);
    }
}
