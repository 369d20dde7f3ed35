//! Configuration for the rotation manager, loaded from TOML.
//!
//! A config file only needs the `[paths]` section; everything else falls back
//! to the defaults of the original deployment. [`Config::for_root`] builds the
//! same defaults from a single base directory.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use cron::Schedule;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layout::{PathLayout, Stream, StreamKind};
use crate::retention::{EntryMatch, RetentionPolicy, RetentionRule};

/// Second 55 of minute 59 of every hour.
pub const DEFAULT_ROTATION_SCHEDULE: &str = "55 59 * * * *";
/// Second 15 of every fifth minute.
pub const DEFAULT_SWEEP_SCHEDULE: &str = "15 */5 * * * *";
pub const DEFAULT_KEEP_DAYS: usize = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{field} = {value:?} would resolve outside its root")]
    EscapesRoot { field: String, value: String },
    #[error("Invalid schedule {expr:?} for {field}: {source}")]
    Schedule {
        field: String,
        expr: String,
        #[source]
        source: cron::error::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub paths: PathsConfig,

    /// Per-stream name overrides, keyed by stream kind.
    #[serde(default)]
    pub streams: BTreeMap<StreamKind, StreamOverride>,

    #[serde(default)]
    pub rotation: RotationConfig,

    #[serde(default)]
    pub sweep: SweepConfig,

    #[serde(default)]
    pub retention: Vec<RetentionRuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// tmpfs directory holding the pipes and the hourly index.
    pub book_root: PathBuf,

    /// Directory holding the secondary alias links.
    pub ephemeral_root: PathBuf,

    /// Base for relative retention directories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_root: Option<PathBuf>,

    /// Sub-directory of `book_root` holding the pipes. Empty by default.
    #[serde(default, skip_serializing_if = "is_empty_path")]
    pub pipe_dir: PathBuf,
}

fn is_empty_path(p: &Path) -> bool {
    p.as_os_str().is_empty()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipe: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RotationConfig {
    #[serde(default = "default_rotation_schedule")]
    pub schedule: String,

    /// Number of hourly date directories kept per stream; 0 disables pruning.
    #[serde(default = "default_keep_days")]
    pub keep_days: usize,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            schedule: default_rotation_schedule(),
            keep_days: DEFAULT_KEEP_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_schedule")]
    pub schedule: String,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            schedule: default_sweep_schedule(),
        }
    }
}

fn default_rotation_schedule() -> String {
    DEFAULT_ROTATION_SCHEDULE.to_string()
}

fn default_sweep_schedule() -> String {
    DEFAULT_SWEEP_SCHEDULE.to_string()
}

fn default_keep_days() -> usize {
    DEFAULT_KEEP_DAYS
}

/// A `[[retention]]` table as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionRuleConfig {
    pub name: String,

    /// Absolute, or relative to `paths.data_root`.
    pub dir: PathBuf,

    pub policy: RetentionPolicy,

    /// Overrides `sweep.schedule` for this rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

impl Config {
    /// Defaults for a deployment rooted at `root`: `hl_book`, `hl_tmp` and
    /// `hl` side by side, plus the two maintenance rules of that layout.
    pub fn for_root(root: &Path) -> Self {
        Self {
            paths: PathsConfig {
                book_root: root.join("hl_book"),
                ephemeral_root: root.join("hl_tmp"),
                data_root: Some(root.join("hl")),
                pipe_dir: PathBuf::new(),
            },
            streams: BTreeMap::new(),
            rotation: RotationConfig::default(),
            sweep: SweepConfig::default(),
            retention: vec![
                RetentionRuleConfig {
                    name: "periodic-abci-states".to_string(),
                    dir: PathBuf::from("periodic_abci_states"),
                    policy: RetentionPolicy::Age {
                        max_age_secs: 180,
                        matches: EntryMatch::File,
                        recursive: false,
                    },
                    schedule: None,
                },
                RetentionRuleConfig {
                    name: "evm-checkpoints".to_string(),
                    dir: PathBuf::from("hyperliquid_data/evm_db_hub_slow/checkpoint"),
                    policy: RetentionPolicy::Count { keep: 2 },
                    schedule: None,
                },
            ],
        }
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// The configured streams in their fixed order, overrides applied.
    pub fn stream_list(&self) -> Vec<Stream> {
        StreamKind::ALL
            .iter()
            .map(|kind| {
                let mut stream = Stream::new(*kind);
                if let Some(o) = self.streams.get(kind) {
                    if let Some(pipe) = &o.pipe {
                        stream.pipe = pipe.clone();
                    }
                    if let Some(index_dir) = &o.index_dir {
                        stream.index_dir = index_dir.clone();
                    }
                }
                stream
            })
            .collect()
    }

    /// Validate everything and produce the runtime view of this config.
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        for (field, path) in [
            ("paths.book_root", &self.paths.book_root),
            ("paths.ephemeral_root", &self.paths.ephemeral_root),
        ] {
            if !path.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "{} must be absolute, got {}",
                    field,
                    path.display()
                )));
            }
        }
        if let Some(data_root) = &self.paths.data_root {
            if !data_root.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "paths.data_root must be absolute, got {}",
                    data_root.display()
                )));
            }
        }

        let layout = PathLayout::new(
            &self.paths.book_root,
            &self.paths.pipe_dir,
            &self.paths.ephemeral_root,
            self.stream_list(),
        )?;

        let rotation_schedule = parse_schedule("rotation.schedule", &self.rotation.schedule)?;
        parse_schedule("sweep.schedule", &self.sweep.schedule)?;

        if self.rotation.keep_days == 1 {
            return Err(ConfigError::Invalid(
                "rotation.keep_days must be 0 (disabled) or at least 2".to_string(),
            ));
        }

        let mut rules = Vec::new();
        let mut names = HashSet::new();

        for rule in &self.retention {
            if rule.name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "retention rule with empty name".to_string(),
                ));
            }
            if !names.insert(rule.name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate retention rule '{}'",
                    rule.name
                )));
            }
            rule.policy.validate(&rule.name)?;

            let dir = if rule.dir.is_absolute() {
                rule.dir.clone()
            } else if let Some(data_root) = &self.paths.data_root {
                data_root.join(&rule.dir)
            } else {
                return Err(ConfigError::Invalid(format!(
                    "retention rule '{}' uses relative dir {} but paths.data_root is not set",
                    rule.name,
                    rule.dir.display()
                )));
            };

            let expr = rule.schedule.as_deref().unwrap_or(&self.sweep.schedule);
            let field = format!("retention.{}.schedule", rule.name);
            rules.push(RetentionRule {
                name: rule.name.clone(),
                dir,
                policy: rule.policy.clone(),
                schedule: parse_schedule(&field, expr)?,
            });
        }

        if self.rotation.keep_days > 0 {
            let schedule = parse_schedule("sweep.schedule", &self.sweep.schedule)?;
            for stream in layout.streams() {
                let name = format!("hourly-{}", stream.kind);
                if !names.insert(name.clone()) {
                    return Err(ConfigError::Invalid(format!(
                        "retention rule '{}' clashes with the hourly index rule",
                        name
                    )));
                }
                rules.push(RetentionRule {
                    name,
                    dir: layout.index_root(stream),
                    policy: RetentionPolicy::Count {
                        keep: self.rotation.keep_days,
                    },
                    schedule: schedule.clone(),
                });
            }
        }

        Ok(Settings {
            layout,
            rotation_schedule,
            rules,
        })
    }
}

/// Validated configuration, ready to hand to the scheduler.
#[derive(Debug, Clone)]
pub struct Settings {
    pub layout: PathLayout,
    pub rotation_schedule: Schedule,
    pub rules: Vec<RetentionRule>,
}

/// Parse a six- or seven-field cron expression (seconds first).
pub fn parse_schedule(field: &str, expr: &str) -> Result<Schedule, ConfigError> {
    Schedule::from_str(expr).map_err(|source| ConfigError::Schedule {
        field: field.to_string(),
        expr: expr.to_string(),
        source,
    })
}
