//! Path layout for the fixed pipes and their hourly index.
//!
//! Everything here is pure: the layout is built once from configuration and
//! afterwards only joins path components.
//!
//! ```text
//! <book-root>/fills                                      FIFO
//! <book-root>/node_fills_by_block/hourly/20260101/5      -> <book-root>/fills
//! <ephemeral-root>/node_fills_by_block                   -> <book-root>/node_fills_by_block
//! ```

use std::fmt;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// The closed set of feeds written by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamKind {
    Fills,
    OrderStatus,
    RawBookDiffs,
}

impl StreamKind {
    pub const ALL: [StreamKind; 3] = [
        StreamKind::Fills,
        StreamKind::OrderStatus,
        StreamKind::RawBookDiffs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Fills => "fills",
            StreamKind::OrderStatus => "order-status",
            StreamKind::RawBookDiffs => "raw-book-diffs",
        }
    }

    /// File name of the FIFO the producer writes to.
    pub fn default_pipe(&self) -> &'static str {
        match self {
            StreamKind::Fills => "fills",
            StreamKind::OrderStatus => "order",
            StreamKind::RawBookDiffs => "diffs",
        }
    }

    /// Directory under the book root that holds the hourly index.
    pub fn default_index_dir(&self) -> &'static str {
        match self {
            StreamKind::Fills => "node_fills_by_block",
            StreamKind::OrderStatus => "node_order_statuses_by_block",
            StreamKind::RawBookDiffs => "node_raw_book_diffs_by_block",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stream together with the names it uses on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub kind: StreamKind,
    pub pipe: String,
    pub index_dir: String,
}

impl Stream {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            pipe: kind.default_pipe().to_string(),
            index_dir: kind.default_index_dir().to_string(),
        }
    }
}

/// Date component of an hour slot: `YYYYMMDD`, always eight digits.
pub fn date_key(instant: DateTime<Utc>) -> String {
    instant.format("%Y%m%d").to_string()
}

/// Hour component of an hour slot: `0`..`23` without a leading zero.
pub fn hour_key(instant: DateTime<Utc>) -> String {
    instant.hour().to_string()
}

/// Resolved filesystem locations for every configured stream.
#[derive(Debug, Clone)]
pub struct PathLayout {
    book_root: PathBuf,
    pipe_root: PathBuf,
    ephemeral_root: PathBuf,
    streams: Vec<Stream>,
}

impl PathLayout {
    /// Build a layout, rejecting any name that would resolve outside its root.
    pub fn new(
        book_root: impl Into<PathBuf>,
        pipe_dir: impl AsRef<Path>,
        ephemeral_root: impl Into<PathBuf>,
        streams: Vec<Stream>,
    ) -> Result<Self, ConfigError> {
        let book_root = book_root.into();
        let pipe_dir = pipe_dir.as_ref();

        if pipe_dir
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(ConfigError::EscapesRoot {
                field: "paths.pipe_dir".to_string(),
                value: pipe_dir.display().to_string(),
            });
        }

        for (i, stream) in streams.iter().enumerate() {
            check_component(&format!("streams.{}.pipe", stream.kind), &stream.pipe)?;
            check_component(
                &format!("streams.{}.index_dir", stream.kind),
                &stream.index_dir,
            )?;

            for other in &streams[..i] {
                if other.kind == stream.kind {
                    return Err(ConfigError::Invalid(format!(
                        "stream '{}' is configured twice",
                        stream.kind
                    )));
                }
                if other.pipe == stream.pipe {
                    return Err(ConfigError::Invalid(format!(
                        "streams '{}' and '{}' share pipe name '{}'",
                        other.kind, stream.kind, stream.pipe
                    )));
                }
                if other.index_dir == stream.index_dir {
                    return Err(ConfigError::Invalid(format!(
                        "streams '{}' and '{}' share index directory '{}'",
                        other.kind, stream.kind, stream.index_dir
                    )));
                }
            }
        }

        let ephemeral_root = ephemeral_root.into();
        if ephemeral_root.starts_with(&book_root) || book_root.starts_with(&ephemeral_root) {
            return Err(ConfigError::Invalid(format!(
                "paths.book_root {} and paths.ephemeral_root {} must not contain each other",
                book_root.display(),
                ephemeral_root.display()
            )));
        }

        let layout = Self {
            pipe_root: book_root.join(pipe_dir),
            book_root,
            ephemeral_root,
            streams,
        };

        // Pipe provisioning replaces whatever sits at a pipe path, so no pipe
        // may land on or inside an index tree.
        for stream in &layout.streams {
            let pipe = layout.pipe_path(stream);
            for other in &layout.streams {
                if pipe.starts_with(layout.stream_root(other)) {
                    return Err(ConfigError::Invalid(format!(
                        "pipe {} of stream '{}' lies inside the index directory of stream '{}'",
                        pipe.display(),
                        stream.kind,
                        other.kind
                    )));
                }
            }
        }

        Ok(layout)
    }

    pub fn book_root(&self) -> &Path {
        &self.book_root
    }

    pub fn ephemeral_root(&self) -> &Path {
        &self.ephemeral_root
    }

    /// Directory holding the FIFOs: the book root, or `pipe_dir` beneath it.
    pub fn pipe_root(&self) -> &Path {
        &self.pipe_root
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    pub fn stream(&self, kind: StreamKind) -> Option<&Stream> {
        self.streams.iter().find(|s| s.kind == kind)
    }

    /// Fixed FIFO path the producer writes to.
    pub fn pipe_path(&self, stream: &Stream) -> PathBuf {
        self.pipe_root.join(&stream.pipe)
    }

    /// `<book-root>/<index dir>`, the directory consumers browse.
    pub fn stream_root(&self, stream: &Stream) -> PathBuf {
        self.book_root.join(&stream.index_dir)
    }

    /// `<book-root>/<index dir>/hourly`, parent of the date directories.
    pub fn index_root(&self, stream: &Stream) -> PathBuf {
        self.stream_root(stream).join("hourly")
    }

    pub fn slot_dir(&self, stream: &Stream, instant: DateTime<Utc>) -> PathBuf {
        self.index_root(stream).join(date_key(instant))
    }

    pub fn slot_path(&self, stream: &Stream, instant: DateTime<Utc>) -> PathBuf {
        self.slot_dir(stream, instant).join(hour_key(instant))
    }

    /// Secondary access point under the ephemeral root.
    pub fn alias_path(&self, stream: &Stream) -> PathBuf {
        self.ephemeral_root.join(&stream.index_dir)
    }
}

fn check_component(field: &str, value: &str) -> Result<(), ConfigError> {
    let mut components = Path::new(value).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if value.is_empty() || value.contains('/') || !single_normal {
        return Err(ConfigError::EscapesRoot {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}
