//! Hourly symlink index over the fixed pipes.
//!
//! Each hour slot is a symlink `hourly/<YYYYMMDD>/<H>` whose target is the
//! stream's pipe. Links are replaced with a rename so a reader resolving the
//! path sees either the old link or the new one, never nothing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use thiserror::Error;

use crate::layout::{PathLayout, Stream, StreamKind, hour_key};

#[derive(Debug, Error)]
#[error("Failed to link {kind} slot {path}: {source}")]
pub struct RotationError {
    pub kind: StreamKind,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Clone)]
pub struct HourIndexer {
    layout: PathLayout,
}

impl HourIndexer {
    pub fn new(layout: PathLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &PathLayout {
        &self.layout
    }

    /// Create or refresh the slot for `(stream, instant)`; returns the link path.
    pub fn link_hour(
        &self,
        stream: &Stream,
        instant: DateTime<Utc>,
    ) -> Result<PathBuf, RotationError> {
        let dir = self.layout.slot_dir(stream, instant);
        let link = dir.join(hour_key(instant));
        let target = self.layout.pipe_path(stream);

        let err = |path: &Path, source| RotationError {
            kind: stream.kind,
            path: path.to_path_buf(),
            source,
        };

        fs::create_dir_all(&dir).map_err(|e| err(&dir, e))?;
        replace_symlink(&target, &link).map_err(|e| err(&link, e))?;

        debug!("{}: {} -> {}", stream.kind, link.display(), target.display());
        Ok(link)
    }

    /// Link every stream for the hour containing `now` and the hour after it.
    ///
    /// Keeps going past failures so one bad slot doesn't leave the others
    /// unlinked; returns every link created and every error hit.
    pub fn link_current_and_next(
        &self,
        now: DateTime<Utc>,
    ) -> (Vec<PathBuf>, Vec<RotationError>) {
        let mut linked = Vec::new();
        let mut errors = Vec::new();

        for instant in [now, now + Duration::hours(1)] {
            for stream in self.layout.streams() {
                match self.link_hour(stream, instant) {
                    Ok(link) => linked.push(link),
                    Err(e) => {
                        warn!("{}", e);
                        errors.push(e);
                    }
                }
            }
        }

        (linked, errors)
    }

    /// Current target of the slot link, `None` if it doesn't exist.
    pub fn resolve(&self, stream: &Stream, instant: DateTime<Utc>) -> Option<PathBuf> {
        fs::read_link(self.layout.slot_path(stream, instant)).ok()
    }
}

/// Atomically make `link` a symlink to `target`.
///
/// Builds the new link beside the old one and renames it into place. A
/// leftover temporary from an interrupted run is removed first.
pub(crate) fn replace_symlink(target: &Path, link: &Path) -> io::Result<()> {
    let file_name = link
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "link has no file name"))?;
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(file_name);
    tmp_name.push(".tmp");
    let tmp = link.with_file_name(tmp_name);

    match fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    std::os::unix::fs::symlink(target, &tmp)?;
    if let Err(e) = fs::rename(&tmp, link) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}
