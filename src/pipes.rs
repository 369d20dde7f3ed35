//! Named-pipe provisioning.
//!
//! The object at a stream's pipe path must always be a FIFO. `ensure` checks
//! the type and replaces anything else; it never opens the pipe, so it cannot
//! block against the producer or a reader.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use thiserror::Error;

use crate::hourly::replace_symlink;
use crate::layout::{PathLayout, Stream};

/// Owner and group read-write, matching the tmpfs mount mode.
pub const PIPE_MODE: u32 = 0o660;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Parent directory {path} is missing or not a directory")]
    MissingParent { path: PathBuf },
    #[error("Failed to provision {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ProvisionError {
    fn io(path: &Path, source: io::Error) -> Self {
        ProvisionError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// What `ensure` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeAction {
    Unchanged,
    Created,
    /// Something that was not a FIFO sat at the path.
    Replaced,
}

#[derive(Debug, Clone)]
pub struct PipeProvisioner {
    layout: PathLayout,
}

impl PipeProvisioner {
    pub fn new(layout: PathLayout) -> Self {
        Self { layout }
    }

    /// Make sure the stream's pipe path holds a FIFO.
    pub fn ensure(&self, stream: &Stream) -> Result<PipeAction, ProvisionError> {
        let path = self.layout.pipe_path(stream);
        let pipe_root = self.layout.pipe_root();
        if pipe_root != self.layout.book_root() {
            check_dir(self.layout.book_root())?;
            fs::create_dir_all(pipe_root).map_err(|e| ProvisionError::io(pipe_root, e))?;
        }
        check_parent(&path)?;

        let action = match fs::symlink_metadata(&path) {
            Ok(meta) if meta.file_type().is_fifo() => return Ok(PipeAction::Unchanged),
            Ok(meta) => {
                warn!(
                    "{}: {} is not a FIFO ({:?}), replacing it",
                    stream.kind,
                    path.display(),
                    meta.file_type()
                );
                let removed = if meta.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                };
                match removed {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(ProvisionError::io(&path, e)),
                }
                PipeAction::Replaced
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => PipeAction::Created,
            Err(e) => return Err(ProvisionError::io(&path, e)),
        };

        match mkfifo(&path, PIPE_MODE) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // Lost a race against another ensure; fine if the winner made a FIFO
                let meta = fs::symlink_metadata(&path).map_err(|e| ProvisionError::io(&path, e))?;
                if meta.file_type().is_fifo() {
                    return Ok(PipeAction::Unchanged);
                }
                return Err(ProvisionError::io(&path, e));
            }
            Err(e) => return Err(ProvisionError::io(&path, e)),
        }

        // mkfifo is subject to the umask
        fs::set_permissions(&path, fs::Permissions::from_mode(PIPE_MODE))
            .map_err(|e| ProvisionError::io(&path, e))?;

        info!("{}: created FIFO {}", stream.kind, path.display());
        Ok(action)
    }

    /// Point `<ephemeral-root>/<index dir>` at `<book-root>/<index dir>`.
    pub fn ensure_alias(&self, stream: &Stream) -> Result<(), ProvisionError> {
        let alias = self.layout.alias_path(stream);
        let target = self.layout.stream_root(stream);
        check_parent(&alias)?;
        check_parent(&target)?;

        fs::create_dir_all(&target).map_err(|e| ProvisionError::io(&target, e))?;

        if let Ok(existing) = fs::read_link(&alias) {
            if existing == target {
                return Ok(());
            }
        }

        // A real directory here would shadow the alias; the rename below
        // cannot replace it, so clear it first.
        if let Ok(meta) = fs::symlink_metadata(&alias) {
            if meta.is_dir() {
                warn!(
                    "{}: replacing directory {} with alias link",
                    stream.kind,
                    alias.display()
                );
                fs::remove_dir_all(&alias).map_err(|e| ProvisionError::io(&alias, e))?;
            }
        }

        replace_symlink(&target, &alias).map_err(|e| ProvisionError::io(&alias, e))?;
        debug!(
            "{}: alias {} -> {}",
            stream.kind,
            alias.display(),
            target.display()
        );
        Ok(())
    }

    pub fn layout(&self) -> &PathLayout {
        &self.layout
    }
}

/// Whether `path` currently holds a FIFO.
pub fn is_fifo(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_fifo())
        .unwrap_or(false)
}

fn check_parent(path: &Path) -> Result<(), ProvisionError> {
    check_dir(path.parent().unwrap_or(Path::new("/")))
}

fn check_dir(dir: &Path) -> Result<(), ProvisionError> {
    if fs::metadata(dir).map(|m| m.is_dir()).unwrap_or(false) {
        Ok(())
    } else {
        Err(ProvisionError::MissingParent {
            path: dir.to_path_buf(),
        })
    }
}

fn mkfifo(path: &Path, mode: u32) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: c_path is a valid NUL-terminated string that outlives the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), mode as libc::mode_t) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
