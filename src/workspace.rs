// src/workspace.rs

//! Per-session scratch files.
//!
//! Every session owns `<root>/<session id>/`, holding the submitted source
//! (`main.<ext>`) and the compiled artifact (`main.out`). Names derive from
//! the session id only, so concurrent sessions never collide.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::{LiverunError, Result};
use crate::session::SessionId;

const SOURCE_STEM: &str = "main";
const BINARY_NAME: &str = "main.out";

#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    source_path: Option<PathBuf>,
    binary_path: PathBuf,
}

impl Workspace {
    /// Create the session's directory under `root`.
    pub fn prepare(root: &Path, session_id: &SessionId) -> Result<Self> {
        let dir = root.join(session_id.to_string());
        fs::create_dir_all(&dir).map_err(|source| LiverunError::WorkspaceError {
            path: dir.clone(),
            source,
        })?;

        let binary_path = dir.join(BINARY_NAME);
        debug!(dir = %dir.display(), "workspace prepared");

        Ok(Self {
            dir,
            source_path: None,
            binary_path,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Path of the most recently written source file.
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Write (or overwrite) the source file for a toolchain extension.
    ///
    /// Switching extension removes the previous source file.
    pub fn write_source(&mut self, ext: &str, code: &[u8]) -> Result<PathBuf> {
        let path = self.dir.join(format!("{SOURCE_STEM}.{ext}"));

        if let Some(previous) = &self.source_path {
            if *previous != path {
                remove_if_present(previous)?;
                self.source_path = None;
            }
        }

        fs::write(&path, code).map_err(|source| LiverunError::WorkspaceError {
            path: path.clone(),
            source,
        })?;

        self.source_path = Some(path.clone());
        Ok(path)
    }

    /// Delete the compiled artifact if present.
    pub fn cleanup_binary(&self) -> Result<()> {
        remove_if_present(&self.binary_path)
    }

    /// Delete source and artifact if present. Safe to call repeatedly.
    pub fn cleanup(&mut self) -> Result<()> {
        let source = match self.source_path.take() {
            Some(path) => remove_if_present(&path),
            None => Ok(()),
        };
        let binary = self.cleanup_binary();
        source.and(binary)
    }

    /// Remove everything, including the session directory.
    pub fn destroy(mut self) -> Result<()> {
        self.cleanup()?;
        remove_dir_if_present(&self.dir)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        // `destroy` already removed the directory on the normal path.
        if self.dir.exists() {
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                warn!(dir = %self.dir.display(), error = %e, "failed to remove workspace on drop");
            }
        }
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LiverunError::WorkspaceError {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn remove_dir_if_present(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LiverunError::WorkspaceError {
            path: path.to_path_buf(),
            source,
        }),
    }
}
