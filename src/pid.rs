use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Debug, thiserror::Error)]
pub enum PidError {
    #[error("Can't remove pid file {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Can't create pid file {}: {source}", .path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Holds this process's pid on disk until [`PidFile::remove`].
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Writes the pid, replacing a file left behind by an earlier run.
    pub fn create(path: &Path) -> Result<Self, PidError> {
        if path.is_file() {
            fs::remove_file(path).map_err(|source| PidError::Remove {
                path: path.to_owned(),
                source,
            })?;
        }
        fs::write(path, format!("{}\n", process::id())).map_err(|source| PidError::Create {
            path: path.to_owned(),
            source,
        })?;
        Ok(Self {
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(self) -> Result<(), PidError> {
        if !self.path.is_file() {
            return Ok(());
        }
        fs::remove_file(&self.path).map_err(|source| PidError::Remove {
            path: self.path,
            source,
        })
    }
}
