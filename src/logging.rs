use crate::config::LOG_FILE_NAME;
use crate::settings::Settings;
use log::LevelFilter;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Can't open/create log file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Can't chmod log file {}: {source}", .path.display())]
    Chmod {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Sends all logging to `<logdir>/app.log`. `-v` and `-vv` override the configured level.
pub fn init(settings: &Settings, verbose: u8) -> Result<PathBuf, LogError> {
    let path = settings.log_dir.join(LOG_FILE_NAME);
    let file = open(&path, settings.log_mode)?;

    env_logger::Builder::new()
        .filter_level(level(settings.log_level, verbose))
        .format_timestamp_secs()
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();

    Ok(path)
}

fn level(configured: LevelFilter, verbose: u8) -> LevelFilter {
    match verbose {
        0 => configured,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn open(path: &Path, mode: u32) -> Result<File, LogError> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    let file = options.open(path).map_err(|source| LogError::Open {
        path: path.to_owned(),
        source,
    })?;

    // the mode passed to open is masked by umask, and ignored for existing files
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| {
            LogError::Chmod {
                path: path.to_owned(),
                source,
            }
        })?;
    }

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn verbosity_overrides_configured_level() {
        assert_eq!(level(LevelFilter::Warn, 0), LevelFilter::Warn);
        assert_eq!(level(LevelFilter::Warn, 1), LevelFilter::Debug);
        assert_eq!(level(LevelFilter::Error, 2), LevelFilter::Trace);
        assert_eq!(level(LevelFilter::Error, 7), LevelFilter::Trace);
    }

    #[test]
    fn appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        fs::write(&path, "first\n").unwrap();

        let mut file = open(&path, 0o640).unwrap();
        file.write_all(b"second\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[cfg(unix)]
    #[test]
    fn applies_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        fs::write(&path, "").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        open(&path, 0o644).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join(LOG_FILE_NAME);
        assert!(matches!(open(&path, 0o640), Err(LogError::Open { .. })));
    }
}
