use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    str::FromStr,
};
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unsupported file mode {0:?}, expected one of r, w or a")]
pub struct UnsupportedMode(String);

/// How `open_file` opens a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Read,
    /// create or truncate
    Write,
    /// create or append
    Append,
}

impl FileMode {
    fn options(self) -> OpenOptions {
        let mut options = OpenOptions::new();

        match self {
            Self::Read => options.read(true),
            Self::Write => options.write(true).create(true).truncate(true),
            Self::Append => options.append(true).create(true),
        };

        options
    }
}

impl FromStr for FileMode {
    type Err = UnsupportedMode;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode {
            "r" => Ok(Self::Read),
            "w" => Ok(Self::Write),
            "a" => Ok(Self::Append),
            other => Err(UnsupportedMode(other.to_owned())),
        }
    }
}

/// Modes `write_file` accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Truncate,
    Append,
}

impl From<WriteMode> for FileMode {
    fn from(mode: WriteMode) -> Self {
        match mode {
            WriteMode::Truncate => FileMode::Write,
            WriteMode::Append => FileMode::Append,
        }
    }
}

impl FromStr for WriteMode {
    type Err = UnsupportedMode;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode {
            "w" => Ok(Self::Truncate),
            "a" => Ok(Self::Append),
            other => Err(UnsupportedMode(other.to_owned())),
        }
    }
}

/// Open `path` in `mode`, the error is logged before it is returned
pub fn open_file(path: &Path, mode: FileMode) -> io::Result<File> {
    mode.options().open(path).map_err(|error| {
        error!(path = ?path, "Failed to open file: {error}");

        error
    })
}

/// Write `contents` to `path`, returns true only if both open and write succeeded.
///
/// Failures are logged and never raised, the handle is closed on every path
/// once it was opened.
pub fn write_file(path: &Path, contents: &str, mute: bool, mode: WriteMode, unique: bool) -> bool {
    // TODO: pick a free `-N` suffix for `path` when `unique` is set and the file exists
    let _ = unique;

    let status = match open_file(path, mode.into()) {
        Ok(mut file) => match file.write_all(contents.as_bytes()) {
            Ok(()) => true,
            Err(error) => {
                error!(path = ?path, "Failed to write file: {error}");

                false
            }
        },
        Err(_) => false,
    };

    if !mute && status {
        match mode {
            WriteMode::Truncate => info!("created file: {}", path.display()),
            WriteMode::Append => info!("appended file: {}", path.display()),
        }
    }

    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::LogFormat, logging::capture::CapturedLogs, logging::PilotFormat};
    use std::{fs, io::Read};
    use tracing::Level;

    fn capture() -> CapturedLogs {
        CapturedLogs::new(PilotFormat::new(LogFormat::Pipe, false))
    }

    #[test]
    fn modes_from_str() {
        assert_eq!("r".parse(), Ok(FileMode::Read));
        assert_eq!("a".parse(), Ok(FileMode::Append));
        assert_eq!("w".parse(), Ok(WriteMode::Truncate));
        assert_eq!("a".parse(), Ok(WriteMode::Append));
        assert!("r".parse::<WriteMode>().is_err());
        assert!("rw".parse::<FileMode>().is_err());
    }

    #[test]
    fn open_missing_file_for_reading() {
        let dir = tempfile::tempdir().unwrap();
        let logs = capture();

        let result = logs.run(|| open_file(&dir.path().join("absent"), FileMode::Read));

        assert!(result.is_err());
        assert_eq!(logs.count(Level::ERROR), 1);
    }

    #[test]
    fn open_reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        fs::write(&path, "payload").unwrap();

        let mut buffer = String::new();
        open_file(&path, FileMode::Read)
            .unwrap()
            .read_to_string(&mut buffer)
            .unwrap();

        assert_eq!(buffer, "payload");
    }

    #[test]
    fn truncate_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        fs::write(&path, "stale content that must go").unwrap();

        assert!(write_file(&path, "first\n", true, WriteMode::Truncate, false));
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\n");

        assert!(write_file(&path, "second\n", true, WriteMode::Append, false));
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn append_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.txt");

        assert!(write_file(&path, "x", true, WriteMode::Append, false));
        assert_eq!(fs::read_to_string(&path).unwrap(), "x");
    }

    #[test]
    fn unwritable_path_reports_false() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no").join("such").join("dir.txt");
        let logs = capture();

        let status = logs.run(|| write_file(&path, "content", false, WriteMode::Truncate, false));

        assert!(!status);
        assert!(!path.exists());
        assert_eq!(logs.count(Level::ERROR), 1);
        assert_eq!(logs.count(Level::INFO), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_write_after_open() {
        let logs = capture();

        let status = logs.run(|| {
            write_file(Path::new("/dev/full"), "content", false, WriteMode::Truncate, false)
        });

        assert!(!status);
        assert_eq!(logs.count(Level::ERROR), 1);
    }

    #[test]
    fn status_messages_unless_muted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let logs = capture();

        logs.run(|| {
            write_file(&path, "a", false, WriteMode::Truncate, false);
            write_file(&path, "b", false, WriteMode::Append, false);
            write_file(&path, "c", true, WriteMode::Append, false);
        });

        let contents = logs.contents();
        assert!(contents.contains("created file: "));
        assert!(contents.contains("appended file: "));
        assert_eq!(logs.count(Level::INFO), 2);
    }

    #[test]
    fn unique_has_no_effect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("same.txt");

        assert!(write_file(&path, "one", true, WriteMode::Truncate, true));
        assert!(write_file(&path, "two", true, WriteMode::Truncate, true));

        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
