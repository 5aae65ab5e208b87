mod format;

use crate::{config::LoggingConfig, driver::ExitCode};
pub use format::PilotFormat;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, MutexGuard};
use std::{
    fs::File,
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
};
use thiserror::Error;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    layer::{Identity, Layered, SubscriberExt},
    reload,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer, Registry,
};

type FilteredRegistry = Layered<reload::Layer<EnvFilter, Registry>, Registry>;
type Sinks = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to install the process wide subscriber: {0}")]
    Install(#[from] TryInitError),
    #[error("Failed to replace the active log sinks: {0}")]
    Reload(#[from] reload::Error),
    #[error("Failed to create log file {path:?}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// reload handles of the single installed subscriber
struct Handles {
    filter: reload::Handle<EnvFilter, Registry>,
    sinks: reload::Handle<Sinks, FilteredRegistry>,
}

static HANDLES: OnceCell<Handles> = OnceCell::new();

fn handles() -> Result<&'static Handles, LoggingError> {
    HANDLES.get_or_try_init(|| {
        let (filter, filter_handle) = reload::Layer::new(EnvFilter::default());
        let (sinks, sinks_handle) = reload::Layer::new(Box::new(Identity::new()) as Sinks);

        tracing_subscriber::registry()
            .with(filter)
            .with(sinks)
            .try_init()?;

        Ok(Handles {
            filter: filter_handle,
            sinks: sinks_handle,
        })
    })
}

/// Pilot log file shared between the file sink and `Logging::shutdown`
#[derive(Debug, Clone)]
struct SharedFile(Arc<Mutex<File>>);

struct SharedFileGuard<'a>(MutexGuard<'a, File>);

impl Write for SharedFileGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<'a> MakeWriter<'a> for SharedFile {
    type Writer = SharedFileGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SharedFileGuard(self.0.lock())
    }
}

/// Handle to the configured process wide logging.
///
/// Created once at startup with [`Logging::establish`] and consumed by
/// [`Logging::shutdown`] at the single exit point of the pilot. Establishing
/// again detaches every sink attached before.
#[derive(Debug)]
pub struct Logging {
    file: Option<SharedFile>,
}

impl Logging {
    pub fn establish(config: &LoggingConfig) -> Result<Self, LoggingError> {
        Self::establish_with_console(config, io::stdout)
    }

    /// Same as [`Logging::establish`] with the console sink writing to `console`
    pub fn establish_with_console<W>(config: &LoggingConfig, console: W) -> Result<Self, LoggingError>
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let handles = handles()?;

        let level = if config.debug {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let filter = EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy();

        let file = if config.nopilotlog {
            None
        } else {
            // truncate, every pilot run starts a fresh log
            let file = File::create(&config.filename).map_err(|source| LoggingError::LogFile {
                path: config.filename.clone(),
                source,
            })?;

            Some(SharedFile(Arc::new(Mutex::new(file))))
        };

        let format = PilotFormat::new(config.format, config.debug);
        let console = fmt::layer()
            .with_ansi(false)
            .with_writer(console)
            .event_format(format);

        let sinks: Sinks = match &file {
            Some(file) => Box::new(
                console.and_then(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(file.clone())
                        .event_format(format),
                ),
            ),
            None => Box::new(console),
        };

        handles.filter.reload(filter)?;
        handles.sinks.reload(sinks)?;

        Ok(Self { file })
    }

    /// Log the final status, flush the pilot log and detach all sinks
    pub fn shutdown(self, code: ExitCode) {
        info!(exit_code = i32::from(code), "Pilot X has finished: {code}");

        if let Some(SharedFile(file)) = &self.file {
            let file = file.lock();

            if let Err(error) = file.sync_all() {
                eprintln!("Failed to sync pilot log: {error}");
            }
        }

        if let Some(handles) = HANDLES.get() {
            if let Err(error) = handles.sinks.reload(Box::new(Identity::new()) as Sinks) {
                eprintln!("Failed to detach log sinks: {error}");
            }
        }
    }
}
