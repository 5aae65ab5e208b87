use clap::Parser;
use pilotx::{
    config::{LogFormat, LoggingConfig, PilotConfig},
    driver::{phases::NoopWorkload, ExitCode, Pilot, PilotError},
    environment::RequiredVars,
    logging::Logging,
    scheduler::TcpConnector,
};
use std::{path::PathBuf, process::exit};
use tracing::{error, warn};

/// Pilot X, bootstraps a user workload on a Dask cluster
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML file with logging, scheduler and fetch settings
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log at INFO with the terse layout instead of DEBUG
    #[arg(long)]
    no_debug: bool,

    /// Only log to stdout, do not write the pilot log file
    #[arg(long)]
    nopilotlog: bool,

    /// Pilot log file, truncated at startup [default: pilotx.stdout]
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Layout of every log line [default: pipe]
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Give up connecting to the scheduler after this many seconds
    #[arg(long, value_name = "SECS")]
    connect_timeout: Option<u64>,

    /// Program used to download the user code, the url is appended [default: wget]
    #[arg(long, value_name = "CMD")]
    fetch_command: Option<String>,

    /// Kill the download after this many seconds
    #[arg(long, value_name = "SECS")]
    fetch_timeout: Option<u64>,
}

impl Args {
    /// flags given on the command line win over the config file
    fn apply(&self, mut config: PilotConfig) -> PilotConfig {
        if self.no_debug {
            config.logging.debug = false;
        }
        if self.nopilotlog {
            config.logging.nopilotlog = true;
        }
        if let Some(path) = &self.log_file {
            config.logging.filename = path.clone();
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(timeout) = self.connect_timeout {
            config.scheduler.connect_timeout = Some(timeout);
        }
        if let Some(command) = &self.fetch_command {
            config.fetch.command = command.clone();
        }
        if let Some(timeout) = self.fetch_timeout {
            config.fetch.timeout = Some(timeout);
        }

        config
    }
}

fn establish_logging(config: &LoggingConfig) -> Logging {
    match Logging::establish(config) {
        Ok(logging) => logging,
        Err(file_error) => {
            let console_only = LoggingConfig {
                nopilotlog: true,
                ..config.clone()
            };

            match Logging::establish(&console_only) {
                Ok(logging) => {
                    warn!("Continuing with stdout logging only: {file_error}");

                    logging
                }
                Err(error) => {
                    eprintln!("Failed to set up logging: {error}");

                    exit(ExitCode::MissingEnvironment.into())
                }
            }
        }
    }
}

fn main() {
    let args = Args::parse();

    let loaded = match &args.config {
        Some(path) => PilotConfig::load(path),
        None => Ok(PilotConfig::default()),
    };
    let (config, config_error) = match loaded {
        Ok(config) => (args.apply(config), None),
        Err(error) => (args.apply(PilotConfig::default()), Some(error)),
    };

    let logging = establish_logging(&config.logging);

    let code = if let Some(error) = config_error {
        let error = PilotError::from(error);
        error!("{error}");

        error.exit_code()
    } else if config.preflight_checks() {
        ExitCode::MissingEnvironment
    } else {
        let connector = TcpConnector::new(config.scheduler.connect_timeout());

        Pilot::new(config, connector, NoopWorkload).run(RequiredVars::discover)
    };

    logging.shutdown(code);
    exit(code.into())
}
