use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::{fs::File, io::Error, path::Path, path::PathBuf, time::Duration};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Config file could not be read: {0}")]
    ReadFailed(#[from] Error),
    #[error("Config file is not valid: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PilotConfig {
    pub logging: LoggingConfig,
    pub scheduler: SchedulerConfig,
    pub fetch: FetchConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    // DEBUG level and the verbose line layout, INFO and the terse layout otherwise
    pub debug: bool,
    // stdout only, no pilot log file
    pub nopilotlog: bool,
    pub filename: PathBuf,
    pub format: LogFormat,
}

/// Line layouts the pilot log can be written in
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// `ts | LEVEL | target | message`
    #[default]
    Pipe,
    /// `ts=.. level=.. event=.. msg=".."`
    KeyValue,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    // seconds, unset blocks until the operating system gives up
    pub connect_timeout: Option<u64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    // program that downloads the user code, the url is appended as the last argument
    pub command: String,
    // seconds, unset waits for the download to finish
    pub timeout: Option<u64>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            debug: true,
            nopilotlog: false,
            filename: default_log_file(),
            format: LogFormat::default(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            command: String::from("wget"),
            timeout: None,
        }
    }
}

impl SchedulerConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout.map(Duration::from_secs)
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

impl PilotConfig {
    /// read a YAML config file, every section and field may be omitted
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let file = File::open(path)?;

        Ok(serde_yaml::from_reader(file)?)
    }

    /// Report every problem at once, returns true if any was found
    pub fn preflight_checks(&self) -> bool {
        let mut contains_error = false;

        if self.fetch.command.trim().is_empty() {
            error!("fetch.command must name the program used to download the user code");
            contains_error = true;
        }

        if self.scheduler.connect_timeout == Some(0) {
            error!("scheduler.connect_timeout cannot be 0, leave it unset to wait without a limit");
            contains_error = true;
        }

        if self.fetch.timeout == Some(0) {
            error!("fetch.timeout cannot be 0, leave it unset to wait without a limit");
            contains_error = true;
        }

        contains_error
    }
}

fn default_log_file() -> PathBuf {
    PathBuf::from("pilotx.stdout")
}
