pub mod phases;

use crate::{
    config::{ConfigErrors, FetchConfig, PilotConfig},
    environment::{self, MissingVars, PilotEnvironment, RequiredVars},
    execute::execute,
    scheduler::{ClientError, SchedulerAddress, SchedulerConnector},
};
use phases::{job_definition_path, PhaseError, Workload};
use std::{env, fmt};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Process exit status of the pilot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    /// a required environment variable (or the pilot configuration) is missing
    MissingEnvironment,
    /// the scheduler address is unusable or the scheduler is unreachable
    SchedulerUnavailable,
    /// the job itself failed, never produced by `NoopWorkload`
    JobFailure,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        match code {
            ExitCode::Success => 0,
            ExitCode::MissingEnvironment => 1,
            ExitCode::SchedulerUnavailable => 2,
            ExitCode::JobFailure => 3,
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::MissingEnvironment => "missing environment",
            Self::SchedulerUnavailable => "scheduler unavailable",
            Self::JobFailure => "job failure",
        };

        write!(f, "{name} ({})", i32::from(*self))
    }
}

#[derive(Error, Debug)]
pub enum PilotError {
    #[error("failed to get required environment: {0}")]
    MissingEnvironment(MissingVars),
    #[error("Invalid pilot configuration: {0}")]
    Config(#[from] ConfigErrors),
    #[error("Scheduler client unavailable: {0}")]
    Scheduler(#[from] ClientError),
    #[error("Job failed: {0}")]
    Phase(#[from] PhaseError),
}

impl PilotError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::MissingEnvironment(_) | Self::Config(_) => ExitCode::MissingEnvironment,
            Self::Scheduler(_) => ExitCode::SchedulerUnavailable,
            Self::Phase(_) => ExitCode::JobFailure,
        }
    }
}

/// Bootstrap sequence of a pilot: discover the environment, connect to the
/// scheduler, fetch the user code and hand over to the workload phases.
#[derive(Debug)]
pub struct Pilot<C, W> {
    config: PilotConfig,
    connector: C,
    workload: W,
}

impl<C: SchedulerConnector, W: Workload> Pilot<C, W> {
    pub fn new(config: PilotConfig, connector: C, workload: W) -> Self {
        Self {
            config,
            connector,
            workload,
        }
    }

    /// Run the whole bootstrap once and select the exit code
    pub fn run<D>(&mut self, discover: D) -> ExitCode
    where
        D: FnOnce() -> RequiredVars,
    {
        match self.bootstrap(discover) {
            Ok(()) => ExitCode::Success,
            Err(error @ PilotError::MissingEnvironment(_)) => {
                warn!("{error}");

                error.exit_code()
            }
            Err(error) => {
                error!("{error}");

                error.exit_code()
            }
        }
    }

    fn bootstrap<D>(&mut self, discover: D) -> Result<(), PilotError>
    where
        D: FnOnce() -> RequiredVars,
    {
        log_diagnostics();

        let environment = discover()
            .resolve()
            .map_err(PilotError::MissingEnvironment)?;

        info!(
            host = %environment.host,
            shared_disk = %environment.shared_disk.display(),
            job_id = %environment.job_id,
            url = %environment.url,
            "Discovered pilot environment"
        );

        let address = SchedulerAddress::parse(&environment.host)?;
        info!("connecting to scheduler at {address}");
        let client = self.connector.connect(&address)?;
        debug!(client = ?client, "Scheduler client ready");

        fetch_usercode(&self.config.fetch, &environment.url);
        environment::inject(environment.exports());
        report_job_definition(&environment);

        self.workload.stage_in(&environment)?;
        self.workload.wait_for_workers(&environment)?;
        self.workload.execute(&environment)?;
        self.workload.stage_out(&environment)?;
        info!("user code has finished");

        drop(client);

        Ok(())
    }
}

fn log_diagnostics() {
    info!("Pilot X version {}", env!("CARGO_PKG_VERSION"));
    info!("Running on {}/{}", env::consts::OS, env::consts::ARCH);

    match nix::unistd::gethostname() {
        Ok(hostname) => info!("hostname: {}", hostname.to_string_lossy()),
        Err(error) => debug!(error = ?error, "Failed to retrieve hostname"),
    }

    match env::current_dir() {
        Ok(dir) => info!("working directory: {}", dir.display()),
        Err(error) => warn!(error = ?error, "Failed to determine working directory"),
    }
}

/// Download the user code into the working directory, failures are only reported
fn fetch_usercode(config: &FetchConfig, url: &str) {
    let cmd = format!("{} {url}", config.command);

    match execute(&cmd, true, config.timeout()) {
        Ok(output) if output.success() => info!("fetched user code from {url}"),
        Ok(output) => warn!(
            status = %output.status,
            stderr = %output.stderr.trim_end(),
            "Fetching user code from {url} failed"
        ),
        Err(error) => error!("Failed to fetch user code from {url}: {error}"),
    }
}

fn report_job_definition(environment: &PilotEnvironment) {
    let path = job_definition_path(&environment.shared_disk, &environment.job_id);

    if path.is_file() {
        info!(path = %path.display(), "Found job definition");
    } else {
        warn!(path = %path.display(), "Job definition not found on shared filesystem");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{JOB_ID, SCHEDULER_IP, SHARED_FILESYSTEM_PATH};
    use super::phases::Phase;
    use std::{cell::Cell, io, path::PathBuf};

    // values shared by every test that reaches the environment export
    const HOST: &str = "tcp://127.0.0.1:8786";
    const SHARED: &str = "/nonexistent/pilotx-shared";
    const JOB: &str = "123";

    #[derive(Default)]
    struct StubConnector {
        calls: Cell<usize>,
        refuse: bool,
    }

    impl SchedulerConnector for StubConnector {
        type Client = ();

        fn connect(&self, address: &SchedulerAddress) -> Result<(), ClientError> {
            self.calls.set(self.calls.get() + 1);

            if self.refuse {
                Err(ClientError::Connect {
                    address: address.clone(),
                    source: io::Error::from(io::ErrorKind::ConnectionRefused),
                })
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct RecordingWorkload {
        phases: Vec<Phase>,
        fail_at: Option<Phase>,
    }

    impl RecordingWorkload {
        fn record(&mut self, phase: Phase) -> Result<(), PhaseError> {
            self.phases.push(phase);

            match self.fail_at {
                Some(failing) if failing == phase => Err(PhaseError::new(phase, "stub failure")),
                _ => Ok(()),
            }
        }
    }

    impl Workload for RecordingWorkload {
        fn stage_in(&mut self, _: &PilotEnvironment) -> Result<(), PhaseError> {
            self.record(Phase::StageIn)
        }

        fn wait_for_workers(&mut self, _: &PilotEnvironment) -> Result<(), PhaseError> {
            self.record(Phase::WorkerReadiness)
        }

        fn execute(&mut self, _: &PilotEnvironment) -> Result<(), PhaseError> {
            self.record(Phase::Execution)
        }

        fn stage_out(&mut self, _: &PilotEnvironment) -> Result<(), PhaseError> {
            self.record(Phase::StageOut)
        }
    }

    fn config() -> PilotConfig {
        let mut config = PilotConfig::default();
        config.fetch.command = String::from("true");
        config
    }

    fn vars(host: Option<&str>, shared: Option<&str>, job: Option<&str>) -> RequiredVars {
        RequiredVars::discover_from(|name| match name {
            SCHEDULER_IP => host.map(str::to_owned),
            SHARED_FILESYSTEM_PATH => shared.map(str::to_owned),
            JOB_ID => job.map(str::to_owned),
            _ => None,
        })
    }

    #[test]
    fn exit_code_values() {
        assert_eq!(i32::from(ExitCode::Success), 0);
        assert_eq!(i32::from(ExitCode::MissingEnvironment), 1);
        assert_eq!(i32::from(ExitCode::SchedulerUnavailable), 2);
        assert_eq!(i32::from(ExitCode::JobFailure), 3);
        assert_eq!(ExitCode::SchedulerUnavailable.to_string(), "scheduler unavailable (2)");
        assert_eq!(ExitCode::JobFailure.to_string(), "job failure (3)");
    }

    #[test]
    fn missing_environment_never_connects() {
        for mask in 0u8..7 {
            let mut pilot = Pilot::new(config(), StubConnector::default(), RecordingWorkload::default());

            let code = pilot.run(|| {
                vars(
                    (mask & 1 != 0).then_some(HOST),
                    (mask & 2 != 0).then_some(SHARED),
                    (mask & 4 != 0).then_some(JOB),
                )
            });

            assert_eq!(code, ExitCode::MissingEnvironment, "mask {mask:03b}");
            assert_eq!(pilot.connector.calls.get(), 0);
            assert!(pilot.workload.phases.is_empty());
        }
    }

    #[test]
    fn unreachable_scheduler() {
        let connector = StubConnector {
            refuse: true,
            ..StubConnector::default()
        };
        let mut pilot = Pilot::new(config(), connector, RecordingWorkload::default());

        let code = pilot.run(|| vars(Some(HOST), Some(SHARED), Some(JOB)));

        assert_eq!(code, ExitCode::SchedulerUnavailable);
        assert_eq!(pilot.connector.calls.get(), 1);
        assert!(pilot.workload.phases.is_empty());
    }

    #[test]
    fn unusable_address_never_connects() {
        let mut pilot = Pilot::new(config(), StubConnector::default(), RecordingWorkload::default());

        let code = pilot.run(|| vars(Some("ucx://scheduler:8786"), Some(SHARED), Some(JOB)));

        assert_eq!(code, ExitCode::SchedulerUnavailable);
        assert_eq!(pilot.connector.calls.get(), 0);
    }

    #[test]
    fn successful_bootstrap_exports_environment() {
        let mut pilot = Pilot::new(config(), StubConnector::default(), RecordingWorkload::default());

        let code = pilot.run(|| vars(Some(HOST), Some(SHARED), Some(JOB)));

        assert_eq!(code, ExitCode::Success);
        assert_eq!(pilot.connector.calls.get(), 1);
        assert_eq!(
            pilot.workload.phases,
            vec![
                Phase::StageIn,
                Phase::WorkerReadiness,
                Phase::Execution,
                Phase::StageOut
            ]
        );
        assert_eq!(env::var(SCHEDULER_IP).unwrap(), HOST);
        assert_eq!(PathBuf::from(env::var(SHARED_FILESYSTEM_PATH).unwrap()), PathBuf::from(SHARED));
        assert_eq!(env::var(JOB_ID).unwrap(), JOB);
    }

    #[test]
    fn failed_fetch_does_not_change_exit_code() {
        let mut config = config();
        config.fetch.command = String::from("pilotx-no-such-downloader");
        let mut pilot = Pilot::new(config, StubConnector::default(), RecordingWorkload::default());

        assert_eq!(
            pilot.run(|| vars(Some(HOST), Some(SHARED), Some(JOB))),
            ExitCode::Success
        );
    }

    #[test]
    fn failing_phase_stops_the_job() {
        let workload = RecordingWorkload {
            fail_at: Some(Phase::Execution),
            ..RecordingWorkload::default()
        };
        let mut pilot = Pilot::new(config(), StubConnector::default(), workload);

        let code = pilot.run(|| vars(Some(HOST), Some(SHARED), Some(JOB)));

        assert_eq!(code, ExitCode::JobFailure);
        assert_eq!(
            pilot.workload.phases,
            vec![Phase::StageIn, Phase::WorkerReadiness, Phase::Execution]
        );
    }

    #[test]
    fn config_errors_map_to_missing_environment() {
        let error = PilotError::from(ConfigErrors::ReadFailed(io::Error::from(
            io::ErrorKind::NotFound,
        )));

        assert_eq!(error.exit_code(), ExitCode::MissingEnvironment);
    }
}
