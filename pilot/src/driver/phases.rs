use crate::environment::PilotEnvironment;
use std::{
    fmt,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Steps of a job the pilot hands over to its workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    StageIn,
    WorkerReadiness,
    Execution,
    StageOut,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StageIn => "stage-in",
            Self::WorkerReadiness => "worker readiness",
            Self::Execution => "user code execution",
            Self::StageOut => "stage-out",
        })
    }
}

#[derive(Error, Debug)]
#[error("{phase} failed: {reason}")]
pub struct PhaseError {
    pub phase: Phase,
    pub reason: String,
}

impl PhaseError {
    pub fn new(phase: Phase, reason: impl Into<String>) -> Self {
        Self {
            phase,
            reason: reason.into(),
        }
    }
}

/// Job phases run by the driver once the scheduler client is ready.
///
/// The driver calls them in declaration order and stops at the first error.
/// Every phase defaults to doing nothing.
pub trait Workload {
    /// wait for the stage-in pod to place the job inputs on the shared filesystem
    fn stage_in(&mut self, _environment: &PilotEnvironment) -> Result<(), PhaseError> {
        Ok(())
    }

    /// wait for the dask workers to register with the scheduler
    fn wait_for_workers(&mut self, _environment: &PilotEnvironment) -> Result<(), PhaseError> {
        Ok(())
    }

    /// run the fetched user code
    fn execute(&mut self, _environment: &PilotEnvironment) -> Result<(), PhaseError> {
        Ok(())
    }

    /// signal the stage-out pod that outputs are ready
    fn stage_out(&mut self, _environment: &PilotEnvironment) -> Result<(), PhaseError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWorkload;

impl Workload for NoopWorkload {}

/// Location the job definition for `job_id` is expected at, its contents are not read here
pub fn job_definition_path(shared_dir: &Path, job_id: &str) -> PathBuf {
    shared_dir.join(format!("job_definition-{job_id}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_definition_location() {
        assert_eq!(
            job_definition_path(Path::new("/mnt/dask"), "123"),
            PathBuf::from("/mnt/dask/job_definition-123.json")
        );
    }

    #[test]
    fn noop_workload_succeeds() {
        let environment = PilotEnvironment {
            host: String::from("tcp://127.0.0.1:8786"),
            shared_disk: PathBuf::from("/mnt/dask"),
            job_id: String::from("123"),
            url: String::from("http://example.org/job.py"),
        };
        let mut workload = NoopWorkload;

        assert!(workload.stage_in(&environment).is_ok());
        assert!(workload.wait_for_workers(&environment).is_ok());
        assert!(workload.execute(&environment).is_ok());
        assert!(workload.stage_out(&environment).is_ok());
    }

    #[test]
    fn error_names_the_phase() {
        let error = PhaseError::new(Phase::StageOut, "outputs missing");

        assert_eq!(error.to_string(), "stage-out failed: outputs missing");
    }
}
