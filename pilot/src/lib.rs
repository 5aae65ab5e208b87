//! Pilot X: bootstraps a user workload on a Dask cluster.
//!
//! The binary reads the scheduler address, shared filesystem path and job id
//! from the environment, connects to the scheduler, fetches the user code and
//! hands over to the [`driver::phases::Workload`] phases.

pub mod config;
pub mod driver;
pub mod environment;
pub mod execute;
pub mod files;
pub mod logging;
pub mod scheduler;
