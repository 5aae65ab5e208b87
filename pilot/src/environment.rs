use itertools::Itertools;
use std::{env, ffi::OsStr, fmt, path::PathBuf};
use tracing::debug;

pub const SCHEDULER_IP: &str = "DASK_SCHEDULER_IP";
pub const SHARED_FILESYSTEM_PATH: &str = "DASK_SHARED_FILESYSTEM_PATH";
pub const JOB_ID: &str = "PANDA_ID";
pub const USERCODE_URL: &str = "DASK_USERCODE_URL";

pub const DEFAULT_USERCODE_URL: &str = "http://cern.ch/atlas-panda-pilot/pilotx/usercode.py";

/// Values read from the recognized environment variables.
///
/// A field is `None` when its variable is unset or empty, the user code url
/// falls back to [`DEFAULT_USERCODE_URL`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredVars {
    pub host: Option<String>,
    pub shared_disk: Option<String>,
    pub job_id: Option<String>,
    pub url: String,
}

/// Every variable the pilot needs, see `RequiredVars::resolve`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PilotEnvironment {
    pub host: String,
    pub shared_disk: PathBuf,
    pub job_id: String,
    pub url: String,
}

/// Recognized keys that were not set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingVars(pub Vec<&'static str>);

impl MissingVars {
    /// environment variable backing a missing key
    fn variable(key: &str) -> &'static str {
        match key {
            "host" => SCHEDULER_IP,
            "shared_disk" => SHARED_FILESYSTEM_PATH,
            "job_id" => JOB_ID,
            _ => USERCODE_URL,
        }
    }
}

impl fmt::Display for MissingVars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.0
                .iter()
                .map(|key| format!("{key} ({})", Self::variable(key)))
                .join(", ")
        )
    }
}

impl RequiredVars {
    /// read the process environment
    pub fn discover() -> Self {
        Self::discover_from(|name| env::var(name).ok())
    }

    pub fn discover_from<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());

        Self {
            host: get(SCHEDULER_IP),
            shared_disk: get(SHARED_FILESYSTEM_PATH),
            job_id: get(JOB_ID),
            url: get(USERCODE_URL).unwrap_or_else(|| DEFAULT_USERCODE_URL.to_owned()),
        }
    }

    /// names of the keys that are not set, in declaration order
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("host", self.host.is_none()),
            ("shared_disk", self.shared_disk.is_none()),
            ("job_id", self.job_id.is_none()),
        ]
        .into_iter()
        .filter_map(|(key, missing)| missing.then_some(key))
        .collect()
    }

    pub fn resolve(self) -> Result<PilotEnvironment, MissingVars> {
        match (self.host, self.shared_disk, self.job_id) {
            (Some(host), Some(shared_disk), Some(job_id)) => Ok(PilotEnvironment {
                host,
                shared_disk: PathBuf::from(shared_disk),
                job_id,
                url: self.url,
            }),
            (host, shared_disk, job_id) => Err(MissingVars(
                Self {
                    host,
                    shared_disk,
                    job_id,
                    url: self.url,
                }
                .missing(),
            )),
        }
    }
}

impl PilotEnvironment {
    /// variables handed on to the user code, under the names they were read from
    pub fn exports(&self) -> [(&'static str, &OsStr); 3] {
        [
            (SCHEDULER_IP, OsStr::new(&self.host)),
            (SHARED_FILESYSTEM_PATH, self.shared_disk.as_os_str()),
            (JOB_ID, OsStr::new(&self.job_id)),
        ]
    }
}

/// Set every `(name, value)` pair in the process environment verbatim
pub fn inject<I, K, V>(variables: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<OsStr>,
    V: AsRef<OsStr>,
{
    for (name, value) in variables {
        debug!(name = ?name.as_ref(), "Exporting to environment");
        env::set_var(name, value);
    }
}
