use std::{
    io::{self, Read},
    process::{Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error("Command is empty")]
    EmptyCommand,
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to wait for a child process: {0}")]
    Wait(#[source] io::Error),
    #[error("Failed to read {stream} of a child process: {source}")]
    Read {
        stream: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("The {0} of a child process is not valid UTF-8")]
    Decode(&'static str),
    #[error("Command did not finish within {0:?}")]
    Timeout(Duration),
}

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitStatus,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Split a command line on spaces, there is no quoting so arguments cannot contain spaces
pub fn split_command(cmd: &str) -> Vec<&str> {
    cmd.split(' ').filter(|part| !part.is_empty()).collect()
}

/// Run `cmd` to completion and capture its output.
///
/// The exit status is reported but not judged, a failing command still
/// returns `Ok`. Only a missing executable, a broken pipe, output that is
/// not UTF-8 or an expired `timeout` are errors. Without a timeout this
/// blocks until the child exits.
pub fn execute(
    cmd: &str,
    mute: bool,
    timeout: Option<Duration>,
) -> Result<CommandOutput, ExecuteError> {
    let parts = split_command(cmd);
    let (program, args) = parts.split_first().ok_or(ExecuteError::EmptyCommand)?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ExecuteError::Spawn {
            program: program.to_string(),
            source,
        })?;

    debug!(pid = child.id(), "Spawned {program}");

    // both pipes are drained on their own threads so the child never stalls on a full pipe
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match timeout {
        Some(limit) => match child.wait_timeout(limit).map_err(ExecuteError::Wait)? {
            Some(status) => status,
            None => {
                warn!(pid = child.id(), "{program} ran into timeout, killing it");

                if let Err(error) = child.kill().and_then(|_| child.wait()) {
                    warn!(error = ?error, "Failed to reap {program} after timeout");
                }

                return Err(ExecuteError::Timeout(limit));
            }
        },
        None => child.wait().map_err(ExecuteError::Wait)?,
    };

    let output = CommandOutput {
        stdout: collect(stdout, "stdout")?,
        stderr: collect(stderr, "stderr")?,
        status,
    };

    if !mute {
        info!("cmd={cmd}");
        info!("stdout=\n{}", output.stdout);
        info!("stderr=\n{}", output.stderr);
        info!("status={}", output.status);
    }

    Ok(output)
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();

        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buffer)?;
        }

        Ok(buffer)
    })
}

fn collect(
    reader: JoinHandle<io::Result<Vec<u8>>>,
    stream: &'static str,
) -> Result<String, ExecuteError> {
    let bytes = reader
        .join()
        .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "reader panicked")))
        .map_err(|source| ExecuteError::Read { stream, source })?;

    String::from_utf8(bytes).map_err(|_| ExecuteError::Decode(stream))
}
