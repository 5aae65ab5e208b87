use http::Uri;
use itertools::Itertools;
use std::{
    fmt, io,
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Port a Dask scheduler listens on when the address names none
pub const DEFAULT_PORT: u16 = 8786;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid scheduler address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("Unsupported scheduler protocol {0:?}, only tcp is available")]
    UnsupportedScheme(String),
    #[error("Failed to resolve {address}: {source}")]
    Resolve {
        address: SchedulerAddress,
        #[source]
        source: io::Error,
    },
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: SchedulerAddress,
        #[source]
        source: io::Error,
    },
    #[error("Connection to {address} is not usable: {source}")]
    Validate {
        address: SchedulerAddress,
        #[source]
        source: io::Error,
    },
}

/// Host and port of a scheduler, parsed from `tcp://host:port`, `host:port` or `host`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerAddress {
    host: String,
    port: u16,
}

impl SchedulerAddress {
    pub fn parse(address: &str) -> Result<Self, ClientError> {
        let invalid = |reason: String| ClientError::InvalidAddress {
            address: address.to_owned(),
            reason,
        };

        let uri: Uri = address
            .trim()
            .parse()
            .map_err(|error: http::uri::InvalidUri| invalid(error.to_string()))?;

        if let Some(scheme) = uri.scheme_str() {
            if !scheme.eq_ignore_ascii_case("tcp") {
                return Err(ClientError::UnsupportedScheme(scheme.to_owned()));
            }
        }

        let authority = uri
            .authority()
            .ok_or_else(|| invalid(String::from("no host given")))?;
        if authority.as_str().contains('@') {
            return Err(invalid(String::from("user information is not supported")));
        }
        if !matches!(uri.path(), "" | "/") || uri.query().is_some() {
            let path = uri.path_and_query().map_or("", |path| path.as_str());

            return Err(invalid(format!("unexpected path {path:?}")));
        }

        let bracketed = authority.host();
        let host = bracketed.trim_start_matches('[').trim_end_matches(']');

        if host.is_empty() {
            return Err(invalid(String::from("no host given")));
        }

        // `Authority::port` hides a port that is not a u16, so look at the raw text
        let port = match &authority.as_str()[bracketed.len()..] {
            "" => DEFAULT_PORT,
            suffix => suffix
                .strip_prefix(':')
                .and_then(|port| port.parse().ok())
                .ok_or_else(|| invalid(format!("invalid port {:?}", suffix.trim_start_matches(':'))))?,
        };

        Ok(Self {
            host: host.to_owned(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn resolve(&self) -> Result<Vec<SocketAddr>, ClientError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map(Iterator::collect)
            .map_err(|source| ClientError::Resolve {
                address: self.clone(),
                source,
            })
    }
}

impl fmt::Display for SchedulerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "tcp://[{}]:{}", self.host, self.port)
        } else {
            write!(f, "tcp://{}:{}", self.host, self.port)
        }
    }
}

/// Connection to a scheduler, closed on drop
#[derive(Debug)]
pub struct Client {
    address: SchedulerAddress,
    stream: TcpStream,
}

impl Client {
    /// Connect to the first reachable address `address` resolves to.
    ///
    /// Without a timeout every candidate blocks until the operating system
    /// gives up on it.
    pub fn connect(address: &SchedulerAddress, timeout: Option<Duration>) -> Result<Self, ClientError> {
        let candidates = address.resolve()?;
        debug!(
            candidates = %candidates.iter().join(", "),
            "Resolved scheduler {address}"
        );

        let mut last_error = None;

        for candidate in candidates {
            let attempt = match timeout {
                Some(limit) => TcpStream::connect_timeout(&candidate, limit),
                None => TcpStream::connect(candidate),
            };

            match attempt {
                Ok(stream) => {
                    debug!(peer = %candidate, "Connected to scheduler");

                    return Ok(Self {
                        address: address.clone(),
                        stream,
                    });
                }
                Err(error) => {
                    debug!(peer = %candidate, error = ?error, "Scheduler candidate refused");
                    last_error = Some(error);
                }
            }
        }

        Err(ClientError::Connect {
            address: address.clone(),
            source: last_error.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
            }),
        })
    }

    /// check the connection is still attached to a peer
    pub fn validate(&self) -> Result<SocketAddr, ClientError> {
        self.stream
            .peer_addr()
            .map_err(|source| ClientError::Validate {
                address: self.address.clone(),
                source,
            })
    }

    pub fn address(&self) -> &SchedulerAddress {
        &self.address
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => debug!("Closed scheduler connection to {}", self.address),
            Err(error) if error.kind() == io::ErrorKind::NotConnected => {}
            Err(error) => warn!(error = ?error, "Failed to close scheduler connection"),
        }
    }
}

/// Opens validated scheduler connections for the driver
pub trait SchedulerConnector {
    type Client: fmt::Debug;

    fn connect(&self, address: &SchedulerAddress) -> Result<Self::Client, ClientError>;
}

#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl SchedulerConnector for TcpConnector {
    type Client = Client;

    fn connect(&self, address: &SchedulerAddress) -> Result<Client, ClientError> {
        let client = Client::connect(address, self.timeout)?;
        let peer = client.validate()?;
        debug!(peer = %peer, "Scheduler client ready");

        Ok(client)
    }
}
