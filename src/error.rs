//! Error types for the mock server.
//!
//! Everything here is fatal for either the whole process (configuration,
//! log file, bind) or for a single instance (accept). Per-request mismatches
//! are not errors in this sense; see [`crate::matcher::MatchError`].

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Problems with the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read server config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed server config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed server config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("missing 'servers' list in server config file")]
    MissingServers,

    #[error("server '{server}': {message}")]
    Invalid { server: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(server: &str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            server: server.to_string(),
            message: message.into(),
        }
    }
}

/// Errors produced while running the mock servers.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot open logfile {path:?}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{server}': cannot listen on {addr}: {source}")]
    Bind {
        server: String,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Accepting failed while the instance was still open.
    #[error("'{server}': accept failed on {addr}: {source}")]
    Accept {
        server: String,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot install shutdown signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

impl Error {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::LogFile { .. } => "log_file",
            Error::Bind { .. } => "bind",
            Error::Accept { .. } => "accept",
            Error::Signal(_) => "signal",
        }
    }
}
