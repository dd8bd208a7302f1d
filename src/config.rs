//! Configuration for the mock servers.
//!
//! Defines the servers to start, their request scripts, and the log file.

use crate::error::ConfigError;
use crate::matcher::{MatchMode, RequestKey};
use http::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration: where to log and which servers to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// File the run log is appended to
    pub logfile: PathBuf,

    /// One entry per mock server instance
    pub servers: Vec<ServerConfig>,
}

/// On-disk shape; `servers` is optional here so its absence gets a
/// dedicated error instead of a generic serde one.
#[derive(Deserialize)]
struct RawServiceConfig {
    logfile: PathBuf,
    #[serde(default)]
    servers: Option<Vec<ServerConfig>>,
}

impl RawServiceConfig {
    fn into_config(self) -> Result<ServiceConfig, ConfigError> {
        let servers = self.servers.ok_or(ConfigError::MissingServers)?;
        Ok(ServiceConfig {
            logfile: self.logfile,
            servers,
        })
    }
}

impl ServiceConfig {
    /// Load configuration from a JSON file (or YAML, by extension).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml")
        );
        if is_yaml {
            Self::from_yaml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawServiceConfig = serde_json::from_str(content)?;
        let config = raw.into_config()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a YAML configuration.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawServiceConfig = serde_yaml::from_str(content)?;
        let config = raw.into_config()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for server in &self.servers {
            server.validate()?;
        }
        Ok(())
    }

    /// Total number of scripted requests across all servers.
    pub fn request_count(&self) -> usize {
        self.servers.iter().map(|s| s.requests.len()).sum()
    }
}

/// A single mock server instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Instance name; `DELETE <name>` closes it
    pub name: String,

    /// Port to listen on (0 = ephemeral)
    pub port: u16,

    /// Address to listen on
    #[serde(default = "default_address")]
    pub address: String,

    /// URL scheme; only plain `http` is served
    #[serde(default = "default_schema")]
    pub schema: String,

    /// The script of expected requests and their responses
    #[serde(default)]
    pub requests: Vec<RequestSpec>,

    /// Requests must arrive in script order (and are consumed)
    #[serde(default)]
    pub requests_in_order: bool,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_schema() -> String {
    "http".to_string()
}

impl ServerConfig {
    /// `address:port` as given to the listener.
    pub fn bind_addr(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }

    pub fn mode(&self) -> MatchMode {
        MatchMode::from_in_order(self.requests_in_order)
    }

    /// Validate the server definition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid(&self.name, "name cannot be empty"));
        }
        if self.address.trim().is_empty() {
            return Err(ConfigError::invalid(&self.name, "address cannot be empty"));
        }
        for (i, spec) in self.requests.iter().enumerate() {
            spec.response
                .validate()
                .map_err(|e| ConfigError::invalid(&self.name, format!("request {}: {}", i, e)))?;
        }
        Ok(())
    }
}

/// One scripted request and the response it gets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestSpec {
    /// Request line to match
    pub request: RequestKey,

    /// Response to return
    pub response: ResponseSpec,
}

/// Response definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseSpec {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response headers as `"Name: Value"` strings
    #[serde(default)]
    pub headers: Vec<String>,

    /// Body lines, joined with `\n`
    #[serde(default)]
    pub body: Vec<String>,
}

fn default_status() -> u16 {
    200
}

impl ResponseSpec {
    /// Validate the response definition.
    pub fn validate(&self) -> Result<(), String> {
        if !(100..=599).contains(&self.status) {
            return Err(format!("invalid status code: {}", self.status));
        }
        for header in &self.headers {
            let (name, value) = split_header(header)
                .ok_or_else(|| format!("header '{}' is not of the form 'Name: Value'", header))?;
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| format!("invalid header name '{}'", name))?;
            HeaderValue::from_str(value)
                .map_err(|_| format!("invalid value for header '{}'", name))?;
        }
        Ok(())
    }
}

/// Split a `"Name: Value"` string on its first colon, trimming both sides.
pub fn split_header(header: &str) -> Option<(&str, &str)> {
    let (name, value) = header.split_once(':')?;
    Some((name.trim(), value.trim()))
}
