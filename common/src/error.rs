use std::{path::PathBuf, time::Duration};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid endpoint url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Failure of a single external-process invocation.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("`{program}` exited with {}: {stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed waiting for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Why a status fetch produced no usable report this cycle.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("status request timed out")]
    Timeout,

    #[error("status request failed: {0}")]
    Transport(String),

    #[error("status endpoint answered {0}")]
    Status(u16),

    #[error("malformed status body: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot path {0} has no parent directory")]
    NoParent(PathBuf),

    #[error("failed to write snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("registration request failed: {0}")]
    Transport(String),

    #[error("registration endpoint answered {0}")]
    Status(u16),

    #[error("malformed registration response: {0}")]
    Malformed(String),

    #[error("registration rejected: {0}")]
    Rejected(String),
}
