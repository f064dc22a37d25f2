use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not locate config file, tried: {}", display_paths(.0))]
    NotFound(Vec<PathBuf>),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("missing required config values: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("{0}")]
    Invalid(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("update message missing {0}")]
    MissingField(&'static str),

    #[error("invalid filename {0:?}")]
    InvalidFilename(String),

    #[error("invalid command {0:?}")]
    InvalidCommand(String),

    #[error("failed to create temporary directory: {0}")]
    TempDir(#[source] std::io::Error),

    #[error("download from {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("command {command:?} failed: {reason}")]
    Command { command: String, reason: String },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("unable to resolve IoT endpoint for region {region}: {reason}")]
    Endpoint { region: String, reason: String },

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}
