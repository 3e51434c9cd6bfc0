use thiserror::Error;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    FileRead(String),

    #[error("failed to parse configuration file: line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("{0} is not specified")]
    Missing(&'static str),

    #[error("cannot load root certificate: {0}")]
    BadCert(String),
}
