use thiserror::Error;

use crate::filter::FilterError;

#[derive(Debug, Error, Clone)]
pub enum BatDevError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("timeout waiting for tick")]
    Timeout,
    #[error("invalid state: {0}")]
    State(String),
    #[error("io error: {0}")]
    Io(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    #[error("missing sampler")]
    MissingSampler,
    #[error("missing actuator")]
    MissingActuator,
    #[error("missing session mode")]
    MissingMode,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("invalid filter: {0}")]
    Filter(#[from] FilterError),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
