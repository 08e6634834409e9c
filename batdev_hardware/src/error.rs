use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("bus read timeout")]
    BusTimeout,
    #[error("actuator fault: {0}")]
    Fault(String),
}
