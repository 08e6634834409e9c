//! Hardware-side implementations of the `batdev_traits` interfaces.
//!
//! Only a simulated bench is provided; it models the sensor, potentiometer
//! and load switching closely enough to drive full sessions on a host.
pub mod error;
pub mod sim;
pub mod util;

pub use error::HwError;
pub use sim::{CellKind, SimActuator, SimBench, SimParams, SimSampler};
