//! Maps `Box<dyn Error>` from trait boundaries to typed `BatDevError`.
//!
//! The traits in `batdev_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to our typed error enum, with an optional
//! feature-gated path for `batdev_hardware::HwError` downcasting.

use crate::error::BatDevError;

/// Map a trait-boundary error to a typed `BatDevError`.
///
/// Known hardware error types are downcast first, then string heuristics apply.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> BatDevError {
    #[cfg(feature = "hardware-errors")]
    {
        use batdev_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::BusTimeout => BatDevError::Timeout,
                other => BatDevError::HardwareFault(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        BatDevError::Timeout
    } else {
        BatDevError::Hardware(s)
    }
}
