//! `From` implementations bridging `batdev_config` types to `batdev_core` types.
//!
//! The file format speaks milliseconds and load names; the engine speaks ticks
//! and `batdev_traits` enums. Targets owned by `batdev_traits` get plain
//! functions instead, since neither side of those pairs lives in this crate.

use batdev_traits::{Calibration, Load};

use crate::config::{
    ChargeCfg, DischargeCfg, FilterCfg, IdentifyCfg, KernelKind, Limits, SessionCfg, TimerCfg,
};
use crate::filter::WarmupPolicy;
use crate::util::ms_to_ticks;

/// Gaussian width used when the file selects a Gaussian kernel without `sigma`.
const DEFAULT_SIGMA: f32 = 2.0;

// ── TimerCfg ─────────────────────────────────────────────────────────────────

impl From<&batdev_config::Timers> for TimerCfg {
    fn from(t: &batdev_config::Timers) -> Self {
        Self {
            tick_ms: t.tick_ms,
            report_ticks: ms_to_ticks(t.report_ms, t.tick_ms),
            pulse_ticks: ms_to_ticks(t.pulse_ms, t.tick_ms),
            sample_ticks: ms_to_ticks(t.sample_ms, t.tick_ms),
        }
    }
}

// ── FilterCfg ────────────────────────────────────────────────────────────────

impl From<&batdev_config::FilterCfg> for FilterCfg {
    fn from(c: &batdev_config::FilterCfg) -> Self {
        let kernel = match c.kernel {
            batdev_config::KernelKind::SavitzkyGolay => KernelKind::SavitzkyGolay,
            batdev_config::KernelKind::Gaussian => KernelKind::Gaussian {
                sigma: c.sigma.unwrap_or(DEFAULT_SIGMA),
            },
            batdev_config::KernelKind::Mean => KernelKind::Mean,
        };
        let warmup = match c.warmup {
            batdev_config::Warmup::Suppress => WarmupPolicy::Suppress,
            batdev_config::Warmup::RunningMean => WarmupPolicy::RunningMean,
        };
        Self {
            kernel,
            capacity: c.capacity,
            warmup,
        }
    }
}

// ── ChargeCfg ────────────────────────────────────────────────────────────────

impl From<&batdev_config::ChargeCfg> for ChargeCfg {
    fn from(c: &batdev_config::ChargeCfg) -> Self {
        Self {
            target_ma: c.target_ma,
            band_plus_ma: c.band_plus_ma,
            band_minus_ma: c.band_minus_ma,
            max_charge_s: c.max_charge_s,
            dip_detection: c.dip_detection,
            arm_detector_s: c.arm_detector_s,
            dip_volts: c.dip_volts,
            extension_s: c.extension_s,
            cv_volts: c.cv_volts,
            cv_band_volts: c.cv_band_volts,
            cv_taper_ma: c.cv_taper_ma,
        }
    }
}

// ── DischargeCfg ─────────────────────────────────────────────────────────────

pub const fn load_from_name(l: batdev_config::LoadName) -> Load {
    match l {
        batdev_config::LoadName::Heavy => Load::Heavy,
        batdev_config::LoadName::Medium => Load::Medium,
        batdev_config::LoadName::Light => Load::Light,
    }
}

impl From<&batdev_config::DischargeCfg> for DischargeCfg {
    fn from(c: &batdev_config::DischargeCfg) -> Self {
        Self {
            start_load: load_from_name(c.start_load),
            cutoff_volts: c.cutoff_volts,
            rebound_s: c.rebound_s,
            rebound_volts: c.rebound_volts,
            max_discharge_s: c.max_discharge_s,
        }
    }
}

// ── IdentifyCfg / Limits ─────────────────────────────────────────────────────

impl From<&batdev_config::IdentifyCfg> for IdentifyCfg {
    fn from(c: &batdev_config::IdentifyCfg) -> Self {
        Self {
            nimh_min_volts: c.nimh_min_volts,
            nimh_max_volts: c.nimh_max_volts,
            alkaline_max_volts: c.alkaline_max_volts,
            lithium_max_volts: c.lithium_max_volts,
        }
    }
}

impl From<&batdev_config::Limits> for Limits {
    fn from(c: &batdev_config::Limits) -> Self {
        Self {
            panic_volts: c.panic_volts,
            max_charge_volts: c.max_charge_volts,
            reverse_volts: c.reverse_volts,
            no_battery_volts: c.no_battery_volts,
            min_temp_c: c.min_temp_c,
            max_temp_c: c.max_temp_c,
            max_ma: c.max_ma,
            min_ma: c.min_ma,
            charge_delta_c: c.charge_delta_c,
            max_rate_c_per_min: c.max_rate_c_per_min,
            rate_window_s: c.rate_window_s,
        }
    }
}

// ── SessionCfg ───────────────────────────────────────────────────────────────

impl From<&batdev_config::Config> for SessionCfg {
    fn from(c: &batdev_config::Config) -> Self {
        Self {
            timers: (&c.timers).into(),
            filter: (&c.filter).into(),
            charge: (&c.charge).into(),
            discharge: (&c.discharge).into(),
            identify: (&c.identify).into(),
            limits: (&c.limits).into(),
        }
    }
}

// ── Calibration ──────────────────────────────────────────────────────────────

/// Fitted or persisted calibration in the form the sampler applies.
pub const fn calibration_from_cfg(c: &batdev_config::Calibration) -> Calibration {
    Calibration {
        bus_scale: c.bus_scale,
        bus_offset: c.bus_offset,
        shunt_scale: c.shunt_scale,
        shunt_offset: c.shunt_offset,
    }
}
