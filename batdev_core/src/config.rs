//! Configuration types for the supervisory engine.
//!
//! These are the runtime configuration structs used by `Engine` and
//! `Evaluator`. They are separate from the TOML-deserialized config in
//! `batdev_config`; see `conversions` for the mapping.

use batdev_traits::Load;

use crate::error::BuildError;
use crate::filter::WarmupPolicy;

/// Tick period and free-running timer reloads.
#[derive(Debug, Clone)]
pub struct TimerCfg {
    /// Hardware tick period in milliseconds.
    pub tick_ms: u32,
    /// Periodic report cadence, in ticks.
    pub report_ticks: u32,
    /// Minimum spacing between potentiometer nudges, in ticks.
    pub pulse_ticks: u32,
    /// Channel sampling cadence, in ticks.
    pub sample_ticks: u32,
}

impl Default for TimerCfg {
    fn default() -> Self {
        Self {
            tick_ms: 10,
            report_ticks: 500,
            pulse_ticks: 100,
            sample_ticks: 10,
        }
    }
}

/// Convolution kernel selection; capacity lives in `FilterCfg`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelKind {
    /// 11-point quadratic Savitzky-Golay smoothing (capacity must be 11).
    SavitzkyGolay,
    /// Normalized Gaussian weights with the given standard deviation (in samples).
    Gaussian { sigma: f32 },
    /// Uniform weights (straight arithmetic mean).
    Mean,
}

/// Smoothing filter configuration.
#[derive(Debug, Clone)]
pub struct FilterCfg {
    pub kernel: KernelKind,
    /// Window capacity in samples. Must match the kernel length.
    pub capacity: usize,
    /// What a partially filled window reports.
    pub warmup: WarmupPolicy,
}

impl Default for FilterCfg {
    fn default() -> Self {
        Self {
            kernel: KernelKind::SavitzkyGolay,
            capacity: 11,
            warmup: WarmupPolicy::Suppress,
        }
    }
}

/// Constant-current / constant-voltage charge parameters.
#[derive(Debug, Clone)]
pub struct ChargeCfg {
    /// Constant-current target (mA).
    pub target_ma: f32,
    /// Upper band width above target (mA).
    pub band_plus_ma: f32,
    /// Lower band width below target (mA).
    pub band_minus_ma: f32,
    /// Session charge-time ceiling (s).
    pub max_charge_s: u32,
    /// Enable -dV dip detection.
    pub dip_detection: bool,
    /// Delay before the dip detector arms (s).
    pub arm_detector_s: u32,
    /// Voltage drop below the running peak that counts as a dip (V).
    pub dip_volts: f32,
    /// Charging continues this long past a detected dip (s).
    pub extension_s: u32,
    /// When set, constant-current hands over to constant-voltage at this bus voltage.
    pub cv_volts: Option<f32>,
    /// Half-width of the constant-voltage band (V).
    pub cv_band_volts: f32,
    /// Constant-voltage phase completes once current tapers below this (mA).
    pub cv_taper_ma: f32,
}

impl Default for ChargeCfg {
    fn default() -> Self {
        Self {
            target_ma: 1000.0,
            band_plus_ma: 7.0,
            band_minus_ma: 3.0,
            max_charge_s: 4 * 60 * 60,
            dip_detection: true,
            arm_detector_s: 10 * 60,
            dip_volts: 0.005,
            extension_s: 5 * 60,
            cv_volts: None,
            cv_band_volts: 0.005,
            cv_taper_ma: 100.0,
        }
    }
}

/// Stepped-load discharge parameters.
#[derive(Debug, Clone)]
pub struct DischargeCfg {
    /// First load applied; lighter loads follow after each rebound.
    pub start_load: Load,
    /// Loaded voltage at which the current load is removed (V).
    pub cutoff_volts: f32,
    /// Rest period after removing a load (s).
    pub rebound_s: u32,
    /// Rebound above cutoff required to continue with a lighter load (V).
    pub rebound_volts: f32,
    /// Session discharge-time ceiling (s).
    pub max_discharge_s: u32,
}

impl Default for DischargeCfg {
    fn default() -> Self {
        Self {
            start_load: Load::Heavy,
            cutoff_volts: 1.0,
            rebound_s: 60,
            rebound_volts: 0.05,
            max_discharge_s: 8 * 60 * 60,
        }
    }
}

/// Open-circuit voltage windows used to classify the cell.
#[derive(Debug, Clone)]
pub struct IdentifyCfg {
    pub nimh_min_volts: f32,
    pub nimh_max_volts: f32,
    pub alkaline_max_volts: f32,
    pub lithium_max_volts: f32,
}

impl Default for IdentifyCfg {
    fn default() -> Self {
        Self {
            nimh_min_volts: 0.9,
            nimh_max_volts: 1.47,
            alkaline_max_volts: 1.65,
            lithium_max_volts: 1.9,
        }
    }
}

/// Safety thresholds consulted by the interlock list.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Per-session voltage panic level (V).
    pub panic_volts: f32,
    /// Absolute voltage ceiling, never exceeded by any session (V).
    pub max_charge_volts: f32,
    /// Bus voltage below `-reverse_volts` means a reversed cell.
    pub reverse_volts: f32,
    /// Bus voltage below this means nothing is connected.
    pub no_battery_volts: f32,
    pub min_temp_c: f32,
    pub max_temp_c: f32,
    /// Shunt current ceiling, either direction (mA).
    pub max_ma: f32,
    /// Minimum regulated charge current once ramp-up has finished (mA).
    pub min_ma: f32,
    /// Load minus ambient temperature that ends a charge (deg C).
    pub charge_delta_c: f32,
    /// Load temperature slope that ends a charge (deg C per minute).
    pub max_rate_c_per_min: f32,
    /// Window over which the temperature slope is measured (s).
    pub rate_window_s: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            panic_volts: 1.65,
            max_charge_volts: 1.72,
            reverse_volts: 0.1,
            no_battery_volts: 0.2,
            min_temp_c: -10.0,
            max_temp_c: 40.9,
            max_ma: 3000.0,
            min_ma: 20.0,
            charge_delta_c: 8.0,
            max_rate_c_per_min: 1.0,
            rate_window_s: 60,
        }
    }
}

/// Everything a session needs besides its collaborators.
#[derive(Debug, Clone, Default)]
pub struct SessionCfg {
    pub timers: TimerCfg,
    pub filter: FilterCfg,
    pub charge: ChargeCfg,
    pub discharge: DischargeCfg,
    pub identify: IdentifyCfg,
    pub limits: Limits,
}

impl SessionCfg {
    /// Reject values the engine cannot run with. Mirrors the checks in
    /// `batdev_config::Config::validate` for callers that build configs in code.
    pub fn validate(&self) -> Result<(), BuildError> {
        let t = &self.timers;
        if t.tick_ms == 0 {
            return Err(BuildError::InvalidConfig("timers.tick_ms must be > 0"));
        }
        if t.report_ticks == 0 || t.pulse_ticks == 0 || t.sample_ticks == 0 {
            return Err(BuildError::InvalidConfig("timer reloads must be > 0"));
        }
        if self.filter.capacity == 0 {
            return Err(BuildError::InvalidConfig("filter.capacity must be > 0"));
        }
        let c = &self.charge;
        if !c.target_ma.is_finite() || c.target_ma <= 0.0 {
            return Err(BuildError::InvalidConfig("charge.target_ma must be > 0"));
        }
        let bands = [c.band_plus_ma, c.band_minus_ma];
        if bands.iter().any(|b| b.is_nan() || *b < 0.0) {
            return Err(BuildError::InvalidConfig("charge band widths must be >= 0"));
        }
        if c.band_minus_ma >= c.target_ma {
            return Err(BuildError::InvalidConfig(
                "charge.band_minus_ma must be below target_ma",
            ));
        }
        if c.dip_volts.is_nan() || c.dip_volts <= 0.0 {
            return Err(BuildError::InvalidConfig("charge.dip_volts must be > 0"));
        }
        let l = &self.limits;
        if l.panic_volts > l.max_charge_volts {
            return Err(BuildError::InvalidConfig(
                "limits.panic_volts must not exceed limits.max_charge_volts",
            ));
        }
        if let Some(cv) = c.cv_volts
            && cv >= l.panic_volts
        {
            return Err(BuildError::InvalidConfig(
                "charge.cv_volts must be below limits.panic_volts",
            ));
        }
        if l.min_temp_c >= l.max_temp_c {
            return Err(BuildError::InvalidConfig(
                "limits.min_temp_c must be below limits.max_temp_c",
            ));
        }
        if l.min_ma >= c.target_ma - c.band_minus_ma {
            return Err(BuildError::InvalidConfig(
                "limits.min_ma must be below the charge band",
            ));
        }
        if l.max_ma <= c.target_ma + c.band_plus_ma {
            return Err(BuildError::InvalidConfig(
                "limits.max_ma must be above the charge band",
            ));
        }
        let d = &self.discharge;
        if d.cutoff_volts <= l.no_battery_volts {
            return Err(BuildError::InvalidConfig(
                "discharge.cutoff_volts must be above limits.no_battery_volts",
            ));
        }
        let i = &self.identify;
        if !(i.nimh_min_volts < i.nimh_max_volts
            && i.nimh_max_volts <= i.alkaline_max_volts
            && i.alkaline_max_volts <= i.lithium_max_volts)
        {
            return Err(BuildError::InvalidConfig(
                "identify voltage windows must be ascending",
            ));
        }
        Ok(())
    }
}
