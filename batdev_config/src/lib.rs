#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and calibration parsing for the charger/analyzer.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated. Every
//!   section has defaults, so an empty file is a valid configuration.
//! - The calibration CSV loader enforces headers and fits scale/offset per
//!   channel with one robust refit pass to reduce outlier influence.
use serde::Deserialize;

/// Calibration CSV schema.
///
/// Expected headers:
/// channel,raw,value
///
/// `channel` is `bus` (value in volts) or `shunt` (value in mA).
///
/// Example:
/// channel,raw,value
/// bus,250,1.0
/// bus,375,1.5
/// shunt,5000,500.0
/// shunt,10000,1000.0
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct CalibrationRow {
    pub channel: CalChannel,
    pub raw: i64,
    pub value: f32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CalChannel {
    Bus,
    Shunt,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Timers {
    /// Tick period (ms).
    pub tick_ms: u32,
    /// Periodic report cadence (ms).
    pub report_ms: u64,
    /// Minimum spacing between potentiometer nudges (ms).
    pub pulse_ms: u64,
    /// Channel sampling cadence (ms).
    pub sample_ms: u64,
}

impl Default for Timers {
    fn default() -> Self {
        Self {
            tick_ms: 10,
            report_ms: 5_000,
            pulse_ms: 1_000,
            sample_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KernelKind {
    #[default]
    SavitzkyGolay,
    Gaussian,
    Mean,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Warmup {
    #[default]
    Suppress,
    RunningMean,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FilterCfg {
    pub kernel: KernelKind,
    /// Window capacity in samples. Savitzky-Golay requires 11.
    pub capacity: usize,
    /// Gaussian standard deviation in samples; required for `kernel = "gaussian"`.
    pub sigma: Option<f32>,
    pub warmup: Warmup,
}

impl Default for FilterCfg {
    fn default() -> Self {
        Self {
            kernel: KernelKind::SavitzkyGolay,
            capacity: 11,
            sigma: None,
            warmup: Warmup::Suppress,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChargeCfg {
    pub target_ma: f32,
    pub band_plus_ma: f32,
    pub band_minus_ma: f32,
    pub max_charge_s: u32,
    pub dip_detection: bool,
    pub arm_detector_s: u32,
    pub dip_volts: f32,
    pub extension_s: u32,
    /// Hand over to constant-voltage at this bus voltage; absent disables CV.
    pub cv_volts: Option<f32>,
    pub cv_band_volts: f32,
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

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoadName {
    #[default]
    Heavy,
    Medium,
    Light,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DischargeCfg {
    pub start_load: LoadName,
    pub cutoff_volts: f32,
    pub rebound_s: u32,
    pub rebound_volts: f32,
    pub max_discharge_s: u32,
}

impl Default for DischargeCfg {
    fn default() -> Self {
        Self {
            start_load: LoadName::Heavy,
            cutoff_volts: 1.0,
            rebound_s: 60,
            rebound_volts: 0.05,
            max_discharge_s: 8 * 60 * 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
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

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Limits {
    pub panic_volts: f32,
    pub max_charge_volts: f32,
    pub reverse_volts: f32,
    pub no_battery_volts: f32,
    pub min_temp_c: f32,
    pub max_temp_c: f32,
    pub max_ma: f32,
    pub min_ma: f32,
    pub charge_delta_c: f32,
    pub max_rate_c_per_min: f32,
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

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InterruptCfg {
    /// Number of consecutive polls required to latch a console interrupt
    pub debounce_n: u8,
}

impl Default for InterruptCfg {
    fn default() -> Self {
        Self { debounce_n: 2 }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// Which cell the simulated bench holds.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SimCell {
    #[default]
    Nimh,
    Alkaline,
    Lithium,
    Reversed,
    Absent,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimCfg {
    pub cell: SimCell,
    pub capacity_mah: f32,
    /// Initial state of charge, 0.0..=1.0.
    pub initial_soc: f32,
    pub ambient_c: f32,
    /// Peak-to-peak measurement noise in raw ADC counts.
    pub noise_counts: u32,
    pub seed: u64,
    /// Force the ideal-diode status line low.
    pub diode_fault: bool,
    /// Simulated seconds per sample; values above the sample period fast-forward the cell.
    pub time_scale: f32,
}

impl Default for SimCfg {
    fn default() -> Self {
        Self {
            cell: SimCell::Nimh,
            capacity_mah: 2000.0,
            initial_soc: 0.3,
            ambient_c: 22.0,
            noise_counts: 2,
            seed: 0x5eed,
            diode_fault: false,
            time_scale: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub timers: Timers,
    #[serde(default)]
    pub filter: FilterCfg,
    #[serde(default)]
    pub charge: ChargeCfg,
    #[serde(default)]
    pub discharge: DischargeCfg,
    #[serde(default)]
    pub identify: IdentifyCfg,
    #[serde(default)]
    pub limits: Limits,
    /// Console interrupt debounce
    #[serde(default)]
    pub interrupt: InterruptCfg,
    #[serde(default)]
    pub logging: Logging,
    /// Simulated bench parameters
    #[serde(default)]
    pub sim: SimCfg,
    /// Optional persisted calibration; preferred at runtime over CSV when present.
    #[serde(default)]
    pub calibration: Option<Calibration>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Raw-count to physical-unit coefficients for the INA219 channels.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// volts per count
    pub bus_scale: f32,
    #[serde(default)]
    pub bus_offset: f32,
    /// mA per count
    pub shunt_scale: f32,
    #[serde(default)]
    pub shunt_offset: f32,
}

/// Ordinary least squares in f64: value = a*raw + b.
fn fit(pts: &[(i64, f32)]) -> eyre::Result<(f64, f64)> {
    let n = pts.len() as f64;
    let mean_x = pts.iter().map(|p| p.0 as f64).sum::<f64>() / n;
    let mean_y = pts.iter().map(|p| f64::from(p.1)).sum::<f64>() / n;
    let mut sxx = 0.0f64;
    let mut sxy = 0.0f64;
    for (rx, vy) in pts {
        let x = *rx as f64 - mean_x;
        let y = f64::from(*vy) - mean_y;
        sxx += x * x;
        sxy += x * y;
    }
    if !sxx.is_finite() || sxx == 0.0 {
        eyre::bail!("calibration cannot determine slope (degenerate X variance)");
    }
    let a = sxy / sxx;
    if !a.is_finite() || a == 0.0 {
        eyre::bail!("calibration produced an unusable slope ({a})");
    }
    Ok((a, mean_y - a * mean_x))
}

/// Refit once on the points whose residual against (a0, b0) is within `k`
/// times the RMS residual. `None` when nothing was rejected or too few remain.
fn robust_refit(pts: &[(i64, f32)], a0: f64, b0: f64, k: f64) -> Option<(f64, f64)> {
    let sumsq: f64 = pts
        .iter()
        .map(|(x, y)| {
            let r = f64::from(*y) - (a0 * *x as f64 + b0);
            r * r
        })
        .sum();
    let rms = (sumsq / pts.len() as f64).sqrt();
    if !(rms.is_finite() && rms > 0.0) {
        return None;
    }
    let thr = k * rms;
    let inliers: Vec<(i64, f32)> = pts
        .iter()
        .copied()
        .filter(|(x, y)| (f64::from(*y) - (a0 * *x as f64 + b0)).abs() <= thr)
        .collect();
    if inliers.len() < 2 || inliers.len() == pts.len() {
        return None;
    }
    fit(&inliers).ok()
}

/// Fit one channel. Raw values must be strictly monotonic in file order.
fn fit_channel(name: &str, pts: &[(i64, f32)]) -> eyre::Result<(f32, f32)> {
    if pts.len() < 2 {
        eyre::bail!(
            "calibration requires at least two {name} rows, got {}",
            pts.len()
        );
    }
    let mut dir = 0i8;
    for (i, w) in pts.windows(2).enumerate() {
        let d = w[1].0 - w[0].0;
        if d == 0 {
            eyre::bail!(
                "calibration {name} rows have duplicate raw values at index {} and {}",
                i,
                i + 1
            );
        }
        let step = if d > 0 { 1 } else { -1 };
        if dir == 0 {
            dir = step;
        } else if dir != step {
            eyre::bail!("calibration {name} raw values must be strictly monotonic");
        }
    }
    let (a0, b0) = fit(pts)?;
    let (a, b) = robust_refit(pts, a0, b0, 2.0).unwrap_or((a0, b0));
    Ok((a as f32, b as f32))
}

impl Calibration {
    /// Fit scale/offset for both channels from calibration rows.
    pub fn from_rows(rows: &[CalibrationRow]) -> eyre::Result<Self> {
        let pick = |ch: CalChannel| -> Vec<(i64, f32)> {
            rows.iter()
                .filter(|r| r.channel == ch)
                .map(|r| (r.raw, r.value))
                .collect()
        };
        let (bus_scale, bus_offset) = fit_channel("bus", &pick(CalChannel::Bus))?;
        let (shunt_scale, shunt_offset) = fit_channel("shunt", &pick(CalChannel::Shunt))?;
        Ok(Self {
            bus_scale,
            bus_offset,
            shunt_scale,
            shunt_offset,
        })
    }
}

impl TryFrom<&[CalibrationRow]> for Calibration {
    type Error = eyre::Report;
    fn try_from(rows: &[CalibrationRow]) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

pub fn load_calibration_csv(path: &std::path::Path) -> eyre::Result<Calibration> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["channel", "raw", "value"];
    let actual: Vec<String> = headers.iter().map(ToString::to_string).collect();
    if actual != expected {
        eyre::bail!(
            "calibration CSV must have headers 'channel,raw,value', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => eyre::bail!("invalid CSV row {}: {}", idx + 2, e),
        }
    }

    Calibration::from_rows(&rows)
}

fn positive(x: f32) -> bool {
    x.is_finite() && x > 0.0
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Timers
        let t = &self.timers;
        if t.tick_ms == 0 {
            eyre::bail!("timers.tick_ms must be > 0");
        }
        for (name, ms) in [
            ("report_ms", t.report_ms),
            ("pulse_ms", t.pulse_ms),
            ("sample_ms", t.sample_ms),
        ] {
            if ms < u64::from(t.tick_ms) {
                eyre::bail!("timers.{name} must be at least one tick ({} ms)", t.tick_ms);
            }
        }

        // Filter
        let f = &self.filter;
        if f.capacity == 0 {
            eyre::bail!("filter.capacity must be >= 1");
        }
        match f.kernel {
            KernelKind::SavitzkyGolay if f.capacity != 11 => {
                eyre::bail!("filter.capacity must be 11 for the savitzky_golay kernel");
            }
            KernelKind::Gaussian => match f.sigma {
                Some(s) if positive(s) => {}
                _ => eyre::bail!("filter.sigma must be > 0 for the gaussian kernel"),
            },
            _ => {}
        }

        // Charge
        let c = &self.charge;
        if !positive(c.target_ma) {
            eyre::bail!("charge.target_ma must be > 0");
        }
        if c.band_plus_ma.is_sign_negative() || c.band_minus_ma.is_sign_negative() {
            eyre::bail!("charge band widths must be >= 0");
        }
        if c.band_minus_ma >= c.target_ma {
            eyre::bail!("charge.band_minus_ma must be below charge.target_ma");
        }
        if !positive(c.dip_volts) {
            eyre::bail!("charge.dip_volts must be > 0");
        }
        if c.max_charge_s == 0 {
            eyre::bail!("charge.max_charge_s must be >= 1");
        }
        if c.cv_band_volts.is_sign_negative() {
            eyre::bail!("charge.cv_band_volts must be >= 0");
        }

        // Limits
        let l = &self.limits;
        if l.panic_volts > l.max_charge_volts {
            eyre::bail!("limits.panic_volts must not exceed limits.max_charge_volts");
        }
        if let Some(cv) = c.cv_volts
            && cv >= l.panic_volts
        {
            eyre::bail!("charge.cv_volts must be below limits.panic_volts");
        }
        if l.min_temp_c >= l.max_temp_c {
            eyre::bail!("limits.min_temp_c must be below limits.max_temp_c");
        }
        if l.min_ma >= c.target_ma - c.band_minus_ma {
            eyre::bail!("limits.min_ma must be below the charge band");
        }
        if l.max_ma <= c.target_ma + c.band_plus_ma {
            eyre::bail!("limits.max_ma must be above the charge band");
        }
        if l.rate_window_s == 0 {
            eyre::bail!("limits.rate_window_s must be >= 1");
        }

        // Discharge
        let d = &self.discharge;
        if d.cutoff_volts <= l.no_battery_volts {
            eyre::bail!("discharge.cutoff_volts must be above limits.no_battery_volts");
        }
        if d.rebound_volts.is_sign_negative() {
            eyre::bail!("discharge.rebound_volts must be >= 0");
        }

        // Identify
        let i = &self.identify;
        if !(i.nimh_min_volts < i.nimh_max_volts
            && i.nimh_max_volts <= i.alkaline_max_volts
            && i.alkaline_max_volts <= i.lithium_max_volts)
        {
            eyre::bail!("identify voltage windows must be ascending");
        }

        // Interrupt
        if self.interrupt.debounce_n == 0 {
            eyre::bail!("interrupt.debounce_n must be >= 1");
        }

        // Sim
        let s = &self.sim;
        if !(0.0..=1.0).contains(&s.initial_soc) {
            eyre::bail!("sim.initial_soc must be in [0.0, 1.0]");
        }
        if !positive(s.capacity_mah) {
            eyre::bail!("sim.capacity_mah must be > 0");
        }
        if !positive(s.time_scale) {
            eyre::bail!("sim.time_scale must be > 0");
        }

        // Calibration
        if let Some(cal) = &self.calibration
            && (cal.bus_scale == 0.0 || cal.shunt_scale == 0.0)
        {
            eyre::bail!("calibration scales must be non-zero");
        }

        Ok(())
    }
}
