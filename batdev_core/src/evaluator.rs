//! Supervisory state machine: classifies the cell, regulates charge current or
//! voltage, steps discharge loads, and applies the interlocks.
//!
//! The evaluator is pure with respect to hardware. It consumes smoothed
//! readings and the status lines, reads and arms timers, and returns an
//! [`Evaluation`] describing what the engine must do next.

use batdev_traits::{Load, StatusLines};

use crate::config::{ChargeCfg, DischargeCfg, IdentifyCfg, Limits, SessionCfg};
use crate::interlock::{self, Readings, Snapshot};
use crate::status::{ExitStatus, Outcome, Regulation};
use crate::timers::{OneShot, TimerBank};
use crate::util::{secs_to_ticks, ticks_to_ms};

/// Smallest current magnitude used as an internal-resistance divisor (mA).
const MIN_IRES_MA: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Charge,
    Discharge,
    Identify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ConstantCurrent,
    ConstantVoltage,
    DipDetection,
    Extension,
    Discharge(Load),
    Rebound(Load),
    Terminated(ExitStatus),
}

impl Phase {
    /// Charge power path should be enabled.
    pub const fn is_charging(self) -> bool {
        matches!(
            self,
            Phase::ConstantCurrent | Phase::ConstantVoltage | Phase::DipDetection | Phase::Extension
        )
    }

    /// Shunt current is band-regulated against the charge target.
    pub const fn regulates_current(self) -> bool {
        matches!(
            self,
            Phase::ConstantCurrent | Phase::DipDetection | Phase::Extension
        )
    }

    /// Load resistor that should be connected in this phase.
    pub const fn load(self) -> Option<Load> {
        match self {
            Phase::Discharge(load) => Some(load),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
}

/// Result of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub outcome: Outcome,
    pub transition: Option<Transition>,
    /// Bus-voltage window must be flushed before the next evaluation.
    pub flush_voltage: bool,
    /// Internal resistance measured at the end of a rebound (ohms).
    pub resistance_ohms: Option<f32>,
}

impl Evaluation {
    const fn of(outcome: Outcome) -> Self {
        Self {
            outcome,
            transition: None,
            flush_voltage: false,
            resistance_ohms: None,
        }
    }
}

/// Asymmetric-band regulation: above `target + plus` decrease, below
/// `target - minus` increase, otherwise hold. NaN holds.
pub fn band_regulation(value: f32, target: f32, minus: f32, plus: f32) -> Regulation {
    if value > target + plus {
        Regulation::Decrease
    } else if value < target - minus {
        Regulation::Increase
    } else {
        Regulation::Hold
    }
}

/// Classify an open-circuit cell from its terminal voltage and the detect line.
pub fn classify_cell(
    volts: f32,
    battery_present: bool,
    identify: &IdentifyCfg,
    limits: &Limits,
) -> ExitStatus {
    if !battery_present {
        return ExitStatus::NoBattery;
    }
    if volts < -limits.reverse_volts {
        ExitStatus::ReversedBattery
    } else if volts < limits.no_battery_volts {
        ExitStatus::NoBattery
    } else if volts < identify.nimh_min_volts {
        ExitStatus::UnknownBattery
    } else if volts <= identify.nimh_max_volts {
        ExitStatus::Accepting
    } else if volts <= identify.alkaline_max_volts {
        ExitStatus::Alkaline
    } else if volts <= identify.lithium_max_volts {
        ExitStatus::Lithium
    } else {
        ExitStatus::UnknownBattery
    }
}

/// Durations converted to ticks once at construction.
#[derive(Debug, Clone, Copy)]
struct TickBudget {
    tick_ms: u32,
    max_charge: u32,
    arm_detector: u32,
    extension: u32,
    rebound: u32,
    max_discharge: u32,
    rate_window: u32,
}

#[derive(Debug, Clone)]
pub struct Evaluator {
    mode: SessionMode,
    phase: Phase,
    charge: ChargeCfg,
    discharge: DischargeCfg,
    identify: IdentifyCfg,
    limits: Limits,
    ticks: TickBudget,
    ramped: bool,
    peak_volts: Option<f32>,
    /// Voltage and current just before the load was removed.
    loaded: Option<(f32, f32)>,
    rate_ref: Option<(u32, f32)>,
    temp_rate: Option<f32>,
}

impl Evaluator {
    pub fn new(mode: SessionMode, cfg: &SessionCfg) -> Self {
        let tick_ms = cfg.timers.tick_ms;
        Self {
            mode,
            phase: Phase::Idle,
            charge: cfg.charge.clone(),
            discharge: cfg.discharge.clone(),
            identify: cfg.identify.clone(),
            limits: cfg.limits.clone(),
            ticks: TickBudget {
                tick_ms,
                max_charge: secs_to_ticks(cfg.charge.max_charge_s, tick_ms),
                arm_detector: secs_to_ticks(cfg.charge.arm_detector_s, tick_ms),
                extension: secs_to_ticks(cfg.charge.extension_s, tick_ms),
                rebound: secs_to_ticks(cfg.discharge.rebound_s, tick_ms),
                max_discharge: secs_to_ticks(cfg.discharge.max_discharge_s, tick_ms),
                rate_window: secs_to_ticks(cfg.limits.rate_window_s, tick_ms).max(1),
            },
            ramped: false,
            peak_volts: None,
            loaded: None,
            rate_ref: None,
            temp_rate: None,
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Ramp-up finished: current has entered the regulation band at least once.
    #[inline]
    pub fn is_ramped(&self) -> bool {
        self.ramped
    }

    #[inline]
    pub fn temp_rate_c_per_min(&self) -> Option<f32> {
        self.temp_rate
    }

    /// Force the terminal phase from outside (console interrupt, hardware error).
    /// Has no effect once already terminated.
    pub fn abort(&mut self, status: ExitStatus) -> Option<Transition> {
        if matches!(self.phase, Phase::Terminated(_)) {
            return None;
        }
        let from = self.phase;
        self.phase = Phase::Terminated(status);
        Some(Transition {
            from,
            to: self.phase,
        })
    }

    /// Evaluate one set of smoothed readings.
    pub fn step(&mut self, r: &Readings, lines: StatusLines, timers: &TimerBank) -> Evaluation {
        let from = self.phase;
        let mut eval = match from {
            Phase::Terminated(status) => return Evaluation::of(Outcome::Terminal(status)),
            Phase::Idle => self.classify(r, lines, timers),
            _ => {
                let snapshot = self.snapshot(r, lines, timers);
                match interlock::first_tripped(&snapshot, &self.limits) {
                    Some(status) => self.terminate(status),
                    None => self.advance(r, timers),
                }
            }
        };
        if self.phase != from {
            eval.transition = Some(Transition {
                from,
                to: self.phase,
            });
        }
        eval
    }

    /// Run the interlocks that do not read the bus voltage, for the samples
    /// after a voltage flush. `r.bus_volts` is ignored. The phase only moves
    /// to `Terminated`; regulation holds until the window is full again.
    pub fn step_without_bus_voltage(
        &mut self,
        r: &Readings,
        lines: StatusLines,
        timers: &TimerBank,
    ) -> Evaluation {
        let from = self.phase;
        match from {
            Phase::Terminated(status) => Evaluation::of(Outcome::Terminal(status)),
            Phase::Idle => Evaluation::of(Outcome::Continue(Regulation::Hold)),
            _ => {
                let snapshot = self.snapshot(r, lines, timers);
                match interlock::first_tripped_without_bus_voltage(&snapshot, &self.limits) {
                    Some(status) => {
                        let mut eval = self.terminate(status);
                        eval.transition = Some(Transition {
                            from,
                            to: self.phase,
                        });
                        eval
                    }
                    None => Evaluation::of(Outcome::Continue(Regulation::Hold)),
                }
            }
        }
    }

    fn snapshot(&mut self, r: &Readings, lines: StatusLines, timers: &TimerBank) -> Snapshot {
        let phase = self.phase;
        if phase.is_charging() {
            self.track_temp_rate(r.therm_load_c, timers);
        }
        Snapshot {
            readings: *r,
            lines,
            charging: phase.is_charging(),
            regulating_current: phase.regulates_current() && self.ramped,
            temp_rate_c_per_min: self.temp_rate,
            max_time_expired: timers.is_one_shot_expired(OneShot::MaxChargeTimer),
        }
    }

    fn terminate(&mut self, status: ExitStatus) -> Evaluation {
        self.phase = Phase::Terminated(status);
        Evaluation::of(Outcome::Terminal(status))
    }

    fn classify(&mut self, r: &Readings, lines: StatusLines, timers: &TimerBank) -> Evaluation {
        let status = classify_cell(
            r.bus_volts,
            lines.battery_present,
            &self.identify,
            &self.limits,
        );
        match (self.mode, status) {
            (SessionMode::Charge, ExitStatus::Accepting) => {
                self.enter_constant_current(timers);
                Evaluation::of(Outcome::Continue(Regulation::Hold))
            }
            (SessionMode::Discharge, ExitStatus::Accepting) => {
                timers.arm_one_shot(OneShot::MaxChargeTimer, self.ticks.max_discharge);
                self.phase = Phase::Discharge(self.discharge.start_load);
                Evaluation::of(Outcome::Continue(Regulation::Hold))
            }
            (_, status) => self.terminate(status),
        }
    }

    fn enter_constant_current(&mut self, timers: &TimerBank) {
        timers.arm_one_shot(OneShot::MaxChargeTimer, self.ticks.max_charge);
        if self.charge.dip_detection {
            timers.arm_one_shot(OneShot::ArmDetectorTimer, self.ticks.arm_detector);
        }
        self.ramped = false;
        self.rate_ref = None;
        self.temp_rate = None;
        self.phase = Phase::ConstantCurrent;
    }

    fn advance(&mut self, r: &Readings, timers: &TimerBank) -> Evaluation {
        match self.phase {
            Phase::ConstantCurrent => {
                if let Some(cv) = self.charge.cv_volts
                    && r.bus_volts >= cv
                {
                    self.phase = Phase::ConstantVoltage;
                    return Evaluation::of(Outcome::Continue(self.regulate_voltage(r)));
                }
                if self.charge.dip_detection && timers.is_one_shot_expired(OneShot::ArmDetectorTimer) {
                    self.phase = Phase::DipDetection;
                    self.peak_volts = None;
                    let mut eval = Evaluation::of(Outcome::Continue(self.regulate_current(r)));
                    eval.flush_voltage = true;
                    return eval;
                }
                Evaluation::of(Outcome::Continue(self.regulate_current(r)))
            }
            Phase::DipDetection => {
                let peak = self.peak_volts.map_or(r.bus_volts, |p| p.max(r.bus_volts));
                self.peak_volts = Some(peak);
                if peak - r.bus_volts >= self.charge.dip_volts {
                    tracing::info!(peak_v = peak, volts = r.bus_volts, "voltage dip detected");
                    timers.arm_one_shot(OneShot::ExtensionTimer, self.ticks.extension);
                    self.phase = Phase::Extension;
                }
                Evaluation::of(Outcome::Continue(self.regulate_current(r)))
            }
            Phase::Extension => {
                if timers.is_one_shot_expired(OneShot::ExtensionTimer) {
                    return self.terminate(ExitStatus::DipDetected);
                }
                Evaluation::of(Outcome::Continue(self.regulate_current(r)))
            }
            Phase::ConstantVoltage => {
                if r.shunt_ma <= self.charge.cv_taper_ma {
                    return self.terminate(ExitStatus::Success);
                }
                Evaluation::of(Outcome::Continue(self.regulate_voltage(r)))
            }
            Phase::Discharge(load) => {
                if r.bus_volts <= self.discharge.cutoff_volts {
                    self.loaded = Some((r.bus_volts, r.shunt_ma));
                    timers.arm_one_shot(OneShot::ReboundTimer, self.ticks.rebound);
                    self.phase = Phase::Rebound(load);
                }
                Evaluation::of(Outcome::Continue(Regulation::Hold))
            }
            Phase::Rebound(load) => {
                if !timers.is_one_shot_expired(OneShot::ReboundTimer) {
                    return Evaluation::of(Outcome::Continue(Regulation::Hold));
                }
                let resistance_ohms = self.loaded.take().and_then(|(v_loaded, i_loaded)| {
                    let amps = i_loaded.abs();
                    (amps >= MIN_IRES_MA).then(|| (r.bus_volts - v_loaded) / (amps / 1000.0))
                });
                let recovered =
                    r.bus_volts >= self.discharge.cutoff_volts + self.discharge.rebound_volts;
                let mut eval = match load.lighter() {
                    Some(next) if recovered => {
                        self.phase = Phase::Discharge(next);
                        let mut eval = Evaluation::of(Outcome::Continue(Regulation::Hold));
                        eval.flush_voltage = true;
                        eval
                    }
                    _ => self.terminate(ExitStatus::Success),
                };
                eval.resistance_ohms = resistance_ohms;
                eval
            }
            Phase::Idle | Phase::Terminated(_) => Evaluation::of(Outcome::Continue(Regulation::Hold)),
        }
    }

    fn regulate_current(&mut self, r: &Readings) -> Regulation {
        let c = &self.charge;
        if !self.ramped && r.shunt_ma >= c.target_ma - c.band_minus_ma {
            self.ramped = true;
            tracing::debug!(ma = r.shunt_ma, "ramp-up complete");
        }
        band_regulation(r.shunt_ma, c.target_ma, c.band_minus_ma, c.band_plus_ma)
    }

    fn regulate_voltage(&self, r: &Readings) -> Regulation {
        let target = self.charge.cv_volts.unwrap_or(r.bus_volts);
        let band = self.charge.cv_band_volts;
        band_regulation(r.bus_volts, target, band, band)
    }

    /// Slope of the load temperature, refreshed once per rate window.
    fn track_temp_rate(&mut self, therm_load_c: f32, timers: &TimerBank) {
        let now = timers.now();
        match self.rate_ref {
            None => self.rate_ref = Some((now, therm_load_c)),
            Some((t0, c0)) => {
                let elapsed = now.wrapping_sub(t0);
                if elapsed >= self.ticks.rate_window {
                    let minutes = ticks_to_ms(elapsed, self.ticks.tick_ms) as f32 / 60_000.0;
                    if minutes > 0.0 {
                        self.temp_rate = Some((therm_load_c - c0) / minutes);
                    }
                    self.rate_ref = Some((now, therm_load_c));
                }
            }
        }
    }
}
