//! Ordered safety interlocks.
//!
//! The list is evaluated top to bottom on every active evaluation; the first
//! entry that trips decides the terminal status and nothing below it is
//! consulted. Order therefore encodes priority.
//!
//! Upper-bound checks are phrased so that a NaN reading trips them: a failed
//! channel read is pushed into the filter as NaN and must end the session.

use batdev_traits::StatusLines;

use crate::config::Limits;
use crate::status::ExitStatus;

/// Smoothed readings for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Readings {
    pub shunt_ma: f32,
    pub bus_volts: f32,
    pub therm_load_c: f32,
    pub therm_ambient_c: f32,
}

/// Everything an interlock predicate may look at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub readings: Readings,
    pub lines: StatusLines,
    /// The charge power path is meant to be on.
    pub charging: bool,
    /// Constant-current regulation is active and ramp-up has completed.
    pub regulating_current: bool,
    /// Latest load temperature slope, once one full window has elapsed.
    pub temp_rate_c_per_min: Option<f32>,
    pub max_time_expired: bool,
}

/// One named safety check.
#[derive(Clone, Copy)]
pub struct Interlock {
    pub status: ExitStatus,
    pub trips: fn(&Snapshot, &Limits) -> bool,
    /// Consults the bus voltage, so it cannot run while that window refills.
    pub reads_bus_voltage: bool,
}

impl std::fmt::Debug for Interlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interlock")
            .field("status", &self.status)
            .field("reads_bus_voltage", &self.reads_bus_voltage)
            .finish_non_exhaustive()
    }
}

/// `true` when `x` is above `limit` or not a number.
#[inline]
fn exceeds(x: f32, limit: f32) -> bool {
    x.is_nan() || x > limit
}

/// `true` when `x` is below `limit` or not a number.
#[inline]
fn below(x: f32, limit: f32) -> bool {
    x.is_nan() || x < limit
}

fn diode_fault(s: &Snapshot, _: &Limits) -> bool {
    s.charging && !s.lines.diode_conducting
}

fn power_bad(s: &Snapshot, _: &Limits) -> bool {
    s.charging && !s.lines.power_good
}

fn reversed(s: &Snapshot, l: &Limits) -> bool {
    s.readings.bus_volts < -l.reverse_volts
}

fn absent(s: &Snapshot, l: &Limits) -> bool {
    !s.lines.battery_present || s.readings.bus_volts < l.no_battery_volts
}

fn panic_voltage(s: &Snapshot, l: &Limits) -> bool {
    exceeds(s.readings.bus_volts, l.panic_volts)
}

fn over_ceiling(s: &Snapshot, l: &Limits) -> bool {
    exceeds(s.readings.bus_volts, l.max_charge_volts)
}

fn panic_temp(s: &Snapshot, l: &Limits) -> bool {
    [s.readings.therm_load_c, s.readings.therm_ambient_c]
        .into_iter()
        .any(|t| exceeds(t, l.max_temp_c) || below(t, l.min_temp_c))
}

fn over_current(s: &Snapshot, l: &Limits) -> bool {
    exceeds(s.readings.shunt_ma.abs(), l.max_ma)
}

fn under_current(s: &Snapshot, l: &Limits) -> bool {
    s.regulating_current && below(s.readings.shunt_ma, l.min_ma)
}

fn temp_delta(s: &Snapshot, l: &Limits) -> bool {
    s.charging
        && exceeds(
            s.readings.therm_load_c - s.readings.therm_ambient_c,
            l.charge_delta_c,
        )
}

fn temp_rate(s: &Snapshot, l: &Limits) -> bool {
    s.charging
        && s.temp_rate_c_per_min
            .is_some_and(|r| exceeds(r, l.max_rate_c_per_min))
}

fn out_of_time(s: &Snapshot, _: &Limits) -> bool {
    s.max_time_expired
}

/// The interlocks, highest priority first.
#[rustfmt::skip]
pub const INTERLOCKS: [Interlock; 12] = [
    Interlock { status: ExitStatus::IdealDiodeStatus, trips: diode_fault, reads_bus_voltage: false },
    Interlock { status: ExitStatus::PBad, trips: power_bad, reads_bus_voltage: false },
    Interlock { status: ExitStatus::ReversedBattery, trips: reversed, reads_bus_voltage: true },
    Interlock { status: ExitStatus::NoBattery, trips: absent, reads_bus_voltage: true },
    Interlock { status: ExitStatus::PanicVoltage, trips: panic_voltage, reads_bus_voltage: true },
    Interlock { status: ExitStatus::MaxChargeVoltage, trips: over_ceiling, reads_bus_voltage: true },
    Interlock { status: ExitStatus::PanicTemp, trips: panic_temp, reads_bus_voltage: false },
    Interlock { status: ExitStatus::MaxAmp, trips: over_current, reads_bus_voltage: false },
    Interlock { status: ExitStatus::MinAmp, trips: under_current, reads_bus_voltage: false },
    Interlock { status: ExitStatus::ChargeTempThreshold, trips: temp_delta, reads_bus_voltage: false },
    Interlock { status: ExitStatus::ChargeTempRate, trips: temp_rate, reads_bus_voltage: false },
    Interlock { status: ExitStatus::MaxTime, trips: out_of_time, reads_bus_voltage: false },
];

/// Status of the highest-priority interlock that trips, if any.
pub fn first_tripped(snapshot: &Snapshot, limits: &Limits) -> Option<ExitStatus> {
    INTERLOCKS
        .iter()
        .find(|i| (i.trips)(snapshot, limits))
        .map(|i| i.status)
}

/// Like [`first_tripped`], skipping the entries that read the bus voltage.
///
/// Used while the voltage window is refilling after a flush; the other
/// channels are still smoothed and their limits keep applying.
pub fn first_tripped_without_bus_voltage(snapshot: &Snapshot, limits: &Limits) -> Option<ExitStatus> {
    INTERLOCKS
        .iter()
        .filter(|i| !i.reads_bus_voltage)
        .find(|i| (i.trips)(snapshot, limits))
        .map(|i| i.status)
}
