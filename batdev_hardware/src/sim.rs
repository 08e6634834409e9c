//! Simulated bench: one cell, an INA219-style sensor, a digital pot and three
//! load resistors.
//!
//! `SimSampler` and `SimActuator` are handles onto the same [`SimBench`]. The
//! cell model advances by one step (`dt_s` simulated seconds) every time the
//! shunt channel is read, so a session's physics is driven by its own sample
//! cadence and is independent of wall-clock speed.

use std::cell::RefCell;
use std::rc::Rc;

use batdev_traits::{
    Actuator, BoxError, Calibration, Channel, ChannelSampler, Direction, Load, StatusLines,
};

use crate::error::HwError;
use crate::util::{XorShift64, bus_counts, shunt_counts};

/// Charge current per potentiometer step (mA).
pub const MA_PER_WIPER_STEP: f32 = 10.0;
/// Highest wiper position.
pub const WIPER_MAX: i32 = 255;

const NIMH_INTERNAL_OHMS: f32 = 0.05;
/// Polarization resistance; its voltage builds and relaxes with `POLARIZATION_TAU_S`.
const NIMH_POLARIZATION_OHMS: f32 = 0.1;
const POLARIZATION_TAU_S: f32 = 10.0;
const NIMH_EMPTY_VOLTS: f32 = 1.10;
const NIMH_FULL_VOLTS: f32 = 1.40;
/// Open-circuit voltage lost per unit of overcharge (the -dV after full).
const NIMH_OVERCHARGE_DROOP: f32 = 0.4;
/// Below this state of charge the discharge curve falls off steeply.
const NIMH_KNEE_SOC: f32 = 0.05;
const NIMH_KNEE_SLOPE: f32 = 8.0;
/// Heating per amp while overcharging (deg C per second).
const OVERCHARGE_HEAT: f32 = 0.5 / 60.0;
/// Joule heating coefficient (deg C per second per A^2).
const JOULE_HEAT: f32 = 0.02 / 60.0;
/// Newtonian cooling towards ambient (per second).
const COOLING: f32 = 1.0 / 600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Nimh,
    Alkaline,
    Lithium,
    Reversed,
    Absent,
}

#[derive(Debug, Clone)]
pub struct SimParams {
    pub cell: CellKind,
    pub capacity_mah: f32,
    pub initial_soc: f32,
    pub ambient_c: f32,
    /// Measurement noise, +/- this many raw counts.
    pub noise_counts: u32,
    pub seed: u64,
    pub diode_fault: bool,
    /// Simulated seconds per step.
    pub dt_s: f32,
    pub calibration: Calibration,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            cell: CellKind::Nimh,
            capacity_mah: 2000.0,
            initial_soc: 0.3,
            ambient_c: 22.0,
            noise_counts: 0,
            seed: 0x5eed,
            diode_fault: false,
            dt_s: 0.1,
            calibration: Calibration::default(),
        }
    }
}

#[derive(Debug)]
struct BenchState {
    params: SimParams,
    soc: f32,
    polarization_v: f32,
    cell_temp_c: f32,
    power_on: bool,
    wiper: i32,
    load: Option<Load>,
    rng: XorShift64,
    elapsed_s: f32,
    shutdowns: u32,
    nudges: u32,
    fail_channel: Option<Channel>,
    fail_actuator: bool,
}

impl BenchState {
    fn open_circuit_volts(&self) -> f32 {
        match self.params.cell {
            CellKind::Nimh => {
                let full = self.soc.clamp(0.0, 1.0);
                let over = (self.soc - 1.0).max(0.0);
                let knee = (NIMH_KNEE_SOC - self.soc).max(0.0);
                NIMH_EMPTY_VOLTS + (NIMH_FULL_VOLTS - NIMH_EMPTY_VOLTS) * full
                    - NIMH_OVERCHARGE_DROOP * over
                    - NIMH_KNEE_SLOPE * knee
            }
            CellKind::Alkaline => 1.55,
            CellKind::Lithium => 1.78,
            CellKind::Reversed => -1.25,
            CellKind::Absent => 0.0,
        }
    }

    /// Cell current in mA, positive into the cell.
    fn current_ma(&self) -> f32 {
        if self.params.cell != CellKind::Nimh {
            return 0.0;
        }
        if let Some(load) = self.load {
            let amps = self.open_circuit_volts() / (load.ohms() + NIMH_INTERNAL_OHMS);
            return -amps * 1000.0;
        }
        if self.power_on && !self.params.diode_fault {
            return self.wiper as f32 * MA_PER_WIPER_STEP;
        }
        0.0
    }

    fn terminal_volts(&self) -> f32 {
        let amps = self.current_ma() / 1000.0;
        self.open_circuit_volts() + amps * NIMH_INTERNAL_OHMS + self.polarization_v
    }

    fn step(&mut self) {
        let dt = self.params.dt_s;
        let ma = self.current_ma();
        let amps = ma / 1000.0;
        self.soc += ma * dt / 3600.0 / self.params.capacity_mah;
        self.soc = self.soc.max(0.0);

        let settle = (dt / POLARIZATION_TAU_S).min(1.0);
        self.polarization_v += (amps * NIMH_POLARIZATION_OHMS - self.polarization_v) * settle;

        let mut heat = JOULE_HEAT * amps * amps;
        if self.soc > 1.0 && amps > 0.0 {
            heat += OVERCHARGE_HEAT * amps;
        }
        let cooling = COOLING * (self.cell_temp_c - self.params.ambient_c);
        self.cell_temp_c += (heat - cooling) * dt;
        self.elapsed_s += dt;
    }

    fn noise(&mut self) -> i32 {
        let span = self.params.noise_counts;
        self.rng.jitter(span)
    }

    fn check_channel(&self, channel: Channel) -> Result<(), HwError> {
        if self.fail_channel == Some(channel) {
            return Err(HwError::BusTimeout);
        }
        Ok(())
    }

    fn check_actuator(&self) -> Result<(), HwError> {
        if self.fail_actuator {
            return Err(HwError::Fault("pot not responding".into()));
        }
        Ok(())
    }
}

/// Shared simulated bench. Clones share state.
#[derive(Debug, Clone)]
pub struct SimBench {
    state: Rc<RefCell<BenchState>>,
}

impl SimBench {
    pub fn new(params: SimParams) -> Self {
        let state = BenchState {
            soc: params.initial_soc,
            polarization_v: 0.0,
            cell_temp_c: params.ambient_c,
            power_on: false,
            wiper: 0,
            load: None,
            rng: XorShift64::new(params.seed),
            elapsed_s: 0.0,
            shutdowns: 0,
            nudges: 0,
            fail_channel: None,
            fail_actuator: false,
            params,
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn sampler(&self) -> SimSampler {
        SimSampler {
            bench: self.clone(),
        }
    }

    pub fn actuator(&self) -> SimActuator {
        SimActuator {
            bench: self.clone(),
        }
    }

    pub fn soc(&self) -> f32 {
        self.state.borrow().soc
    }

    pub fn cell_temp_c(&self) -> f32 {
        self.state.borrow().cell_temp_c
    }

    pub fn terminal_volts(&self) -> f32 {
        self.state.borrow().terminal_volts()
    }

    pub fn current_ma(&self) -> f32 {
        self.state.borrow().current_ma()
    }

    pub fn wiper(&self) -> i32 {
        self.state.borrow().wiper
    }

    pub fn load(&self) -> Option<Load> {
        self.state.borrow().load
    }

    pub fn power_on(&self) -> bool {
        self.state.borrow().power_on
    }

    pub fn elapsed_s(&self) -> f32 {
        self.state.borrow().elapsed_s
    }

    /// Number of `Actuator::shutdown` calls received.
    pub fn shutdowns(&self) -> u32 {
        self.state.borrow().shutdowns
    }

    pub fn nudges(&self) -> u32 {
        self.state.borrow().nudges
    }

    pub fn set_soc(&self, soc: f32) {
        self.state.borrow_mut().soc = soc;
    }

    pub fn set_cell_temp(&self, celsius: f32) {
        self.state.borrow_mut().cell_temp_c = celsius;
    }

    /// Make reads of `channel` fail with a bus timeout.
    pub fn set_fail_channel(&self, channel: Option<Channel>) {
        self.state.borrow_mut().fail_channel = channel;
    }

    /// Make every actuator call fail.
    pub fn set_fail_actuator(&self, fail: bool) {
        self.state.borrow_mut().fail_actuator = fail;
    }
}

pub struct SimSampler {
    bench: SimBench,
}

impl ChannelSampler for SimSampler {
    fn read_channel(&mut self, channel: Channel) -> Result<f32, BoxError> {
        let mut s = self.bench.state.borrow_mut();
        s.check_channel(channel)?;
        let cal = s.params.calibration;
        let value = match channel {
            Channel::ShuntCurrent => {
                s.step();
                let raw = shunt_counts(s.current_ma(), &cal) + s.noise();
                cal.shunt_ma(raw)
            }
            Channel::BusVoltage => {
                let raw = bus_counts(s.terminal_volts(), &cal) + s.noise();
                cal.bus_volts(raw)
            }
            Channel::ThermLoad => s.cell_temp_c,
            Channel::ThermAmbient => s.params.ambient_c,
        };
        Ok(value)
    }

    fn read_status_lines(&mut self) -> Result<StatusLines, BoxError> {
        let s = self.bench.state.borrow();
        Ok(StatusLines {
            diode_conducting: s.power_on && !s.params.diode_fault,
            power_good: true,
            battery_present: s.params.cell != CellKind::Absent,
        })
    }
}

pub struct SimActuator {
    bench: SimBench,
}

impl Actuator for SimActuator {
    fn enable_power(&mut self, on: bool) -> Result<(), BoxError> {
        let mut s = self.bench.state.borrow_mut();
        s.check_actuator()?;
        s.power_on = on;
        tracing::debug!(on, "sim power path");
        Ok(())
    }

    fn nudge(&mut self, direction: Direction) -> Result<(), BoxError> {
        let mut s = self.bench.state.borrow_mut();
        s.check_actuator()?;
        let step = match direction {
            Direction::Up => 1,
            Direction::Down => -1,
        };
        s.wiper = (s.wiper + step).clamp(0, WIPER_MAX);
        s.nudges += 1;
        Ok(())
    }

    fn select_load(&mut self, load: Option<Load>) -> Result<(), BoxError> {
        let mut s = self.bench.state.borrow_mut();
        s.check_actuator()?;
        s.load = load;
        tracing::debug!(?load, "sim load");
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), BoxError> {
        let mut s = self.bench.state.borrow_mut();
        s.shutdowns += 1;
        s.power_on = false;
        s.load = None;
        s.wiper = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_nimh_reads_open_circuit_voltage() {
        let bench = SimBench::new(SimParams::default());
        let mut sampler = bench.sampler();
        let v = sampler.read_channel(Channel::BusVoltage).unwrap();
        assert!((v - 1.19).abs() < 0.005, "v = {v}");
        assert_eq!(sampler.read_channel(Channel::ShuntCurrent).unwrap(), 0.0);
    }

    #[test]
    fn wiper_sets_charge_current() {
        let bench = SimBench::new(SimParams::default());
        let mut act = bench.actuator();
        act.enable_power(true).unwrap();
        for _ in 0..100 {
            act.nudge(Direction::Up).unwrap();
        }
        assert!((bench.current_ma() - 1000.0).abs() < 1e-3);
        act.shutdown().unwrap();
        assert_eq!(bench.current_ma(), 0.0);
        assert_eq!(bench.shutdowns(), 1);
    }

    #[test]
    fn load_draws_negative_current() {
        let bench = SimBench::new(SimParams::default());
        bench.actuator().select_load(Some(Load::Heavy)).unwrap();
        assert!(bench.current_ma() < -500.0);
    }

    #[test]
    fn overcharge_droops_voltage() {
        let bench = SimBench::new(SimParams {
            initial_soc: 1.0,
            ..SimParams::default()
        });
        let at_full = bench.terminal_volts();
        bench.set_soc(1.05);
        assert!(bench.terminal_volts() < at_full - 0.01);
    }

    #[test]
    fn voltage_recovers_after_load_is_removed() {
        let bench = SimBench::new(SimParams {
            initial_soc: 0.2,
            ..SimParams::default()
        });
        let mut sampler = bench.sampler();
        let mut act = bench.actuator();
        act.select_load(Some(Load::Heavy)).unwrap();
        for _ in 0..600 {
            sampler.read_channel(Channel::ShuntCurrent).unwrap();
        }
        let loaded = bench.terminal_volts();
        act.select_load(None).unwrap();
        for _ in 0..600 {
            sampler.read_channel(Channel::ShuntCurrent).unwrap();
        }
        assert!(bench.terminal_volts() > loaded + 0.05);
    }

    #[test]
    fn empty_cell_falls_below_one_volt() {
        let bench = SimBench::new(SimParams {
            initial_soc: 0.0,
            ..SimParams::default()
        });
        assert!(bench.terminal_volts() < 1.0);
    }

    #[test]
    fn failing_channel_reports_timeout() {
        let bench = SimBench::new(SimParams::default());
        bench.set_fail_channel(Some(Channel::ThermLoad));
        let err = bench.sampler().read_channel(Channel::ThermLoad).unwrap_err();
        assert!(matches!(err.downcast_ref::<HwError>(), Some(HwError::BusTimeout)));
    }

    #[test]
    fn absent_cell_clears_detect_line() {
        let bench = SimBench::new(SimParams {
            cell: CellKind::Absent,
            ..SimParams::default()
        });
        assert!(!bench.sampler().read_status_lines().unwrap().battery_present);
    }
}
