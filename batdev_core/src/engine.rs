//! Foreground engine: one `poll()` per wake-up from the tick driver.
//!
//! Each poll runs in a fixed order: sample (when `SampleTimer` fired), filter,
//! evaluate, actuate, report. A latched console interrupt pre-empts all of it.

use std::sync::Arc;

use batdev_traits::{Actuator, Channel, ChannelSampler, Direction, StatusLines};
use eyre::WrapErr;

use crate::config::SessionCfg;
use crate::error::{BuildError, Result};
use crate::evaluator::{Evaluator, Phase, SessionMode, Transition};
use crate::filter::SmoothingFilter;
use crate::hw_error::map_hw_error;
use crate::interlock::Readings;
use crate::jugs::Jugs;
use crate::report::{Payload, Record, RecordType, ReportSink};
use crate::status::{ExitStatus, Outcome, Regulation};
use crate::timers::{FreeRunning, TimerBank};
use crate::util::ticks_to_ms;

/// Status lines assumed when they cannot be read: nothing healthy.
const LINES_UNKNOWN: StatusLines = StatusLines {
    diode_conducting: false,
    power_good: false,
    battery_present: false,
};

pub struct Engine<S: ChannelSampler, A: Actuator, R: ReportSink> {
    sampler: S,
    actuator: A,
    sink: R,
    timers: Arc<TimerBank>,
    filter: SmoothingFilter,
    evaluator: Evaluator,
    jugs: Jugs,
    lines: StatusLines,
    last: Option<Readings>,
    last_temp_rate: Option<f32>,
    tick_ms: u32,
    sample_period_ms: u64,
    start_tick: u32,
    nudge_ready: bool,
    nudges: u32,
    pot_level: i32,
    interrupt_check: Option<Box<dyn Fn() -> bool>>,
    interrupt_latched: bool,
    interrupt_debounce_n: u8,
    interrupt_count: u8,
    finished: Option<ExitStatus>,
    shut_down: bool,
}

impl<S: ChannelSampler, A: Actuator, R: ReportSink> std::fmt::Debug for Engine<S, A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("phase", &self.evaluator.phase())
            .field("status", &self.finished)
            .field("tick", &self.timers.now())
            .field("nudges", &self.nudges)
            .field("pot_level", &self.pot_level)
            .finish_non_exhaustive()
    }
}

impl<S: ChannelSampler, A: Actuator, R: ReportSink> Engine<S, A, R> {
    /// Build an engine with its own timer bank.
    pub fn new(
        sampler: S,
        actuator: A,
        sink: R,
        mode: SessionMode,
        cfg: &SessionCfg,
    ) -> std::result::Result<Self, BuildError> {
        let timers = Arc::new(TimerBank::new(&cfg.timers)?);
        Self::with_timers(sampler, actuator, sink, mode, cfg, timers)
    }

    /// Build an engine around an existing timer bank (shared with a tick driver or a test).
    pub fn with_timers(
        sampler: S,
        actuator: A,
        sink: R,
        mode: SessionMode,
        cfg: &SessionCfg,
        timers: Arc<TimerBank>,
    ) -> std::result::Result<Self, BuildError> {
        cfg.validate()?;
        let filter = SmoothingFilter::from_cfg(&cfg.filter)?;
        let tick_ms = cfg.timers.tick_ms;
        let start_tick = timers.now();
        Ok(Self {
            sampler,
            actuator,
            sink,
            filter,
            evaluator: Evaluator::new(mode, cfg),
            jugs: Jugs::new(),
            lines: StatusLines::default(),
            last: None,
            last_temp_rate: None,
            tick_ms,
            sample_period_ms: ticks_to_ms(timers.free_running_reload(FreeRunning::SampleTimer), tick_ms),
            start_tick,
            timers,
            nudge_ready: true,
            nudges: 0,
            pot_level: 0,
            interrupt_check: None,
            interrupt_latched: false,
            interrupt_debounce_n: 1,
            interrupt_count: 0,
            finished: None,
            shut_down: false,
        })
    }

    /// Install a console-interrupt check; it must read true on `debounce_n`
    /// consecutive polls before the interrupt latches.
    pub fn set_interrupt_check(&mut self, check: Box<dyn Fn() -> bool>, debounce_n: u8) {
        self.interrupt_check = Some(check);
        self.interrupt_debounce_n = debounce_n.max(1);
        self.interrupt_count = 0;
    }

    /// Latch a console interrupt; the next poll terminates the session.
    pub fn request_interrupt(&mut self) {
        self.interrupt_latched = true;
    }

    /// One foreground iteration.
    pub fn poll(&mut self) -> Result<Outcome> {
        if let Some(status) = self.finished {
            return Ok(Outcome::Terminal(status));
        }
        if self.interrupt_latched || self.poll_interrupt() {
            return Ok(self.finish(ExitStatus::ConsoleInterrupt));
        }
        if self.timers.poll_free_running(FreeRunning::PulseTimer) {
            self.nudge_ready = true;
        }

        let mut regulation = Regulation::Hold;
        if self.timers.poll_free_running(FreeRunning::SampleTimer) {
            self.sample();
            if let Some(readings) = self.smoothed() {
                self.last = Some(readings);
                self.jugs.tally(readings.shunt_ma, self.sample_period_ms);

                let eval = self.evaluator.step(&readings, self.lines, &self.timers);
                if eval.flush_voltage {
                    self.filter.flush(Channel::BusVoltage);
                }
                if let Some(ohms) = eval.resistance_ohms {
                    tracing::info!(ohms, "internal resistance");
                    self.emit(RecordType::IRes, Payload::IRes { ohms });
                }
                if let Some(t) = eval.transition {
                    self.on_transition(t)?;
                }
                match eval.outcome {
                    Outcome::Terminal(status) => return Ok(self.finish(status)),
                    Outcome::Continue(reg) => {
                        regulation = reg;
                        self.actuate(reg)?;
                    }
                }
                self.report_temp_rate();
            } else if let Some(readings) = self.smoothed_without_bus_voltage() {
                self.jugs.tally(readings.shunt_ma, self.sample_period_ms);
                let eval = self
                    .evaluator
                    .step_without_bus_voltage(&readings, self.lines, &self.timers);
                if let Some(t) = eval.transition {
                    self.on_transition(t)?;
                }
                if let Outcome::Terminal(status) = eval.outcome {
                    return Ok(self.finish(status));
                }
            }
        }

        if self.timers.poll_free_running(FreeRunning::ReportTimer) {
            self.report_periodic();
        }
        Ok(Outcome::Continue(regulation))
    }

    /// Best-effort actuator shutdown after an error. Runs at most once per session.
    pub fn emergency_stop(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        if let Err(e) = self.actuator.shutdown() {
            tracing::warn!(error = %map_hw_error(&*e), "actuator shutdown failed");
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.evaluator.phase()
    }

    #[inline]
    pub fn status(&self) -> Option<ExitStatus> {
        self.finished
    }

    #[inline]
    pub fn timers(&self) -> &Arc<TimerBank> {
        &self.timers
    }

    #[inline]
    pub fn jugs(&self) -> &Jugs {
        &self.jugs
    }

    #[inline]
    pub fn nudges(&self) -> u32 {
        self.nudges
    }

    /// Net wiper movement since the session started (up minus down).
    #[inline]
    pub fn pot_level(&self) -> i32 {
        self.pot_level
    }

    #[inline]
    pub fn last_readings(&self) -> Option<Readings> {
        self.last
    }

    #[inline]
    pub fn filter(&self) -> &SmoothingFilter {
        &self.filter
    }

    #[inline]
    pub fn sink(&self) -> &R {
        &self.sink
    }

    #[inline]
    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    #[inline]
    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(u64::from(self.tick_ms))
    }

    pub fn elapsed_ms(&self) -> u64 {
        ticks_to_ms(self.timers.ticks_since(self.start_tick), self.tick_ms)
    }

    fn poll_interrupt(&mut self) -> bool {
        if let Some(check) = &self.interrupt_check {
            if check() {
                self.interrupt_count = self.interrupt_count.saturating_add(1);
                if self.interrupt_count >= self.interrupt_debounce_n {
                    self.interrupt_latched = true;
                }
            } else {
                self.interrupt_count = 0;
            }
        }
        self.interrupt_latched
    }

    fn sample(&mut self) {
        for channel in Channel::ALL {
            let value = match self.sampler.read_channel(channel) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(?channel, error = %map_hw_error(&*e), "channel read failed");
                    f32::NAN
                }
            };
            tracing::trace!(?channel, value, "sample");
            self.filter.push(channel, value);
        }
        self.lines = match self.sampler.read_status_lines() {
            Ok(lines) => lines,
            Err(e) => {
                tracing::warn!(error = %map_hw_error(&*e), "status line read failed");
                LINES_UNKNOWN
            }
        };
    }

    fn smoothed(&self) -> Option<Readings> {
        Some(Readings {
            shunt_ma: self.filter.smoothed(Channel::ShuntCurrent)?,
            bus_volts: self.filter.smoothed(Channel::BusVoltage)?,
            therm_load_c: self.filter.smoothed(Channel::ThermLoad)?,
            therm_ambient_c: self.filter.smoothed(Channel::ThermAmbient)?,
        })
    }

    /// Every channel but the bus voltage is smoothed: the state right after a
    /// voltage flush. The voltage reads as NaN.
    fn smoothed_without_bus_voltage(&self) -> Option<Readings> {
        if self.filter.is_ready(Channel::BusVoltage) {
            return None;
        }
        Some(Readings {
            shunt_ma: self.filter.smoothed(Channel::ShuntCurrent)?,
            bus_volts: f32::NAN,
            therm_load_c: self.filter.smoothed(Channel::ThermLoad)?,
            therm_ambient_c: self.filter.smoothed(Channel::ThermAmbient)?,
        })
    }

    fn on_transition(&mut self, t: Transition) -> Result<()> {
        tracing::info!(from = ?t.from, to = ?t.to, "phase transition");
        match t.to {
            to if to.is_charging() && !t.from.is_charging() => self
                .actuator
                .enable_power(true)
                .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
                .wrap_err("enable_power")?,
            Phase::Discharge(load) => self
                .actuator
                .select_load(Some(load))
                .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
                .wrap_err("select_load")?,
            Phase::Rebound(_) => self
                .actuator
                .select_load(None)
                .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
                .wrap_err("remove load")?,
            _ => {}
        }
        let kind = match t.to {
            Phase::ConstantCurrent => Some(RecordType::RampUp),
            Phase::ConstantVoltage => Some(RecordType::CV),
            Phase::DipDetection => Some(RecordType::Detect),
            Phase::Extension => Some(RecordType::ProvEnd),
            Phase::Discharge(_) | Phase::Rebound(_) => Some(RecordType::Discharge),
            Phase::Idle | Phase::Terminated(_) => None,
        };
        if let Some(kind) = kind {
            let payload = self.readings_payload();
            self.emit(kind, payload);
        }
        Ok(())
    }

    fn actuate(&mut self, regulation: Regulation) -> Result<()> {
        let Some(direction) = regulation.direction() else {
            return Ok(());
        };
        if !self.nudge_ready {
            return Ok(());
        }
        self.actuator
            .nudge(direction)
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err("nudge")?;
        self.nudge_ready = false;
        self.nudges = self.nudges.saturating_add(1);
        self.pot_level += match direction {
            Direction::Up => 1,
            Direction::Down => -1,
        };
        tracing::debug!(?direction, pot_level = self.pot_level, "nudge");
        self.emit(
            RecordType::Nudge,
            Payload::Nudge {
                nudges: self.nudges,
                pot_level: self.pot_level,
            },
        );
        Ok(())
    }

    fn report_temp_rate(&mut self) {
        let rate = self.evaluator.temp_rate_c_per_min();
        if rate == self.last_temp_rate {
            return;
        }
        self.last_temp_rate = rate;
        if let Some(r) = self.last {
            self.emit(
                RecordType::Therm,
                Payload::Temperatures {
                    therm_load_c: r.therm_load_c,
                    therm_ambient_c: r.therm_ambient_c,
                    rate_c_per_min: rate,
                },
            );
        }
    }

    fn report_periodic(&mut self) {
        let kind = match self.evaluator.phase() {
            Phase::ConstantCurrent if !self.evaluator.is_ramped() => RecordType::RampUp,
            Phase::ConstantCurrent => RecordType::CC,
            Phase::ConstantVoltage => RecordType::CV,
            Phase::DipDetection | Phase::Extension => RecordType::Detect,
            Phase::Discharge(_) | Phase::Rebound(_) => RecordType::Discharge,
            Phase::Idle | Phase::Terminated(_) => RecordType::Info,
        };
        let payload = self.readings_payload();
        self.emit(kind, payload);
    }

    fn readings_payload(&self) -> Payload {
        match &self.last {
            Some(r) => Payload::channels(r),
            None => Payload::Info {
                message: format!(
                    "warming up: {}/{} samples",
                    self.filter.fill(Channel::BusVoltage),
                    self.filter.capacity()
                ),
            },
        }
    }

    fn finish(&mut self, status: ExitStatus) -> Outcome {
        if let Some(t) = self.evaluator.abort(status) {
            tracing::info!(from = ?t.from, to = ?t.to, "phase transition");
        }
        self.finished = Some(status);
        self.emergency_stop();
        if status.is_success() {
            tracing::info!(%status, code = status.code(), "session terminated");
        } else {
            tracing::warn!(%status, code = status.code(), "session terminated");
        }
        self.emit(RecordType::End, Payload::end(status));
        self.emit(
            RecordType::Jugs,
            Payload::Jugs {
                charge_mah: self.jugs.charge_mah(),
                discharge_mah: self.jugs.discharge_mah(),
            },
        );
        Outcome::Terminal(status)
    }

    fn emit(&mut self, kind: RecordType, payload: Payload) {
        let record = Record {
            kind,
            elapsed_ms: self.elapsed_ms(),
            payload,
        };
        if let Err(e) = self.sink.emit(&record) {
            tracing::warn!(error = %e, ?kind, "report sink failed");
        }
    }
}
