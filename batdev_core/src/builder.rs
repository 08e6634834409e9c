//! Type-state builder for `Session`.
//!
//! The builder enforces at compile time that sampler, actuator, and mode are
//! provided before `build()` is available. `try_build()` is always available
//! for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use batdev_traits::{Actuator, ChannelSampler};

use crate::config::{
    ChargeCfg, DischargeCfg, FilterCfg, IdentifyCfg, Limits, SessionCfg, TimerCfg,
};
use crate::engine::Engine;
use crate::error::{BuildError, Result};
use crate::evaluator::SessionMode;
use crate::report::{NullSink, ReportSink};
use crate::timers::TimerBank;

/// Dynamically dispatched engine produced by the builder.
pub type Session = Engine<Box<dyn ChannelSampler>, Box<dyn Actuator>, Box<dyn ReportSink>>;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

pub struct SessionBuilder<S, A, M> {
    sampler: Option<Box<dyn ChannelSampler>>,
    actuator: Option<Box<dyn Actuator>>,
    sink: Option<Box<dyn ReportSink>>,
    mode: Option<SessionMode>,
    cfg: SessionCfg,
    timers: Option<Arc<TimerBank>>,
    interrupt_check: Option<Box<dyn Fn() -> bool>>,
    interrupt_debounce_n: Option<u8>,
    _s: PhantomData<S>,
    _a: PhantomData<A>,
    _m: PhantomData<M>,
}

impl Default for SessionBuilder<Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            sampler: None,
            actuator: None,
            sink: None,
            mode: None,
            cfg: SessionCfg::default(),
            timers: None,
            interrupt_check: None,
            interrupt_debounce_n: None,
            _s: PhantomData,
            _a: PhantomData,
            _m: PhantomData,
        }
    }
}

impl SessionBuilder<Missing, Missing, Missing> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S, A, M> SessionBuilder<S, A, M> {
    /// Fallible build available in any type-state; reports the first missing piece.
    pub fn try_build(self) -> Result<Session> {
        let sampler = self
            .sampler
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSampler))?;
        let actuator = self
            .actuator
            .ok_or_else(|| eyre::Report::new(BuildError::MissingActuator))?;
        let mode = self
            .mode
            .ok_or_else(|| eyre::Report::new(BuildError::MissingMode))?;
        let sink = self.sink.unwrap_or_else(|| Box::new(NullSink));

        let timers = match self.timers {
            Some(t) => t,
            None => Arc::new(TimerBank::new(&self.cfg.timers).map_err(eyre::Report::new)?),
        };
        let mut session = Engine::with_timers(sampler, actuator, sink, mode, &self.cfg, timers)
            .map_err(eyre::Report::new)?;
        if let Some(check) = self.interrupt_check {
            session.set_interrupt_check(check, self.interrupt_debounce_n.unwrap_or(2));
        }
        Ok(session)
    }

    /// Move every field into a builder with different markers.
    fn retype<S2, A2, M2>(self) -> SessionBuilder<S2, A2, M2> {
        SessionBuilder {
            sampler: self.sampler,
            actuator: self.actuator,
            sink: self.sink,
            mode: self.mode,
            cfg: self.cfg,
            timers: self.timers,
            interrupt_check: self.interrupt_check,
            interrupt_debounce_n: self.interrupt_debounce_n,
            _s: PhantomData,
            _a: PhantomData,
            _m: PhantomData,
        }
    }
}

/// Chainable setters that do not affect type-state.
impl<S, A, M> SessionBuilder<S, A, M> {
    pub fn with_config(mut self, cfg: SessionCfg) -> Self {
        self.cfg = cfg;
        self
    }
    pub fn with_timer_cfg(mut self, timers: TimerCfg) -> Self {
        self.cfg.timers = timers;
        self
    }
    pub fn with_filter(mut self, filter: FilterCfg) -> Self {
        self.cfg.filter = filter;
        self
    }
    pub fn with_charge(mut self, charge: ChargeCfg) -> Self {
        self.cfg.charge = charge;
        self
    }
    pub fn with_discharge(mut self, discharge: DischargeCfg) -> Self {
        self.cfg.discharge = discharge;
        self
    }
    pub fn with_identify(mut self, identify: IdentifyCfg) -> Self {
        self.cfg.identify = identify;
        self
    }
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.cfg.limits = limits;
        self
    }
    pub fn with_sink(mut self, sink: impl ReportSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }
    /// Share a timer bank with an external tick source.
    pub fn with_timer_bank(mut self, timers: Arc<TimerBank>) -> Self {
        self.timers = Some(timers);
        self
    }
    pub fn with_interrupt_check<F>(mut self, f: F) -> Self
    where
        F: Fn() -> bool + 'static,
    {
        self.interrupt_check = Some(Box::new(f));
        self
    }
    /// Consecutive positive checks required before the interrupt latches (default 2).
    pub fn with_interrupt_debounce(mut self, n: u8) -> Self {
        self.interrupt_debounce_n = Some(n);
        self
    }
}

// Setters that advance type-state
impl<A, M> SessionBuilder<Missing, A, M> {
    pub fn with_sampler(
        mut self,
        sampler: impl ChannelSampler + 'static,
    ) -> SessionBuilder<Set, A, M> {
        self.sampler = Some(Box::new(sampler));
        self.retype()
    }
}

impl<S, M> SessionBuilder<S, Missing, M> {
    pub fn with_actuator(
        mut self,
        actuator: impl Actuator + 'static,
    ) -> SessionBuilder<S, Set, M> {
        self.actuator = Some(Box::new(actuator));
        self.retype()
    }
}

impl<S, A> SessionBuilder<S, A, Missing> {
    pub fn with_mode(mut self, mode: SessionMode) -> SessionBuilder<S, A, Set> {
        self.mode = Some(mode);
        self.retype()
    }
}

impl SessionBuilder<Set, Set, Set> {
    /// Validate and build. Only available when sampler, actuator, and mode are set.
    pub fn build(self) -> Result<Session> {
        self.try_build()
    }
}
