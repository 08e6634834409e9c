use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use batdev_traits::{Actuator, ChannelSampler, Clock};
use eyre::WrapErr;

use crate::engine::Engine;
use crate::error::{BatDevError, Result};
use crate::report::ReportSink;
use crate::status::{ExitStatus, Outcome};
use crate::tick::TickDriver;

/// Floor for the tick stall watchdog.
const MIN_STALL_MS: u64 = 100;

/// What a finished session reports to its caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSummary {
    pub status: ExitStatus,
    pub elapsed_ms: u64,
    pub charge_mah: f64,
    pub discharge_mah: f64,
    pub nudges: u32,
    pub pot_level: i32,
}

/// Stall threshold for the tick wake-up: four periods so a late tick or two
/// is tolerated, never below [`MIN_STALL_MS`].
#[inline]
fn stall_threshold(period: Duration) -> Duration {
    period
        .saturating_mul(4)
        .max(Duration::from_millis(MIN_STALL_MS))
}

/// Drive `engine` from a hosted tick thread until the session terminates.
///
/// A set `shutdown` flag (e.g. from Ctrl-C) latches a console interrupt. Errors
/// from the engine or a stalled tick source shut the actuator down before
/// they are returned.
pub fn run_session<S, A, R, C>(
    engine: &mut Engine<S, A, R>,
    clock: C,
    shutdown: Option<Arc<AtomicBool>>,
) -> Result<SessionSummary>
where
    S: ChannelSampler,
    A: Actuator,
    R: ReportSink,
    C: Clock + Send + 'static,
{
    let period = engine.tick_period();
    let stall = stall_threshold(period);
    let driver = TickDriver::spawn(engine.timers().clone(), period, clock);
    tracing::debug!(period_ms = period.as_millis(), "session loop started");

    loop {
        if shutdown.as_ref().is_some_and(|f| f.load(Ordering::Relaxed)) {
            engine.request_interrupt();
        }
        if !driver.wait(stall) {
            engine.emergency_stop();
            return Err(eyre::Report::new(BatDevError::Timeout))
                .wrap_err_with(|| format!("no tick within {} ms", stall.as_millis()));
        }
        match engine.poll() {
            Ok(Outcome::Terminal(status)) => return Ok(summarize(engine, status)),
            Ok(Outcome::Continue(_)) => {}
            Err(e) => {
                engine.emergency_stop();
                return Err(e);
            }
        }
    }
}

/// Drive `engine` in lockstep with no tick thread: advance one tick, poll, repeat.
///
/// Deterministic and as fast as the host allows; used for tests and for
/// fast-forwarding a simulated bench. Fails with a timeout once `max_ticks`
/// ticks pass without the session terminating.
pub fn run_simulated<S, A, R>(
    engine: &mut Engine<S, A, R>,
    max_ticks: u64,
    shutdown: Option<&AtomicBool>,
) -> Result<SessionSummary>
where
    S: ChannelSampler,
    A: Actuator,
    R: ReportSink,
{
    for _ in 0..max_ticks {
        if shutdown.is_some_and(|f| f.load(Ordering::Relaxed)) {
            engine.request_interrupt();
        }
        let timers = engine.timers().clone();
        critical_section::with(|_| timers.advance_tick());
        match engine.poll() {
            Ok(Outcome::Terminal(status)) => return Ok(summarize(engine, status)),
            Ok(Outcome::Continue(_)) => {}
            Err(e) => {
                engine.emergency_stop();
                return Err(e);
            }
        }
    }
    engine.emergency_stop();
    Err(eyre::Report::new(BatDevError::Timeout))
        .wrap_err_with(|| format!("session still running after {max_ticks} ticks"))
}

fn summarize<S, A, R>(engine: &Engine<S, A, R>, status: ExitStatus) -> SessionSummary
where
    S: ChannelSampler,
    A: Actuator,
    R: ReportSink,
{
    let jugs = engine.jugs();
    SessionSummary {
        status,
        elapsed_ms: engine.elapsed_ms(),
        charge_mah: jugs.charge_mah(),
        discharge_mah: jugs.discharge_mah(),
        nudges: engine.nudges(),
        pot_level: engine.pot_level(),
    }
}
