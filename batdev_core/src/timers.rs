//! Tick-driven timer bank shared between the tick context and the foreground loop.
//!
//! Two kinds of timers live here:
//!
//! - **One-shot** timers hold an absolute deadline expressed in ticks. They are
//!   written only by the foreground and compared against the tick counter with
//!   wrap-safe arithmetic, so they keep working across the 32-bit rollover.
//! - **Free-running** timers count down from a fixed reload value and raise an
//!   expiry flag each time the countdown completes. The tick context sets the
//!   flag; the foreground consumes it inside a critical section.
//!
//! `advance_tick` touches nothing but atomics and never logs or allocates, so it
//! is safe to call from an interrupt handler. On hosted targets the tick driver
//! wraps it in `critical_section::with`, which stands in for interrupt masking.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::TimerCfg;
use crate::error::BuildError;

/// Half of the 32-bit tick range. Deadlines further than this are ambiguous.
pub const HALF_RANGE: u32 = 1 << 31;
/// Longest duration accepted by [`TimerBank::arm_one_shot`]; longer requests are clamped.
pub const MAX_ONE_SHOT_TICKS: u32 = HALF_RANGE - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OneShot {
    /// Session time ceiling (charge or discharge).
    MaxChargeTimer,
    /// Delay before the voltage-dip detector arms.
    ArmDetectorTimer,
    /// Post-dip charging extension.
    ExtensionTimer,
    /// Rest period after a discharge load is removed.
    ReboundTimer,
}

impl OneShot {
    pub const COUNT: usize = 4;
    pub const ALL: [OneShot; Self::COUNT] = [
        OneShot::MaxChargeTimer,
        OneShot::ArmDetectorTimer,
        OneShot::ExtensionTimer,
        OneShot::ReboundTimer,
    ];

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FreeRunning {
    /// Periodic status report.
    ReportTimer,
    /// Rate limit for potentiometer nudges.
    PulseTimer,
    /// Channel sampling cadence.
    SampleTimer,
}

impl FreeRunning {
    pub const COUNT: usize = 3;
    pub const ALL: [FreeRunning; Self::COUNT] = [
        FreeRunning::ReportTimer,
        FreeRunning::PulseTimer,
        FreeRunning::SampleTimer,
    ];

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Running,
    Expired,
}

#[derive(Debug)]
struct OneShotSlot {
    deadline: AtomicU32,
    armed: AtomicBool,
    /// Latched once the deadline has been observed as passed.
    fired: AtomicBool,
}

impl OneShotSlot {
    const fn new() -> Self {
        Self {
            deadline: AtomicU32::new(0),
            armed: AtomicBool::new(false),
            fired: AtomicBool::new(false),
        }
    }
}

#[derive(Debug)]
struct FreeRunningSlot {
    reload: u32,
    count: AtomicU32,
    expired: AtomicBool,
}

impl FreeRunningSlot {
    const fn new(reload: u32) -> Self {
        Self {
            reload,
            count: AtomicU32::new(reload),
            expired: AtomicBool::new(false),
        }
    }
}

/// Fixed set of named timers driven by a single monotonically increasing tick.
#[derive(Debug)]
pub struct TimerBank {
    tick: AtomicU32,
    one_shots: [OneShotSlot; OneShot::COUNT],
    free_running: [FreeRunningSlot; FreeRunning::COUNT],
}

impl TimerBank {
    /// Build a bank whose tick counter starts at zero.
    pub fn new(cfg: &TimerCfg) -> Result<Self, BuildError> {
        Self::with_start_tick(cfg, 0)
    }

    /// Build a bank whose tick counter starts at `start`. Mostly useful to
    /// exercise the 32-bit rollover without waiting four billion ticks.
    pub fn with_start_tick(cfg: &TimerCfg, start: u32) -> Result<Self, BuildError> {
        if cfg.report_ticks == 0 {
            return Err(BuildError::InvalidConfig("timers.report_ticks must be > 0"));
        }
        if cfg.pulse_ticks == 0 {
            return Err(BuildError::InvalidConfig("timers.pulse_ticks must be > 0"));
        }
        if cfg.sample_ticks == 0 {
            return Err(BuildError::InvalidConfig("timers.sample_ticks must be > 0"));
        }
        Ok(Self {
            tick: AtomicU32::new(start),
            one_shots: [
                OneShotSlot::new(),
                OneShotSlot::new(),
                OneShotSlot::new(),
                OneShotSlot::new(),
            ],
            free_running: [
                FreeRunningSlot::new(cfg.report_ticks),
                FreeRunningSlot::new(cfg.pulse_ticks),
                FreeRunningSlot::new(cfg.sample_ticks),
            ],
        })
    }

    /// Advance the tick by one. Tick context only; there must be a single caller.
    ///
    /// A countdown reaching zero reloads in the same tick, so a free-running
    /// timer expires exactly every `reload` ticks.
    #[inline]
    pub fn advance_tick(&self) {
        let now = self.tick.load(Ordering::Relaxed).wrapping_add(1);
        self.tick.store(now, Ordering::Release);
        for slot in &self.free_running {
            let count = slot.count.load(Ordering::Relaxed);
            if count <= 1 {
                slot.count.store(slot.reload, Ordering::Relaxed);
                slot.expired.store(true, Ordering::Release);
            } else {
                slot.count.store(count - 1, Ordering::Relaxed);
            }
        }
    }

    /// Current tick.
    #[inline]
    pub fn now(&self) -> u32 {
        self.tick.load(Ordering::Acquire)
    }

    /// Ticks elapsed since `earlier`, modulo 2^32.
    #[inline]
    pub fn ticks_since(&self, earlier: u32) -> u32 {
        self.now().wrapping_sub(earlier)
    }

    /// Arm (or re-arm) a one-shot to expire `ticks` from now.
    ///
    /// Durations at or above 2^31 ticks are clamped to [`MAX_ONE_SHOT_TICKS`].
    /// A zero duration expires immediately.
    pub fn arm_one_shot(&self, id: OneShot, ticks: u32) {
        let slot = &self.one_shots[id.index()];
        let deadline = self.now().wrapping_add(ticks.min(MAX_ONE_SHOT_TICKS));
        slot.armed.store(false, Ordering::Release);
        slot.deadline.store(deadline, Ordering::Relaxed);
        slot.fired.store(false, Ordering::Relaxed);
        slot.armed.store(true, Ordering::Release);
    }

    /// Cancel a one-shot. It reports Running until armed again.
    pub fn disarm(&self, id: OneShot) {
        let slot = &self.one_shots[id.index()];
        slot.armed.store(false, Ordering::Release);
        slot.fired.store(false, Ordering::Relaxed);
    }

    pub fn is_one_shot_armed(&self, id: OneShot) -> bool {
        self.one_shots[id.index()].armed.load(Ordering::Acquire)
    }

    /// Whether the deadline of `id` has been reached.
    ///
    /// Expired iff `now - deadline` (mod 2^32) is below 2^31. Unarmed timers are
    /// never expired. Once observed as expired the timer stays expired until
    /// re-armed, even if the tick later wraps around past the deadline again.
    pub fn is_one_shot_expired(&self, id: OneShot) -> bool {
        let slot = &self.one_shots[id.index()];
        if !slot.armed.load(Ordering::Acquire) {
            return false;
        }
        if slot.fired.load(Ordering::Relaxed) {
            return true;
        }
        let deadline = slot.deadline.load(Ordering::Relaxed);
        if self.now().wrapping_sub(deadline) < HALF_RANGE {
            slot.fired.store(true, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Ticks left before `id` expires; `None` when unarmed, `Some(0)` once expired.
    pub fn one_shot_remaining(&self, id: OneShot) -> Option<u32> {
        let slot = &self.one_shots[id.index()];
        if !slot.armed.load(Ordering::Acquire) {
            return None;
        }
        if self.is_one_shot_expired(id) {
            return Some(0);
        }
        Some(slot.deadline.load(Ordering::Relaxed).wrapping_sub(self.now()))
    }

    /// Test-and-clear the expiry flag of a free-running timer.
    ///
    /// Returns `true` at most once per expiry. The read and the clear happen
    /// inside one critical section so an expiry raised by the tick context
    /// cannot slip between them.
    pub fn poll_free_running(&self, id: FreeRunning) -> bool {
        let slot = &self.free_running[id.index()];
        critical_section::with(|_| {
            let expired = slot.expired.load(Ordering::Acquire);
            if expired {
                slot.expired.store(false, Ordering::Relaxed);
            }
            expired
        })
    }

    /// Consistent view of a free-running timer's countdown and flag.
    pub fn free_running_snapshot(&self, id: FreeRunning) -> (u32, TimerState) {
        let slot = &self.free_running[id.index()];
        critical_section::with(|_| {
            let count = slot.count.load(Ordering::Relaxed);
            let state = if slot.expired.load(Ordering::Acquire) {
                TimerState::Expired
            } else {
                TimerState::Running
            };
            (count, state)
        })
    }

    pub fn free_running_reload(&self, id: FreeRunning) -> u32 {
        self.free_running[id.index()].reload
    }
}
