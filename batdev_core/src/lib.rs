#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Supervisory core of a NiMH charger/analyzer (hardware-agnostic).
//!
//! All hardware interactions go through the `batdev_traits::ChannelSampler`
//! and `batdev_traits::Actuator` traits, so the same engine runs against a
//! simulated bench, a test mock, or real sensors.
//!
//! ## Architecture
//!
//! - **Timers**: tick-driven one-shot and free-running countdowns (`timers`)
//! - **Filtering**: per-channel convolution smoothing with flush (`filter`)
//! - **Supervision**: phase machine, band regulation, cell identification (`evaluator`)
//! - **Safety**: ordered interlock list; first tripped check wins (`interlock`)
//! - **Engine**: the per-tick foreground loop tying them together (`engine`)
//! - **Reporting**: typed telemetry records and sinks (`report`)
//!
//! ## Concurrency
//!
//! The tick source (`tick::TickDriver`, or an interrupt on a target) only
//! decrements counters and sets expiry flags. Everything else happens in the
//! foreground `Engine::poll`. Multi-word timer accesses run inside
//! `critical_section::with`, which the binary must provide an implementation for.

pub mod builder;
pub mod config;
pub mod conversions;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod filter;
pub mod hw_error;
pub mod interlock;
pub mod jugs;
pub mod mocks;
pub mod report;
pub mod runner;
pub mod status;
pub mod tick;
pub mod timers;
pub mod util;

pub use builder::{Missing, Session, SessionBuilder, Set};
pub use config::{
    ChargeCfg, DischargeCfg, FilterCfg, IdentifyCfg, KernelKind, Limits, SessionCfg, TimerCfg,
};
pub use engine::Engine;
pub use error::{BatDevError, BuildError, Report, Result};
pub use evaluator::{
    Evaluation, Evaluator, Phase, SessionMode, Transition, band_regulation, classify_cell,
};
pub use filter::{FilterError, Kernel, SampleWindow, SmoothingFilter, WarmupPolicy};
pub use interlock::{INTERLOCKS, Interlock, Readings, Snapshot};
pub use jugs::Jugs;
pub use report::{ChannelSink, NullSink, Payload, Record, RecordType, ReportSink};
pub use runner::{SessionSummary, run_session, run_simulated};
pub use status::{ExitStatus, Outcome, Regulation};
pub use tick::TickDriver;
pub use timers::{FreeRunning, OneShot, TimerBank, TimerState};
