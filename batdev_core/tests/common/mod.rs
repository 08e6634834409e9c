#![allow(dead_code)]

use batdev_core::mocks::{CallLog, FixedHandle, FixedSampler, RecordingActuator};
use batdev_core::{
    Engine, FilterCfg, KernelKind, Outcome, Record, RecordType, SessionCfg, SessionMode,
    TimerCfg, WarmupPolicy,
};

pub type MockEngine = Engine<FixedSampler, RecordingActuator, Vec<Record>>;

/// Sample every tick, nudge at most every 10 ticks, and smooth over three
/// samples so scenarios settle quickly.
pub fn fast_cfg() -> SessionCfg {
    SessionCfg {
        timers: TimerCfg {
            tick_ms: 10,
            report_ticks: 500,
            pulse_ticks: 10,
            sample_ticks: 1,
        },
        filter: FilterCfg {
            kernel: KernelKind::Mean,
            capacity: 3,
            warmup: WarmupPolicy::Suppress,
        },
        ..SessionCfg::default()
    }
}

pub struct Rig {
    pub engine: MockEngine,
    pub bench: FixedHandle,
    pub log: CallLog,
}

impl Rig {
    pub fn new(mode: SessionMode, cfg: &SessionCfg) -> Self {
        let (sampler, bench) = FixedSampler::new();
        let (actuator, log) = RecordingActuator::new();
        let engine = Engine::new(sampler, actuator, Vec::new(), mode, cfg).expect("engine");
        Self { engine, bench, log }
    }

    /// Advance and poll up to `n` ticks, stopping early on a terminal outcome.
    pub fn run(&mut self, n: u32) -> Outcome {
        let mut last = Outcome::Continue(batdev_core::Regulation::Hold);
        for _ in 0..n {
            let timers = self.engine.timers().clone();
            critical_section::with(|_| timers.advance_tick());
            last = self.engine.poll().expect("poll");
            if last.is_terminal() {
                break;
            }
        }
        last
    }

    pub fn records(&self) -> &[Record] {
        self.engine.sink()
    }

    pub fn kinds(&self) -> Vec<RecordType> {
        self.records().iter().map(|r| r.kind).collect()
    }
}
