//! Session assembly: config mapping, simulated bench, record output, and the run loop.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use batdev_config::{Config, SimCell};
use batdev_core::conversions::calibration_from_cfg;
use batdev_core::hw_error::map_hw_error;
use batdev_core::{
    Payload, Record, ReportSink, SessionBuilder, SessionCfg, SessionMode, SessionSummary,
    run_session, run_simulated,
};
use batdev_hardware::{CellKind, SimBench, SimParams};
use batdev_traits::{BoxError, Calibration, Channel, ChannelSampler, MonotonicClock};
use eyre::WrapErr;

/// Slack on top of the session ceilings before a --fast run is abandoned.
const FAST_SLACK_S: u64 = 60;
/// Identification never needs more than a filter window or two.
const IDENTIFY_BUDGET_S: u64 = 30;

pub const fn mode_name(mode: SessionMode) -> &'static str {
    match mode {
        SessionMode::Charge => "charge",
        SessionMode::Discharge => "discharge",
        SessionMode::Identify => "identify",
    }
}

fn cell_kind(cell: SimCell) -> CellKind {
    match cell {
        SimCell::Nimh => CellKind::Nimh,
        SimCell::Alkaline => CellKind::Alkaline,
        SimCell::Lithium => CellKind::Lithium,
        SimCell::Reversed => CellKind::Reversed,
        SimCell::Absent => CellKind::Absent,
    }
}

/// Bench parameters from `[sim]`. Each cell step covers one sample period
/// stretched by `time_scale`.
pub fn sim_params(cfg: &Config, calibration: Calibration) -> SimParams {
    let s = &cfg.sim;
    #[allow(clippy::cast_precision_loss)]
    let sample_s = cfg.timers.sample_ms as f32 / 1000.0;
    SimParams {
        cell: cell_kind(s.cell),
        capacity_mah: s.capacity_mah,
        initial_soc: s.initial_soc,
        ambient_c: s.ambient_c,
        noise_counts: s.noise_counts,
        seed: s.seed,
        diode_fault: s.diode_fault,
        dt_s: sample_s * s.time_scale,
        calibration,
    }
}

/// Persisted `[calibration]` wins over a CSV; neither means the bench defaults.
pub fn effective_calibration(cfg: &Config, csv: Option<&batdev_config::Calibration>) -> Calibration {
    cfg.calibration
        .as_ref()
        .or(csv)
        .map(calibration_from_cfg)
        .unwrap_or_default()
}

/// Ticks a lockstep run may take before it is abandoned.
pub fn tick_budget(cfg: &SessionCfg, mode: SessionMode) -> u64 {
    let seconds = match mode {
        SessionMode::Charge => {
            u64::from(cfg.charge.max_charge_s) + u64::from(cfg.charge.extension_s) + FAST_SLACK_S
        }
        SessionMode::Discharge => u64::from(cfg.discharge.max_discharge_s) + FAST_SLACK_S,
        SessionMode::Identify => IDENTIFY_BUDGET_S,
    };
    seconds.saturating_mul(1000) / u64::from(cfg.timers.tick_ms.max(1))
}

/// Writes each record to stdout, as a JSON line or as a short text line.
pub struct StdoutSink {
    json: bool,
}

impl StdoutSink {
    pub fn new(json: bool) -> Self {
        Self { json }
    }
}

impl ReportSink for StdoutSink {
    fn emit(&mut self, record: &Record) -> Result<(), BoxError> {
        let mut out = std::io::stdout().lock();
        if self.json {
            let line = serde_json::to_string(record)?;
            writeln!(out, "{line}")?;
        } else {
            writeln!(out, "{}", text_line(record))?;
        }
        Ok(())
    }
}

#[allow(clippy::cast_precision_loss)]
fn text_line(r: &Record) -> String {
    let t = r.elapsed_ms as f64 / 1000.0;
    let body = match &r.payload {
        Payload::Channels {
            shunt_ma,
            bus_v,
            therm_load_c,
            therm_ambient_c,
        } => format!(
            "{shunt_ma:7.1} mA {bus_v:6.3} V load {therm_load_c:5.1} C ambient {therm_ambient_c:5.1} C"
        ),
        Payload::Temperatures {
            therm_load_c,
            therm_ambient_c,
            rate_c_per_min,
        } => match rate_c_per_min {
            Some(rate) => format!(
                "load {therm_load_c:5.1} C ambient {therm_ambient_c:5.1} C rate {rate:.2} C/min"
            ),
            None => format!("load {therm_load_c:5.1} C ambient {therm_ambient_c:5.1} C"),
        },
        Payload::End {
            status,
            status_name,
        } => format!("{status_name} ({status})"),
        Payload::Jugs {
            charge_mah,
            discharge_mah,
        } => format!("in {charge_mah:.1} mAh out {discharge_mah:.1} mAh"),
        Payload::Nudge { nudges, pot_level } => format!("{nudges} nudges, pot {pot_level}"),
        Payload::IRes { ohms } => format!("{:.1} mOhm", ohms * 1000.0),
        Payload::Info { message } => message.clone(),
    };
    let kind = format!("{:?}", r.kind);
    format!("[{t:9.1} s] {kind:>9} {body}")
}

/// Build a session against the simulated bench and run it to a terminal status.
pub fn run(
    cfg: &Config,
    calibration: Calibration,
    mode: SessionMode,
    json: bool,
    fast: bool,
    max_ticks: Option<u64>,
    shutdown: &Arc<AtomicBool>,
) -> eyre::Result<SessionSummary> {
    let session_cfg = SessionCfg::from(cfg);
    let bench = SimBench::new(sim_params(cfg, calibration));
    let flag = Arc::clone(shutdown);
    let mut session = SessionBuilder::new()
        .with_config(session_cfg.clone())
        .with_sampler(bench.sampler())
        .with_actuator(bench.actuator())
        .with_mode(mode)
        .with_sink(StdoutSink::new(json))
        .with_interrupt_check(move || flag.load(Ordering::Relaxed))
        .with_interrupt_debounce(cfg.interrupt.debounce_n)
        .build()
        .wrap_err("build session")?;

    tracing::info!(mode = mode_name(mode), fast, "session start");
    let summary = if fast {
        let budget = max_ticks.unwrap_or_else(|| tick_budget(&session_cfg, mode));
        run_simulated(&mut session, budget, None)?
    } else {
        run_session(&mut session, MonotonicClock::new(), None)?
    };
    tracing::info!(
        status = %summary.status,
        elapsed_ms = summary.elapsed_ms,
        charge_mah = summary.charge_mah,
        discharge_mah = summary.discharge_mah,
        "session end"
    );
    Ok(summary)
}

/// One reading of every channel and the status lines.
#[derive(Debug, Clone, Copy)]
pub struct SelfCheck {
    pub readings: [f32; Channel::COUNT],
    pub diode_conducting: bool,
    pub power_good: bool,
    pub battery_present: bool,
}

pub fn self_check(cfg: &Config, calibration: Calibration) -> eyre::Result<SelfCheck> {
    let bench = SimBench::new(sim_params(cfg, calibration));
    let mut sampler = bench.sampler();
    let mut readings = [0.0; Channel::COUNT];
    for ch in Channel::ALL {
        readings[ch.index()] = sampler
            .read_channel(ch)
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err_with(|| format!("read {ch:?}"))?;
    }
    let lines = sampler
        .read_status_lines()
        .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
        .wrap_err("read status lines")?;
    Ok(SelfCheck {
        readings,
        diode_conducting: lines.diode_conducting,
        power_good: lines.power_good,
        battery_present: lines.battery_present,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use batdev_core::RecordType;

    #[test]
    fn sim_step_follows_sample_period_and_time_scale() {
        let mut cfg = Config::default();
        cfg.timers.sample_ms = 200;
        cfg.sim.time_scale = 10.0;
        cfg.sim.cell = SimCell::Lithium;
        let p = sim_params(&cfg, Calibration::default());
        assert!((p.dt_s - 2.0).abs() < 1e-6);
        assert_eq!(p.cell, CellKind::Lithium);
    }

    #[test]
    fn persisted_calibration_beats_csv() {
        let persisted = batdev_config::Calibration {
            bus_scale: 0.002,
            bus_offset: 0.0,
            shunt_scale: 0.1,
            shunt_offset: 0.0,
        };
        let csv = batdev_config::Calibration {
            bus_scale: 0.003,
            ..persisted
        };
        let mut cfg = Config::default();
        assert!((effective_calibration(&cfg, Some(&csv)).bus_scale - 0.003).abs() < 1e-9);
        cfg.calibration = Some(persisted);
        assert!((effective_calibration(&cfg, Some(&csv)).bus_scale - 0.002).abs() < 1e-9);
        assert_eq!(
            effective_calibration(&Config::default(), None).bus_scale,
            Calibration::default().bus_scale
        );
    }

    #[test]
    fn budget_covers_the_ceiling() {
        let cfg = SessionCfg::default();
        let ticks = tick_budget(&cfg, SessionMode::Charge);
        let ceiling_ticks =
            u64::from(cfg.charge.max_charge_s) * 1000 / u64::from(cfg.timers.tick_ms);
        assert!(ticks > ceiling_ticks);
    }

    #[test]
    fn text_line_names_the_status() {
        let rec = Record {
            kind: RecordType::End,
            elapsed_ms: 1500,
            payload: Payload::end(batdev_core::ExitStatus::DipDetected),
        };
        let line = text_line(&rec);
        assert!(line.contains("DipDetected (15)"), "{line}");
        assert!(line.contains("1.5 s"), "{line}");
    }
}
