mod common;

use batdev_core::mocks::ActuatorCall;
use batdev_core::{
    ChargeCfg, Engine, ExitStatus, Outcome, Payload, Phase, Record, RecordType, SessionCfg,
    SessionMode, run_simulated,
};
use batdev_hardware::{SimBench, SimParams};
use batdev_traits::{Channel, Direction, StatusLines};
use common::{Rig, fast_cfg};
use rstest::rstest;

fn charge_rig(cfg: &SessionCfg) -> Rig {
    Rig::new(SessionMode::Charge, cfg)
}

/// Bring a mock charge session into constant current at the target.
fn in_band(rig: &mut Rig) {
    rig.run(5);
    assert_eq!(rig.engine.phase(), Phase::ConstantCurrent);
    rig.bench.set(Channel::ShuntCurrent, 1000.0);
    rig.run(5);
}

#[rstest]
fn accepted_cell_enters_constant_current() {
    let mut rig = charge_rig(&fast_cfg());
    // window of three samples, one per tick
    rig.run(2);
    assert_eq!(rig.engine.phase(), Phase::Idle);
    rig.run(1);
    assert_eq!(rig.engine.phase(), Phase::ConstantCurrent);
    assert_eq!(rig.log.calls()[0], ActuatorCall::EnablePower(true));
    assert_eq!(rig.kinds()[0], RecordType::RampUp);
}

#[rstest]
fn ramp_up_nudges_once_per_pulse_period() {
    let mut rig = charge_rig(&fast_cfg());
    rig.run(3);
    rig.run(100);
    let ups = rig.log.count(|c| *c == ActuatorCall::Nudge(Direction::Up));
    assert!((10..=11).contains(&ups), "ups = {ups}");
    assert_eq!(rig.engine.pot_level(), ups as i32);
    assert!(!rig.log.calls().contains(&ActuatorCall::Nudge(Direction::Down)));
}

#[rstest]
fn in_band_current_holds_the_wiper() {
    let mut rig = charge_rig(&fast_cfg());
    in_band(&mut rig);
    let before = rig.engine.nudges();
    rig.run(100);
    assert_eq!(rig.engine.nudges(), before);

    rig.bench.set(Channel::ShuntCurrent, 1010.0);
    rig.run(20);
    assert!(rig.log.calls().contains(&ActuatorCall::Nudge(Direction::Down)));
}

#[rstest]
fn panic_voltage_shuts_down_once_and_reports_end() {
    let mut rig = charge_rig(&fast_cfg());
    in_band(&mut rig);
    rig.bench.set(Channel::BusVoltage, 1.70);
    let out = rig.run(10);
    assert_eq!(out, Outcome::Terminal(ExitStatus::PanicVoltage));
    assert_eq!(rig.engine.phase(), Phase::Terminated(ExitStatus::PanicVoltage));
    assert_eq!(rig.log.shutdowns(), 1);

    // further polls stay terminal and never touch the actuator again
    rig.run(50);
    assert_eq!(rig.log.shutdowns(), 1);

    let n = rig.records().len();
    let end = &rig.records()[n - 2];
    assert_eq!(end.kind, RecordType::End);
    assert_eq!(end.payload, Payload::end(ExitStatus::PanicVoltage));
    assert_eq!(rig.records()[n - 1].kind, RecordType::Jugs);
    assert_eq!(
        rig.kinds().iter().filter(|k| **k == RecordType::End).count(),
        1
    );
}

#[rstest]
fn dip_after_arming_runs_the_extension() {
    let cfg = SessionCfg {
        charge: ChargeCfg {
            arm_detector_s: 1,
            extension_s: 1,
            ..ChargeCfg::default()
        },
        ..fast_cfg()
    };
    let mut rig = charge_rig(&cfg);
    rig.bench.set(Channel::BusVoltage, 1.40);
    in_band(&mut rig);
    rig.bench.set(Channel::BusVoltage, 1.45);
    rig.run(100);
    assert_eq!(rig.engine.phase(), Phase::DipDetection);

    rig.run(10);
    rig.bench.set(Channel::BusVoltage, 1.44);
    rig.run(5);
    assert_eq!(rig.engine.phase(), Phase::Extension);

    let out = rig.run(200);
    assert_eq!(out, Outcome::Terminal(ExitStatus::DipDetected));
    assert!(ExitStatus::DipDetected.is_success());
    let kinds = rig.kinds();
    let detect = kinds.iter().position(|k| *k == RecordType::Detect).unwrap();
    let prov_end = kinds.iter().position(|k| *k == RecordType::ProvEnd).unwrap();
    assert!(detect < prov_end);
}

#[rstest]
fn current_limit_holds_while_the_voltage_window_refills() {
    let cfg = SessionCfg {
        charge: ChargeCfg {
            arm_detector_s: 1,
            ..ChargeCfg::default()
        },
        ..fast_cfg()
    };
    let mut rig = charge_rig(&cfg);
    rig.bench.set(Channel::BusVoltage, 1.40);
    in_band(&mut rig);
    for _ in 0..200 {
        if rig.engine.phase() == Phase::DipDetection {
            break;
        }
        rig.run(1);
    }
    assert_eq!(rig.engine.phase(), Phase::DipDetection);
    assert_eq!(rig.engine.filter().fill(Channel::BusVoltage), 0);

    rig.bench.set(Channel::ShuntCurrent, 9000.0);
    let out = rig.run(1);
    assert_eq!(out, Outcome::Terminal(ExitStatus::MaxAmp));
    assert!(!rig.engine.filter().is_ready(Channel::BusVoltage));
    assert_eq!(rig.log.shutdowns(), 1);
}

#[rstest]
fn small_wobble_is_not_a_dip() {
    let cfg = SessionCfg {
        charge: ChargeCfg {
            arm_detector_s: 1,
            ..ChargeCfg::default()
        },
        ..fast_cfg()
    };
    let mut rig = charge_rig(&cfg);
    in_band(&mut rig);
    rig.bench.set(Channel::BusVoltage, 1.45);
    rig.run(120);
    rig.bench.set(Channel::BusVoltage, 1.447);
    rig.run(50);
    assert_eq!(rig.engine.phase(), Phase::DipDetection);
}

#[rstest]
fn constant_voltage_tapers_to_success() {
    let cfg = SessionCfg {
        charge: ChargeCfg {
            dip_detection: false,
            cv_volts: Some(1.45),
            ..ChargeCfg::default()
        },
        ..fast_cfg()
    };
    let mut rig = charge_rig(&cfg);
    in_band(&mut rig);
    rig.bench.set(Channel::BusVoltage, 1.46);
    rig.run(5);
    assert_eq!(rig.engine.phase(), Phase::ConstantVoltage);
    assert!(rig.kinds().contains(&RecordType::CV));

    // above the voltage band: back the pot off
    rig.run(20);
    assert!(rig.log.calls().contains(&ActuatorCall::Nudge(Direction::Down)));

    rig.bench.set(Channel::ShuntCurrent, 80.0);
    let out = rig.run(10);
    assert_eq!(out, Outcome::Terminal(ExitStatus::Success));
}

#[rstest]
fn max_charge_time_ends_the_session() {
    let cfg = SessionCfg {
        charge: ChargeCfg {
            max_charge_s: 2,
            ..ChargeCfg::default()
        },
        ..fast_cfg()
    };
    let mut rig = charge_rig(&cfg);
    in_band(&mut rig);
    let out = rig.run(300);
    assert_eq!(out, Outcome::Terminal(ExitStatus::MaxTime));
    assert!(rig.engine.elapsed_ms() >= 2_000);
}

#[rstest]
fn current_collapse_after_ramp_is_min_amp() {
    let mut rig = charge_rig(&fast_cfg());
    in_band(&mut rig);
    rig.bench.set(Channel::ShuntCurrent, 5.0);
    assert_eq!(rig.run(10), Outcome::Terminal(ExitStatus::MinAmp));
}

#[rstest]
fn fast_temperature_rise_trips_the_rate_check() {
    let mut rig = charge_rig(&fast_cfg());
    in_band(&mut rig);
    rig.bench.set(Channel::ThermLoad, 24.0);
    // one rate window is 60 s = 6000 ticks
    let out = rig.run(7_000);
    assert_eq!(out, Outcome::Terminal(ExitStatus::ChargeTempRate));
}

#[rstest]
fn load_warmer_than_ambient_trips_the_delta_check() {
    let mut rig = charge_rig(&fast_cfg());
    in_band(&mut rig);
    rig.bench.set(Channel::ThermLoad, 31.0);
    assert_eq!(
        rig.run(10),
        Outcome::Terminal(ExitStatus::ChargeTempThreshold)
    );
}

#[rstest]
fn failed_voltage_read_is_treated_as_panic() {
    let mut rig = charge_rig(&fast_cfg());
    in_band(&mut rig);
    rig.bench.fail_channel(Some(Channel::BusVoltage));
    assert_eq!(rig.run(5), Outcome::Terminal(ExitStatus::PanicVoltage));
}

#[rstest]
fn unreadable_status_lines_fail_safe() {
    let mut rig = charge_rig(&fast_cfg());
    in_band(&mut rig);
    rig.bench.fail_lines(true);
    assert_eq!(
        rig.run(5),
        Outcome::Terminal(ExitStatus::IdealDiodeStatus)
    );
}

#[rstest]
fn power_good_drop_is_pbad() {
    let mut rig = charge_rig(&fast_cfg());
    in_band(&mut rig);
    rig.bench.set_lines(StatusLines {
        power_good: false,
        ..StatusLines::default()
    });
    assert_eq!(rig.run(5), Outcome::Terminal(ExitStatus::PBad));
}

#[rstest]
fn periodic_report_follows_the_phase() {
    let mut rig = charge_rig(&fast_cfg());
    in_band(&mut rig);
    rig.run(500);
    let periodic: Vec<&Record> = rig
        .records()
        .iter()
        .filter(|r| r.kind == RecordType::CC)
        .collect();
    assert_eq!(periodic.len(), 1);
    assert!(matches!(periodic[0].payload, Payload::Channels { .. }));
}

#[rstest]
fn nudge_failure_is_an_error_and_stops_the_hardware() {
    let mut rig = charge_rig(&fast_cfg());
    rig.log.fail_nudges(true);
    let err = run_simulated(&mut rig.engine, 100, None).expect_err("nudge fails");
    assert!(format!("{err:#}").contains("nudge"), "{err:#}");
    assert_eq!(rig.log.shutdowns(), 1);
}

#[rstest]
fn simulated_cell_charges_to_a_dip() {
    let bench = SimBench::new(SimParams {
        initial_soc: 0.9,
        ..SimParams::default()
    });
    let cfg = SessionCfg::default();
    let mut engine = Engine::new(
        bench.sampler(),
        bench.actuator(),
        Vec::new(),
        SessionMode::Charge,
        &cfg,
    )
    .unwrap();
    let summary = run_simulated(&mut engine, 400_000, None).unwrap();
    assert_eq!(summary.status, ExitStatus::DipDetected);
    assert!(summary.charge_mah > 100.0, "{summary:?}");
    assert!(bench.soc() > 1.0);
    assert_eq!(bench.shutdowns(), 1);
    assert!(!bench.power_on());
    assert!(engine.sink().iter().any(|r| r.kind == RecordType::ProvEnd));
}
