mod common;

use batdev_core::mocks::ActuatorCall;
use batdev_core::{
    DischargeCfg, Engine, ExitStatus, Outcome, Payload, Phase, RecordType, SessionCfg,
    SessionMode, run_simulated,
};
use batdev_hardware::{SimBench, SimParams};
use batdev_traits::{Channel, Load};
use common::{Rig, fast_cfg};
use rstest::rstest;

fn discharge_cfg() -> SessionCfg {
    SessionCfg {
        discharge: DischargeCfg {
            rebound_s: 1,
            ..DischargeCfg::default()
        },
        ..fast_cfg()
    }
}

/// Pull the loaded voltage under the cutoff and wait for the window to settle.
fn load_to_cutoff(rig: &mut Rig) {
    rig.bench.set(Channel::ShuntCurrent, -500.0);
    rig.bench.set(Channel::BusVoltage, 0.95);
    rig.run(3);
}

#[rstest]
fn accepted_cell_starts_on_the_heavy_load() {
    let mut rig = Rig::new(SessionMode::Discharge, &discharge_cfg());
    rig.run(3);
    assert_eq!(rig.engine.phase(), Phase::Discharge(Load::Heavy));
    assert_eq!(rig.log.calls(), vec![ActuatorCall::SelectLoad(Some(Load::Heavy))]);
    assert_eq!(rig.kinds(), vec![RecordType::Discharge]);
}

#[rstest]
fn recovery_steps_to_a_lighter_load_and_measures_resistance() {
    let mut rig = Rig::new(SessionMode::Discharge, &discharge_cfg());
    rig.run(3);
    load_to_cutoff(&mut rig);
    assert_eq!(rig.engine.phase(), Phase::Rebound(Load::Heavy));
    assert_eq!(rig.log.calls().last(), Some(&ActuatorCall::SelectLoad(None)));

    rig.bench.set(Channel::ShuntCurrent, 0.0);
    rig.bench.set(Channel::BusVoltage, 1.10);
    rig.run(100);
    assert_eq!(rig.engine.phase(), Phase::Discharge(Load::Medium));
    assert_eq!(
        rig.log.calls().last(),
        Some(&ActuatorCall::SelectLoad(Some(Load::Medium)))
    );

    let ires: Vec<f32> = rig
        .records()
        .iter()
        .filter_map(|r| match r.payload {
            Payload::IRes { ohms } => Some(ohms),
            _ => None,
        })
        .collect();
    assert_eq!(ires.len(), 1);
    // (1.10 - 0.95) V / 0.5 A
    assert!((ires[0] - 0.3).abs() < 1e-3, "{ires:?}");
    // the voltage window restarts for the new load
    assert!(rig.engine.filter().fill(Channel::BusVoltage) < 3);
}

#[rstest]
fn weak_recovery_ends_the_discharge() {
    let mut rig = Rig::new(SessionMode::Discharge, &discharge_cfg());
    rig.run(3);
    load_to_cutoff(&mut rig);
    rig.bench.set(Channel::ShuntCurrent, 0.0);
    rig.bench.set(Channel::BusVoltage, 1.02);
    let out = rig.run(200);
    assert_eq!(out, Outcome::Terminal(ExitStatus::Success));
    assert!(rig.engine.jugs().discharge_mah() > 0.0);
    assert_eq!(rig.engine.jugs().charge_mah(), 0.0);
    assert_eq!(rig.log.shutdowns(), 1);
}

#[rstest]
fn discharge_never_enables_the_charger() {
    let mut rig = Rig::new(SessionMode::Discharge, &discharge_cfg());
    rig.run(3);
    load_to_cutoff(&mut rig);
    rig.run(200);
    assert_eq!(
        rig.log.count(|c| matches!(c, ActuatorCall::EnablePower(true) | ActuatorCall::Nudge(_))),
        0
    );
}

#[rstest]
fn simulated_cell_discharges_through_two_loads() {
    let bench = SimBench::new(SimParams {
        initial_soc: 0.08,
        ..SimParams::default()
    });
    let mut engine = Engine::new(
        bench.sampler(),
        bench.actuator(),
        Vec::new(),
        SessionMode::Discharge,
        &SessionCfg::default(),
    )
    .unwrap();
    let summary = run_simulated(&mut engine, 300_000, None).unwrap();
    assert_eq!(summary.status, ExitStatus::Success);
    assert!(summary.discharge_mah > 50.0, "{summary:?}");

    let ires: Vec<f32> = engine
        .sink()
        .iter()
        .filter_map(|r| match r.payload {
            Payload::IRes { ohms } => Some(ohms),
            _ => None,
        })
        .collect();
    assert_eq!(ires.len(), 2, "{ires:?}");
    assert!(ires.iter().all(|r| (0.05..0.5).contains(r)), "{ires:?}");
    assert_eq!(bench.load(), None);
}
