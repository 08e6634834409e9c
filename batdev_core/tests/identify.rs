mod common;

use batdev_core::{ExitStatus, Outcome, SessionMode};
use batdev_traits::{Channel, StatusLines};
use common::{Rig, fast_cfg};
use rstest::rstest;

#[rstest]
#[case::nimh(1.25, ExitStatus::Accepting)]
#[case::alkaline(1.58, ExitStatus::Alkaline)]
#[case::lithium(1.78, ExitStatus::Lithium)]
#[case::reversed(-1.2, ExitStatus::ReversedBattery)]
#[case::open(0.0, ExitStatus::NoBattery)]
#[case::deep_discharged(0.5, ExitStatus::UnknownBattery)]
fn identify_reports_the_cell(#[case] volts: f32, #[case] expected: ExitStatus) {
    let mut rig = Rig::new(SessionMode::Identify, &fast_cfg());
    rig.bench.set(Channel::BusVoltage, volts);
    assert_eq!(rig.run(10), Outcome::Terminal(expected));
    assert!(rig.log.calls().iter().all(|c| !matches!(
        c,
        batdev_core::mocks::ActuatorCall::EnablePower(true)
    )));
}

#[rstest]
#[case::charge(SessionMode::Charge)]
#[case::discharge(SessionMode::Discharge)]
fn sessions_refuse_alkaline_cells(#[case] mode: SessionMode) {
    let mut rig = Rig::new(mode, &fast_cfg());
    rig.bench.set(Channel::BusVoltage, 1.58);
    assert_eq!(rig.run(10), Outcome::Terminal(ExitStatus::Alkaline));
    assert_eq!(rig.log.shutdowns(), 1);
}

#[rstest]
fn detect_line_overrides_a_plausible_voltage() {
    let mut rig = Rig::new(SessionMode::Charge, &fast_cfg());
    rig.bench.set_lines(StatusLines {
        battery_present: false,
        ..StatusLines::default()
    });
    assert_eq!(rig.run(10), Outcome::Terminal(ExitStatus::NoBattery));
}
