use batdev_core::interlock::{first_tripped, first_tripped_without_bus_voltage};
use batdev_core::{ExitStatus, INTERLOCKS, Limits, Readings, Snapshot};
use batdev_traits::StatusLines;
use rstest::rstest;

fn charging() -> Snapshot {
    Snapshot {
        readings: Readings {
            shunt_ma: 1000.0,
            bus_volts: 1.42,
            therm_load_c: 25.0,
            therm_ambient_c: 22.0,
        },
        lines: StatusLines::default(),
        charging: true,
        regulating_current: true,
        temp_rate_c_per_min: Some(0.2),
        max_time_expired: false,
    }
}

#[rstest]
fn list_order_is_fixed() {
    let order: Vec<_> = INTERLOCKS.iter().map(|i| i.status).collect();
    assert_eq!(
        order,
        [
            ExitStatus::IdealDiodeStatus,
            ExitStatus::PBad,
            ExitStatus::ReversedBattery,
            ExitStatus::NoBattery,
            ExitStatus::PanicVoltage,
            ExitStatus::MaxChargeVoltage,
            ExitStatus::PanicTemp,
            ExitStatus::MaxAmp,
            ExitStatus::MinAmp,
            ExitStatus::ChargeTempThreshold,
            ExitStatus::ChargeTempRate,
            ExitStatus::MaxTime,
        ]
    );
}

#[rstest]
fn panic_voltage_beats_panic_temp() {
    let mut s = charging();
    s.readings.bus_volts = 1.70;
    s.readings.therm_load_c = 45.0;
    assert_eq!(
        first_tripped(&s, &Limits::default()),
        Some(ExitStatus::PanicVoltage)
    );
}

#[rstest]
fn ceiling_applies_when_session_panic_level_is_raised() {
    let limits = Limits {
        panic_volts: 1.72,
        ..Limits::default()
    };
    let mut s = charging();
    s.readings.bus_volts = 1.75;
    // panic_volts equals the ceiling, so the panic check fires first
    assert_eq!(first_tripped(&s, &limits), Some(ExitStatus::PanicVoltage));
    let limits = Limits {
        panic_volts: 1.80,
        ..Limits::default()
    };
    assert_eq!(first_tripped(&s, &limits), Some(ExitStatus::MaxChargeVoltage));
}

#[rstest]
#[case::diode(|s: &mut Snapshot| s.lines.diode_conducting = false, ExitStatus::IdealDiodeStatus)]
#[case::pbad(|s: &mut Snapshot| s.lines.power_good = false, ExitStatus::PBad)]
#[case::reversed(|s: &mut Snapshot| s.readings.bus_volts = -0.8, ExitStatus::ReversedBattery)]
#[case::removed(|s: &mut Snapshot| s.lines.battery_present = false, ExitStatus::NoBattery)]
#[case::cold(|s: &mut Snapshot| s.readings.therm_ambient_c = -15.0, ExitStatus::PanicTemp)]
#[case::over_current(|s: &mut Snapshot| s.readings.shunt_ma = 3500.0, ExitStatus::MaxAmp)]
#[case::over_current_discharging(|s: &mut Snapshot| s.readings.shunt_ma = -3500.0, ExitStatus::MaxAmp)]
#[case::under_current(|s: &mut Snapshot| s.readings.shunt_ma = 10.0, ExitStatus::MinAmp)]
#[case::delta(|s: &mut Snapshot| s.readings.therm_load_c = 31.0, ExitStatus::ChargeTempThreshold)]
#[case::rate(|s: &mut Snapshot| s.temp_rate_c_per_min = Some(1.5), ExitStatus::ChargeTempRate)]
#[case::time(|s: &mut Snapshot| s.max_time_expired = true, ExitStatus::MaxTime)]
fn each_interlock_trips_alone(#[case] fault: fn(&mut Snapshot), #[case] expected: ExitStatus) {
    let mut s = charging();
    assert_eq!(first_tripped(&s, &Limits::default()), None);
    fault(&mut s);
    assert_eq!(first_tripped(&s, &Limits::default()), Some(expected));
}

#[rstest]
fn charge_only_checks_are_quiet_while_discharging() {
    let mut s = charging();
    s.charging = false;
    s.regulating_current = false;
    s.readings.shunt_ma = -500.0;
    s.readings.therm_load_c = 31.0;
    s.temp_rate_c_per_min = Some(3.0);
    s.lines.diode_conducting = false;
    assert_eq!(first_tripped(&s, &Limits::default()), None);
}

#[rstest]
fn voltage_checks_are_skipped_while_the_window_refills() {
    let mut s = charging();
    s.readings.bus_volts = f32::NAN;
    let limits = Limits::default();
    assert_eq!(first_tripped(&s, &limits), Some(ExitStatus::PanicVoltage));
    assert_eq!(first_tripped_without_bus_voltage(&s, &limits), None);

    s.readings.therm_load_c = 45.0;
    assert_eq!(
        first_tripped_without_bus_voltage(&s, &limits),
        Some(ExitStatus::PanicTemp)
    );
    s.lines.diode_conducting = false;
    assert_eq!(
        first_tripped_without_bus_voltage(&s, &limits),
        Some(ExitStatus::IdealDiodeStatus)
    );
}

#[rstest]
fn only_voltage_entries_need_the_bus_voltage() {
    let voltage: Vec<_> = INTERLOCKS
        .iter()
        .filter(|i| i.reads_bus_voltage)
        .map(|i| i.status)
        .collect();
    assert_eq!(
        voltage,
        [
            ExitStatus::ReversedBattery,
            ExitStatus::NoBattery,
            ExitStatus::PanicVoltage,
            ExitStatus::MaxChargeVoltage,
        ]
    );
}
