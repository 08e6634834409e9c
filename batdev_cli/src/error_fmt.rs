//! Human-readable error descriptions, status explanations, and structured JSON errors.

use batdev_core::error::{BatDevError, BuildError};
use batdev_core::{ExitStatus, SessionMode};
use serde_json::json;

/// Exit code for errors that never reached a terminal status.
pub const ERROR_EXIT: i32 = 1;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingSampler => {
                "What happened: No channel sampler was provided to the session.\nLikely causes: The bench failed to initialize or was not wired into the builder.\nHow to fix: Pass a sampler via with_sampler(...).".to_string()
            }
            BuildError::MissingActuator => {
                "What happened: No actuator was provided to the session.\nLikely causes: The power path driver failed to initialize.\nHow to fix: Pass an actuator via with_actuator(...).".to_string()
            }
            BuildError::MissingMode => {
                "What happened: Session mode not set.\nLikely causes: The builder was not told whether to charge, discharge or identify.\nHow to fix: Run one of `batdev charge|discharge|identify`.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
            BuildError::Filter(fe) => format!(
                "What happened: The smoothing filter could not be built ({fe}).\nLikely causes: [filter] capacity does not match the kernel, or a bad sigma.\nHow to fix: Use capacity 11 for savitzky_golay, or adjust [filter]."
            ),
        };
    }

    if let Some(de) = err.downcast_ref::<BatDevError>() {
        if matches!(de, BatDevError::Timeout) {
            return format!(
                "What happened: The session did not finish in time ({err}).\nLikely causes: Tick source stalled, or a --fast run ran out of ticks before the cell finished.\nHow to fix: Raise --max-ticks, or check [charge]/[discharge] time limits."
            );
        }
        return format!(
            "What happened: {de}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
        );
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("calibration csv must have headers") {
        return "Invalid headers in calibration CSV. Expected 'channel,raw,value'.".to_string();
    }

    if lower.contains("read config") {
        return format!(
            "What happened: Could not read the config file ({msg}).\nLikely causes: Wrong --config path.\nHow to fix: Point --config at a TOML file (see etc/batdev_config.toml)."
        );
    }

    if lower.contains("invalid configuration") || lower.contains("parse config") {
        let cause = err.source().map(|s| format!(" Cause: {s}")).unwrap_or_default();
        return format!(
            "What happened: Configuration is invalid.{cause}\nLikely causes: Missing or out-of-range values.\nHow to fix: Edit the TOML config and try again."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// One-line explanation of a terminal status.
pub const fn describe_status(status: ExitStatus) -> &'static str {
    match status {
        ExitStatus::Success => "session completed",
        ExitStatus::ParameterError => "invalid session parameters",
        ExitStatus::ConsoleInterrupt => "interrupted from the console",
        ExitStatus::UpperBound => "a measurement went above its range",
        ExitStatus::LowerBound => "a measurement went below its range",
        ExitStatus::PBad => "charger power-good line dropped",
        ExitStatus::PanicVoltage => "cell voltage above the panic limit",
        ExitStatus::MaxChargeVoltage => "cell voltage above the charge ceiling",
        ExitStatus::MaxAmp => "current above the limit",
        ExitStatus::MinAmp => "current collapsed during charge",
        ExitStatus::PanicTemp => "temperature outside the safe range",
        ExitStatus::ChargeTempThreshold => "cell too warm relative to ambient",
        ExitStatus::ChargeTempRate => "cell temperature rising too fast",
        ExitStatus::MaxTime => "time limit reached",
        ExitStatus::IdealDiodeStatus => "ideal diode stopped conducting",
        ExitStatus::DipDetected => "end-of-charge voltage dip detected",
        ExitStatus::NoBattery => "no cell detected",
        ExitStatus::ReversedBattery => "cell inserted backwards",
        ExitStatus::UnknownBattery => "cell voltage matches no known chemistry",
        ExitStatus::Alkaline => "alkaline cell detected",
        ExitStatus::Lithium => "lithium primary cell detected",
        ExitStatus::Accepting => "NiMH cell detected",
    }
}

/// Process exit code for a finished session.
///
/// Normal completion exits 0. An identify run that classified the cell also
/// exits 0; every other terminal status exits with its numeric code.
pub fn exit_code_for_status(mode: SessionMode, status: ExitStatus) -> i32 {
    if status.is_success() {
        return 0;
    }
    let classified = matches!(
        status,
        ExitStatus::NoBattery
            | ExitStatus::ReversedBattery
            | ExitStatus::UnknownBattery
            | ExitStatus::Alkaline
            | ExitStatus::Lithium
    );
    if classified && matches!(mode, SessionMode::Identify) {
        return 0;
    }
    i32::from(status.code())
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    let reason = if let Some(be) = err.downcast_ref::<BuildError>() {
        match be {
            BuildError::Filter(_) => "Filter",
            _ => "Build",
        }
    } else if let Some(de) = err.downcast_ref::<BatDevError>() {
        match de {
            BatDevError::Timeout => "Timeout",
            BatDevError::Hardware(_) | BatDevError::HardwareFault(_) => "Hardware",
            BatDevError::Config(_) => "Config",
            BatDevError::State(_) => "State",
            BatDevError::Io(_) => "Io",
        }
    } else {
        "Error"
    };
    json!({ "reason": reason, "message": humanize(err) }).to_string()
}
