//! Session exit statuses and per-poll outcomes.

use std::fmt;

use batdev_traits::Direction;

/// Why a session ended. Numeric codes are stable and appear in End records
/// and as process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExitStatus {
    Success = 0,
    ParameterError = 1,
    ConsoleInterrupt = 2,
    UpperBound = 3,
    LowerBound = 4,
    PBad = 5,
    PanicVoltage = 6,
    MaxChargeVoltage = 7,
    MaxAmp = 8,
    MinAmp = 9,
    PanicTemp = 10,
    ChargeTempThreshold = 11,
    ChargeTempRate = 12,
    MaxTime = 13,
    IdealDiodeStatus = 14,
    DipDetected = 15,
    NoBattery = 16,
    ReversedBattery = 17,
    UnknownBattery = 18,
    Alkaline = 19,
    Lithium = 20,
    /// Cell identified as NiMH and accepted for charge or discharge.
    Accepting = 21,
}

impl ExitStatus {
    pub const ALL: [ExitStatus; 22] = [
        ExitStatus::Success,
        ExitStatus::ParameterError,
        ExitStatus::ConsoleInterrupt,
        ExitStatus::UpperBound,
        ExitStatus::LowerBound,
        ExitStatus::PBad,
        ExitStatus::PanicVoltage,
        ExitStatus::MaxChargeVoltage,
        ExitStatus::MaxAmp,
        ExitStatus::MinAmp,
        ExitStatus::PanicTemp,
        ExitStatus::ChargeTempThreshold,
        ExitStatus::ChargeTempRate,
        ExitStatus::MaxTime,
        ExitStatus::IdealDiodeStatus,
        ExitStatus::DipDetected,
        ExitStatus::NoBattery,
        ExitStatus::ReversedBattery,
        ExitStatus::UnknownBattery,
        ExitStatus::Alkaline,
        ExitStatus::Lithium,
        ExitStatus::Accepting,
    ];

    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    pub const fn name(self) -> &'static str {
        match self {
            ExitStatus::Success => "Success",
            ExitStatus::ParameterError => "ParameterError",
            ExitStatus::ConsoleInterrupt => "ConsoleInterrupt",
            ExitStatus::UpperBound => "UpperBound",
            ExitStatus::LowerBound => "LowerBound",
            ExitStatus::PBad => "PBad",
            ExitStatus::PanicVoltage => "PanicVoltage",
            ExitStatus::MaxChargeVoltage => "MaxChargeVoltage",
            ExitStatus::MaxAmp => "MaxAmp",
            ExitStatus::MinAmp => "MinAmp",
            ExitStatus::PanicTemp => "PanicTemp",
            ExitStatus::ChargeTempThreshold => "ChargeTempThreshold",
            ExitStatus::ChargeTempRate => "ChargeTempRate",
            ExitStatus::MaxTime => "MaxTime",
            ExitStatus::IdealDiodeStatus => "IdealDiodeStatus",
            ExitStatus::DipDetected => "DipDetected",
            ExitStatus::NoBattery => "NoBattery",
            ExitStatus::ReversedBattery => "ReversedBattery",
            ExitStatus::UnknownBattery => "UnknownBattery",
            ExitStatus::Alkaline => "Alkaline",
            ExitStatus::Lithium => "Lithium",
            ExitStatus::Accepting => "Accepting",
        }
    }

    /// Normal completion: the requested work finished, or identification succeeded.
    pub const fn is_success(self) -> bool {
        matches!(
            self,
            ExitStatus::Success | ExitStatus::DipDetected | ExitStatus::Accepting
        )
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Regulation request for the potentiometer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regulation {
    Increase,
    Decrease,
    Hold,
}

impl Regulation {
    pub const fn direction(self) -> Option<Direction> {
        match self {
            Regulation::Increase => Some(Direction::Up),
            Regulation::Decrease => Some(Direction::Down),
            Regulation::Hold => None,
        }
    }
}

/// Result of one foreground poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue(Regulation),
    Terminal(ExitStatus),
}

impl Outcome {
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Outcome::Terminal(_))
    }

    #[inline]
    pub const fn status(self) -> Option<ExitStatus> {
        match self {
            Outcome::Terminal(s) => Some(s),
            Outcome::Continue(_) => None,
        }
    }
}
