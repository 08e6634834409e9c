pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Analog channels sampled by the core, one smoothing window each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Shunt current in mA (positive while charging).
    ShuntCurrent,
    /// Bus (battery terminal) voltage in volts.
    BusVoltage,
    /// Thermistor on the battery under test, deg C.
    ThermLoad,
    /// Ambient thermistor, deg C.
    ThermAmbient,
}

impl Channel {
    pub const COUNT: usize = 4;
    pub const ALL: [Channel; Self::COUNT] = [
        Channel::ShuntCurrent,
        Channel::BusVoltage,
        Channel::ThermLoad,
        Channel::ThermAmbient,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Digital status lines read alongside the analog channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusLines {
    /// Ideal diode controller reports its MOSFET conducting.
    pub diode_conducting: bool,
    /// Power module reports power good.
    pub power_good: bool,
    /// Battery presence pulls the detect line low.
    pub battery_present: bool,
}

impl Default for StatusLines {
    fn default() -> Self {
        Self {
            diode_conducting: true,
            power_good: true,
            battery_present: true,
        }
    }
}

/// Discharge load resistors, heaviest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Load {
    /// 2.0 ohm
    Heavy,
    /// 4.7 ohm
    Medium,
    /// 10 ohm
    Light,
}

impl Load {
    pub const fn ohms(self) -> f32 {
        match self {
            Load::Heavy => 2.0,
            Load::Medium => 4.7,
            Load::Light => 10.0,
        }
    }

    /// Next lighter load, if any.
    pub const fn lighter(self) -> Option<Load> {
        match self {
            Load::Heavy => Some(Load::Medium),
            Load::Medium => Some(Load::Light),
            Load::Light => None,
        }
    }
}

/// Wiper step direction for the regulation potentiometer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Scaling coefficients converting raw ADC counts to bus volts and shunt mA
/// for one hardware revision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub bus_scale: f32,
    pub bus_offset: f32,
    pub shunt_scale: f32,
    pub shunt_offset: f32,
}

impl Calibration {
    #[inline]
    pub fn bus_volts(&self, raw: i32) -> f32 {
        self.bus_scale * raw as f32 + self.bus_offset
    }

    #[inline]
    pub fn shunt_ma(&self, raw: i32) -> f32 {
        self.shunt_scale * raw as f32 + self.shunt_offset
    }
}

impl Default for Calibration {
    fn default() -> Self {
        // INA219 LSBs: 4 mV bus, 10 uV across a 0.1 ohm shunt = 0.1 mA
        Self {
            bus_scale: 0.004,
            bus_offset: 0.0,
            shunt_scale: 0.1,
            shunt_offset: 0.0,
        }
    }
}

pub trait ChannelSampler {
    /// Read one calibrated value. Must be fast and bounded.
    fn read_channel(&mut self, channel: Channel) -> Result<f32, BoxError>;
    fn read_status_lines(&mut self) -> Result<StatusLines, BoxError>;
}

pub trait Actuator {
    /// Switch the charging power path on or off.
    fn enable_power(&mut self, on: bool) -> Result<(), BoxError>;
    /// Step the regulation potentiometer one count.
    fn nudge(&mut self, direction: Direction) -> Result<(), BoxError>;
    /// Apply a discharge load, or remove all loads with `None`.
    fn select_load(&mut self, load: Option<Load>) -> Result<(), BoxError>;
    /// Session teardown: all loads off, power path disabled.
    fn shutdown(&mut self) -> Result<(), BoxError>;
}

impl<T: ChannelSampler + ?Sized> ChannelSampler for Box<T> {
    fn read_channel(&mut self, channel: Channel) -> Result<f32, BoxError> {
        (**self).read_channel(channel)
    }
    fn read_status_lines(&mut self) -> Result<StatusLines, BoxError> {
        (**self).read_status_lines()
    }
}

impl<T: Actuator + ?Sized> Actuator for Box<T> {
    fn enable_power(&mut self, on: bool) -> Result<(), BoxError> {
        (**self).enable_power(on)
    }
    fn nudge(&mut self, direction: Direction) -> Result<(), BoxError> {
        (**self).nudge(direction)
    }
    fn select_load(&mut self, load: Option<Load>) -> Result<(), BoxError> {
        (**self).select_load(load)
    }
    fn shutdown(&mut self) -> Result<(), BoxError> {
        (**self).shutdown()
    }
}
