//! Status records emitted by the engine and the sinks that receive them.

use batdev_traits::BoxError;
use serde::{Serialize, Serializer};

use crate::interlock::Readings;
use crate::status::ExitStatus;

/// Record type. The numeric code is what consumers key on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    CC = 0,
    CV = 1,
    Detect = 2,
    Therm = 3,
    RampUp = 4,
    Pulse = 5,
    Discharge = 9,
    End = 10,
    ProvEnd = 11,
    Jugs = 12,
    Nudge = 13,
    IRes = 14,
    Info = 15,
}

impl RecordType {
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl Serialize for RecordType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Channels {
        shunt_ma: f32,
        bus_v: f32,
        therm_load_c: f32,
        therm_ambient_c: f32,
    },
    Temperatures {
        therm_load_c: f32,
        therm_ambient_c: f32,
        rate_c_per_min: Option<f32>,
    },
    End {
        status: u8,
        status_name: &'static str,
    },
    Jugs {
        charge_mah: f64,
        discharge_mah: f64,
    },
    Nudge {
        nudges: u32,
        pot_level: i32,
    },
    IRes {
        ohms: f32,
    },
    Info {
        message: String,
    },
}

impl Payload {
    pub fn channels(r: &Readings) -> Self {
        Payload::Channels {
            shunt_ma: r.shunt_ma,
            bus_v: r.bus_volts,
            therm_load_c: r.therm_load_c,
            therm_ambient_c: r.therm_ambient_c,
        }
    }

    pub fn end(status: ExitStatus) -> Self {
        Payload::End {
            status: status.code(),
            status_name: status.name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub kind: RecordType,
    /// Milliseconds since the session started.
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub payload: Payload,
}

/// Destination for records. Failures are logged by the engine and never stop a session.
pub trait ReportSink {
    fn emit(&mut self, record: &Record) -> Result<(), BoxError>;
}

impl<T: ReportSink + ?Sized> ReportSink for Box<T> {
    fn emit(&mut self, record: &Record) -> Result<(), BoxError> {
        (**self).emit(record)
    }
}

impl ReportSink for Vec<Record> {
    fn emit(&mut self, record: &Record) -> Result<(), BoxError> {
        self.push(record.clone());
        Ok(())
    }
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn emit(&mut self, _record: &Record) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Forwards records over a channel, e.g. to a writer thread.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: crossbeam_channel::Sender<Record>,
}

impl ChannelSink {
    pub fn new(tx: crossbeam_channel::Sender<Record>) -> Self {
        Self { tx }
    }
}

impl ReportSink for ChannelSink {
    fn emit(&mut self, record: &Record) -> Result<(), BoxError> {
        self.tx.send(record.clone()).map_err(|e| Box::new(e) as BoxError)
    }
}
