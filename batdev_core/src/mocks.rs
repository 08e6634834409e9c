//! Test and helper mocks for batdev_core.
//!
//! Both mocks hand out a cloneable handle so a test can change readings or
//! inspect actuator calls while the engine owns the mock itself.

use std::cell::RefCell;
use std::rc::Rc;

use batdev_traits::{
    Actuator, BoxError, Channel, ChannelSampler, Direction, Load, StatusLines,
};

#[derive(Debug, Clone)]
struct BenchValues {
    values: [f32; Channel::COUNT],
    lines: StatusLines,
    failing: Option<Channel>,
    lines_fail: bool,
}

/// Sampler that reports whatever its [`FixedHandle`] was last told.
pub struct FixedSampler {
    state: Rc<RefCell<BenchValues>>,
}

/// Shared control side of a [`FixedSampler`].
#[derive(Clone)]
pub struct FixedHandle {
    state: Rc<RefCell<BenchValues>>,
}

impl FixedSampler {
    /// A healthy, idle NiMH cell at room temperature.
    pub fn new() -> (Self, FixedHandle) {
        let mut values = [0.0; Channel::COUNT];
        values[Channel::BusVoltage.index()] = 1.25;
        values[Channel::ThermLoad.index()] = 22.0;
        values[Channel::ThermAmbient.index()] = 22.0;
        let state = Rc::new(RefCell::new(BenchValues {
            values,
            lines: StatusLines::default(),
            failing: None,
            lines_fail: false,
        }));
        (
            Self {
                state: Rc::clone(&state),
            },
            FixedHandle { state },
        )
    }
}

impl FixedHandle {
    pub fn set(&self, channel: Channel, value: f32) {
        self.state.borrow_mut().values[channel.index()] = value;
    }

    pub fn get(&self, channel: Channel) -> f32 {
        self.state.borrow().values[channel.index()]
    }

    pub fn set_lines(&self, lines: StatusLines) {
        self.state.borrow_mut().lines = lines;
    }

    /// Make reads of `channel` fail until cleared with `None`.
    pub fn fail_channel(&self, channel: Option<Channel>) {
        self.state.borrow_mut().failing = channel;
    }

    pub fn fail_lines(&self, fail: bool) {
        self.state.borrow_mut().lines_fail = fail;
    }
}

impl ChannelSampler for FixedSampler {
    fn read_channel(&mut self, channel: Channel) -> Result<f32, BoxError> {
        let s = self.state.borrow();
        if s.failing == Some(channel) {
            return Err(Box::new(std::io::Error::other("mock read timeout")));
        }
        Ok(s.values[channel.index()])
    }

    fn read_status_lines(&mut self) -> Result<StatusLines, BoxError> {
        let s = self.state.borrow();
        if s.lines_fail {
            return Err(Box::new(std::io::Error::other("mock status lines")));
        }
        Ok(s.lines)
    }
}

/// One call received by a [`RecordingActuator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCall {
    EnablePower(bool),
    Nudge(Direction),
    SelectLoad(Option<Load>),
    Shutdown,
}

/// Actuator that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingActuator {
    calls: Rc<RefCell<Vec<ActuatorCall>>>,
    fail_nudges: Rc<RefCell<bool>>,
}

/// Shared view of a [`RecordingActuator`]'s call log.
#[derive(Clone)]
pub struct CallLog {
    calls: Rc<RefCell<Vec<ActuatorCall>>>,
    fail_nudges: Rc<RefCell<bool>>,
}

impl RecordingActuator {
    pub fn new() -> (Self, CallLog) {
        let me = Self::default();
        let log = CallLog {
            calls: Rc::clone(&me.calls),
            fail_nudges: Rc::clone(&me.fail_nudges),
        };
        (me, log)
    }

    fn record(&self, call: ActuatorCall) {
        self.calls.borrow_mut().push(call);
    }
}

impl CallLog {
    pub fn calls(&self) -> Vec<ActuatorCall> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&ActuatorCall) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }

    pub fn shutdowns(&self) -> usize {
        self.count(|c| *c == ActuatorCall::Shutdown)
    }

    pub fn fail_nudges(&self, fail: bool) {
        *self.fail_nudges.borrow_mut() = fail;
    }
}

impl Actuator for RecordingActuator {
    fn enable_power(&mut self, on: bool) -> Result<(), BoxError> {
        self.record(ActuatorCall::EnablePower(on));
        Ok(())
    }

    fn nudge(&mut self, direction: Direction) -> Result<(), BoxError> {
        if *self.fail_nudges.borrow() {
            return Err(Box::new(std::io::Error::other("mock pot fault")));
        }
        self.record(ActuatorCall::Nudge(direction));
        Ok(())
    }

    fn select_load(&mut self, load: Option<Load>) -> Result<(), BoxError> {
        self.record(ActuatorCall::SelectLoad(load));
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), BoxError> {
        self.record(ActuatorCall::Shutdown);
        Ok(())
    }
}
