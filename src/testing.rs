//! Test doubles: a PWM sink that behaves like the kernel driver and records
//! every write, and a delay that records sleeps instead of sleeping.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{ChimeError, Result};
use crate::pwm::PwmCapability;
use crate::sequencer::Delay;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HwWrite {
    Export,
    Unexport,
    Period(u64),
    Duty(u64),
    Enable(bool),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    Write(HwWrite),
    Sleep(Duration),
}

#[derive(Default)]
struct Sink {
    exported: bool,
    period: u64,
    duty: u64,
    attempts: usize,
    fail_at: Option<usize>,
    time_out_at: Option<usize>,
    events: Vec<Event>,
}

/// Shared handle: clones observe the same sink, so a test can keep one
/// after moving another into a channel or a thread.
#[derive(Clone, Default)]
pub struct RecordingPwm {
    sink: Arc<Mutex<Sink>>,
}

impl RecordingPwm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exported() -> Self {
        let pwm = Self::default();
        pwm.lock().exported = true;
        pwm
    }

    /// Fail the `n`th write attempt (zero-based) since creation.
    pub fn failing_at(n: usize) -> Self {
        let pwm = Self::default();
        pwm.lock().fail_at = Some(n);
        pwm
    }

    /// Fail only the next write attempt.
    pub fn fail_next(&self) {
        let mut sink = self.lock();
        sink.fail_at = Some(sink.attempts);
    }

    pub fn fail_after(&self, more: usize) {
        let mut sink = self.lock();
        sink.fail_at = Some(sink.attempts + more);
    }

    /// Apply the write `more` attempts from now, then report it as timed
    /// out, like a sysfs write that completes after the caller gave up.
    pub fn time_out_after(&self, more: usize) {
        let mut sink = self.lock();
        sink.time_out_at = Some(sink.attempts + more);
    }

    pub fn clear(&self) {
        self.lock().events.clear();
    }

    pub fn delay(&self) -> VirtualDelay {
        VirtualDelay { pwm: self.clone() }
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    pub fn writes(&self) -> Vec<HwWrite> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Write(w) => Some(w),
                Event::Sleep(_) => None,
            })
            .collect()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Sleep(d) => Some(d),
                Event::Write(_) => None,
            })
            .collect()
    }

    pub fn periods(&self) -> Vec<u64> {
        self.writes()
            .into_iter()
            .filter_map(|w| match w {
                HwWrite::Period(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    /// Total virtual time slept.
    pub fn elapsed(&self) -> Duration {
        self.sleeps().into_iter().sum()
    }

    fn lock(&self) -> MutexGuard<'_, Sink> {
        self.sink.lock().unwrap()
    }

    fn apply(&self, write: HwWrite) -> Result<()> {
        let mut sink = self.lock();
        let attempt = sink.attempts;
        sink.attempts += 1;
        if sink.fail_at == Some(attempt) {
            return Err(ChimeError::hardware(
                "write",
                io::Error::new(io::ErrorKind::Other, "injected failure"),
            ));
        }

        let attribute_write = !matches!(write, HwWrite::Export | HwWrite::Unexport);
        if attribute_write && !sink.exported {
            return Err(ChimeError::hardware(
                "write",
                io::Error::new(io::ErrorKind::NotFound, "channel not exported"),
            ));
        }

        match write {
            HwWrite::Export => sink.exported = true,
            HwWrite::Unexport => sink.exported = false,
            HwWrite::Period(p) if p < sink.duty => {
                return Err(invalid(format!("period {p} below duty {}", sink.duty)));
            }
            HwWrite::Period(p) => sink.period = p,
            HwWrite::Duty(d) if d > sink.period => {
                return Err(invalid(format!("duty {d} above period {}", sink.period)));
            }
            HwWrite::Duty(d) => sink.duty = d,
            HwWrite::Enable(_) => {}
        }
        sink.events.push(Event::Write(write));
        if sink.time_out_at == Some(attempt) {
            return Err(ChimeError::hardware(
                "write",
                io::Error::new(io::ErrorKind::TimedOut, "write landed after the timeout"),
            ));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> ChimeError {
    ChimeError::hardware("write", io::Error::new(io::ErrorKind::InvalidInput, msg))
}

impl PwmCapability for RecordingPwm {
    fn is_exported(&self) -> bool {
        self.lock().exported
    }

    fn export(&mut self) -> Result<()> {
        self.apply(HwWrite::Export)
    }

    fn unexport(&mut self) -> Result<()> {
        self.apply(HwWrite::Unexport)
    }

    fn write_period(&mut self, ns: u64) -> Result<()> {
        self.apply(HwWrite::Period(ns))
    }

    fn write_duty(&mut self, ns: u64) -> Result<()> {
        self.apply(HwWrite::Duty(ns))
    }

    fn write_enable(&mut self, on: bool) -> Result<()> {
        self.apply(HwWrite::Enable(on))
    }
}

/// Records sleeps into the same event log as the writes it sits beside.
pub struct VirtualDelay {
    pwm: RecordingPwm,
}

impl Delay for VirtualDelay {
    fn delay(&mut self, duration: Duration) {
        self.pwm.lock().events.push(Event::Sleep(duration));
    }
}
