//! Hardware PWM channel.
//!
//! The piezo on the shower controller is passive, so it needs a square wave
//! to make any sound: we drive it from a hardware PWM channel at 50% duty and
//! move the period around for different notes. The kernel refuses (or worse,
//! glitches on) any state where the duty cycle is longer than the period, so
//! every change below is ordered to keep `duty <= period` after each
//! individual write.

use tracing::{debug, error, info, warn};

use crate::error::{ChimeError, Result};

pub const MIN_FREQUENCY_HZ: f64 = 1.0;
pub const MAX_FREQUENCY_HZ: f64 = 20_000.0;

/// 100 Hz.
pub const DEFAULT_PERIOD_NS: u64 = 10_000_000;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// The raw operations a PWM output exposes. Every failure is reported as
/// [`ChimeError::HardwareUnavailable`].
pub trait PwmCapability: Send {
    /// Whether the channel is already exported (e.g. left over from a
    /// previous run that was killed).
    fn is_exported(&self) -> bool;
    fn export(&mut self) -> Result<()>;
    fn unexport(&mut self) -> Result<()>;
    fn write_period(&mut self, ns: u64) -> Result<()>;
    fn write_duty(&mut self, ns: u64) -> Result<()>;
    fn write_enable(&mut self, on: bool) -> Result<()>;
}

/// One exclusively owned PWM output.
///
/// `period` and `duty` mirror what has been successfully written to the
/// hardware. A failed write may still land later (a timed-out sysfs write
/// keeps going on the writer thread), so after any failure the mirror is
/// marked stale and the next change rewrites a known state first.
pub struct PwmChannel<P: PwmCapability> {
    hw: P,
    period: u64,
    duty: u64,
    in_sync: bool,
    /// Duty as a fraction of the period, kept separately so repeated
    /// frequency changes don't accumulate rounding drift.
    proportion: f64,
    enabled: bool,
    acquired: bool,
}

impl<P: PwmCapability> PwmChannel<P> {
    pub fn new(hw: P) -> Self {
        PwmChannel {
            hw,
            period: DEFAULT_PERIOD_NS,
            duty: 0,
            in_sync: false,
            proportion: 0.0,
            enabled: false,
            acquired: false,
        }
    }

    /// Export the channel (unless it already is), write the default period
    /// and duty, and turn the output off.
    pub fn setup(&mut self) -> Result<()> {
        if self.hw.is_exported() {
            debug!("PWM channel already exported");
        } else {
            self.hw.export()?;
            info!("PWM channel exported");
        }
        self.acquired = true;

        // Zero duty first: whatever state the channel was left in, a zero
        // duty is valid against it, and then any period is valid.
        self.hw.write_duty(0)?;
        self.duty = 0;
        self.proportion = 0.0;
        self.hw.write_period(DEFAULT_PERIOD_NS)?;
        self.period = DEFAULT_PERIOD_NS;
        self.in_sync = true;

        self.enable(false)
    }

    /// Set the duty cycle as a proportion `[0, 1]` of the current period.
    pub fn set_duty_cycle(&mut self, proportion: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&proportion) {
            return Err(ChimeError::InvalidArgument(format!(
                "duty cycle proportion {proportion} out of range"
            )));
        }
        self.resync()?;
        let duty = (self.period as f64 * proportion).round() as u64;
        self.write_duty(duty)?;
        self.proportion = proportion;
        Ok(())
    }

    /// Change the frequency in Hz `[1, 20000]`, keeping the duty proportion.
    pub fn set_frequency(&mut self, hz: f64) -> Result<()> {
        if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&hz) {
            return Err(ChimeError::InvalidArgument(format!(
                "frequency {hz} Hz out of range"
            )));
        }
        self.resync()?;
        let period = (NANOS_PER_SEC / hz).round() as u64;
        let duty = ((period as f64 * self.proportion).round() as u64).min(period);

        if period < self.duty {
            // Shrinking below the current duty: duty has to come down first.
            self.write_duty(duty)?;
            self.write_period(period)
        } else {
            self.write_period(period)?;
            self.write_duty(duty)
        }
    }

    pub fn enable(&mut self, on: bool) -> Result<()> {
        self.hw.write_enable(on)?;
        self.enabled = on;
        Ok(())
    }

    /// After a failed write, put the hardware back into a state we know:
    /// zero duty is valid against any period, then the cached period.
    fn resync(&mut self) -> Result<()> {
        if self.in_sync {
            return Ok(());
        }
        warn!("Resynchronising PWM channel after a failed write");
        self.write_duty(0)?;
        self.write_period(self.period)?;
        self.in_sync = true;
        Ok(())
    }

    fn write_duty(&mut self, ns: u64) -> Result<()> {
        let written = self.hw.write_duty(ns);
        self.track(written)?;
        self.duty = ns;
        Ok(())
    }

    fn write_period(&mut self, ns: u64) -> Result<()> {
        let written = self.hw.write_period(ns);
        self.track(written)?;
        self.period = ns;
        Ok(())
    }

    fn track(&mut self, written: Result<()>) -> Result<()> {
        if written.is_err() {
            self.in_sync = false;
        }
        written
    }

    /// Turn the output off and unexport the channel. Both steps are always
    /// attempted; the first failure is returned. A no-op once released.
    pub fn cleanup(&mut self) -> Result<()> {
        if !self.acquired {
            return Ok(());
        }
        self.acquired = false;

        let disabled = self.hw.write_enable(false);
        if disabled.is_ok() {
            self.enabled = false;
        }
        let released = self.hw.unexport();
        info!("PWM channel released");
        disabled.and(released)
    }
}

#[cfg(test)]
impl<P: PwmCapability> PwmChannel<P> {
    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn duty(&self) -> u64 {
        self.duty
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }
}

impl<P: PwmCapability> Drop for PwmChannel<P> {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            error!("Failed to release PWM channel: {e}");
        }
    }
}
