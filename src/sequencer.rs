use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::error::Result;
use crate::pwm::{PwmCapability, PwmChannel};
use crate::tune::{self, Step, Tune, TuneId};

/// Number of frequency writes in a slide.
pub const SLIDE_STEPS: u32 = 1000;

/// Duty proportion while a note sounds.
const SOUNDING: f64 = 0.5;
const SILENT: f64 = 0.0;

/// Blocks the calling thread for a while.
pub trait Delay: Send {
    fn delay(&mut self, duration: Duration);
}

pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay(&mut self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

/// Something that can play a tune to completion.
pub trait Player {
    fn play(&mut self, tune: TuneId) -> Result<()>;
}

/// Renders tunes onto a PWM channel in real time. Owns the channel, so
/// nothing else can write to it while a tune is playing.
pub struct ToneSequencer<P: PwmCapability, D: Delay = ThreadDelay> {
    channel: PwmChannel<P>,
    delay: D,
}

impl<P: PwmCapability, D: Delay> ToneSequencer<P, D> {
    pub fn new(channel: PwmChannel<P>, delay: D) -> Self {
        ToneSequencer { channel, delay }
    }

    pub fn into_channel(self) -> PwmChannel<P> {
        self.channel
    }

    #[cfg(test)]
    pub fn channel(&self) -> &PwmChannel<P> {
        &self.channel
    }

    /// Play `tune`, blocking for its whole duration. On any failure the
    /// output is forced off before the error is returned.
    pub fn render(&mut self, tune: &Tune) -> Result<()> {
        let played = self
            .channel
            .enable(true)
            .and_then(|()| tune.steps.iter().try_for_each(|step| self.step(step)));

        match played {
            Ok(()) => self.channel.enable(false),
            Err(e) => {
                if let Err(disable) = self.channel.enable(false) {
                    error!("Failed to silence output after aborted tune: {disable}");
                }
                Err(e)
            }
        }
    }

    fn step(&mut self, step: &Step) -> Result<()> {
        match *step {
            Step::Note {
                hz,
                duration,
                proportion,
            } => self.note(hz, duration, proportion),
            Step::Slide {
                from_hz,
                to_hz,
                duration,
            } => self.slide(from_hz, to_hz, duration),
            Step::Rest(duration) => {
                self.delay.delay(duration);
                Ok(())
            }
        }
    }

    fn note(&mut self, hz: f64, duration: Duration, proportion: f64) -> Result<()> {
        let sounding = duration.mul_f64(proportion);
        self.channel.set_frequency(hz)?;
        self.channel.set_duty_cycle(SOUNDING)?;
        self.delay.delay(sounding);
        self.channel.set_duty_cycle(SILENT)?;
        self.delay.delay(duration.saturating_sub(sounding));
        Ok(())
    }

    fn slide(&mut self, from_hz: f64, to_hz: f64, duration: Duration) -> Result<()> {
        let pause = duration / (SLIDE_STEPS + 1);
        self.channel.set_duty_cycle(SOUNDING)?;
        for i in 0..SLIDE_STEPS {
            let progress = f64::from(i) / f64::from(SLIDE_STEPS);
            self.channel.set_frequency(from_hz + (to_hz - from_hz) * progress)?;
            self.delay.delay(pause);
        }
        self.channel.set_duty_cycle(SILENT)
    }
}

impl<P: PwmCapability, D: Delay> Player for ToneSequencer<P, D> {
    fn play(&mut self, id: TuneId) -> Result<()> {
        let tune = tune::library(id);
        info!(
            tune = %id,
            nominal_ms = tune.duration().as_millis() as u64,
            "Playing {} tune",
            tune.name
        );
        let started = Instant::now();
        self.render(tune)?;
        info!(
            tune = %id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Finished {} tune",
            tune.name
        );
        Ok(())
    }
}
