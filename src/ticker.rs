//! Background tick thread: polls the scheduler once per interval and plays
//! whatever is due. It owns the sequencer (and so the PWM channel) for its
//! whole life and hands the channel back when joined.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::pwm::{PwmCapability, PwmChannel};
use crate::scheduler::Scheduler;
use crate::sequencer::{Delay, ToneSequencer};

pub struct Ticker<P: PwmCapability> {
    handle: JoinHandle<PwmChannel<P>>,
    stop: Arc<AtomicBool>,
}

pub fn spawn<P, D>(
    sequencer: ToneSequencer<P, D>,
    scheduler: Arc<Scheduler>,
    stop: Arc<AtomicBool>,
    interval: Duration,
) -> io::Result<Ticker<P>>
where
    P: PwmCapability + 'static,
    D: Delay + 'static,
{
    let flag = stop.clone();
    let handle = thread::Builder::new()
        .name("tick".into())
        .spawn(move || run(sequencer, &scheduler, &flag, interval))?;
    Ok(Ticker { handle, stop })
}

fn run<P: PwmCapability, D: Delay>(
    mut sequencer: ToneSequencer<P, D>,
    scheduler: &Scheduler,
    stop: &AtomicBool,
    interval: Duration,
) -> PwmChannel<P> {
    info!(interval_ms = interval.as_millis() as u64, "Tick thread started");
    while !stop.load(Ordering::Acquire) {
        let fired = scheduler.poll_and_fire(Utc::now(), &mut sequencer);
        if fired > 0 {
            debug!(fired, "Tick fired tunes");
        }
        // A tune may have played for seconds; don't sleep again if we were
        // asked to stop meanwhile.
        if stop.load(Ordering::Acquire) {
            break;
        }
        thread::park_timeout(interval);
    }
    info!("Tick thread stopped");
    sequencer.into_channel()
}

impl<P: PwmCapability> Ticker<P> {
    /// Raise the stop flag, wake the thread and wait for it. Any tune in
    /// progress finishes first. `None` if the thread panicked, in which case
    /// the channel was already released while unwinding.
    pub fn shutdown(self) -> Option<PwmChannel<P>> {
        self.stop.store(true, Ordering::Release);
        self.handle.thread().unpark();
        match self.handle.join() {
            Ok(channel) => Some(channel),
            Err(_) => {
                error!("Tick thread panicked");
                None
            }
        }
    }

    /// [`shutdown`](Self::shutdown) from async code: the join waits on the
    /// blocking pool, so the runtime keeps serving other tasks while a tune
    /// finishes.
    pub async fn shutdown_async(self) -> Option<PwmChannel<P>>
    where
        P: 'static,
    {
        match tokio::task::spawn_blocking(move || self.shutdown()).await {
            Ok(channel) => channel,
            Err(e) => {
                error!("Tick thread shutdown task failed: {e}");
                None
            }
        }
    }
}
