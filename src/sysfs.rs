//! Linux sysfs PWM backend (`/sys/class/pwm/pwmchipN`).
//!
//! Needs `dtoverlay=pwm` in `/boot/config.txt` on a Raspberry Pi. Members of
//! the `gpio` group can export a channel, but only root may change its
//! period and duty cycle.
//!
//! Attribute writes go through a dedicated writer thread so each one can be
//! bounded by a timeout: a wedged driver shows up as `HardwareUnavailable`
//! instead of hanging the tick thread forever.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{ChimeError, Result};
use crate::pwm::PwmCapability;

/// How often to look for the channel directory after exporting.
const EXPORT_POLL: Duration = Duration::from_millis(10);

struct WriteJob {
    path: PathBuf,
    value: String,
    done: mpsc::SyncSender<io::Result<()>>,
}

pub struct SysfsPwm {
    chip: PathBuf,
    channel: u32,
    timeout: Duration,
    jobs: mpsc::Sender<WriteJob>,
}

impl SysfsPwm {
    pub fn new(chip: impl Into<PathBuf>, channel: u32, timeout: Duration) -> io::Result<Self> {
        let (jobs, queue) = mpsc::channel::<WriteJob>();
        // Exits once the SysfsPwm (the only sender) is dropped.
        thread::Builder::new()
            .name("pwm-writer".into())
            .spawn(move || {
                for job in queue {
                    let result = fs::write(&job.path, job.value.as_bytes());
                    // The caller may have given up waiting.
                    let _ = job.done.send(result);
                }
            })?;

        Ok(SysfsPwm {
            chip: chip.into(),
            channel,
            timeout,
            jobs,
        })
    }

    fn channel_dir(&self) -> PathBuf {
        self.chip.join(format!("pwm{}", self.channel))
    }

    fn write(&self, op: &'static str, path: &Path, value: String) -> Result<()> {
        let (done, result) = mpsc::sync_channel(1);
        let job = WriteJob {
            path: path.to_path_buf(),
            value,
            done,
        };
        self.jobs.send(job).map_err(|_| {
            ChimeError::hardware(
                op,
                io::Error::new(io::ErrorKind::BrokenPipe, "PWM writer thread has exited"),
            )
        })?;

        match result.recv_timeout(self.timeout) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ChimeError::hardware(op, e)),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(path = %path.display(), "PWM write timed out");
                Err(ChimeError::hardware(
                    op,
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("write to {} took longer than {:?}", path.display(), self.timeout),
                    ),
                ))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ChimeError::hardware(
                op,
                io::Error::new(io::ErrorKind::BrokenPipe, "PWM writer thread has exited"),
            )),
        }
    }

    fn write_attribute(&self, op: &'static str, attribute: &str, value: String) -> Result<()> {
        self.write(op, &self.channel_dir().join(attribute), value)
    }

    /// udev needs a moment to create (and chown) the channel directory.
    fn wait_for_channel_dir(&self) -> Result<()> {
        let dir = self.channel_dir();
        let deadline = Instant::now() + self.timeout;
        while !dir.is_dir() {
            if Instant::now() >= deadline {
                return Err(ChimeError::hardware(
                    "export",
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("{} did not appear after export", dir.display()),
                    ),
                ));
            }
            thread::sleep(EXPORT_POLL);
        }
        Ok(())
    }
}

impl PwmCapability for SysfsPwm {
    fn is_exported(&self) -> bool {
        self.channel_dir().is_dir()
    }

    fn export(&mut self) -> Result<()> {
        debug!(chip = %self.chip.display(), channel = self.channel, "Exporting PWM channel");
        self.write("export", &self.chip.join("export"), self.channel.to_string())?;
        self.wait_for_channel_dir()
    }

    fn unexport(&mut self) -> Result<()> {
        debug!(chip = %self.chip.display(), channel = self.channel, "Unexporting PWM channel");
        self.write("unexport", &self.chip.join("unexport"), self.channel.to_string())
    }

    fn write_period(&mut self, ns: u64) -> Result<()> {
        self.write_attribute("period", "period", ns.to_string())
    }

    fn write_duty(&mut self, ns: u64) -> Result<()> {
        self.write_attribute("duty_cycle", "duty_cycle", ns.to_string())
    }

    fn write_enable(&mut self, on: bool) -> Result<()> {
        self.write_attribute("enable", "enable", if on { "1" } else { "0" }.to_string())
    }
}
