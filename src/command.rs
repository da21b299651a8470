//! Command handling.
//!
//! The controller talks to us with tiny text tokens, one per line:
//!
//! | token          | effect                                                  |
//! |----------------|---------------------------------------------------------|
//! | `1`            | shower started: Start now, Nearly Done at +3 min, Stop at +4 min |
//! | `2`            | water is warm: Warm now                                 |
//! | `play <tune>`  | one tune now, by number (`1`-`4`) or name               |
//! | `q`            | shut the service down                                   |
//!
//! Commands only ever schedule; the tick thread does all playback.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ChimeError, Result};
use crate::scheduler::Scheduler;
use crate::tune::TuneId;

pub const QUIT: &str = "q";

const NEARLY_DONE_AFTER_SECS: i64 = 3 * 60;
const STOP_AFTER_SECS: i64 = 4 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartShower,
    WaterWarm,
    Play(TuneId),
    Quit,
}

impl Command {
    /// Parse one trimmed, non-empty line.
    pub fn parse(line: &str) -> Result<Command> {
        match line {
            "1" => Ok(Command::StartShower),
            "2" => Ok(Command::WaterWarm),
            QUIT | "Q" => Ok(Command::Quit),
            _ => match line.split_once(char::is_whitespace) {
                Some(("play", tune)) => Ok(Command::Play(tune.trim().parse()?)),
                _ => Err(ChimeError::InvalidArgument(format!(
                    "unrecognised command {line:?}"
                ))),
            },
        }
    }
}

pub struct CommandLoop {
    scheduler: Arc<Scheduler>,
    stop: Arc<AtomicBool>,
}

impl CommandLoop {
    pub fn new(scheduler: Arc<Scheduler>, stop: Arc<AtomicBool>) -> Self {
        CommandLoop { scheduler, stop }
    }

    /// Handle lines until quit is requested, the stop flag is raised, or
    /// every sender has gone away.
    pub async fn run(&self, inputs: &mut mpsc::Receiver<String>) {
        while !self.stop.load(Ordering::Acquire) {
            let Some(line) = inputs.recv().await else {
                info!("Command channel closed");
                break;
            };
            if self.handle(&line, Utc::now()).is_break() {
                info!("Quit requested");
                break;
            }
        }
    }

    pub fn handle(&self, line: &str, now: DateTime<Utc>) -> ControlFlow<()> {
        let line = line.trim();
        if line.is_empty() {
            return ControlFlow::Continue(());
        }

        match Command::parse(line) {
            Ok(command) => {
                info!(?command, "Command received");
                self.dispatch(command, now)
            }
            Err(e) => {
                warn!("Ignoring command: {e}");
                ControlFlow::Continue(())
            }
        }
    }

    fn dispatch(&self, command: Command, now: DateTime<Utc>) -> ControlFlow<()> {
        match command {
            Command::StartShower => {
                self.scheduler.insert(now, TuneId::Start);
                self.scheduler
                    .insert(now + Duration::seconds(NEARLY_DONE_AFTER_SECS), TuneId::NearlyDone);
                self.scheduler
                    .insert(now + Duration::seconds(STOP_AFTER_SECS), TuneId::Stop);
            }
            Command::WaterWarm => self.scheduler.insert(now, TuneId::Warm),
            Command::Play(tune) => self.scheduler.insert(now, tune),
            Command::Quit => return ControlFlow::Break(()),
        }
        debug!(pending = self.scheduler.pending_count(), "Schedule updated");
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_loop() -> (CommandLoop, Arc<Scheduler>) {
        let scheduler = Arc::new(Scheduler::new());
        let commands = CommandLoop::new(scheduler.clone(), Arc::new(AtomicBool::new(false)));
        (commands, scheduler)
    }

    fn schedule(scheduler: &Scheduler) -> Vec<(i64, TuneId)> {
        scheduler
            .pending()
            .into_iter()
            .map(|e| (e.at.timestamp(), e.tune))
            .collect()
    }

    #[test]
    fn parses_the_command_vocabulary() {
        assert_eq!(Command::parse("1").unwrap(), Command::StartShower);
        assert_eq!(Command::parse("2").unwrap(), Command::WaterWarm);
        assert_eq!(Command::parse("q").unwrap(), Command::Quit);
        assert_eq!(Command::parse("play 4").unwrap(), Command::Play(TuneId::Stop));
        assert_eq!(
            Command::parse("play  warm").unwrap(),
            Command::Play(TuneId::Warm)
        );
    }

    #[test]
    fn play_with_unknown_tune_is_unknown_tune() {
        let err = Command::parse("play 9").unwrap_err();
        assert!(matches!(err, ChimeError::UnknownTune(_)), "{err}");
    }

    #[test]
    fn start_shower_schedules_three_tunes() {
        let (commands, scheduler) = command_loop();
        let now = Utc::now();
        assert!(commands.handle("1\n", now).is_continue());

        let t = now.timestamp();
        assert_eq!(
            schedule(&scheduler),
            vec![
                (t, TuneId::Start),
                (t + 180, TuneId::NearlyDone),
                (t + 240, TuneId::Stop),
            ]
        );
    }

    #[test]
    fn water_warm_schedules_warm_now() {
        let (commands, scheduler) = command_loop();
        let now = Utc::now();
        assert!(commands.handle(" 2 ", now).is_continue());
        assert_eq!(schedule(&scheduler), vec![(now.timestamp(), TuneId::Warm)]);
    }

    #[test]
    fn empty_and_unrecognised_input_is_ignored() {
        let (commands, scheduler) = command_loop();
        let now = Utc::now();
        for line in ["", "   ", "\n", "3", "start shower", "play", "play fanfare"] {
            assert!(commands.handle(line, now).is_continue(), "{line:?}");
        }
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn quit_breaks_without_scheduling() {
        let (commands, scheduler) = command_loop();
        assert!(commands.handle("q", Utc::now()).is_break());
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test]
    async fn run_stops_at_quit_and_leaves_later_input_unread() {
        let (commands, scheduler) = command_loop();
        let (tx, mut rx) = mpsc::channel(8);
        for line in ["2", "", "bogus", QUIT, "1"] {
            tx.send(line.to_string()).await.unwrap();
        }

        commands.run(&mut rx).await;

        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(rx.recv().await.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn run_ends_when_all_senders_are_gone() {
        let (commands, scheduler) = command_loop();
        let (tx, mut rx) = mpsc::channel(8);
        tx.send("1".to_string()).await.unwrap();
        drop(tx);

        commands.run(&mut rx).await;
        assert_eq!(scheduler.pending_count(), 3);
    }

    #[tokio::test]
    async fn run_returns_immediately_once_stop_is_raised() {
        let scheduler = Arc::new(Scheduler::new());
        let commands = CommandLoop::new(scheduler.clone(), Arc::new(AtomicBool::new(true)));
        let (tx, mut rx) = mpsc::channel(8);
        tx.send("2".to_string()).await.unwrap();

        commands.run(&mut rx).await;
        assert_eq!(scheduler.pending_count(), 0);
    }
}
