//! Pending tune triggers.
//!
//! The command loop inserts entries and the tick thread drains the ones that
//! are due. Both go through one mutex; the due entries are taken out under
//! the lock and played after it is released, so an insert never waits on a
//! tune that is still sounding.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{error, info, warn};

use crate::sequencer::Player;
use crate::tune::TuneId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub at: DateTime<Utc>,
    pub tune: TuneId,
}

pub struct Scheduler {
    pending: Mutex<Vec<ScheduleEntry>>,
    /// Entries that start playing more than this after their trigger time
    /// are reported as late.
    late_after: TimeDelta,
}

impl Scheduler {
    /// A scheduler polled once a second.
    #[cfg(test)]
    pub fn new() -> Self {
        Self::with_tick(std::time::Duration::from_secs(1))
    }

    pub fn with_tick(tick: std::time::Duration) -> Self {
        Scheduler {
            pending: Mutex::new(Vec::new()),
            late_after: TimeDelta::from_std(tick).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn insert(&self, at: DateTime<Utc>, tune: TuneId) {
        self.lock().push(ScheduleEntry { at, tune });
        info!(tune = %tune, at = %at.to_rfc3339(), "Tune scheduled");
    }

    /// Remove and return every entry due at `now`, in insertion order.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<ScheduleEntry> {
        let mut pending = self.lock();
        if !pending.iter().any(|e| e.at <= now) {
            return Vec::new();
        }
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut *pending)
            .into_iter()
            .partition(|e| e.at <= now);
        *pending = waiting;
        due
    }

    /// Play every entry due at `now`. A tune that fails is logged and the
    /// rest still play. Returns how many entries were fired.
    pub fn poll_and_fire(&self, now: DateTime<Utc>, player: &mut impl Player) -> usize {
        let due = self.take_due(now);
        let pass = Instant::now();
        for entry in &due {
            // Earlier tunes in this pass push the later ones back.
            let spent = TimeDelta::from_std(pass.elapsed()).unwrap_or_else(|_| TimeDelta::zero());
            let starting = now + spent;
            if let Some(late) = self.lateness(entry, starting) {
                info!(tune = %entry.tune, late_ms = late.num_milliseconds(), "Firing late tune");
            }
            match player.play(entry.tune) {
                Ok(()) => {}
                Err(e) if e.is_hardware() => {
                    error!(tune = %entry.tune, "Tune aborted: {e}")
                }
                Err(e) => warn!(tune = %entry.tune, "Tune not played: {e}"),
            }
        }
        due.len()
    }

    /// How far past its trigger time `entry` is at `starting`, if that is
    /// more than one tick.
    fn lateness(&self, entry: &ScheduleEntry, starting: DateTime<Utc>) -> Option<TimeDelta> {
        let late = starting - entry.at;
        (late > self.late_after).then_some(late)
    }

    pub fn pending(&self) -> Vec<ScheduleEntry> {
        self.lock().clone()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    // Entries are plain data, so a panic elsewhere while holding the lock
    // can't leave them half-updated.
    fn lock(&self) -> MutexGuard<'_, Vec<ScheduleEntry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
