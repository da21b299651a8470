//! The fixed tune library.
//!
//! Tunes are static data: a name and an ordered list of steps. Nothing here
//! touches the hardware; see `sequencer` for playback.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ChimeError;

/// Identifies one of the pre-defined tunes. The numbers are the tokens the
/// controller writes to the command pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TuneId {
    Start,
    Warm,
    NearlyDone,
    Stop,
}

impl TuneId {
    pub const ALL: [TuneId; 4] = [TuneId::Start, TuneId::Warm, TuneId::NearlyDone, TuneId::Stop];

    pub fn number(self) -> u8 {
        match self {
            TuneId::Start => 1,
            TuneId::Warm => 2,
            TuneId::NearlyDone => 3,
            TuneId::Stop => 4,
        }
    }
}

impl fmt::Display for TuneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TuneId::Start => "start",
            TuneId::Warm => "warm",
            TuneId::NearlyDone => "nearly-done",
            TuneId::Stop => "stop",
        })
    }
}

impl FromStr for TuneId {
    type Err = ChimeError;

    /// Accepts either the tune number or its name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TuneId::ALL
            .into_iter()
            .find(|id| s == id.number().to_string() || s.eq_ignore_ascii_case(&id.to_string()))
            .ok_or_else(|| ChimeError::UnknownTune(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// Sound `hz` for `duration * proportion`, then silence for the rest.
    /// A proportion of 1.0 is legato, 0.5 staccato.
    Note {
        hz: f64,
        duration: Duration,
        proportion: f64,
    },
    /// Sweep linearly from `from_hz` towards `to_hz` over `duration`.
    Slide {
        from_hz: f64,
        to_hz: f64,
        duration: Duration,
    },
    Rest(Duration),
}

impl Step {
    pub fn duration(&self) -> Duration {
        match *self {
            Step::Note { duration, .. } | Step::Slide { duration, .. } | Step::Rest(duration) => {
                duration
            }
        }
    }
}

#[derive(Debug)]
pub struct Tune {
    pub name: &'static str,
    pub steps: &'static [Step],
}

impl Tune {
    /// Nominal length; playback overruns it by write latency.
    pub fn duration(&self) -> Duration {
        self.steps.iter().map(Step::duration).sum()
    }
}

const fn note(hz: f64, millis: u64, proportion: f64) -> Step {
    Step::Note {
        hz,
        duration: Duration::from_millis(millis),
        proportion,
    }
}

const A3: f64 = 220.0;
const A4: f64 = 440.0;

/// Shower started.
static START: Tune = Tune {
    name: "Start",
    steps: &[note(A3, 1000, 0.9), note(A3, 1000, 0.9), note(A4, 1000, 0.9)],
};

/// Water has reached temperature.
static WARM: Tune = Tune {
    name: "Water Warm",
    steps: &[
        note(A4, 250, 0.8),
        note(A4, 250, 0.8),
        Step::Rest(Duration::from_millis(500)),
        note(A4, 250, 0.8),
        note(A4, 250, 0.8),
    ],
};

/// One minute of shower left.
static NEARLY_DONE: Tune = Tune {
    name: "Nearly Done",
    steps: &[
        note(A4, 250, 0.8),
        note(A4, 250, 0.8),
        note(A4, 250, 0.8),
        note(A4, 250, 0.8),
        note(A4, 250, 0.8),
    ],
};

/// Water is being shut off.
static STOP: Tune = Tune {
    name: "Stop",
    steps: &[Step::Slide {
        from_hz: A4,
        to_hz: A3,
        duration: Duration::from_secs(1),
    }],
};

pub fn library(id: TuneId) -> &'static Tune {
    match id {
        TuneId::Start => &START,
        TuneId::Warm => &WARM,
        TuneId::NearlyDone => &NEARLY_DONE,
        TuneId::Stop => &STOP,
    }
}
