use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChimeError {
    /// A frequency or duty proportion outside the range the channel accepts.
    /// Raised before anything is written to the hardware.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Export, unexport or an attribute write failed or timed out.
    #[error("PWM hardware unavailable ({op}): {source}")]
    HardwareUnavailable {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("unknown tune {0:?}")]
    UnknownTune(String),
}

impl ChimeError {
    pub fn hardware(op: &'static str, source: io::Error) -> Self {
        ChimeError::HardwareUnavailable { op, source }
    }

    pub fn is_hardware(&self) -> bool {
        matches!(self, ChimeError::HardwareUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, ChimeError>;
