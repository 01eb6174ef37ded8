//! Crate-wide error type for the composite operations (gather, engine,
//! harness), aggregating the per-module error enums.

use core::fmt;

use crate::comm::CommError;
use crate::fft::FftError;
use crate::split::SplitError;
use crate::wisdom::WisdomError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Fft(FftError),
    Split(SplitError),
    Comm(CommError),
    Wisdom(WisdomError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Fft(e) => write!(f, "transform error: {e}"),
            Error::Split(e) => write!(f, "decomposition error: {e}"),
            Error::Comm(e) => write!(f, "communication error: {e}"),
            Error::Wisdom(e) => write!(f, "wisdom error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Fft(e) => Some(e),
            Error::Split(e) => Some(e),
            Error::Comm(e) => Some(e),
            Error::Wisdom(e) => Some(e),
        }
    }
}

impl From<FftError> for Error {
    fn from(e: FftError) -> Self {
        Error::Fft(e)
    }
}

impl From<SplitError> for Error {
    fn from(e: SplitError) -> Self {
        Error::Split(e)
    }
}

impl From<CommError> for Error {
    fn from(e: CommError) -> Self {
        Error::Comm(e)
    }
}

impl From<WisdomError> for Error {
    fn from(e: WisdomError) -> Self {
        Error::Wisdom(e)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
