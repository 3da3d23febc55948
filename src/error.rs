use core::fmt;
use core::fmt::{Display, Formatter};

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::configs::ConfigError;

/// An error that stops the responder
///
/// `E` is the error type of the [`Transceiver`](crate::Transceiver).
/// Everything that can go wrong during an exchange, like timeouts, garbled
/// frames or a missed reply time, is reported through
/// [`Cycle`](crate::responder::Cycle) instead.
pub enum Error<E> {
    /// Error occured while talking to the transceiver
    Driver(E),

    /// The configuration was not valid
    Config(ConfigError),

    /// Frame could not be encoded or decoded
    Frame(byte::Error),
}

impl<E> From<ConfigError> for Error<E> {
    fn from(error: ConfigError) -> Self {
        Error::Config(error)
    }
}

impl<E> From<byte::Error> for Error<E> {
    fn from(error: byte::Error) -> Self {
        Error::Frame(error)
    }
}

impl<E> Display for Error<E>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Config(error) => write!(f, "invalid configuration: {}", error),
            _ => write!(f, "{:?}", self),
        }
    }
}

#[cfg(feature = "std")]
impl<E> std::error::Error for Error<E> where E: fmt::Debug {}

impl<E> fmt::Debug for Error<E>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Driver(error) => write!(f, "Driver({:?})", error),
            Error::Config(error) => write!(f, "Config({:?})", error),
            Error::Frame(error) => write!(f, "Frame({:?})", error),
        }
    }
}

#[cfg(feature = "defmt")]
impl<E> Format for Error<E>
where
    E: Format,
{
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Driver(error) => defmt::write!(f, "Driver({:?})", error),
            Error::Config(error) => defmt::write!(f, "Config({:?})", error),
            Error::Frame(error) => defmt::write!(f, "Frame({:?})", defmt::Debug2Format(error)),
        }
    }
}
