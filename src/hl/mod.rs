//! High-level interface to the DW1000
//!
//! The entry point to this API is the [DW1000] struct. Please refer to the
//! documentation there for more details.
//!
//! This module implements a high-level interface to the DW1000. This is the
//! recommended way to access the DW1000 using this crate, unless you need the
//! greater flexibility provided by the [register-level interface].
//!
//! [register-level interface]: ../ll/index.html

use core::fmt;

pub use error::*;
#[allow(unused_imports)]
pub use ready::*;
#[allow(unused_imports)]
pub use uninitialized::*;

use crate::ll;

mod error;
mod ready;
mod uninitialized;

/// Entry point to the DW1000 driver API
///
/// The driver starts out [`Uninitialized`]. [`DW1000::init`] checks that a
/// DW1000 is connected and returns the driver in the [`Ready`] state, which
/// implements [`Transceiver`](crate::Transceiver).
pub struct DW1000<SPI, State> {
    ll: ll::DW1000<SPI>,
    state: State,
}

// Can't be derived without putting requirements on `SPI`.
impl<SPI, State> fmt::Debug for DW1000<SPI, State>
where
    State: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DW1000 {{ state: ")?;
        self.state.fmt(f)?;
        write!(f, ", .. }}")?;

        Ok(())
    }
}

impl<SPI, State> DW1000<SPI, State> {
    /// Provides direct access to the register-level API
    ///
    /// Be aware that by using the register-level API, you can invalidate
    /// various assumptions that the high-level API makes about the operation
    /// of the DW1000. Don't use the register-level and high-level APIs in
    /// tandem, unless you know what you're doing.
    pub fn ll(&mut self) -> &mut ll::DW1000<SPI> {
        &mut self.ll
    }

    /// Gives back the SPI device
    pub fn release(self) -> SPI {
        self.ll.release()
    }
}

/// Indicates that the `DW1000` instance is not initialized yet
#[derive(Debug)]
pub struct Uninitialized;

/// Indicates that the `DW1000` instance is ready to be used
#[derive(Debug)]
pub struct Ready;
