use embedded_hal::spi;
use log::debug;

use super::{Error, Ready, Uninitialized, DW1000};
use crate::ll;

/// Register identification tag of all Decawave devices
pub const RIDTAG: u16 = 0xDECA;

/// Model number of the DW1000
pub const MODEL: u8 = 0x01;

impl<SPI> DW1000<SPI, Uninitialized>
where
    SPI: spi::SpiDevice<u8>,
{
    /// Create a new instance of `DW1000`
    ///
    /// Requires the SPI device that is connected to the DW1000.
    pub fn new(spi: SPI) -> Self {
        DW1000 {
            ll: ll::DW1000::new(spi),
            state: Uninitialized,
        }
    }

    /// Initialize the DW1000
    ///
    /// Checks that the device identifies as a DW1000. Fails with
    /// [`Error::InitializationFailed`] otherwise, which usually means the SPI
    /// bus is miswired or the device is still in reset.
    pub fn init(mut self) -> Result<DW1000<SPI, Ready>, Error<SPI>> {
        let dev_id = self.ll.dev_id().read()?;

        if dev_id.ridtag() != RIDTAG || dev_id.model() != MODEL {
            return Err(Error::InitializationFailed);
        }

        debug!(
            "DW1000 found, version {}, revision {}",
            dev_id.ver(),
            dev_id.rev()
        );

        Ok(DW1000 {
            ll: self.ll,
            state: Ready,
        })
    }
}
