//! The radio operations the responder needs
//!
//! [`Transceiver`] is implemented by the DW1000 driver in [`crate::hl`], and
//! can be implemented for any other radio, or a simulation, that can
//! timestamp frames and send them at a given time.

use core::ops::{BitAnd, BitOr, BitOrAssign};

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{
    configs::Config,
    time::{DelayedTime, Instant},
};

/// A set of events, laid out like the DW1000's SYS_STATUS register
#[derive(Clone, Copy, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Status(u64);

impl Status {
    /// Half period delay warning
    pub const HPDWARN: Status = Status(1 << 27);
    /// TX power up time error
    pub const TXPUTE: Status = Status(1 << 34);
    /// Transmit frame sent
    pub const TXFRS: Status = Status(1 << 7);
    /// Receiver PHY header error
    pub const RXPHE: Status = Status(1 << 12);
    /// Receiver FCS good
    pub const RXFCG: Status = Status(1 << 14);
    /// Receiver FCS error
    pub const RXFCE: Status = Status(1 << 15);
    /// Receiver Reed Solomon frame sync loss
    pub const RXRFSL: Status = Status(1 << 16);
    /// Receive frame wait timeout
    pub const RXRFTO: Status = Status(1 << 17);
    /// Leading edge detection processing error
    pub const LDEERR: Status = Status(1 << 18);
    /// Receiver overrun
    pub const RXOVRR: Status = Status(1 << 20);
    /// Preamble detection timeout
    pub const RXPTO: Status = Status(1 << 21);
    /// Receive SFD timeout
    pub const RXSFDTO: Status = Status(1 << 26);
    /// Automatic frame filtering rejection
    pub const AFFREJ: Status = Status(1 << 29);

    /// All receive timeouts
    pub const ALL_RX_TO: Status = Status(Self::RXRFTO.0 | Self::RXPTO.0);
    /// All receive errors
    pub const ALL_RX_ERR: Status = Status(
        Self::RXPHE.0
            | Self::RXFCE.0
            | Self::RXRFSL.0
            | Self::RXSFDTO.0
            | Self::AFFREJ.0
            | Self::LDEERR.0,
    );

    /// Bits a late delayed transmission sets
    pub const TX_LATE: Status = Status(Self::HPDWARN.0 | Self::TXPUTE.0);

    /// No events
    pub const fn empty() -> Self {
        Status(0)
    }

    /// Creates a status from a register value, discarding bits above 40
    pub const fn from_bits(bits: u64) -> Self {
        Status(bits & 0xff_ffff_ffff)
    }

    /// The raw register value
    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Whether any of the events in `other` is set
    pub const fn intersects(&self, other: Status) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether all of the events in `other` are set
    pub const fn contains(&self, other: Status) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no event is set
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Status {
    type Output = Status;

    fn bitor(self, rhs: Status) -> Status {
        Status(self.0 | rhs.0)
    }
}

impl BitOrAssign for Status {
    fn bitor_assign(&mut self, rhs: Status) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Status {
    type Output = Status;

    fn bitand(self, rhs: Status) -> Status {
        Status(self.0 & rhs.0)
    }
}

impl core::fmt::Debug for Status {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Status({:#012x})", self.0)
    }
}

/// How to enable the receiver
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum RxMode {
    /// Start listening right away
    Immediate,
    /// Start listening at the programmed delayed time
    Delayed,
}

/// How to start a transmission
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum TxMode {
    /// Send right away
    Immediate,
    /// Send at the programmed delayed time
    Delayed {
        /// Enable the receiver after the transmission, see
        /// [`Transceiver::set_rx_after_tx_delay`]
        response_expected: bool,
    },
}

/// The outcome of starting a transmission
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum TxStart {
    /// The transmission is under way
    Started,
    /// The delayed time had already passed, nothing was sent
    Late,
}

/// A UWB radio that can timestamp frames and send them at a given time
///
/// All methods return the error type of the underlying transport. Protocol
/// level conditions, like a missed delayed time, are part of the return
/// values instead.
pub trait Transceiver {
    /// The transport error
    type Error;

    /// Applies the PHY configuration, antenna delays and timeouts
    fn configure(&mut self, config: &Config) -> Result<(), Self::Error>;

    /// Enables the receiver
    fn enable_receiver(&mut self, mode: RxMode) -> Result<(), Self::Error>;

    /// Reads the pending events
    fn read_status(&mut self) -> Result<Status, Self::Error>;

    /// Clears the given events
    fn clear_status(&mut self, events: Status) -> Result<(), Self::Error>;

    /// Returns the length of the last received frame, FCS included
    fn read_frame_length(&mut self) -> Result<usize, Self::Error>;

    /// Reads `buffer.len()` bytes of the last received frame, starting at
    /// `offset`
    fn read_frame(&mut self, buffer: &mut [u8], offset: usize) -> Result<(), Self::Error>;

    /// Writes `frame` into the transmit buffer, starting at `offset`
    fn write_frame(&mut self, frame: &[u8], offset: usize) -> Result<(), Self::Error>;

    /// Sets the length of the next frame, FCS included, and its position in
    /// the transmit buffer
    ///
    /// `ranging` marks the frame as a ranging frame in the PHY header.
    fn write_tx_control(
        &mut self,
        len: usize,
        offset: usize,
        ranging: bool,
    ) -> Result<(), Self::Error>;

    /// Starts the transmission of the frame in the transmit buffer
    fn start_transmit(&mut self, mode: TxMode) -> Result<TxStart, Self::Error>;

    /// The time the last frame was sent, TX antenna delay included
    fn tx_timestamp(&mut self) -> Result<Instant, Self::Error>;

    /// The time the last frame was received, RX antenna delay removed
    fn rx_timestamp(&mut self) -> Result<Instant, Self::Error>;

    /// Sets the time for delayed transmission or reception
    fn set_delayed_send_time(&mut self, time: DelayedTime) -> Result<(), Self::Error>;

    /// Sets the delay from the end of a transmission to enabling the
    /// receiver, in UWB microseconds
    fn set_rx_after_tx_delay(&mut self, uus: u32) -> Result<(), Self::Error>;

    /// Sets the receive timeout, in UWB microseconds. 0 disables it.
    fn set_rx_timeout(&mut self, uus: u16) -> Result<(), Self::Error>;

    /// Resets the receiver
    ///
    /// Needed after a receive error so the leading edge detection works on
    /// the next frame.
    fn reset_receiver(&mut self) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_match_register_layout() {
        assert_eq!(Status::ALL_RX_TO.bits(), 0x0022_0000);
        assert_eq!(Status::ALL_RX_ERR.bits(), 0x2405_9000);
        assert_eq!(Status::TX_LATE.bits(), 0x04_0800_0000);
    }

    #[test]
    fn set_operations() {
        let status = Status::RXFCG | Status::TXFRS;

        assert!(status.contains(Status::RXFCG));
        assert!(!status.contains(Status::RXFCG | Status::RXPTO));
        assert!(status.intersects(Status::RXFCG | Status::RXPTO));
        assert!(!status.intersects(Status::ALL_RX_ERR));
        assert_eq!(status & Status::TXFRS, Status::TXFRS);
        assert!(Status::empty().is_empty());
        assert_eq!(Status::from_bits(1 << 40 | 1 << 7), Status::TXFRS);
    }
}
