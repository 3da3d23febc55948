//! Low-level interface to the DW1000
//!
//! This module implements a register-level interface to the DW1000. Users of
//! this library should typically not need to use this. Please consider using
//! the [high-level interface] instead.
//!
//! Only the registers the ranging responder needs are covered.
//!
//! **NOTE**: Many field access methods accept types that have a larger number
//! of bits than the field actually consists of. If you use such a method to
//! pass a value that is too large to be written to the field, it will be
//! silently truncated.
//!
//! [high-level interface]: ../hl/index.html

use core::{fmt, marker::PhantomData};

use embedded_hal::spi::{self, Operation};

/// Entry point to the DW1000 driver's low-level API
///
/// Please consider using [hl::DW1000] instead.
///
/// [hl::DW1000]: ../hl/struct.DW1000.html
pub struct DW1000<SPI> {
    spi: SPI,
}

impl<SPI> DW1000<SPI> {
    /// Create a new instance of `DW1000`
    ///
    /// Requires the SPI device that is connected to the DW1000. Chip select
    /// is handled by the `SpiDevice` implementation.
    pub fn new(spi: SPI) -> Self {
        DW1000 { spi }
    }

    /// Allow access to the SPI bus
    pub fn bus(&mut self) -> &mut SPI {
        &mut self.spi
    }

    /// Gives back the SPI device
    pub fn release(self) -> SPI {
        self.spi
    }
}

impl<SPI> DW1000<SPI>
where
    SPI: spi::SpiDevice<u8>,
{
    /// Writes `data` into the transmit buffer, starting at `offset`
    pub fn write_tx_buffer(&mut self, offset: u16, data: &[u8]) -> Result<(), Error<SPI>> {
        let mut header = [0; 3];
        let header_len = init_header(true, TX_BUFFER_ID, offset, &mut header);

        self.spi
            .transaction(&mut [
                Operation::Write(&header[..header_len]),
                Operation::Write(data),
            ])
            .map_err(Error)
    }

    /// Reads `buffer.len()` bytes from the receive buffer, starting at
    /// `offset`
    pub fn read_rx_buffer(&mut self, offset: u16, buffer: &mut [u8]) -> Result<(), Error<SPI>> {
        let mut header = [0; 3];
        let header_len = init_header(false, RX_BUFFER_ID, offset, &mut header);

        self.spi
            .transaction(&mut [
                Operation::Write(&header[..header_len]),
                Operation::Read(buffer),
            ])
            .map_err(Error)
    }
}

/// Register file of the transmit buffer
pub const TX_BUFFER_ID: u8 = 0x09;

/// Register file of the receive buffer
pub const RX_BUFFER_ID: u8 = 0x11;

/// Length of the transmit and receive buffers
pub const BUFFER_LEN: usize = 1024;

/// Provides access to a register
///
/// You can get an instance for a given register using one of the methods on
/// [`DW1000`].
pub struct RegAccessor<'s, R, SPI>(&'s mut DW1000<SPI>, PhantomData<R>);

impl<'s, R, SPI> RegAccessor<'s, R, SPI>
where
    SPI: spi::SpiDevice<u8>,
{
    /// Read from the register
    #[inline]
    pub fn read(&mut self) -> Result<R::Read, Error<SPI>>
    where
        R: Register + Readable,
    {
        let mut header = [0; 3];
        let header_len = init_header(false, R::ID, R::SUB_ID, &mut header);

        let mut r = R::read();
        self.0
            .spi
            .transaction(&mut [
                Operation::Write(&header[..header_len]),
                Operation::Read(R::buffer(&mut r)),
            ])
            .map_err(Error)?;

        Ok(r)
    }

    /// Write to the register
    #[inline]
    pub fn write<F>(&mut self, f: F) -> Result<(), Error<SPI>>
    where
        R: Register + Writable,
        F: FnOnce(&mut R::Write) -> &mut R::Write,
    {
        let mut w = R::write();
        f(&mut w);

        self.write_buffer(R::buffer(&mut w))
    }

    /// Modify the register
    #[inline]
    pub fn modify<F>(&mut self, f: F) -> Result<(), Error<SPI>>
    where
        R: Register + Readable + Writable,
        F: for<'r> FnOnce(&mut R::Read, &'r mut R::Write) -> &'r mut R::Write,
    {
        let mut r = self.read()?;
        let mut w = R::write();

        <R as Writable>::buffer(&mut w).copy_from_slice(<R as Readable>::buffer(&mut r));

        f(&mut r, &mut w);

        self.write_buffer(<R as Writable>::buffer(&mut w))
    }

    fn write_buffer(&mut self, data: &[u8]) -> Result<(), Error<SPI>>
    where
        R: Register,
    {
        let mut header = [0; 3];
        let header_len = init_header(true, R::ID, R::SUB_ID, &mut header);

        self.0
            .spi
            .transaction(&mut [
                Operation::Write(&header[..header_len]),
                Operation::Write(data),
            ])
            .map_err(Error)
    }
}

/// An SPI error that can occur when communicating with the DW1000
pub struct Error<SPI>(pub SPI::Error)
where
    SPI: spi::ErrorType;

// We can't derive this implementation, as the compiler will complain that the
// associated error type doesn't implement `Debug`.
impl<SPI> fmt::Debug for Error<SPI>
where
    SPI: spi::ErrorType,
    SPI::Error: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error({:?})", self.0)
    }
}

#[cfg(feature = "defmt")]
impl<SPI> defmt::Format for Error<SPI>
where
    SPI: spi::ErrorType,
{
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Error({:?})", defmt::Debug2Format(&spi::Error::kind(&self.0)))
    }
}

/// Initializes the SPI message header
///
/// Writes the header for accessing `sub_id` within register file `id` into
/// `buffer` and returns its length. A sub-index of zero needs no sub-index
/// bytes, sub-indices up to 127 need one, larger ones two (user manual,
/// section 2.2.1.2).
#[inline(always)]
fn init_header(write: bool, id: u8, sub_id: u16, buffer: &mut [u8; 3]) -> usize {
    let sub_index = sub_id > 0;
    let extended = sub_id > 127;

    buffer[0] = (((write as u8) << 7) & 0x80) | (((sub_index as u8) << 6) & 0x40) | (id & 0x3f);

    if !sub_index {
        return 1;
    }

    buffer[1] = (((extended as u8) << 7) & 0x80) | (sub_id as u8 & 0x7f);

    if !extended {
        return 2;
    }

    buffer[2] = (sub_id >> 7) as u8;

    3
}

/// Implemented for all registers
///
/// This is a mostly internal crate that should not be implemented or used
/// directly by users of this crate. It is exposed through the public API
/// though, so it can't be made private.
///
/// The DW1000 user manual, section 7.1, specifies what the values of the
/// constant should be for each register.
pub trait Register {
    /// The register index
    const ID: u8;

    /// The registers's sub-index
    const SUB_ID: u16;
}

/// Marker trait for registers that can be read from
///
/// This is a mostly internal crate that should not be implemented or used
/// directly by users of this crate. It is exposed through the public API
/// though, so it can't be made private.
pub trait Readable {
    /// The type that is used to read from the register
    type Read;

    /// Return the read type for this register
    fn read() -> Self::Read;

    /// Return the read type's internal buffer
    fn buffer(r: &mut Self::Read) -> &mut [u8];
}

/// Marker trait for registers that can be written to
///
/// This is a mostly internal crate that should not be implemented or used
/// directly by users of this crate. It is exposed through the public API
/// though, so it can't be made private.
pub trait Writable {
    /// The type that is used to write to the register
    type Write;

    /// Return the write type for this register
    fn write() -> Self::Write;

    /// Return the write type's internal buffer
    fn buffer(w: &mut Self::Write) -> &mut [u8];
}

/// Extracts bits `first..=last` of a little-endian register value
#[inline(always)]
fn get_bits(bytes: &[u8], first: usize, last: usize) -> u64 {
    let mut value = [0; 8];
    let len = bytes.len().min(8);
    value[..len].copy_from_slice(&bytes[..len]);

    (u64::from_le_bytes(value) >> first) & mask(first, last)
}

/// Replaces bits `first..=last` of a little-endian register value
#[inline(always)]
fn set_bits(bytes: &mut [u8], first: usize, last: usize, value: u64) {
    let mut register = [0; 8];
    let len = bytes.len().min(8);
    register[..len].copy_from_slice(&bytes[..len]);

    let mask = mask(first, last);
    let register = (u64::from_le_bytes(register) & !(mask << first)) | ((value & mask) << first);

    bytes[..len].copy_from_slice(&register.to_le_bytes()[..len]);
}

#[inline(always)]
fn mask(first: usize, last: usize) -> u64 {
    let width = last - first + 1;
    if width >= 64 {
        u64::MAX
    } else {
        (1 << width) - 1
    }
}

/// Generates register implementations
macro_rules! impl_register {
    (
        $(
            $id:expr,
            $sub_id:expr,
            $len:expr,
            $rw:tt,
            $name:ident($name_lower:ident) {
            #[$doc:meta]
            $(
                $field:ident,
                $first_bit:expr,
                $last_bit:expr,
                $ty:ty;
                #[$field_doc:meta]
            )*
            }
        )*
    ) => {
        $(
            #[$doc]
            #[allow(non_camel_case_types)]
            pub struct $name;

            impl Register for $name {
                const ID:     u8    = $id;
                const SUB_ID: u16   = $sub_id;
            }

            #[$doc]
            pub mod $name_lower {
                use core::fmt;

                /// Used to read from the register
                pub struct R(pub(crate) [u8; $len]);

                impl R {
                    $(
                        #[$field_doc]
                        #[inline(always)]
                        pub fn $field(&self) -> $ty {
                            crate::ll::get_bits(&self.0, $first_bit, $last_bit) as $ty
                        }
                    )*
                }

                impl fmt::Debug for R {
                    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                        write!(f, "0x")?;
                        for i in (0 .. $len).rev() {
                            write!(f, "{:02x}", self.0[i])?;
                        }

                        Ok(())
                    }
                }

                #[cfg(feature = "defmt")]
                impl defmt::Format for R {
                    fn format(&self, f: defmt::Formatter) {
                        defmt::write!(f, "0x");
                        for i in (0 .. $len).rev() {
                            defmt::write!(f, "{:02x}", self.0[i]);
                        }
                    }
                }

                /// Used to write to the register
                pub struct W(pub(crate) [u8; $len]);

                impl W {
                    $(
                        #[$field_doc]
                        #[inline(always)]
                        pub fn $field(&mut self, value: $ty) -> &mut Self {
                            crate::ll::set_bits(&mut self.0, $first_bit, $last_bit, value as u64);
                            self
                        }
                    )*
                }
            }

            impl_rw!($rw, $name, $name_lower, $len);
        )*


        impl<SPI> DW1000<SPI> {
            $(
                #[$doc]
                pub fn $name_lower(&mut self) -> RegAccessor<$name, SPI> {
                    RegAccessor(self, PhantomData)
                }
            )*
        }
    }
}

// Helper macro, used internally by `impl_register!`
macro_rules! impl_rw {
    (RO, $name:ident, $name_lower:ident, $len:expr) => {
        impl_rw!(@R, $name, $name_lower, $len);
    };
    (RW, $name:ident, $name_lower:ident, $len:expr) => {
        impl_rw!(@R, $name, $name_lower, $len);
        impl_rw!(@W, $name, $name_lower, $len);
    };

    (@R, $name:ident, $name_lower:ident, $len:expr) => {
        impl Readable for $name {
            type Read = $name_lower::R;

            fn read() -> Self::Read {
                $name_lower::R([0; $len])
            }

            fn buffer(r: &mut Self::Read) -> &mut [u8] {
                &mut r.0
            }
        }
    };
    (@W, $name:ident, $name_lower:ident, $len:expr) => {
        impl Writable for $name {
            type Write = $name_lower::W;

            fn write() -> Self::Write {
                $name_lower::W([0; $len])
            }

            fn buffer(w: &mut Self::Write) -> &mut [u8] {
                &mut w.0
            }
        }
    };
}

// All registers are implemented in this macro invocation. It follows the
// following syntax:
// <id>, <sub-id>, <size-bytes>, <RO/RW>, <name-upper>(name-lower) { /// <doc>
//     <field>, <first-bit-index>, <last-bit-index>, <type>; /// <doc>
//     ...
// }
//
// Registers that are longer than 8 bytes are only partially covered.
impl_register! {
    0x00, 0x00, 4, RO, DEV_ID(dev_id) { /// Device identifier
        rev,     0,  3, u8;  /// Revision
        ver,     4,  7, u8;  /// Version
        model,   8, 15, u8;  /// Model
        ridtag, 16, 31, u16; /// Register Identification Tag
    }
    0x03, 0x00, 4, RW, PANADR(panadr) { /// PAN Identifier and Short Address
        short_addr,  0, 15, u16; /// Short Address
        pan_id,     16, 31, u16; /// PAN Identifier
    }
    0x04, 0x00, 4, RW, SYS_CFG(sys_cfg) { /// System Configuration
        ffen,      0,  0, u8; /// Frame Filtering Enable
        dis_drxb, 12, 12, u8; /// Disable Double RX Buffer
        phr_mode, 16, 17, u8; /// PHR Mode
        dis_stxp, 18, 18, u8; /// Disable Smart TX Power control
        rxm110k,  22, 22, u8; /// Receiver Mode 110 kbps data rate
        rxwtoe,   28, 28, u8; /// Receive Wait Timeout Enable
        rxautr,   29, 29, u8; /// Receiver Auto-Re-enable
    }
    0x08, 0x00, 5, RW, TX_FCTRL(tx_fctrl) { /// TX Frame Control
        tflen,     0,  6, u8;  /// Transmit Frame Length
        tfle,      7,  9, u8;  /// Transmit Frame Length Extension
        txbr,     13, 14, u8;  /// Transmit Bit Rate
        tr,       15, 15, u8;  /// Transmit Ranging Enable
        txprf,    16, 17, u8;  /// Transmit Pulse Repetition Frequency
        txpsr,    18, 19, u8;  /// Transmit Preamble Symbol Repetitions
        pe,       20, 21, u8;  /// Preamble Extension
        txboffs,  22, 31, u16; /// Transmit buffer index offset
        ifsdelay, 32, 39, u8;  /// Inter-Frame Spacing
    }
    0x0A, 0x01, 4, RW, DX_TIME(dx_time) { /// Delayed Send or Receive Time, bits 8 to 39
        value, 0, 31, u32; /// Delayed Send or Receive Time
    }
    0x0C, 0x00, 2, RW, RX_FWTO(rx_fwto) { /// Receive Frame Wait Timeout Period
        value, 0, 15, u16; /// Receive Frame Wait Timeout Period
    }
    0x0D, 0x00, 4, RW, SYS_CTRL(sys_ctrl) { /// System Control Register
        sfcst,      0,  0, u8; /// Suppress Auto-FCS Transmission
        txstrt,     1,  1, u8; /// Transmit Start
        txdlys,     2,  2, u8; /// Transmitter Delayed Sending
        cansfcs,    3,  3, u8; /// Cancel Auto-FCS Suppression
        trxoff,     6,  6, u8; /// Transceiver Off
        wait4resp,  7,  7, u8; /// Wait for Response
        rxenab,     8,  8, u8; /// Enable Receiver
        rxdlye,     9,  9, u8; /// Receiver Delayed Enable
        hrbpt,     24, 24, u8; /// Host Side Receive Buffer Pointer Toggle
    }
    0x0F, 0x00, 5, RW, SYS_STATUS(sys_status) { /// System Event Status Register
        value,    0, 39, u64; /// All events
        txfrs,    7,  7, u8;  /// Transmit Frame Sent
        rxfcg,   14, 14, u8;  /// Receiver FCS Good
        hpdwarn, 27, 27, u8;  /// Half Period Delay Warning
        txpute,  34, 34, u8;  /// Transmit power up time error
    }
    0x10, 0x00, 4, RO, RX_FINFO(rx_finfo) { /// RX Frame Information
        rxflen,  0,  6, u8;  /// Receive Frame Length
        rxfle,   7,  9, u8;  /// Receive Frame Length Extension
        rxnspl, 11, 12, u8;  /// Receive Non-Standard Preamble Length
        rxbr,   13, 14, u8;  /// Receive Bit Rate Report
        rng,    15, 15, u8;  /// Receiver Ranging
        rxprfr, 16, 17, u8;  /// RX Pulse Repetition Rate Report
        rxpsr,  18, 19, u8;  /// RX Preamble Repetition
        rxpacc, 20, 31, u16; /// Preamble Accumulation Count
    }
    0x15, 0x00, 5, RO, RX_TIME(rx_time) { /// Receive Time Stamp, adjusted
        rx_stamp, 0, 39, u64; /// Fully adjusted time stamp
    }
    0x17, 0x00, 5, RO, TX_TIME(tx_time) { /// Transmit Time Stamp, adjusted
        tx_stamp, 0, 39, u64; /// Fully adjusted time stamp
    }
    0x18, 0x00, 2, RW, TX_ANTD(tx_antd) { /// Transmitter Antenna Delay
        value, 0, 15, u16; /// Transmitter Antenna Delay
    }
    0x1A, 0x00, 4, RW, ACK_RESP_T(ack_resp_t) { /// Acknowledgement Time and Response Time
        w4r_tim,  0, 19, u32; /// Wait-for-Response turn-around Time
        ack_tim, 24, 31, u8;  /// Auto-Acknowledgement turn-around Time
    }
    0x1F, 0x00, 4, RW, CHAN_CTRL(chan_ctrl) { /// Channel Control Register
        tx_chan,   0,  3, u8; /// Selects the transmit channel
        rx_chan,   4,  7, u8; /// Selects the receive channel
        dwsfd,    17, 17, u8; /// Enables the non-standard Decawave SFD
        rxprf,    18, 19, u8; /// Selects the PRF used in the receiver
        tnssfd,   20, 20, u8; /// Use user-specified SFD in TX
        rnssfd,   21, 21, u8; /// Use user-specified SFD in RX
        tx_pcode, 22, 26, u8; /// Selects the preamble code used in TX
        rx_pcode, 27, 31, u8; /// Selects the preamble code used in RX
    }
    0x27, 0x20, 2, RW, DRX_SFDTOC(drx_sfdtoc) { /// SFD Detection Timeout Count
        count, 0, 15, u16; /// SFD detection timeout count
    }
    0x27, 0x24, 2, RW, DRX_PRETOC(drx_pretoc) { /// Preamble Detection Timeout Count
        count, 0, 15, u16; /// Preamble detection timeout, in PAC units
    }
    0x2E, 0x1804, 2, RW, LDE_RXANTD(lde_rxantd) { /// Receiver Antenna Delay
        value, 0, 15, u16; /// Receiver Antenna Delay
    }
    0x36, 0x00, 4, RW, PMSC_CTRL0(pmsc_ctrl0) { /// PMSC Control Register 0
        sysclks,    0,  1, u8; /// System Clock Selection
        rxclks,     2,  3, u8; /// Receiver Clock Selection
        txclks,     4,  5, u8; /// Transmitter Clock Selection
        softreset, 28, 31, u8; /// Soft reset of the selected blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use embedded_hal_mock::eh1::spi::{Mock as SpiMock, Transaction as SpiTransaction};

    #[test]
    fn header_without_sub_index() {
        let mut header = [0; 3];

        assert_eq!(init_header(false, 0x0F, 0, &mut header), 1);
        assert_eq!(header[0], 0x0F);

        assert_eq!(init_header(true, 0x0D, 0, &mut header), 1);
        assert_eq!(header[0], 0x8D);
    }

    #[test]
    fn header_with_short_sub_index() {
        let mut header = [0; 3];

        assert_eq!(init_header(true, 0x0A, 0x01, &mut header), 2);
        assert_eq!(&header[..2], &[0xCA, 0x01]);
    }

    #[test]
    fn header_with_extended_sub_index() {
        let mut header = [0; 3];

        assert_eq!(init_header(true, 0x2E, 0x1804, &mut header), 3);
        assert_eq!(header, [0xEE, 0x84, 0x30]);
    }

    #[test]
    fn field_access() {
        let r = dev_id::R([0x30, 0x01, 0xCA, 0xDE]);

        assert_eq!(r.ridtag(), 0xDECA);
        assert_eq!(r.model(), 0x01);
        assert_eq!(r.ver(), 0x3);
        assert_eq!(r.rev(), 0x0);

        let mut w = chan_ctrl::W([0; 4]);
        w.tx_chan(2).rx_chan(2).rxprf(0b10).tx_pcode(9).rx_pcode(9);
        assert_eq!(w.0, [0x22, 0x00, 0x48, 0x4A]);
    }

    #[test]
    fn fields_are_truncated() {
        let mut w = sys_ctrl::W([0; 4]);
        w.txstrt(0xff);

        assert_eq!(w.0, [0x02, 0, 0, 0]);
    }

    #[test]
    fn read_register() {
        let expectations = [
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0x00]),
            SpiTransaction::read_vec(vec![0x30, 0x01, 0xCA, 0xDE]),
            SpiTransaction::transaction_end(),
        ];
        let mut spi = SpiMock::new(&expectations);
        let mut dw1000 = DW1000::new(spi.clone());

        let dev_id = dw1000.dev_id().read().unwrap();
        assert_eq!(dev_id.ridtag(), 0xDECA);

        spi.done();
    }

    #[test]
    fn modify_register() {
        let expectations = [
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0x36]),
            SpiTransaction::read_vec(vec![0x00, 0x02, 0x00, 0xF0]),
            SpiTransaction::transaction_end(),
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0xB6]),
            SpiTransaction::write_vec(vec![0x00, 0x02, 0x00, 0xE0]),
            SpiTransaction::transaction_end(),
        ];
        let mut spi = SpiMock::new(&expectations);
        let mut dw1000 = DW1000::new(spi.clone());

        dw1000
            .pmsc_ctrl0()
            .modify(|_, w| w.softreset(0xE))
            .unwrap();

        spi.done();
    }

    #[test]
    fn tx_buffer_with_offset() {
        let expectations = [
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0xC9, 0x05]),
            SpiTransaction::write_vec(vec![1, 2, 3]),
            SpiTransaction::transaction_end(),
        ];
        let mut spi = SpiMock::new(&expectations);
        let mut dw1000 = DW1000::new(spi.clone());

        dw1000.write_tx_buffer(5, &[1, 2, 3]).unwrap();

        spi.done();
    }
}
