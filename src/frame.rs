//! Wire format of the ranging messages
//!
//! All four messages share a 10 byte header: the IEEE 802.15.4 frame control
//! (data frame, PAN id compression, 16-bit addresses), the sequence number,
//! the PAN id, the destination and source short addresses and a function
//! code. The DW1000 appends a 2 byte FCS to every frame it sends; the codec
//! leaves room for it but never fills it in.
//!
//! | Message  | Length | Function | Payload                                  |
//! |----------|--------|----------|------------------------------------------|
//! | Poll     | 12     | `0x21`   | none                                     |
//! | Response | 15     | `0x10`   | activity code, 16-bit parameter          |
//! | Final    | 24     | `0x23`   | poll TX, response RX, final TX (32 bit)  |
//! | Result   | 24     | `0x21`   | sequence number, metres, 0, centimetres  |

use core::fmt;

use byte::{
    ctx::{Endian, LE},
    BytesExt as _, TryRead, TryWrite,
};

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{
    configs::{AddressPair, Addressing},
    twr::FinalTimestamps,
};

/// The longest message handled by the responder, FCS included
pub const MAX_FRAME_LEN: usize = 24;

/// Length of the frame check sequence the DW1000 appends to each frame
pub const FCS_LEN: usize = 2;

/// Length of the header shared by all messages
pub const COMMON_LEN: usize = 10;

/// Index of the sequence number in the header
pub const SEQUENCE_NUMBER_INDEX: usize = 2;

/// Index of the poll TX timestamp in the final message
pub const FINAL_POLL_TX_TS_INDEX: usize = 10;
/// Index of the response RX timestamp in the final message
pub const FINAL_RESP_RX_TS_INDEX: usize = 14;
/// Index of the final TX timestamp in the final message
pub const FINAL_FINAL_TX_TS_INDEX: usize = 18;

/// Data frame, PAN id compression, short addresses, 2006 frame version
const FRAME_CONTROL: u16 = 0x8841;

/// Activity code sent with the response: "continue with the final message"
pub const ACTIVITY_CONTINUE: u8 = 0x02;

/// The four messages of a ranging exchange
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum FrameKind {
    /// Sent by the initiator to open the exchange
    Poll,
    /// Sent by the responder, a fixed delay after the poll
    Response,
    /// Sent by the initiator, carries its three timestamps
    Final,
    /// Sent by the responder, carries the measured distance
    Result,
}

impl FrameKind {
    /// The function code in byte 9 of the header
    pub fn function_code(&self) -> u8 {
        match self {
            FrameKind::Poll => 0x21,
            FrameKind::Response => 0x10,
            FrameKind::Final => 0x23,
            FrameKind::Result => 0x21,
        }
    }

    /// Length of the message on air, including the FCS
    pub fn wire_len(&self) -> usize {
        match self {
            FrameKind::Poll => 12,
            FrameKind::Response => 15,
            FrameKind::Final => 24,
            FrameKind::Result => 24,
        }
    }
}

/// The header shared by all messages
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Header {
    /// Sequence number, ignored when validating
    pub sequence_number: u8,
    /// PAN identifier
    pub pan_id: u16,
    /// Destination short address, in on-air order
    pub destination: [u8; 2],
    /// Source short address, in on-air order
    pub source: [u8; 2],
    /// Identifies the message
    pub function_code: u8,
}

impl<'a> TryRead<'a, Endian> for Header {
    fn try_read(bytes: &'a [u8], endian: Endian) -> byte::Result<(Self, usize)> {
        let offset = &mut 0;

        let frame_control: u16 = bytes.read_with(offset, endian)?;
        if frame_control != FRAME_CONTROL {
            return Err(byte::Error::BadInput {
                err: "unexpected frame control",
            });
        }

        let header = Header {
            sequence_number: bytes.read_with(offset, endian)?,
            pan_id: bytes.read_with(offset, endian)?,
            destination: [bytes.read_with(offset, endian)?, bytes.read_with(offset, endian)?],
            source: [bytes.read_with(offset, endian)?, bytes.read_with(offset, endian)?],
            function_code: bytes.read_with(offset, endian)?,
        };

        Ok((header, *offset))
    }
}

impl TryWrite<Endian> for Header {
    fn try_write(self, bytes: &mut [u8], endian: Endian) -> byte::Result<usize> {
        let offset = &mut 0;

        bytes.write_with(offset, FRAME_CONTROL, endian)?;
        bytes.write_with(offset, self.sequence_number, endian)?;
        bytes.write_with(offset, self.pan_id, endian)?;
        for address in [self.destination, self.source] {
            bytes.write_with(offset, address[0], endian)?;
            bytes.write_with(offset, address[1], endian)?;
        }
        bytes.write_with(offset, self.function_code, endian)?;

        Ok(*offset)
    }
}

impl<'a> TryRead<'a, Endian> for FinalTimestamps {
    fn try_read(bytes: &'a [u8], endian: Endian) -> byte::Result<(Self, usize)> {
        let offset = &mut 0;

        let timestamps = FinalTimestamps {
            poll_tx: bytes.read_with(offset, endian)?,
            resp_rx: bytes.read_with(offset, endian)?,
            final_tx: bytes.read_with(offset, endian)?,
        };

        Ok((timestamps, *offset))
    }
}

impl TryWrite<Endian> for FinalTimestamps {
    fn try_write(self, bytes: &mut [u8], endian: Endian) -> byte::Result<usize> {
        let offset = &mut 0;

        bytes.write_with(offset, self.poll_tx, endian)?;
        bytes.write_with(offset, self.resp_rx, endian)?;
        bytes.write_with(offset, self.final_tx, endian)?;

        Ok(*offset)
    }
}

/// A distance, as carried by the result message
///
/// Each part is a single byte, so distances of 256 m and more wrap around.
/// This is the format the initiator expects and is kept as is.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DistanceDigits {
    /// Whole metres, modulo 256
    pub meters: u8,
    /// Centimetres, 0 to 99
    pub centimeters: u8,
}

impl DistanceDigits {
    /// Encodes a distance, rounded to the nearest centimetre
    ///
    /// Negative distances, which short ranges can produce, encode as zero.
    pub fn from_meters(distance: f64) -> Self {
        // Also catches NaN
        if !(distance > 0.0) {
            return DistanceDigits::default();
        }

        // Rounds half up, which is `round` for positive values.
        let centimeters = (distance * 100.0 + 0.5) as u64;

        DistanceDigits {
            meters: (centimeters / 100) as u8,
            centimeters: (centimeters % 100) as u8,
        }
    }

    /// Decodes the distance, in metres
    pub fn to_meters(&self) -> f64 {
        self.meters as f64 + self.centimeters as f64 / 100.0
    }
}

impl<'a> TryRead<'a, Endian> for DistanceDigits {
    fn try_read(bytes: &'a [u8], endian: Endian) -> byte::Result<(Self, usize)> {
        let offset = &mut 0;

        let meters = bytes.read_with(offset, endian)?;
        let _reserved: u8 = bytes.read_with(offset, endian)?;
        let centimeters = bytes.read_with(offset, endian)?;

        Ok((
            DistanceDigits {
                meters,
                centimeters,
            },
            *offset,
        ))
    }
}

impl TryWrite<Endian> for DistanceDigits {
    fn try_write(self, bytes: &mut [u8], endian: Endian) -> byte::Result<usize> {
        let offset = &mut 0;

        bytes.write_with(offset, self.meters, endian)?;
        bytes.write_with(offset, 0u8, endian)?;
        bytes.write_with(offset, self.centimeters, endian)?;

        Ok(*offset)
    }
}

/// The message-specific part of an outgoing frame
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum Payload {
    /// Empty
    Poll,
    /// Activity code and its parameter
    Response {
        /// What the initiator should do next
        activity: u8,
        /// Activity parameter
        parameter: u16,
    },
    /// The initiator's timestamps
    Final(FinalTimestamps),
    /// The measured distance
    Result(DistanceDigits),
}

impl Payload {
    /// The kind of message that carries this payload
    pub fn kind(&self) -> FrameKind {
        match self {
            Payload::Poll => FrameKind::Poll,
            Payload::Response { .. } => FrameKind::Response,
            Payload::Final(_) => FrameKind::Final,
            Payload::Result(_) => FrameKind::Result,
        }
    }
}

/// The expected headers of the four messages
///
/// Built once from the [`Addressing`] configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Templates {
    pan_id: u16,
    initiator: AddressPair,
    response: AddressPair,
    result: AddressPair,
}

impl Templates {
    /// Creates the templates for the given addresses
    pub fn new(addressing: &Addressing) -> Self {
        Templates {
            pan_id: addressing.pan_id,
            initiator: addressing.initiator,
            response: addressing.response,
            result: addressing.result,
        }
    }

    /// The header of a message of the given kind
    pub fn header(&self, kind: FrameKind, sequence_number: u8) -> Header {
        let addresses = match kind {
            FrameKind::Poll | FrameKind::Final => self.initiator,
            FrameKind::Response => self.response,
            FrameKind::Result => self.result,
        };

        Header {
            sequence_number,
            pan_id: self.pan_id,
            destination: addresses.destination,
            source: addresses.source,
            function_code: kind.function_code(),
        }
    }

    /// Serializes a message
    ///
    /// The returned buffer has the length of the message on air. Its last two
    /// bytes are zero, the DW1000 overwrites them with the FCS.
    pub fn build(
        &self,
        sequence_number: u8,
        payload: &Payload,
    ) -> Result<FrameBuffer<MAX_FRAME_LEN>, byte::Error> {
        let kind = payload.kind();
        let mut frame = FrameBuffer::new();
        let bytes = frame
            .load(kind.wire_len())
            .map_err(|_| byte::Error::Incomplete)?;
        // The FCS isn't ours to write
        let body_len = kind.wire_len() - FCS_LEN;
        let bytes = &mut bytes[..body_len];

        let offset = &mut 0;
        bytes.write_with(offset, self.header(kind, sequence_number), LE)?;

        match *payload {
            Payload::Poll => {}
            Payload::Response {
                activity,
                parameter,
            } => {
                bytes.write_with(offset, activity, LE)?;
                bytes.write_with(offset, parameter, LE)?;
            }
            Payload::Final(timestamps) => {
                bytes.write_with(offset, timestamps, LE)?;
            }
            Payload::Result(digits) => {
                bytes.write_with(offset, sequence_number, LE)?;
                bytes.write_with(offset, digits, LE)?;
            }
        }

        Ok(frame)
    }

    /// Checks whether a received frame is a message of the given kind
    ///
    /// Only the header is compared, with the sequence number ignored. Frames
    /// shorter than the message or longer than [`MAX_FRAME_LEN`] are
    /// rejected.
    pub fn validate(&self, frame: &[u8], kind: FrameKind) -> bool {
        if frame.len() < kind.wire_len() || frame.len() > MAX_FRAME_LEN {
            return false;
        }

        let mut expected = [0; COMMON_LEN];
        if expected
            .write_with(&mut 0, self.header(kind, 0), LE)
            .is_err()
        {
            return false;
        }

        let mut received = [0; COMMON_LEN];
        received.copy_from_slice(&frame[..COMMON_LEN]);
        received[SEQUENCE_NUMBER_INDEX] = 0;

        received == expected
    }
}

/// Reads the header of a frame
pub fn read_header(frame: &[u8]) -> Result<Header, byte::Error> {
    frame.read_with(&mut 0, LE)
}

/// Reads the three initiator timestamps from a final message
///
/// ``` rust
/// use dw1000_twr::{
///     configs::Addressing,
///     frame::{read_final_timestamps, Payload, Templates},
///     twr::FinalTimestamps,
/// };
///
/// let timestamps = FinalTimestamps {
///     poll_tx: 0x0100_0000,
///     resp_rx: 0x0200_0000,
///     final_tx: 0xffff_fff0,
/// };
/// let templates = Templates::new(&Addressing::default());
/// let frame = templates.build(7, &Payload::Final(timestamps)).unwrap();
///
/// assert_eq!(read_final_timestamps(frame.as_slice()).unwrap(), timestamps);
/// ```
pub fn read_final_timestamps(frame: &[u8]) -> Result<FinalTimestamps, byte::Error> {
    let mut offset = FINAL_POLL_TX_TS_INDEX;
    frame.read_with(&mut offset, LE)
}

/// Reads the distance from a result message
pub fn read_distance(frame: &[u8]) -> Result<DistanceDigits, byte::Error> {
    // Skips the mirrored sequence number
    let mut offset = COMMON_LEN + 1;
    frame.read_with(&mut offset, LE)
}

/// Reads one 32-bit timestamp field at `offset`
pub fn extract_timestamp(frame: &[u8], mut offset: usize) -> Result<u32, byte::Error> {
    frame.read_with(&mut offset, LE)
}

/// Writes the low 32 bits of `timestamp` into the field at `offset`
pub fn embed_timestamp(
    frame: &mut [u8],
    mut offset: usize,
    timestamp: u64,
) -> Result<(), byte::Error> {
    frame.write_with(&mut offset, timestamp as u32, LE)
}

/// A byte buffer with a fixed capacity that tracks how much of it is used
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameBuffer<const N: usize> {
    data: [u8; N],
    len: usize,
}

impl<const N: usize> FrameBuffer<N> {
    /// Creates an empty, zeroed buffer
    pub fn new() -> Self {
        FrameBuffer {
            data: [0; N],
            len: 0,
        }
    }

    /// The number of bytes the buffer can hold
    pub fn capacity(&self) -> usize {
        N
    }

    /// The number of bytes in use
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no bytes are in use
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Zeroes the buffer and marks it empty
    pub fn clear(&mut self) {
        self.data = [0; N];
        self.len = 0;
    }

    /// Makes room for `len` zeroed bytes and returns them for filling in
    ///
    /// Fails without touching the buffer if `len` exceeds the capacity.
    pub fn load(&mut self, len: usize) -> Result<&mut [u8], CapacityError> {
        if len > N {
            return Err(CapacityError {
                required_len: len,
                capacity: N,
            });
        }

        self.data = [0; N];
        self.len = len;

        Ok(&mut self.data[..len])
    }

    /// The bytes in use
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The bytes in use, mutably
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }
}

impl<const N: usize> Default for FrameBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> AsRef<[u8]> for FrameBuffer<N> {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

/// Returned from [`FrameBuffer::load`] if the buffer is too small
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct CapacityError {
    /// The requested length
    pub required_len: usize,
    /// The buffer's capacity
    pub capacity: usize,
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame of {} bytes doesn't fit into buffer of {} bytes",
            self.required_len, self.capacity
        )
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CapacityError {}
