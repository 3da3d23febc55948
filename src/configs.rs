//! Configuration structs for the radio and the ranging exchange
//!
//! This module houses the datastructures that control how the DW1000 is set
//! up and how the responder times its side of the exchange. A [`Config`] is
//! validated once, when the responder is created, and is then handed to the
//! driver.

use core::fmt;

#[cfg(feature = "defmt")]
use defmt::Format;

/// The complete responder configuration
///
/// The defaults reproduce the EVK1000's default mode (mode 3) with the reply
/// timing of the DS-TWR initiator it is paired with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// PHY configuration, shared with the initiator
    pub radio: RadioConfig,
    /// Antenna delay calibration
    pub antenna: AntennaDelay,
    /// Preamble detection timeout, in multiples of the PAC size
    ///
    /// A value of 0 disables the timeout.
    pub preamble_timeout: u16,
    /// Reply timing of the exchange
    pub timing: Timing,
    /// Addresses used in the frame templates
    pub addressing: Addressing,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            radio: RadioConfig::default(),
            antenna: AntennaDelay::default(),
            preamble_timeout: 15,
            timing: Timing::default(),
            addressing: Addressing::default(),
        }
    }
}

impl Config {
    /// Checks that the configuration can be applied
    ///
    /// Some combinations of settings are not allowed by the DW1000, and some
    /// timing values would leave the responder waiting forever.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.radio.validate()?;
        self.timing.validate()
    }
}

/// PHY configuration
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RadioConfig {
    /// The channel that the DW1000 will transmit and listen at
    pub channel: UwbChannel,
    /// The PRF value
    pub pulse_repetition_frequency: PulseRepetitionFrequency,
    /// The length of the preamble. Used in TX only.
    pub preamble_length: PreambleLength,
    /// Preamble acquisition chunk size. Used in RX only.
    pub pac_size: PacSize,
    /// TX preamble code
    pub tx_preamble_code: u8,
    /// RX preamble code
    pub rx_preamble_code: u8,
    /// The SFD sequence
    pub sfd_sequence: SfdSequence,
    /// The bitrate
    pub bitrate: BitRate,
    /// PHY header mode
    pub phr_mode: PhrMode,
    /// SFD timeout, in symbols. Used in RX only.
    ///
    /// Should be preamble length + 1 + SFD length - PAC size.
    pub sfd_timeout: u16,
}

impl Default for RadioConfig {
    fn default() -> Self {
        let mut config = RadioConfig {
            channel: UwbChannel::Channel2,
            pulse_repetition_frequency: PulseRepetitionFrequency::Mhz64,
            preamble_length: PreambleLength::Symbols1024,
            pac_size: PacSize::Symbols32,
            tx_preamble_code: 9,
            rx_preamble_code: 9,
            sfd_sequence: SfdSequence::Decawave,
            bitrate: BitRate::Kbps110,
            phr_mode: PhrMode::Standard,
            sfd_timeout: 0,
        };
        config.sfd_timeout = config.recommended_sfd_timeout();

        config
    }
}

impl RadioConfig {
    /// SFD timeout for the configured preamble, PAC and data rate
    pub fn recommended_sfd_timeout(&self) -> u16 {
        let sfd_symbols = match self.bitrate {
            BitRate::Kbps110 => 64,
            BitRate::Kbps850 | BitRate::Kbps6800 => 8,
        };

        self.preamble_length.symbols() + 1 + sfd_symbols - self.pac_size.symbols()
    }

    /// Checks the PHY settings against each other
    pub fn validate(&self) -> Result<(), ConfigError> {
        let prf = self.pulse_repetition_frequency;
        for code in [self.tx_preamble_code, self.rx_preamble_code] {
            if !self.channel.supports_preamble_code(prf, code) {
                return Err(ConfigError::PreambleCode {
                    channel: self.channel,
                    code,
                });
            }
        }

        if !self.preamble_length.supports_pac_size(self.pac_size) {
            return Err(ConfigError::PacSize);
        }

        if self.sfd_timeout == 0 {
            return Err(ConfigError::SfdTimeout);
        }

        Ok(())
    }
}

/// TX and RX antenna delays, in device time units
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AntennaDelay {
    /// Added by the DW1000 to TX timestamps
    pub tx: u16,
    /// Subtracted by the DW1000 from RX timestamps
    pub rx: u16,
}

impl Default for AntennaDelay {
    fn default() -> Self {
        // Typical value for 64 MHz PRF. Each device should be calibrated.
        AntennaDelay {
            tx: 16505,
            rx: 16505,
        }
    }
}

/// Reply timing of the responder
///
/// All values are in UWB microseconds (1 uus = 512 / 499.2 us).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timing {
    /// Delay from the poll RX timestamp to the response TX timestamp
    ///
    /// Includes the frame length, which is about 2.46 ms with the default
    /// PHY configuration.
    pub poll_rx_to_resp_tx_uus: u16,
    /// Delay from the end of the response to enabling the receiver
    pub resp_tx_to_final_rx_uus: u32,
    /// Timeout for the complete reception of the final message
    pub final_rx_timeout_uus: u16,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            poll_rx_to_resp_tx_uus: 3100,
            resp_tx_to_final_rx_uus: 500,
            final_rx_timeout_uus: 5000,
        }
    }
}

impl Timing {
    /// The widest value the wait-for-response delay field can hold
    pub const RX_AFTER_TX_DELAY_MAX: u32 = 0xfffff;

    /// Checks the timing values
    pub fn validate(&self) -> Result<(), ConfigError> {
        // A zero timeout disables it, which would make the final wait
        // unbounded if the initiator never answers.
        if self.final_rx_timeout_uus == 0 {
            return Err(ConfigError::FinalTimeoutDisabled);
        }
        if self.resp_tx_to_final_rx_uus > Self::RX_AFTER_TX_DELAY_MAX {
            return Err(ConfigError::RxAfterTxDelayTooLarge);
        }

        Ok(())
    }
}

/// The PAN id and the short addresses written into each kind of frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Addressing {
    /// PAN identifier
    pub pan_id: u16,
    /// Addresses of the poll and final messages sent by the initiator
    pub initiator: AddressPair,
    /// Addresses of the response message
    pub response: AddressPair,
    /// Addresses of the result message
    pub result: AddressPair,
}

impl Default for Addressing {
    fn default() -> Self {
        Addressing {
            pan_id: 0xdeca,
            initiator: AddressPair {
                destination: *b"WA",
                source: *b"2E",
            },
            response: AddressPair {
                destination: *b"VE",
                source: *b"2A",
            },
            result: AddressPair {
                destination: *b"DI",
                source: *b"2T",
            },
        }
    }
}

/// A destination and a source short address, in on-air byte order
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AddressPair {
    /// Destination address
    pub destination: [u8; 2],
    /// Source address
    pub source: [u8; 2],
}

/// Returned from [`Config::validate`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum ConfigError {
    /// The preamble code is not allowed on this channel at this PRF
    PreambleCode {
        /// The configured channel
        channel: UwbChannel,
        /// The offending code
        code: u8,
    },
    /// The PAC size doesn't fit the preamble length
    PacSize,
    /// The SFD timeout is zero
    SfdTimeout,
    /// The final message timeout is zero, which disables it
    FinalTimeoutDisabled,
    /// The delay between the response and enabling the receiver doesn't fit
    /// the 20-bit hardware field
    RxAfterTxDelayTooLarge,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::PreambleCode { channel, code } => {
                write!(f, "preamble code {} not allowed on {:?}", code, channel)
            }
            ConfigError::PacSize => write!(f, "PAC size doesn't fit the preamble length"),
            ConfigError::SfdTimeout => write!(f, "SFD timeout must not be zero"),
            ConfigError::FinalTimeoutDisabled => write!(f, "final timeout must not be zero"),
            ConfigError::RxAfterTxDelayTooLarge => {
                write!(f, "RX after TX delay doesn't fit in 20 bits")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// The bitrate at which a message is transmitted
pub enum BitRate {
    /// 110 kilobits per second.
    /// This is an unofficial extension from decawave.
    Kbps110 = 0b00,
    /// 850 kilobits per second.
    Kbps850 = 0b01,
    /// 6.8 megabits per second.
    Kbps6800 = 0b10,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// The PRF value
pub enum PulseRepetitionFrequency {
    /// 16 megahertz
    Mhz16 = 0b01,
    /// 64 megahertz
    Mhz64 = 0b10,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// An enum that specifies the length of the preamble.
///
/// Longer preambles improve the reception quality and thus range.
/// This comes at the cost of longer transmission times and thus power consumption and bandwidth use.
///
/// The discriminant is the TXPSR field in the low two bits and the PE field
/// in the high two bits, see table 16 in the user manual.
pub enum PreambleLength {
    /// 64 symbols of preamble.
    Symbols64 = 0b0001,
    /// 128 symbols of preamble.
    /// Unofficial extension from decawave.
    Symbols128 = 0b0101,
    /// 256 symbols of preamble.
    /// Unofficial extension from decawave.
    Symbols256 = 0b1001,
    /// 512 symbols of preamble.
    /// Unofficial extension from decawave.
    Symbols512 = 0b1101,
    /// 1024 symbols of preamble.
    Symbols1024 = 0b0010,
    /// 1536 symbols of preamble.
    /// Unofficial extension from decawave.
    Symbols1536 = 0b0110,
    /// 2048 symbols of preamble.
    /// Unofficial extension from decawave.
    Symbols2048 = 0b1010,
    /// 4096 symbols of preamble.
    Symbols4096 = 0b0011,
}

impl PreambleLength {
    /// Returns the number of preamble symbols
    pub fn symbols(&self) -> u16 {
        match self {
            PreambleLength::Symbols64 => 64,
            PreambleLength::Symbols128 => 128,
            PreambleLength::Symbols256 => 256,
            PreambleLength::Symbols512 => 512,
            PreambleLength::Symbols1024 => 1024,
            PreambleLength::Symbols1536 => 1536,
            PreambleLength::Symbols2048 => 2048,
            PreambleLength::Symbols4096 => 4096,
        }
    }

    /// Gets the recommended PAC size based on the preamble length.
    pub fn get_recommended_pac_size(&self) -> PacSize {
        // Values are taken from Table 6 of the DW1000 User manual
        match self {
            PreambleLength::Symbols64 | PreambleLength::Symbols128 => PacSize::Symbols8,
            PreambleLength::Symbols256 | PreambleLength::Symbols512 => PacSize::Symbols16,
            PreambleLength::Symbols1024 => PacSize::Symbols32,
            _ => PacSize::Symbols64,
        }
    }

    /// Whether the receiver can acquire this preamble with chunks of `pac`
    ///
    /// The PAC must not be larger than the recommended one, as the receiver
    /// needs several chunks to detect the preamble.
    pub fn supports_pac_size(&self, pac: PacSize) -> bool {
        pac.symbols() <= self.get_recommended_pac_size().symbols()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Preamble acquisition chunk size
pub enum PacSize {
    /// 8 symbols
    Symbols8,
    /// 16 symbols
    Symbols16,
    /// 32 symbols
    Symbols32,
    /// 64 symbols
    Symbols64,
}

impl PacSize {
    /// Returns the number of symbols per chunk
    pub fn symbols(&self) -> u16 {
        match self {
            PacSize::Symbols8 => 8,
            PacSize::Symbols16 => 16,
            PacSize::Symbols32 => 32,
            PacSize::Symbols64 => 64,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// An enum that allows the selection between different SFD sequences
pub enum SfdSequence {
    /// The standard sequence defined by the IEEE standard.
    /// Most likely the best choice for 6.8 Mbps connections.
    Ieee,
    /// A sequence defined by Decawave that is supposed to be more robust.
    /// This is an unofficial addition.
    /// Most likely the best choice for 110 Kbps connections.
    Decawave,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// PHY header mode
pub enum PhrMode {
    /// Standard frames, up to 127 bytes
    Standard = 0b00,
    /// Decawave's extended frames, up to 1023 bytes
    Extended = 0b11,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// All the available UWB channels.
///
/// Note that while a channel may have more bandwidth than ~900 Mhz, the DW1000 can only send up to ~900 Mhz
pub enum UwbChannel {
    /// Channel 1
    /// - Center frequency: 3494.4 Mhz
    /// - Bandwidth: 499.2 Mhz
    Channel1 = 1,
    /// Channel 2
    /// - Center frequency: 3993.6 Mhz
    /// - Bandwidth: 499.2 Mhz
    Channel2 = 2,
    /// Channel 3
    /// - Center frequency: 4492.8 Mhz
    /// - Bandwidth: 499.2 Mhz
    Channel3 = 3,
    /// Channel 4
    /// - Center frequency: 3993.6 Mhz
    /// - Bandwidth: 1331.2 Mhz
    Channel4 = 4,
    /// Channel 5
    /// - Center frequency: 6489.6 Mhz
    /// - Bandwidth: 499.2 Mhz
    Channel5 = 5,
    /// Channel 7
    /// - Center frequency: 6489.6 Mhz
    /// - Bandwidth: 1081.6 Mhz
    Channel7 = 7,
}

impl UwbChannel {
    /// Whether `code` is a legal preamble code on this channel at `prf`
    ///
    /// Table 61 of the DW1000 user manual.
    pub fn supports_preamble_code(&self, prf: PulseRepetitionFrequency, code: u8) -> bool {
        match (self, prf) {
            (UwbChannel::Channel1, PulseRepetitionFrequency::Mhz16) => matches!(code, 1 | 2),
            (UwbChannel::Channel2, PulseRepetitionFrequency::Mhz16)
            | (UwbChannel::Channel5, PulseRepetitionFrequency::Mhz16) => matches!(code, 3 | 4),
            (UwbChannel::Channel3, PulseRepetitionFrequency::Mhz16) => matches!(code, 5 | 6),
            (UwbChannel::Channel4, PulseRepetitionFrequency::Mhz16)
            | (UwbChannel::Channel7, PulseRepetitionFrequency::Mhz16) => matches!(code, 7 | 8),
            (UwbChannel::Channel4, PulseRepetitionFrequency::Mhz64)
            | (UwbChannel::Channel7, PulseRepetitionFrequency::Mhz64) => {
                matches!(code, 17..=20)
            }
            (_, PulseRepetitionFrequency::Mhz64) => matches!(code, 9..=12),
        }
    }

    /// Gets the recommended preamble code
    pub fn get_recommended_preamble_code(&self, prf_value: PulseRepetitionFrequency) -> u8 {
        // Many have overlapping possibilities, so the numbers have been chosen so that there's no overlap here
        match (self, prf_value) {
            (UwbChannel::Channel1, PulseRepetitionFrequency::Mhz16) => 1,
            (UwbChannel::Channel2, PulseRepetitionFrequency::Mhz16) => 3,
            (UwbChannel::Channel3, PulseRepetitionFrequency::Mhz16) => 5,
            (UwbChannel::Channel4, PulseRepetitionFrequency::Mhz16) => 7,
            (UwbChannel::Channel5, PulseRepetitionFrequency::Mhz16) => 4,
            (UwbChannel::Channel7, PulseRepetitionFrequency::Mhz16) => 8,
            (UwbChannel::Channel1, PulseRepetitionFrequency::Mhz64) => 9,
            (UwbChannel::Channel2, PulseRepetitionFrequency::Mhz64) => 10,
            (UwbChannel::Channel3, PulseRepetitionFrequency::Mhz64) => 11,
            (UwbChannel::Channel4, PulseRepetitionFrequency::Mhz64) => 17,
            (UwbChannel::Channel5, PulseRepetitionFrequency::Mhz64) => 12,
            (UwbChannel::Channel7, PulseRepetitionFrequency::Mhz64) => 18,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn default_matches_evk_mode_3() {
        let config = Config::default();

        assert_eq!(config.radio.channel, UwbChannel::Channel2);
        assert_eq!(config.radio.sfd_timeout, 1057);
        assert_eq!(config.preamble_timeout, 15);
        assert_eq!(config.timing.poll_rx_to_resp_tx_uus, 3100);
        assert_eq!(config.addressing.pan_id, 0xdeca);
    }

    #[test]
    fn recommended_preamble_codes_are_legal() {
        let channels = [
            UwbChannel::Channel1,
            UwbChannel::Channel2,
            UwbChannel::Channel3,
            UwbChannel::Channel4,
            UwbChannel::Channel5,
            UwbChannel::Channel7,
        ];
        for channel in channels {
            for prf in [PulseRepetitionFrequency::Mhz16, PulseRepetitionFrequency::Mhz64] {
                let code = channel.get_recommended_preamble_code(prf);
                assert!(channel.supports_preamble_code(prf, code));
            }
        }
    }

    #[test]
    fn rejects_preamble_code_from_other_prf() {
        let mut config = Config::default();
        config.radio.rx_preamble_code = 3;

        assert_eq!(
            config.validate(),
            Err(ConfigError::PreambleCode {
                channel: UwbChannel::Channel2,
                code: 3,
            })
        );
    }

    #[test]
    fn rejects_oversized_pac() {
        let mut config = Config::default();
        config.radio.preamble_length = PreambleLength::Symbols128;

        assert_eq!(config.validate(), Err(ConfigError::PacSize));
    }

    #[test]
    fn rejects_disabled_final_timeout() {
        let mut config = Config::default();
        config.timing.final_rx_timeout_uus = 0;

        assert_eq!(config.validate(), Err(ConfigError::FinalTimeoutDisabled));
    }

    #[test]
    fn rx_delay_must_fit_hardware_field() {
        let mut config = Config::default();

        config.timing.resp_tx_to_final_rx_uus = Timing::RX_AFTER_TX_DELAY_MAX;
        assert_eq!(config.validate(), Ok(()));

        config.timing.resp_tx_to_final_rx_uus = Timing::RX_AFTER_TX_DELAY_MAX + 1;
        assert_eq!(config.validate(), Err(ConfigError::RxAfterTxDelayTooLarge));
    }

    #[test]
    fn recommended_sfd_timeout() {
        let mut radio = RadioConfig::default();
        assert_eq!(radio.recommended_sfd_timeout(), 1057);
        assert_eq!(radio.sfd_timeout, radio.recommended_sfd_timeout());

        radio.bitrate = BitRate::Kbps6800;
        radio.preamble_length = PreambleLength::Symbols128;
        radio.pac_size = PacSize::Symbols8;
        assert_eq!(radio.recommended_sfd_timeout(), 129);
    }
}
