use embedded_hal::spi;
use log::warn;

use super::{Error, Ready, DW1000};
use crate::{
    configs::{AntennaDelay, BitRate, Config, RadioConfig, SfdSequence, Timing},
    ll,
    time::{DelayedTime, Instant},
    transceiver::{RxMode, Status, Transceiver, TxMode, TxStart},
};

impl<SPI> DW1000<SPI, Ready>
where
    SPI: spi::SpiDevice<u8>,
{
    /// Configures the PHY
    ///
    /// Programs channel, PRF, preamble, SFD, data rate and PHR mode. The
    /// receiver tuning registers keep their reset values.
    pub fn configure_radio(&mut self, config: &RadioConfig) -> Result<(), Error<SPI>> {
        if config.validate().is_err() {
            return Err(Error::InvalidConfiguration);
        }

        let decawave_sfd = (config.sfd_sequence == SfdSequence::Decawave) as u8;
        let channel = config.channel as u8;
        let prf = config.pulse_repetition_frequency as u8;
        let preamble = config.preamble_length as u8;

        self.ll.sys_cfg().modify(|_, w| {
            w.phr_mode(config.phr_mode as u8)
                .rxm110k((config.bitrate == BitRate::Kbps110) as u8)
        })?;

        self.ll.chan_ctrl().write(|w| {
            w.tx_chan(channel)
                .rx_chan(channel)
                .dwsfd(decawave_sfd)
                .rxprf(prf)
                .tnssfd(decawave_sfd)
                .rnssfd(decawave_sfd)
                .tx_pcode(config.tx_preamble_code)
                .rx_pcode(config.rx_preamble_code)
        })?;

        self.ll.tx_fctrl().modify(|_, w| {
            w.txbr(config.bitrate as u8)
                .txprf(prf)
                .txpsr(preamble & 0b11)
                .pe(preamble >> 2)
        })?;

        self.ll
            .drx_sfdtoc()
            .write(|w| w.count(config.sfd_timeout))?;

        Ok(())
    }

    /// Sets the RX and TX antenna delays
    pub fn set_antenna_delay(&mut self, delay: AntennaDelay) -> Result<(), Error<SPI>> {
        self.ll.lde_rxantd().write(|w| w.value(delay.rx))?;
        self.ll.tx_antd().write(|w| w.value(delay.tx))?;

        Ok(())
    }

    /// Sets the preamble detection timeout, in multiples of the PAC size
    ///
    /// A value of 0 disables the timeout.
    pub fn set_preamble_timeout(&mut self, pacs: u16) -> Result<(), Error<SPI>> {
        self.ll.drx_pretoc().write(|w| w.count(pacs))?;

        Ok(())
    }

    /// Sets the network id and short address
    pub fn set_address(&mut self, pan_id: u16, short_addr: u16) -> Result<(), Error<SPI>> {
        self.ll
            .panadr()
            .write(|w| w.pan_id(pan_id).short_addr(short_addr))?;

        Ok(())
    }

    /// Forces the transceiver off
    pub fn force_idle(&mut self) -> Result<(), Error<SPI>> {
        self.ll.sys_ctrl().write(|w| w.trxoff(0b1))?;

        Ok(())
    }

    fn check_buffer(offset: usize, len: usize) -> Result<u16, Error<SPI>> {
        let required_len = offset + len;
        if required_len > ll::BUFFER_LEN {
            return Err(Error::BufferTooSmall { required_len });
        }

        Ok(offset as u16)
    }
}

impl<SPI> Transceiver for DW1000<SPI, Ready>
where
    SPI: spi::SpiDevice<u8>,
{
    type Error = Error<SPI>;

    fn configure(&mut self, config: &Config) -> Result<(), Error<SPI>> {
        self.configure_radio(&config.radio)?;
        self.set_antenna_delay(config.antenna)?;
        self.set_preamble_timeout(config.preamble_timeout)?;
        self.set_address(
            config.addressing.pan_id,
            u16::from_le_bytes(config.addressing.response.source),
        )?;

        Ok(())
    }

    fn enable_receiver(&mut self, mode: RxMode) -> Result<(), Error<SPI>> {
        self.ll
            .sys_ctrl()
            .write(|w| w.rxenab(0b1).rxdlye((mode == RxMode::Delayed) as u8))?;

        Ok(())
    }

    fn read_status(&mut self) -> Result<Status, Error<SPI>> {
        Ok(Status::from_bits(self.ll.sys_status().read()?.value()))
    }

    fn clear_status(&mut self, events: Status) -> Result<(), Error<SPI>> {
        // Status bits are cleared by writing 1
        self.ll.sys_status().write(|w| w.value(events.bits()))?;

        Ok(())
    }

    fn read_frame_length(&mut self) -> Result<usize, Error<SPI>> {
        let rx_finfo = self.ll.rx_finfo().read()?;

        Ok(rx_finfo.rxflen() as usize | (rx_finfo.rxfle() as usize) << 7)
    }

    fn read_frame(&mut self, buffer: &mut [u8], offset: usize) -> Result<(), Error<SPI>> {
        let offset = Self::check_buffer(offset, buffer.len())?;
        self.ll.read_rx_buffer(offset, buffer)?;

        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8], offset: usize) -> Result<(), Error<SPI>> {
        let offset = Self::check_buffer(offset, frame.len())?;
        self.ll.write_tx_buffer(offset, frame)?;

        Ok(())
    }

    fn write_tx_control(
        &mut self,
        len: usize,
        offset: usize,
        ranging: bool,
    ) -> Result<(), Error<SPI>> {
        let offset = Self::check_buffer(offset, len)?;

        self.ll.tx_fctrl().modify(|_, w| {
            w.tflen(len as u8)
                .tfle((len >> 7) as u8)
                .tr(ranging as u8)
                .txboffs(offset)
        })?;

        Ok(())
    }

    fn start_transmit(&mut self, mode: TxMode) -> Result<TxStart, Error<SPI>> {
        let (delayed, response_expected) = match mode {
            TxMode::Immediate => (false, false),
            TxMode::Delayed { response_expected } => (true, response_expected),
        };

        self.ll.sys_ctrl().write(|w| {
            w.txstrt(0b1)
                .txdlys(delayed as u8)
                .wait4resp(response_expected as u8)
        })?;

        if !delayed {
            return Ok(TxStart::Started);
        }

        // If the delayed time is already in the past, the DW1000 raises one
        // of these right after the start command.
        let status = self.read_status()?;
        if status.intersects(Status::TX_LATE) {
            warn!("Delayed transmission is late: {:?}", status & Status::TX_LATE);
            self.force_idle()?;
            // Otherwise the next delayed start would read them again
            self.clear_status(Status::TX_LATE)?;
            return Ok(TxStart::Late);
        }

        Ok(TxStart::Started)
    }

    fn tx_timestamp(&mut self) -> Result<Instant, Error<SPI>> {
        Ok(Instant::from_register(self.ll.tx_time().read()?.tx_stamp()))
    }

    fn rx_timestamp(&mut self) -> Result<Instant, Error<SPI>> {
        Ok(Instant::from_register(self.ll.rx_time().read()?.rx_stamp()))
    }

    fn set_delayed_send_time(&mut self, time: DelayedTime) -> Result<(), Error<SPI>> {
        self.ll.dx_time().write(|w| w.value(time.value()))?;

        Ok(())
    }

    fn set_rx_after_tx_delay(&mut self, uus: u32) -> Result<(), Error<SPI>> {
        if uus > Timing::RX_AFTER_TX_DELAY_MAX {
            return Err(Error::InvalidConfiguration);
        }

        self.ll.ack_resp_t().modify(|_, w| w.w4r_tim(uus))?;

        Ok(())
    }

    fn set_rx_timeout(&mut self, uus: u16) -> Result<(), Error<SPI>> {
        if uus > 0 {
            self.ll.rx_fwto().write(|w| w.value(uus))?;
        }
        self.ll.sys_cfg().modify(|_, w| w.rxwtoe((uus > 0) as u8))?;

        Ok(())
    }

    fn reset_receiver(&mut self) -> Result<(), Error<SPI>> {
        self.ll.pmsc_ctrl0().modify(|_, w| w.softreset(0xE))?;
        self.ll.pmsc_ctrl0().modify(|_, w| w.softreset(0xF))?;

        Ok(())
    }
}
