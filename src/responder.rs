//! The responder side of double-sided two-way ranging
//!
//! [`Responder`] waits for a poll, answers it after a fixed delay, waits for
//! the initiator's final message and computes the distance from the six
//! timestamps of the exchange. The distance is sent back to the initiator in
//! a result message.
//!
//! The engine is a state machine that is advanced with [`Responder::step`].
//! Each transition talks to the radio at most a few times, and the only
//! place it blocks is [`Responder::wait_for_event`], which polls the status
//! register until a frame, a timeout or a receive error shows up. Timeouts
//! are programmed before each wait, so with a valid configuration the wait is
//! always bounded, except for the initial wait for a poll.
//!
//! ``` text
//! Listening -> AwaitingPollValidation -> SendingResponse -> AwaitingFinal
//!     ^                                                          |
//!     +-------------- SendingResult <- Computing <---------------+
//! ```
//!
//! Anything unexpected on the way sends the engine back to
//! [`State::Listening`].

use core::{fmt, num::Wrapping};

use log::{debug, info, trace, warn};

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{
    configs::Config,
    frame::{
        read_final_timestamps, DistanceDigits, FrameBuffer, FrameKind, Payload, Templates,
        ACTIVITY_CONTINUE, MAX_FRAME_LEN,
    },
    time::{DelayedTime, Duration, Instant},
    transceiver::{RxMode, Status, Transceiver, TxMode, TxStart},
    twr::{FinalTimestamps, Intervals, LocalTimestamps, TimeOfFlight},
    Error,
};

/// The states of the responder
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum State {
    /// Receiver on, waiting for any frame
    Listening,
    /// A frame was received and is checked against the poll template
    AwaitingPollValidation,
    /// Scheduling the response
    SendingResponse,
    /// The response is scheduled, waiting for the final message
    AwaitingFinal,
    /// A final message was received, computing the distance
    Computing,
    /// Sending the distance to the initiator
    SendingResult,
}

/// What the radio reported while waiting
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum Event {
    /// A frame with a good FCS was received
    Frame,
    /// The receiver timed out. Contains the timeout events that were set.
    Timeout(Status),
    /// Reception failed. Contains the error events that were set.
    Error(Status),
}

/// Why a reception failed
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum RxFailure {
    /// Frame wait or preamble detection timeout
    Timeout(Status),
    /// PHY header, FCS, sync loss, SFD timeout, frame filtering or leading
    /// edge error
    Error(Status),
    /// The frame doesn't fit into the receive buffer
    FrameTooLong {
        /// The reported frame length
        len: usize,
    },
}

/// A completed range measurement
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Measurement {
    /// Sequence number of the result message that carried it
    pub sequence_number: u8,
    /// The initiator's timestamps
    pub remote: FinalTimestamps,
    /// The computed time of flight
    pub time_of_flight: TimeOfFlight,
    /// The distance in metres
    pub distance: f64,
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DIST: {:.2} m", self.distance)
    }
}

/// How a ranging cycle ended
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum Cycle {
    /// A frame was received, but it wasn't a poll
    PollRejected,
    /// The response was sent, but the next frame wasn't a final message
    FinalRejected,
    /// Waiting for a frame failed
    RxFailed(RxFailure),
    /// The poll was processed too late to send the response in time
    ResponseLate,
    /// The exchange completed and the result was sent
    Ranged(Measurement),
}

/// Working state of one exchange
///
/// Reset whenever the responder starts listening again.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Session {
    /// When the poll was received
    pub poll_rx: Option<Instant>,
    /// When the response was sent
    pub resp_tx: Option<Instant>,
    /// When the final message was received
    pub final_rx: Option<Instant>,
    /// The timestamps carried by the final message
    pub remote: Option<FinalTimestamps>,
    /// The outcome, once computed
    pub measurement: Option<Measurement>,
}

/// The ranging responder
///
/// Owns the radio. Use [`Responder::release`] to get it back.
pub struct Responder<T> {
    radio: T,
    config: Config,
    templates: Templates,
    rx_buffer: FrameBuffer<MAX_FRAME_LEN>,
    session: Session,
    seq: Wrapping<u8>,
    state: State,
}

impl<T> Responder<T>
where
    T: Transceiver,
{
    /// Validates the configuration and applies it to the radio
    ///
    /// The radio isn't touched if the configuration is invalid.
    pub fn new(mut radio: T, config: Config) -> Result<Self, Error<T::Error>> {
        config.validate()?;
        radio.configure(&config).map_err(Error::Driver)?;

        debug!("Responder configured: {:?}", config);

        Ok(Responder {
            radio,
            templates: Templates::new(&config.addressing),
            config,
            rx_buffer: FrameBuffer::new(),
            session: Session::default(),
            seq: Wrapping(0),
            state: State::Listening,
        })
    }

    /// The current state
    pub fn state(&self) -> State {
        self.state
    }

    /// The sequence number the next transmitted message will carry
    pub fn sequence_number(&self) -> u8 {
        self.seq.0
    }

    /// The configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The exchange in progress, or the last one
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Gives back the radio
    pub fn release(self) -> T {
        self.radio
    }

    /// Responds to ranging requests forever
    ///
    /// Only returns if talking to the radio fails.
    pub fn run(&mut self) -> Result<core::convert::Infallible, Error<T::Error>> {
        loop {
            self.run_cycle()?;
        }
    }

    /// Advances the state machine until it is back in [`State::Listening`]
    pub fn run_cycle(&mut self) -> Result<Cycle, Error<T::Error>> {
        loop {
            if let Some(cycle) = self.step()? {
                return Ok(cycle);
            }
        }
    }

    /// Performs one transition of the state machine
    ///
    /// Returns the outcome of the cycle when the transition ends it, which
    /// always leaves the responder in [`State::Listening`].
    pub fn step(&mut self) -> Result<Option<Cycle>, Error<T::Error>> {
        let state = self.state;

        let (next, cycle) = match state {
            State::Listening => self.listen()?,
            State::AwaitingPollValidation => self.validate_poll()?,
            State::SendingResponse => self.send_response()?,
            State::AwaitingFinal => self.await_final()?,
            State::Computing => self.compute()?,
            State::SendingResult => self.send_result()?,
        };

        if next != state {
            trace!("{:?} -> {:?}", state, next);
        }
        self.state = next;

        Ok(cycle)
    }

    /// Checks the status register once
    ///
    /// Returns `WouldBlock` while there is nothing to report.
    pub fn poll_event(&mut self) -> nb::Result<Event, Error<T::Error>> {
        let status = self.radio.read_status().map_err(Error::Driver)?;
        trace!("Status: {:?}", status);

        if status.contains(Status::RXFCG) {
            return Ok(Event::Frame);
        }
        if status.intersects(Status::ALL_RX_TO) {
            return Ok(Event::Timeout(status & Status::ALL_RX_TO));
        }
        if status.intersects(Status::ALL_RX_ERR) {
            return Ok(Event::Error(status & Status::ALL_RX_ERR));
        }

        Err(nb::Error::WouldBlock)
    }

    /// Busy-waits for a frame, a timeout or a receive error
    pub fn wait_for_event(&mut self) -> Result<Event, Error<T::Error>> {
        nb::block!(self.poll_event())
    }

    fn listen(&mut self) -> Result<(State, Option<Cycle>), Error<T::Error>> {
        self.session = Session::default();
        self.rx_buffer.clear();

        // Wait for a poll as long as it takes
        self.radio.set_rx_timeout(0).map_err(Error::Driver)?;
        self.radio
            .enable_receiver(RxMode::Immediate)
            .map_err(Error::Driver)?;

        match self.wait_for_event()? {
            Event::Frame => {
                self.radio
                    .clear_status(Status::RXFCG)
                    .map_err(Error::Driver)?;
                match self.receive_frame()? {
                    Ok(()) => Ok((State::AwaitingPollValidation, None)),
                    Err(failure) => Ok((State::Listening, Some(Cycle::RxFailed(failure)))),
                }
            }
            event => {
                let failure = self.recover_receiver(event)?;
                Ok((State::Listening, Some(Cycle::RxFailed(failure))))
            }
        }
    }

    fn validate_poll(&mut self) -> Result<(State, Option<Cycle>), Error<T::Error>> {
        if !self
            .templates
            .validate(self.rx_buffer.as_slice(), FrameKind::Poll)
        {
            debug!("Dropping frame that isn't a poll");
            return Ok((State::Listening, Some(Cycle::PollRejected)));
        }

        let poll_rx = self.radio.rx_timestamp().map_err(Error::Driver)?;
        self.session.poll_rx = Some(poll_rx);

        Ok((State::SendingResponse, None))
    }

    fn send_response(&mut self) -> Result<(State, Option<Cycle>), Error<T::Error>> {
        let poll_rx = match self.session.poll_rx {
            Some(poll_rx) => poll_rx,
            None => return Ok((State::Listening, Some(Cycle::PollRejected))),
        };
        let timing = self.config.timing;

        let send_time =
            DelayedTime::after(poll_rx, Duration::from_uus(timing.poll_rx_to_resp_tx_uus));
        self.radio
            .set_delayed_send_time(send_time)
            .map_err(Error::Driver)?;
        self.radio
            .set_rx_after_tx_delay(timing.resp_tx_to_final_rx_uus)
            .map_err(Error::Driver)?;
        self.radio
            .set_rx_timeout(timing.final_rx_timeout_uus)
            .map_err(Error::Driver)?;

        let response = self.templates.build(
            self.seq.0,
            &Payload::Response {
                activity: ACTIVITY_CONTINUE,
                parameter: 0,
            },
        )?;
        let mode = TxMode::Delayed {
            response_expected: true,
        };
        match self.transmit(response.as_slice(), mode)? {
            TxStart::Started => {
                // Spent, whatever happens to the final message
                self.seq += Wrapping(1);
                Ok((State::AwaitingFinal, None))
            }
            TxStart::Late => {
                warn!(
                    "Response to poll at {} is late, abandoning exchange",
                    poll_rx.value()
                );
                Ok((State::Listening, Some(Cycle::ResponseLate)))
            }
        }
    }

    fn await_final(&mut self) -> Result<(State, Option<Cycle>), Error<T::Error>> {
        self.rx_buffer.clear();

        match self.wait_for_event()? {
            Event::Frame => {
                self.radio
                    .clear_status(Status::RXFCG | Status::TXFRS)
                    .map_err(Error::Driver)?;
                if let Err(failure) = self.receive_frame()? {
                    return Ok((State::Listening, Some(Cycle::RxFailed(failure))));
                }

                if !self
                    .templates
                    .validate(self.rx_buffer.as_slice(), FrameKind::Final)
                {
                    debug!("Dropping frame that isn't a final message");
                    return Ok((State::Listening, Some(Cycle::FinalRejected)));
                }

                Ok((State::Computing, None))
            }
            event => {
                let failure = self.recover_receiver(event)?;
                Ok((State::Listening, Some(Cycle::RxFailed(failure))))
            }
        }
    }

    fn compute(&mut self) -> Result<(State, Option<Cycle>), Error<T::Error>> {
        let poll_rx = match self.session.poll_rx {
            Some(poll_rx) => poll_rx,
            None => return Ok((State::Listening, Some(Cycle::FinalRejected))),
        };
        let resp_tx = self.radio.tx_timestamp().map_err(Error::Driver)?;
        let final_rx = self.radio.rx_timestamp().map_err(Error::Driver)?;
        let remote = read_final_timestamps(self.rx_buffer.as_slice())?;

        let local = LocalTimestamps {
            poll_rx,
            resp_tx,
            final_rx,
        };
        let intervals = Intervals::new(&local, &remote);
        let time_of_flight = intervals.time_of_flight();
        trace!("{:?}, time of flight {:?}", intervals, time_of_flight);

        self.session.resp_tx = Some(resp_tx);
        self.session.final_rx = Some(final_rx);
        self.session.remote = Some(remote);
        self.session.measurement = Some(Measurement {
            sequence_number: self.seq.0,
            remote,
            time_of_flight,
            distance: time_of_flight.distance_meters(),
        });

        Ok((State::SendingResult, None))
    }

    fn send_result(&mut self) -> Result<(State, Option<Cycle>), Error<T::Error>> {
        let measurement = match self.session.measurement {
            Some(measurement) => measurement,
            None => return Ok((State::Listening, Some(Cycle::FinalRejected))),
        };

        let result = self.templates.build(
            measurement.sequence_number,
            &Payload::Result(DistanceDigits::from_meters(measurement.distance)),
        )?;
        // Sent right away, the initiator isn't timing this one
        self.transmit(result.as_slice(), TxMode::Immediate)?;
        self.seq += Wrapping(1);

        self.radio
            .clear_status(Status::TXFRS)
            .map_err(Error::Driver)?;

        info!("{}", measurement);

        Ok((State::Listening, Some(Cycle::Ranged(measurement))))
    }

    /// Copies the received frame into the receive buffer
    ///
    /// Frames that don't fit are left in the radio and count as a receive
    /// error.
    fn receive_frame(&mut self) -> Result<Result<(), RxFailure>, Error<T::Error>> {
        let len = self.radio.read_frame_length().map_err(Error::Driver)?;

        match self.rx_buffer.load(len) {
            Ok(buffer) => {
                self.radio.read_frame(buffer, 0).map_err(Error::Driver)?;
                Ok(Ok(()))
            }
            Err(error) => {
                warn!("Discarding frame: {}", error);
                self.rx_buffer.clear();
                self.radio.reset_receiver().map_err(Error::Driver)?;
                Ok(Err(RxFailure::FrameTooLong { len }))
            }
        }
    }

    /// Clears receive timeouts and errors and resets the receiver
    fn recover_receiver(&mut self, event: Event) -> Result<RxFailure, Error<T::Error>> {
        let failure = match event {
            Event::Timeout(status) => {
                debug!("Receive timeout: {:?}", status);
                RxFailure::Timeout(status)
            }
            Event::Error(status) => {
                warn!("Receive error: {:?}", status);
                RxFailure::Error(status)
            }
            Event::Frame => RxFailure::Error(Status::empty()),
        };

        self.radio
            .clear_status(Status::ALL_RX_TO | Status::ALL_RX_ERR)
            .map_err(Error::Driver)?;
        // Reinitializes the leading edge detection
        self.radio.reset_receiver().map_err(Error::Driver)?;

        Ok(failure)
    }

    fn transmit(&mut self, frame: &[u8], mode: TxMode) -> Result<TxStart, Error<T::Error>> {
        self.radio.write_frame(frame, 0).map_err(Error::Driver)?;
        self.radio
            .write_tx_control(frame.len(), 0, true)
            .map_err(Error::Driver)?;
        self.radio.start_transmit(mode).map_err(Error::Driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;

    use crate::configs::Addressing;

    #[derive(Debug, PartialEq)]
    enum FakeError {
        ScriptExhausted,
    }

    /// Plays back scripted radio events and records what the responder does
    #[derive(Default)]
    struct ScriptedRadio {
        statuses: VecDeque<Status>,
        frames: VecDeque<Vec<u8>>,
        rx_timestamps: VecDeque<Instant>,
        tx_timestamps: VecDeque<Instant>,
        starts: VecDeque<TxStart>,

        configured: bool,
        current_frame: Vec<u8>,
        frames_read: usize,
        receiver_enabled: usize,
        cleared: Vec<Status>,
        resets: usize,
        delayed_times: Vec<DelayedTime>,
        rx_after_tx: Vec<u32>,
        rx_timeouts: Vec<u16>,
        tx_buffer: Vec<u8>,
        tx_len: usize,
        transmitted: Vec<(TxMode, Vec<u8>)>,
    }

    impl Transceiver for ScriptedRadio {
        type Error = FakeError;

        fn configure(&mut self, _: &Config) -> Result<(), FakeError> {
            self.configured = true;
            Ok(())
        }

        fn enable_receiver(&mut self, _: RxMode) -> Result<(), FakeError> {
            self.receiver_enabled += 1;
            Ok(())
        }

        fn read_status(&mut self) -> Result<Status, FakeError> {
            self.statuses.pop_front().ok_or(FakeError::ScriptExhausted)
        }

        fn clear_status(&mut self, events: Status) -> Result<(), FakeError> {
            self.cleared.push(events);
            Ok(())
        }

        fn read_frame_length(&mut self) -> Result<usize, FakeError> {
            self.current_frame = self.frames.pop_front().ok_or(FakeError::ScriptExhausted)?;
            Ok(self.current_frame.len())
        }

        fn read_frame(&mut self, buffer: &mut [u8], offset: usize) -> Result<(), FakeError> {
            self.frames_read += 1;
            buffer.copy_from_slice(&self.current_frame[offset..offset + buffer.len()]);
            Ok(())
        }

        fn write_frame(&mut self, frame: &[u8], offset: usize) -> Result<(), FakeError> {
            self.tx_buffer.resize(offset, 0);
            self.tx_buffer.extend_from_slice(frame);
            Ok(())
        }

        fn write_tx_control(&mut self, len: usize, _: usize, _: bool) -> Result<(), FakeError> {
            self.tx_len = len;
            Ok(())
        }

        fn start_transmit(&mut self, mode: TxMode) -> Result<TxStart, FakeError> {
            let start = self.starts.pop_front().unwrap_or(TxStart::Started);
            if start == TxStart::Started {
                self.transmitted
                    .push((mode, self.tx_buffer[..self.tx_len].to_vec()));
            }
            Ok(start)
        }

        fn tx_timestamp(&mut self) -> Result<Instant, FakeError> {
            self.tx_timestamps
                .pop_front()
                .ok_or(FakeError::ScriptExhausted)
        }

        fn rx_timestamp(&mut self) -> Result<Instant, FakeError> {
            self.rx_timestamps
                .pop_front()
                .ok_or(FakeError::ScriptExhausted)
        }

        fn set_delayed_send_time(&mut self, time: DelayedTime) -> Result<(), FakeError> {
            self.delayed_times.push(time);
            Ok(())
        }

        fn set_rx_after_tx_delay(&mut self, uus: u32) -> Result<(), FakeError> {
            self.rx_after_tx.push(uus);
            Ok(())
        }

        fn set_rx_timeout(&mut self, uus: u16) -> Result<(), FakeError> {
            self.rx_timeouts.push(uus);
            Ok(())
        }

        fn reset_receiver(&mut self) -> Result<(), FakeError> {
            self.resets += 1;
            Ok(())
        }
    }

    const FLIGHT: u64 = 2_134;
    const POLL_RX: u64 = 0x12_3400_0000;
    const POLL_TX: u32 = 0x0100_0000;
    const INITIATOR_REPLY: u32 = 200_000_000;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn templates() -> Templates {
        Templates::new(&Addressing::default())
    }

    fn poll_frame(seq: u8) -> Vec<u8> {
        templates().build(seq, &Payload::Poll).unwrap().as_slice().to_vec()
    }

    /// A physically consistent exchange over `FLIGHT` device time units
    fn exchange() -> (ScriptedRadio, FinalTimestamps) {
        let poll_rx = Instant::new(POLL_RX).unwrap();
        let send_time = DelayedTime::after(poll_rx, Duration::from_uus(3100));
        let resp_tx = send_time.instant() + Duration::new(16505).unwrap();
        let db = resp_tx.duration_since(poll_rx).value();
        let final_rx = resp_tx + Duration::new(INITIATOR_REPLY as u64 + 2 * FLIGHT).unwrap();

        let remote = FinalTimestamps {
            poll_tx: POLL_TX,
            resp_rx: POLL_TX + (db + 2 * FLIGHT) as u32,
            final_tx: POLL_TX + (db + 2 * FLIGHT) as u32 + INITIATOR_REPLY,
        };
        let final_frame = templates()
            .build(1, &Payload::Final(remote))
            .unwrap()
            .as_slice()
            .to_vec();

        let radio = ScriptedRadio {
            statuses: [Status::RXFCG, Status::empty(), Status::TXFRS | Status::RXFCG]
                .into_iter()
                .collect(),
            frames: [poll_frame(0), final_frame].into_iter().collect(),
            rx_timestamps: [poll_rx, final_rx].into_iter().collect(),
            tx_timestamps: [resp_tx].into_iter().collect(),
            ..Default::default()
        };

        (radio, remote)
    }

    fn responder(radio: ScriptedRadio) -> Responder<ScriptedRadio> {
        init_logger();
        Responder::new(radio, Config::default()).unwrap()
    }

    #[test]
    fn new_configures_radio() {
        let responder = responder(ScriptedRadio::default());

        assert_eq!(responder.state(), State::Listening);
        assert_eq!(responder.sequence_number(), 0);
        assert!(responder.release().configured);
    }

    #[test]
    fn new_rejects_invalid_config() {
        let mut config = Config::default();
        config.timing.final_rx_timeout_uus = 0;

        let result = Responder::new(ScriptedRadio::default(), config);

        assert!(matches!(
            result,
            Err(Error::Config(crate::ConfigError::FinalTimeoutDisabled))
        ));
    }

    #[test]
    fn listening_without_poll_never_transmits() {
        let radio = ScriptedRadio {
            statuses: [Status::RXRFTO, Status::RXPHE, Status::RXPTO | Status::RXSFDTO]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let mut responder = responder(radio);

        assert_eq!(
            responder.run_cycle().unwrap(),
            Cycle::RxFailed(RxFailure::Timeout(Status::RXRFTO))
        );
        assert_eq!(
            responder.run_cycle().unwrap(),
            Cycle::RxFailed(RxFailure::Error(Status::RXPHE))
        );
        assert_eq!(
            responder.run_cycle().unwrap(),
            Cycle::RxFailed(RxFailure::Timeout(Status::RXPTO))
        );
        assert_eq!(responder.sequence_number(), 0);
        assert_eq!(responder.state(), State::Listening);

        let radio = responder.release();
        assert!(radio.transmitted.is_empty());
        assert_eq!(radio.resets, 3);
        assert_eq!(radio.receiver_enabled, 3);
        assert_eq!(radio.rx_timeouts, [0, 0, 0]);
        assert!(radio
            .cleared
            .iter()
            .all(|&cleared| cleared == Status::ALL_RX_TO | Status::ALL_RX_ERR));
    }

    #[test]
    fn ignores_frames_that_are_not_polls() {
        let response = templates()
            .build(
                0,
                &Payload::Response {
                    activity: ACTIVITY_CONTINUE,
                    parameter: 0,
                },
            )
            .unwrap();
        let radio = ScriptedRadio {
            statuses: [Status::RXFCG].into_iter().collect(),
            frames: [response.as_slice().to_vec()].into_iter().collect(),
            ..Default::default()
        };
        let mut responder = responder(radio);

        assert_eq!(responder.run_cycle().unwrap(), Cycle::PollRejected);
        assert_eq!(responder.sequence_number(), 0);

        let radio = responder.release();
        assert!(radio.transmitted.is_empty());
        assert_eq!(radio.resets, 0);
    }

    #[test]
    fn complete_exchange() {
        let (radio, remote) = exchange();
        let mut responder = responder(radio);

        let measurement = match responder.run_cycle().unwrap() {
            Cycle::Ranged(measurement) => measurement,
            other => panic!("unexpected outcome: {:?}", other),
        };

        assert!((measurement.time_of_flight.device_time() - FLIGHT as i64).abs() <= 1);
        assert!((measurement.distance - 10.0).abs() < 0.05);
        assert_eq!(measurement.remote, remote);
        assert_eq!(measurement.sequence_number, 1);
        assert_eq!(responder.sequence_number(), 2);
        assert_eq!(responder.state(), State::Listening);
        assert_eq!(responder.session().measurement, Some(measurement));

        let radio = responder.release();
        assert_eq!(
            radio.delayed_times,
            [DelayedTime::after(
                Instant::new(POLL_RX).unwrap(),
                Duration::from_uus(3100)
            )]
        );
        assert_eq!(radio.rx_after_tx, [500]);
        assert_eq!(radio.rx_timeouts, [0, 5000]);
        assert_eq!(
            radio.cleared,
            [
                Status::RXFCG,
                Status::RXFCG | Status::TXFRS,
                Status::TXFRS
            ]
        );

        assert_eq!(radio.transmitted.len(), 2);
        let (mode, response) = &radio.transmitted[0];
        assert_eq!(
            *mode,
            TxMode::Delayed {
                response_expected: true
            }
        );
        assert_eq!(response.len(), 15);
        assert_eq!(response[2], 0);
        assert!(templates().validate(response, FrameKind::Response));

        let (mode, result) = &radio.transmitted[1];
        assert_eq!(*mode, TxMode::Immediate);
        assert_eq!(result.len(), 24);
        assert!(templates().validate(result, FrameKind::Result));
        assert_eq!(result[2], 1);
        assert_eq!(result[10], 1);
        let digits = DistanceDigits::from_meters(measurement.distance);
        assert_eq!(result[11], digits.meters);
        assert_eq!(result[13], digits.centimeters);
    }

    #[test]
    fn steps_through_all_states() {
        let (radio, _) = exchange();
        let mut responder = responder(radio);

        let expected = [
            State::AwaitingPollValidation,
            State::SendingResponse,
            State::AwaitingFinal,
            State::Computing,
            State::SendingResult,
        ];
        for state in expected {
            assert_eq!(responder.step().unwrap(), None);
            assert_eq!(responder.state(), state);
        }

        assert!(matches!(responder.step().unwrap(), Some(Cycle::Ranged(_))));
        assert_eq!(responder.state(), State::Listening);
    }

    #[test]
    fn late_response_abandons_exchange() {
        let radio = ScriptedRadio {
            statuses: [Status::RXFCG].into_iter().collect(),
            frames: [poll_frame(7)].into_iter().collect(),
            rx_timestamps: [Instant::new(POLL_RX).unwrap()].into_iter().collect(),
            starts: [TxStart::Late].into_iter().collect(),
            ..Default::default()
        };
        let mut responder = responder(radio);

        assert_eq!(responder.run_cycle().unwrap(), Cycle::ResponseLate);
        assert_eq!(responder.sequence_number(), 0);
        assert_eq!(responder.state(), State::Listening);

        let radio = responder.release();
        assert!(radio.transmitted.is_empty());
        // Nothing was polled after the failed start
        assert!(radio.statuses.is_empty());
    }

    #[test]
    fn malformed_final_sends_no_result() {
        let (mut radio, _) = exchange();
        // Corrupt the first byte of the destination address
        radio.frames[1][5] = b'X';
        let mut responder = responder(radio);

        assert_eq!(responder.run_cycle().unwrap(), Cycle::FinalRejected);
        assert_eq!(responder.sequence_number(), 1);

        let radio = responder.release();
        assert_eq!(radio.transmitted.len(), 1);
        assert_eq!(radio.tx_timestamps.len(), 1);
    }

    #[test]
    fn final_with_wrong_source_sends_no_result() {
        let (mut radio, _) = exchange();
        radio.frames[1][7] ^= 0x20;
        let mut responder = responder(radio);

        assert_eq!(responder.run_cycle().unwrap(), Cycle::FinalRejected);
        assert_eq!(responder.sequence_number(), 1);
        assert_eq!(responder.release().transmitted.len(), 1);
    }

    #[test]
    fn final_timeout_resets_receiver() {
        let (mut radio, _) = exchange();
        radio.statuses = [Status::RXFCG, Status::RXRFTO].into_iter().collect();
        let mut responder = responder(radio);

        assert_eq!(
            responder.run_cycle().unwrap(),
            Cycle::RxFailed(RxFailure::Timeout(Status::RXRFTO))
        );
        assert_eq!(responder.sequence_number(), 1);

        let radio = responder.release();
        assert_eq!(radio.resets, 1);
        assert_eq!(
            radio.cleared.last(),
            Some(&(Status::ALL_RX_TO | Status::ALL_RX_ERR))
        );
    }

    #[test]
    fn over_length_frame_is_not_copied() {
        let radio = ScriptedRadio {
            statuses: [Status::RXFCG].into_iter().collect(),
            frames: [std::vec![0x41; 30]].into_iter().collect(),
            ..Default::default()
        };
        let mut responder = responder(radio);

        assert_eq!(
            responder.run_cycle().unwrap(),
            Cycle::RxFailed(RxFailure::FrameTooLong { len: 30 })
        );

        let radio = responder.release();
        assert_eq!(radio.frames_read, 0);
        assert_eq!(radio.resets, 1);
        assert!(radio.transmitted.is_empty());
    }

    #[test]
    fn sequence_number_wraps() {
        let (radio, _) = exchange();
        let mut responder = responder(radio);
        responder.seq = Wrapping(255);

        assert!(matches!(responder.run_cycle().unwrap(), Cycle::Ranged(_)));
        assert_eq!(responder.sequence_number(), 1);

        let radio = responder.release();
        assert_eq!(radio.transmitted[0].1[2], 255);
        assert_eq!(radio.transmitted[1].1[2], 0);
    }

    #[test]
    fn run_returns_driver_errors() {
        let mut responder = responder(ScriptedRadio::default());

        match responder.run() {
            Err(Error::Driver(error)) => assert_eq!(error, FakeError::ScriptExhausted),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(never) => match never {},
        }
    }

    #[test]
    fn measurement_display() {
        let measurement = Measurement {
            sequence_number: 0,
            remote: FinalTimestamps::default(),
            time_of_flight: TimeOfFlight(0),
            distance: 1.234,
        };

        assert_eq!(std::format!("{}", measurement), "DIST: 1.23 m");
    }
}
