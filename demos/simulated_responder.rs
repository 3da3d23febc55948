//! Runs the responder against a simulated initiator
//!
//! The simulated radio plays the initiator's side of the exchange at a fixed
//! distance, with both devices sharing one clock. Run with
//! `RUST_LOG=trace` to follow the state machine.

use std::convert::Infallible;

use dw1000_twr::{
    frame::{read_distance, FrameKind, Payload, Templates},
    time::{DelayedTime, Duration, Instant, TIME_UNIT_SECONDS},
    twr::{FinalTimestamps, SPEED_OF_LIGHT_AIR},
    Config, Cycle, Responder, RxMode, Status, Transceiver, TxMode, TxStart,
};

/// Every that many polls, the frame arrives with a bad FCS
const CORRUPT_EVERY: u32 = 4;

struct SimulatedInitiator {
    templates: Templates,
    flight: Duration,
    reply_delay: Duration,
    clock: Instant,
    seq: u8,
    polls: u32,

    status: Status,
    inbox: Vec<u8>,
    outbox: Vec<u8>,
    tx_len: usize,
    delayed: Option<DelayedTime>,
    last_rx: Instant,
    last_tx: Instant,
    poll_tx: Instant,
}

impl SimulatedInitiator {
    fn new(config: &Config, meters: f64) -> Self {
        let flight = (meters / SPEED_OF_LIGHT_AIR / TIME_UNIT_SECONDS) as u64;
        let start = Instant::new(0).expect("zero is a valid instant");

        SimulatedInitiator {
            templates: Templates::new(&config.addressing),
            flight: Duration::new(flight).expect("flight time fits in 40 bits"),
            reply_delay: Duration::from_uus(2700),
            clock: start,
            seq: 0,
            polls: 0,

            status: Status::empty(),
            inbox: Vec::new(),
            outbox: Vec::new(),
            tx_len: 0,
            delayed: None,
            last_rx: start,
            last_tx: start,
            poll_tx: start,
        }
    }

    fn send_poll(&mut self) {
        self.polls += 1;
        self.clock = self.clock + Duration::from_uus(10_000);

        if self.polls % CORRUPT_EVERY == 0 {
            self.status |= Status::RXFCE;
            return;
        }

        self.poll_tx = self.clock;
        self.last_rx = self.poll_tx + self.flight;
        self.inbox = self
            .templates
            .build(self.seq, &Payload::Poll)
            .expect("poll fits")
            .as_slice()
            .to_vec();
        self.seq = self.seq.wrapping_add(1);
        self.status |= Status::RXFCG;
    }

    fn answer_response(&mut self, resp_tx: Instant) {
        if !self.templates.validate(&self.outbox[..self.tx_len], FrameKind::Response) {
            println!("initiator: unexpected frame {:02x?}", self.outbox);
            return;
        }

        let resp_rx = resp_tx + self.flight;
        let final_tx = DelayedTime::after(resp_rx, self.reply_delay).instant();
        let timestamps = FinalTimestamps {
            poll_tx: self.poll_tx.low32(),
            resp_rx: resp_rx.low32(),
            final_tx: final_tx.low32(),
        };

        self.last_rx = final_tx + self.flight;
        self.clock = self.last_rx;
        self.inbox = self
            .templates
            .build(self.seq, &Payload::Final(timestamps))
            .expect("final fits")
            .as_slice()
            .to_vec();
        self.seq = self.seq.wrapping_add(1);
        self.status |= Status::RXFCG;
    }
}

impl Transceiver for SimulatedInitiator {
    type Error = Infallible;

    fn configure(&mut self, config: &Config) -> Result<(), Infallible> {
        println!(
            "radio: channel {:?}, {:?}",
            config.radio.channel, config.radio.bitrate
        );
        Ok(())
    }

    fn enable_receiver(&mut self, mode: RxMode) -> Result<(), Infallible> {
        if mode == RxMode::Immediate && self.status.is_empty() {
            self.send_poll();
        }
        Ok(())
    }

    fn read_status(&mut self) -> Result<Status, Infallible> {
        Ok(self.status)
    }

    fn clear_status(&mut self, events: Status) -> Result<(), Infallible> {
        self.status = Status::from_bits(self.status.bits() & !events.bits());
        Ok(())
    }

    fn read_frame_length(&mut self) -> Result<usize, Infallible> {
        Ok(self.inbox.len())
    }

    fn read_frame(&mut self, buffer: &mut [u8], offset: usize) -> Result<(), Infallible> {
        buffer.copy_from_slice(&self.inbox[offset..offset + buffer.len()]);
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8], offset: usize) -> Result<(), Infallible> {
        if self.outbox.len() < offset + frame.len() {
            self.outbox.resize(offset + frame.len(), 0);
        }
        self.outbox[offset..offset + frame.len()].copy_from_slice(frame);
        Ok(())
    }

    fn write_tx_control(
        &mut self,
        len: usize,
        _offset: usize,
        _ranging: bool,
    ) -> Result<(), Infallible> {
        self.tx_len = len;
        Ok(())
    }

    fn start_transmit(&mut self, mode: TxMode) -> Result<TxStart, Infallible> {
        match mode {
            TxMode::Delayed { .. } => {
                let Some(time) = self.delayed.take() else {
                    return Ok(TxStart::Late);
                };
                self.last_tx = time.instant();
                self.answer_response(self.last_tx);
            }
            TxMode::Immediate => {
                self.last_tx = self.clock;
                match read_distance(&self.outbox[..self.tx_len]) {
                    Ok(digits) => println!("initiator: got {:.2} m", digits.to_meters()),
                    Err(error) => println!("initiator: bad result: {:?}", error),
                }
            }
        }

        self.status |= Status::TXFRS;
        Ok(TxStart::Started)
    }

    fn tx_timestamp(&mut self) -> Result<Instant, Infallible> {
        Ok(self.last_tx)
    }

    fn rx_timestamp(&mut self) -> Result<Instant, Infallible> {
        Ok(self.last_rx)
    }

    fn set_delayed_send_time(&mut self, time: DelayedTime) -> Result<(), Infallible> {
        self.delayed = Some(time);
        Ok(())
    }

    fn set_rx_after_tx_delay(&mut self, _uus: u32) -> Result<(), Infallible> {
        Ok(())
    }

    fn set_rx_timeout(&mut self, _uus: u16) -> Result<(), Infallible> {
        Ok(())
    }

    fn reset_receiver(&mut self) -> Result<(), Infallible> {
        println!("radio: receiver reset");
        Ok(())
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::default();
    let radio = SimulatedInitiator::new(&config, 5.0);
    let mut responder = Responder::new(radio, config).expect("default config is valid");

    for _ in 0..8 {
        match responder.run_cycle().expect("simulation can't fail") {
            Cycle::Ranged(measurement) => println!(
                "responder: {} (tof {} DTU, seq {})",
                measurement, measurement.time_of_flight.0, measurement.sequence_number
            ),
            other => println!("responder: {:?}", other),
        }
    }
}
