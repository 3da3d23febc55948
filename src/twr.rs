//! Double-sided two-way ranging arithmetic
//!
//! This ranging technique is described in the DW1000 user manual, section
//! 12.3. The initiator sends a poll, the responder answers with a response,
//! and the initiator closes the exchange with a final message carrying its own
//! three timestamps. With its three local timestamps the responder then knows
//! the four intervals of the exchange:
//!
//! ```text
//!  initiator                responder
//!   poll_tx  ----------->    poll_rx   -+
//!      |                                | Db
//!   resp_rx  <-----------    resp_tx   -+
//!      | Da                     | Rb
//!   final_tx ----------->    final_rx
//!
//!   Ra = resp_rx - poll_tx
//! ```
//!
//! The time of flight is `(Ra * Rb - Da * Db) / (Ra + Rb + Da + Db)`, which
//! cancels the first-order frequency offset between the two clocks.

use crate::time::{Instant, TIME_UNIT_SECONDS};

#[cfg(feature = "defmt")]
use defmt::Format;

/// Speed of light in air, in metres per second
pub const SPEED_OF_LIGHT_AIR: f64 = 299_702_547.0;

/// The initiator's timestamps, as carried by the final message
///
/// The initiator truncates its 40-bit timestamps to their low 32 bits before
/// sending them.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FinalTimestamps {
    /// When the initiator sent the poll
    pub poll_tx: u32,
    /// When the initiator received the response
    pub resp_rx: u32,
    /// When the initiator sent the final message
    pub final_tx: u32,
}

/// The responder's own timestamps of one exchange
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct LocalTimestamps {
    /// When the poll was received
    pub poll_rx: Instant,
    /// When the response was sent
    pub resp_tx: Instant,
    /// When the final message was received
    pub final_rx: Instant,
}

/// The four intervals of a double-sided exchange, in device time units
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Intervals {
    /// Initiator round trip: poll sent to response received
    pub ra: u32,
    /// Responder round trip: response sent to final received
    pub rb: u32,
    /// Initiator reply: response received to final sent
    pub da: u32,
    /// Responder reply: poll received to response sent
    pub db: u32,
}

impl Intervals {
    /// Derives the intervals from the six timestamps of an exchange
    ///
    /// The local timestamps are truncated to 32 bits here, the remote ones
    /// already were by the initiator. All subtractions wrap at 2^32, which
    /// gives the right answer as long as each interval is shorter than about
    /// 67 ms.
    pub fn new(local: &LocalTimestamps, remote: &FinalTimestamps) -> Self {
        let poll_rx = local.poll_rx.low32();
        let resp_tx = local.resp_tx.low32();
        let final_rx = local.final_rx.low32();

        Intervals {
            ra: remote.resp_rx.wrapping_sub(remote.poll_tx),
            rb: final_rx.wrapping_sub(resp_tx),
            da: remote.final_tx.wrapping_sub(remote.resp_rx),
            db: resp_tx.wrapping_sub(poll_rx),
        }
    }

    /// Computes the time of flight
    ///
    /// The products are formed in `f64`, so they can't overflow. The result
    /// is truncated towards zero to whole device time units.
    pub fn time_of_flight(&self) -> TimeOfFlight {
        let ra = self.ra as f64;
        let rb = self.rb as f64;
        let da = self.da as f64;
        let db = self.db as f64;

        let sum = ra + rb + da + db;
        if sum == 0.0 {
            return TimeOfFlight(0);
        }

        TimeOfFlight(((ra * rb - da * db) / sum) as i64)
    }
}

/// A time of flight, in whole device time units
///
/// Can be slightly negative for very short distances, as the measurement is
/// noisy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeOfFlight(pub i64);

impl TimeOfFlight {
    /// Returns the raw number of device time units
    pub fn device_time(&self) -> i64 {
        self.0
    }

    /// Converts the time of flight into seconds
    pub fn seconds(&self) -> f64 {
        self.0 as f64 * TIME_UNIT_SECONDS
    }

    /// Converts the time of flight into a distance, in metres
    pub fn distance_meters(&self) -> f64 {
        distance_meters(self.seconds())
    }
}

/// Computes the time of flight, in seconds, from the six timestamps of an
/// exchange
pub fn compute_time_of_flight(local: &LocalTimestamps, remote: &FinalTimestamps) -> f64 {
    Intervals::new(local, remote).time_of_flight().seconds()
}

/// Converts a time of flight into a distance, in metres
pub fn distance_meters(time_of_flight: f64) -> f64 {
    time_of_flight * SPEED_OF_LIGHT_AIR
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{Duration, TIME_MAX};

    fn instant(value: u64) -> Instant {
        Instant::new(value).unwrap()
    }

    fn closed_form(ra: f64, rb: f64, da: f64, db: f64) -> f64 {
        (ra * rb - da * db) / (ra + rb + da + db) * TIME_UNIT_SECONDS * SPEED_OF_LIGHT_AIR
    }

    #[test]
    fn equal_intervals_give_zero_distance() {
        let poll_rx = 1_000_000;
        let local = LocalTimestamps {
            poll_rx: instant(poll_rx),
            resp_tx: instant(poll_rx + 1_000_000),
            final_rx: instant(poll_rx + 2_000_000),
        };
        let remote = FinalTimestamps {
            poll_tx: 5_000,
            resp_rx: 1_005_000,
            final_tx: 2_005_000,
        };

        let intervals = Intervals::new(&local, &remote);
        assert_eq!(
            intervals,
            Intervals {
                ra: 1_000_000,
                rb: 1_000_000,
                da: 1_000_000,
                db: 1_000_000,
            }
        );

        let tof = intervals.time_of_flight();
        assert_eq!(tof.device_time(), 0);
        assert_eq!(tof.distance_meters(), 0.0);
        assert_eq!(compute_time_of_flight(&local, &remote), 0.0);
    }

    #[test]
    fn evk_fixture_matches_closed_form() {
        let intervals = Intervals {
            ra: 12_800_000,
            rb: 12_800_400,
            da: 6_400_000,
            db: 6_400_100,
        };

        let tof = intervals.time_of_flight();
        assert_eq!(tof.device_time(), 3_200_074);

        let expected = closed_form(12_800_000.0, 12_800_400.0, 6_400_000.0, 6_400_100.0);
        assert!((tof.distance_meters() - expected).abs() < 0.01);
    }

    #[test]
    fn local_timestamps_wrap_past_32_bits() {
        // A physically consistent exchange over 10 m, with the responder's
        // clock wrapping at 2^32 between poll and final.
        let flight = 2_134; // ~10 m in DTU
        let reply = 203_161_600; // 3100 uus
        let poll_rx = 0xffff_0000;

        let local = LocalTimestamps {
            poll_rx: instant(poll_rx),
            resp_tx: instant(poll_rx + reply),
            final_rx: instant(poll_rx + 2 * reply + 2 * flight),
        };
        let poll_tx: u32 = 0x1234;
        let remote = FinalTimestamps {
            poll_tx,
            resp_rx: poll_tx + reply as u32 + 2 * flight as u32,
            final_tx: poll_tx + 2 * reply as u32 + 2 * flight as u32,
        };

        let tof = Intervals::new(&local, &remote).time_of_flight();
        assert!(tof.device_time() >= 0);
        assert!((tof.device_time() - flight as i64).abs() <= 1);
        assert!((tof.distance_meters() - 10.0).abs() < 0.05);
    }

    #[test]
    fn remote_timestamps_wrap_past_32_bits() {
        let local = LocalTimestamps {
            poll_rx: instant(TIME_MAX - 10),
            resp_tx: instant(TIME_MAX - 10) + Duration::new(500_000).unwrap(),
            final_rx: instant(TIME_MAX - 10) + Duration::new(1_000_640).unwrap(),
        };
        let remote = FinalTimestamps {
            poll_tx: u32::MAX - 5,
            resp_rx: (u32::MAX - 5).wrapping_add(500_640),
            final_tx: (u32::MAX - 5).wrapping_add(1_000_640),
        };

        let tof = Intervals::new(&local, &remote).time_of_flight();
        assert_eq!(tof.device_time(), 320);
    }

    #[test]
    fn clock_drift_is_cancelled() {
        // The initiator's clock runs 10 ppm fast. A single-sided estimate
        // would be off by ~5 DTU per 1 ms of reply time.
        let flight = 1_000.0;
        let reply_b = 65_536_000.0;
        let reply_a = 32_768_000.0;
        let drift = 1.0 + 10e-6;

        let ra = ((2.0 * flight + reply_b) * drift) as u32;
        let da = (reply_a * drift) as u32;
        let rb = (2.0 * flight + reply_a) as u32;
        let db = reply_b as u32;

        let tof = Intervals { ra, rb, da, db }.time_of_flight();
        assert!((tof.device_time() - 1_000).abs() <= 1);
    }

    #[test]
    fn zero_intervals_do_not_divide_by_zero() {
        let tof = Intervals {
            ra: 0,
            rb: 0,
            da: 0,
            db: 0,
        }
        .time_of_flight();

        assert_eq!(tof.device_time(), 0);
    }

    #[test]
    fn distance_uses_speed_of_light_in_air() {
        assert!((distance_meters(1e-9) - 0.299_702_547).abs() < 1e-12);
    }
}
