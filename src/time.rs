//! Time-related types based on the DW1000's system time
//!
//! All on-air arithmetic is done in device time units (DTU). One DTU is
//! 1 / (128 * 499.2 MHz), roughly 15.65 ps.

use core::ops::{Add, Sub};

#[cfg(feature = "defmt")]
use defmt::Format;

/// The maximum value of 40-bit system time stamps.
pub const TIME_MAX: u64 = 0xffffffffff;

/// Conversion factor from UWB microseconds (1.0256 us) to device time units
pub const UUS_TO_DEVICE_TIME: u64 = 65536;

/// The duration of one device time unit, in seconds
pub const TIME_UNIT_SECONDS: f64 = 1.0 / 499.2e6 / 128.0;

/// Represents an instant in time
///
/// Internally uses the same 40-bit timestamps that the DW1000 uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
pub struct Instant(u64);

impl Instant {
    /// Creates a new instance of `Instant`
    ///
    /// The given value must fit in a 40-bit timestamp, so:
    /// 0 <= `value` <= 2^40 - 1
    ///
    /// Returns `Some(...)`, if `value` is within the valid range, `None` if it
    /// isn't.
    ///
    /// # Example
    ///
    /// ``` rust
    /// use dw1000_twr::time::{
    ///     TIME_MAX,
    ///     Instant,
    /// };
    ///
    /// let valid_instant   = Instant::new(TIME_MAX);
    /// let invalid_instant = Instant::new(TIME_MAX + 1);
    ///
    /// assert!(valid_instant.is_some());
    /// assert!(invalid_instant.is_none());
    /// ```
    pub fn new(value: u64) -> Option<Self> {
        if value <= TIME_MAX {
            Some(Instant(value))
        } else {
            None
        }
    }

    /// Creates an `Instant` from a register value, discarding bits above 40
    pub fn from_register(value: u64) -> Self {
        Instant(value & TIME_MAX)
    }

    /// Returns the raw 40-bit timestamp
    ///
    /// The returned value is guaranteed to be in the following range:
    /// 0 <= `value` <= 2^40 - 1
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the low-order 32 bits of the timestamp
    ///
    /// Differences between two truncated timestamps are correct as long as
    /// the real instants are less than 2^32 DTU (about 67 ms) apart, even if
    /// the clock wrapped in between.
    pub fn low32(&self) -> u32 {
        self.0 as u32
    }

    /// Returns the amount of time passed between the two `Instant`s
    ///
    /// Assumes that `&self` represents a later time than the argument
    /// `earlier`. Please make sure that this is the case, as this method has no
    /// way of knowing (DW1000 timestamps can overflow, so comparing the
    /// numerical value of the timestamp doesn't tell anything about order).
    ///
    /// # Example
    ///
    /// ``` rust
    /// use dw1000_twr::time::{
    ///     TIME_MAX,
    ///     Instant,
    /// };
    ///
    /// let instant_1 = Instant::new(TIME_MAX - 50).unwrap();
    /// let instant_2 = Instant::new(TIME_MAX).unwrap();
    /// let instant_3 = Instant::new(49).unwrap();
    ///
    /// let duration = instant_2.duration_since(instant_1);
    /// assert_eq!(duration.value(), 50);
    ///
    /// // Still works as expected, if the later timestamp is the numerically
    /// // smaller value.
    /// let duration = instant_3.duration_since(instant_2);
    /// assert_eq!(duration.value(), 50);
    /// ```
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        Duration(self.0.wrapping_sub(earlier.0) & TIME_MAX)
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Self::Output {
        // Both operands are 40-bit numbers, so the sum fits easily in a u64.
        Instant((self.0 + rhs.0) & TIME_MAX)
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Self::Output {
        Instant(self.0.wrapping_sub(rhs.0) & TIME_MAX)
    }
}

/// A duration between two instants in DW1000 system time
///
/// Internally uses the same 40-bit timestamps that the DW1000 uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
pub struct Duration(u64);

impl Duration {
    /// Creates a new instance of `Duration`
    ///
    /// The given value must fit in a 40-bit timestamp, so:
    /// 0 <= `value` <= 2^40 - 1
    ///
    /// Returns `Some(...)`, if `value` is within the valid range, `None` if it
    /// isn't.
    pub fn new(value: u64) -> Option<Self> {
        if value <= TIME_MAX {
            Some(Duration(value))
        } else {
            None
        }
    }

    /// Creates a `Duration` from a number of UWB microseconds
    ///
    /// One UWB microsecond is 512 / 499.2 us, which is exactly 65536 device
    /// time units.
    ///
    /// ``` rust
    /// use dw1000_twr::time::Duration;
    ///
    /// assert_eq!(Duration::from_uus(3100).value(), 3100 * 65536);
    /// ```
    pub fn from_uus(uus: u16) -> Self {
        // At most 16 + 16 bits, well within 40 bits.
        Duration(uus as u64 * UUS_TO_DEVICE_TIME)
    }

    /// Creates an instance of `Duration` from a number of nanoseconds, rounding to the nearest
    ///
    /// One nanosecond is 63.8976 DW1000 time units. We do this with fixed
    /// point arithmetic, where (dividend + (divisor / 2)) / divisor
    pub fn from_nanos(nanos: u32) -> Self {
        // `nanos` takes up at most 32 bits before it is cast to `u64`. That
        // means the result of the multiplication fits within 38 bits.
        Duration((nanos as u64 * 638976 + 5000) / 10000)
    }

    /// Returns the raw 40-bit timestamp
    ///
    /// The returned value is guaranteed to be in the following range:
    /// 0 <= `value` <= 2^40 - 1
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A send time in the format of the delayed send register
///
/// The DW1000 ignores the low 9 bits of a delayed send time, so the register
/// only takes bits 8 to 39 of the 40-bit instant. Bit 0 of this value (bit 8
/// of the instant) is always cleared, so the instant this value stands for
/// has a resolution of 512 DTU (about 8 ns).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct DelayedTime(u32);

impl DelayedTime {
    /// Computes the delayed send time `delay` after `reference`
    ///
    /// ``` rust
    /// use dw1000_twr::time::{DelayedTime, Duration, Instant};
    ///
    /// let poll_rx = Instant::new(1_000_000).unwrap();
    /// let send_at = DelayedTime::after(poll_rx, Duration::from_uus(3100));
    ///
    /// assert_eq!(send_at.value(), 797_506);
    /// assert_eq!(send_at.instant().value() % 512, 0);
    /// ```
    pub fn after(reference: Instant, delay: Duration) -> Self {
        let target = reference + delay;
        DelayedTime(((target.value() >> 8) as u32) & !1)
    }

    /// Returns the raw register value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Returns the 40-bit instant the transmission will start at
    ///
    /// This doesn't include the TX antenna delay, which the DW1000 adds to
    /// the timestamp it records for the transmission.
    pub fn instant(&self) -> Instant {
        Instant((self.0 as u64) << 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_add_duration() {
        let instant = Instant::new(0).unwrap();
        let duration = Duration::new(1).unwrap();

        let result = instant + duration;

        assert_eq!(result.value(), 1);
    }

    #[test]
    fn instant_add_duration_wraps() {
        let instant = Instant::new(TIME_MAX).unwrap();
        let duration = Duration::new(2).unwrap();

        let result = instant + duration;

        assert_eq!(result.value(), 1);
    }

    #[test]
    fn instant_sub_duration() {
        let instant = Instant::new(1).unwrap();
        let duration = Duration::new(2).unwrap();

        let result = instant - duration;

        assert_eq!(result.value(), TIME_MAX);
    }

    #[test]
    fn instant_duration_since() {
        let instant_1 = Instant::new(1).unwrap();
        let instant_2 = Instant::new(0).unwrap();

        let result = instant_1.duration_since(instant_2);

        assert_eq!(result.value(), 1);
    }

    #[test]
    fn instant_low32_wraps_with_clock() {
        let before = Instant::new(0xff_ffff_fff0).unwrap();
        let after = before + Duration::new(0x20).unwrap();

        assert_eq!(after.low32().wrapping_sub(before.low32()), 0x20);
    }

    #[test]
    fn register_values_are_masked() {
        let instant = Instant::from_register(0xab_0000_0000_0001);

        assert_eq!(instant.value(), 1);
    }

    #[test]
    fn duration_from_nanos() {
        let duration = Duration::from_nanos(1);

        assert_eq!(duration.value(), 64);

        let duration = Duration::from_nanos(6);

        assert_eq!(duration.value(), 383);
    }

    #[test]
    fn delayed_time_clears_low_nine_bits() {
        let reference = Instant::new(0x12_3456_7fff).unwrap();
        let delayed = DelayedTime::after(reference, Duration::from_uus(1));

        assert_eq!(delayed.instant().value() & 0x1ff, 0);
        // Never later than the requested time, at most 511 DTU earlier.
        let requested = reference + Duration::from_uus(1);
        assert!(requested.duration_since(delayed.instant()).value() < 512);
    }

    #[test]
    fn delayed_time_wraps_past_40_bits() {
        let reference = Instant::new(TIME_MAX - 100).unwrap();
        let delayed = DelayedTime::after(reference, Duration::from_uus(10));

        assert_eq!(delayed.instant().value(), ((10 * 65536 - 101) >> 9) << 9);
    }
}
