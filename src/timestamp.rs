//! Device timestamp tracking
//!
//! Devices report a free running 32-bit microsecond counter which wraps
//! roughly every 71 minutes. `TimestampTracker` extends it to a monotonic
//! 64-bit value on the consumer side of a ring.

/// Half the range of the 32-bit device counter
const HALF_RANGE: u32 = 1 << 31;

/// Extends 32-bit device timestamps to 64 bits
///
/// One tracker belongs to the consumer of one ring and must see every
/// timestamp in consumption order.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampTracker {
    last_low: u32,
    high: u32,
    initialized: bool,
}

impl TimestampTracker {
    /// Create a tracker that has not seen any timestamp
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all state, the next timestamp starts a new epoch
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Number of counter wraps observed so far
    pub fn high(&self) -> u32 {
        self.high
    }

    /// Extend a raw device timestamp to 64 bits
    ///
    /// Samples that lie behind the last committed one by more than half the
    /// counter range are forward steps across a wrap. Samples that lie behind
    /// by less are late arrivals: they are placed relative to the last
    /// committed value and leave the tracker state untouched.
    pub fn track(&mut self, raw_us: u32) -> u64 {
        if !self.initialized {
            self.initialized = true;
            self.last_low = raw_us;
            return u64::from(raw_us);
        }

        let delta = raw_us.wrapping_sub(self.last_low);
        if delta < HALF_RANGE {
            if raw_us < self.last_low {
                self.high = self.high.wrapping_add(1);
            }
            self.last_low = raw_us;
            (u64::from(self.high) << 32) | u64::from(raw_us)
        } else {
            let last = (u64::from(self.high) << 32) | u64::from(self.last_low);
            let behind = self.last_low.wrapping_sub(raw_us);
            last.saturating_sub(u64::from(behind))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_timestamp_returned_as_is() {
        let mut t = TimestampTracker::new();
        assert_eq!(t.track(42), 42);
    }

    #[test]
    fn test_forward_increments() {
        let mut t = TimestampTracker::new();
        assert_eq!(t.track(1), 1);
        assert_eq!(t.track(100_000), 100_000);
        assert_eq!(t.track(u32::MAX / 2), u64::from(u32::MAX / 2));
        assert_eq!(t.track(u32::MAX - 2), u64::from(u32::MAX - 2));
        assert_eq!(t.high(), 0);
    }

    #[test]
    fn test_forward_wrap_increments_high() {
        let mut t = TimestampTracker::new();
        assert_eq!(t.track(u32::MAX), u64::from(u32::MAX));
        assert_eq!(t.track(u32::MAX / 2 - 2), u64::from(u32::MAX / 2 - 2) + (1 << 32));
        assert_eq!(t.track(u32::MAX / 2 - 1), u64::from(u32::MAX / 2 - 1) + (1 << 32));
        assert_eq!(t.track(u32::MAX / 2), u64::from(u32::MAX / 2) + (1 << 32));
        assert_eq!(t.high(), 1);
    }

    #[test]
    fn test_wrap_sequence() {
        let mut t = TimestampTracker::new();
        let raw = [4_000_000_000u32, 4_294_967_290, 50, 1000];
        let out: Vec<u64> = raw.iter().map(|&r| t.track(r)).collect();

        assert_eq!(out[0] >> 32, 0);
        assert_eq!(out[1] >> 32, 0);
        assert_eq!(out[2] >> 32, 1);
        assert_eq!(out[3] >> 32, 1);
        for (o, r) in out.iter().zip(raw.iter()) {
            assert_eq!(*o as u32, *r);
        }
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_late_sample_before_wrap_does_not_touch_state() {
        let mut t = TimestampTracker::new();
        assert_eq!(t.track(u32::MAX), u64::from(u32::MAX));
        assert_eq!(t.track(0), 1 << 32);

        // arrives late, from before the wrap
        assert_eq!(t.track(u32::MAX), u64::from(u32::MAX));
        assert_eq!(t.track(u32::MAX - 199), u64::from(u32::MAX - 199));
        assert_eq!(t.high(), 1);

        assert_eq!(t.track(4949), (1 << 32) + 4949);
    }

    #[test]
    fn test_late_sample_within_epoch() {
        let mut t = TimestampTracker::new();
        t.track(u32::MAX);
        assert_eq!(t.track(5000), (1 << 32) + 5000);
        // behind the last sample but after the wrap
        assert_eq!(t.track(100), (1 << 32) + 100);
        assert_eq!(t.track(6000), (1 << 32) + 6000);
    }

    #[test]
    fn test_late_sample_before_first_epoch_saturates() {
        let mut t = TimestampTracker::new();
        t.track(10);
        assert_eq!(t.track(u32::MAX), 0);
        assert_eq!(t.track(20), 20);
    }

    #[test]
    fn test_random_monotonic_sequence() {
        let mut rng = fastrand::Rng::with_seed(7);
        let mut t = TimestampTracker::new();
        let mut truth: u64 = u64::from(rng.u32(..));
        let mut last = t.track(truth as u32);
        assert_eq!(last, truth);

        for _ in 0..10_000 {
            truth += u64::from(rng.u32(..HALF_RANGE));
            let out = t.track(truth as u32);
            assert!(out >= last);
            assert_eq!(out as u32, truth as u32);
            assert_eq!(out, truth);
            last = out;
        }
    }

    #[test]
    fn test_half_range_boundary() {
        // just under half the range ahead is a forward step
        let mut t = TimestampTracker::new();
        t.track(u32::MAX);
        assert_eq!(t.track(0), 1 << 32);
        assert_eq!(t.track(HALF_RANGE - 1), (1 << 32) + u64::from(HALF_RANGE - 1));
        assert_eq!(t.high(), 1);

        // exactly half the range ahead counts as a late sample
        let mut t = TimestampTracker::new();
        t.track(u32::MAX);
        assert_eq!(t.track(0), 1 << 32);
        assert_eq!(t.track(HALF_RANGE), 1 << 31);
        assert_eq!(t.high(), 1);
        assert_eq!(t.track(10), (1 << 32) + 10);
    }

    #[test]
    fn test_reset() {
        let mut t = TimestampTracker::new();
        t.track(u32::MAX);
        t.track(1);
        t.reset();
        assert_eq!(t.track(7), 7);
        assert_eq!(t.high(), 0);
    }
}
