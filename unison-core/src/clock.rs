use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Monotonic reference-time provider shared (by agreement) across peers.
/// All event ordering and position projection derives from this value.
pub trait ReferenceClock: Send + Sync {
    /// Current reference time in integer milliseconds.
    fn now_ms(&self) -> u64;
}

/// Wall-clock backed provider. Good enough when all participants trust the
/// host clock; pair with [`OffsetClock`] when syncing against a time server.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ReferenceClock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64
    }
}

/// Offset and round-trip estimate from one NTP-style exchange.
#[derive(Debug, Clone, Copy)]
pub struct ClockSample {
    pub offset_ms: i64,
    pub rtt_ms: u64,
}

impl ClockSample {
    /// Estimate offset and RTT from a four-timestamp exchange.
    /// t0: client send time
    /// t1: server receive time
    /// t2: server transmit time
    /// t3: client receive time
    pub fn estimate(t0: u64, t1: u64, t2: u64, t3: u64) -> Self {
        let rtt_ms = (t3 - t0) - (t2 - t1);
        let offset_ms = ((t1 as i64 - t0 as i64) + (t2 as i64 - t3 as i64)) / 2;

        Self { offset_ms, rtt_ms }
    }
}

/// Applies a measured offset to an inner clock, yielding reference time.
#[derive(Debug, Clone)]
pub struct OffsetClock<C> {
    inner: C,
    offset_ms: i64,
}

impl<C> OffsetClock<C> {
    pub fn new(inner: C, offset_ms: i64) -> Self {
        Self { inner, offset_ms }
    }

    pub fn from_sample(inner: C, sample: ClockSample) -> Self {
        Self::new(inner, sample.offset_ms)
    }

    /// Replace the offset after a fresh exchange.
    pub fn set_offset(&mut self, offset_ms: i64) {
        self.offset_ms = offset_ms;
    }
}

impl<C: ReferenceClock> ReferenceClock for OffsetClock<C> {
    fn now_ms(&self) -> u64 {
        (self.inner.now_ms() as i64 + self.offset_ms).max(0) as u64
    }
}

/// Correlation id stamped on outbound sends so a command can be followed
/// through every peer's logs.
pub fn correlation_id(now_ms: u64) -> String {
    format!("{:x}-{}", now_ms, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_exchange_has_zero_offset() {
        let t0 = 1000;
        let t1 = 1100; // Latency 100ms, server time = client time
        let t2 = 1200; // Processing 100ms
        let t3 = 1300; // Latency 100ms

        let sample = ClockSample::estimate(t0, t1, t2, t3);
        assert_eq!(sample.rtt_ms, 200);
        assert_eq!(sample.offset_ms, 0);
    }

    #[test]
    fn estimate_recovers_a_known_offset() {
        // Server is ahead by 500ms
        let offset_real = 500;
        let latency = 50;

        let t0 = 1000;
        let t1 = 1000 + offset_real + latency; // 1550
        let t2 = t1 + 10; // Processing 10ms
        let t3 = t0 + latency + 10 + latency; // 1110

        let sample = ClockSample::estimate(t0, t1, t2, t3);
        assert_eq!(sample.rtt_ms, 100);
        assert_eq!(sample.offset_ms, 500);
    }

    struct FixedClock(u64);

    impl ReferenceClock for FixedClock {
        fn now_ms(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn offset_clock_shifts_reference_time() {
        let ahead = OffsetClock::new(FixedClock(10_000), 250);
        assert_eq!(ahead.now_ms(), 10_250);

        let behind = OffsetClock::new(FixedClock(10_000), -300);
        assert_eq!(behind.now_ms(), 9_700);

        // A negative offset larger than the inner time clamps at zero rather
        // than wrapping.
        let clamped = OffsetClock::new(FixedClock(100), -500);
        assert_eq!(clamped.now_ms(), 0);
    }

    #[test]
    fn correlation_ids_embed_the_timestamp() {
        let id = correlation_id(0x2af8);
        assert!(id.starts_with("2af8-"));
        assert_ne!(correlation_id(1), correlation_id(1));
    }
}
