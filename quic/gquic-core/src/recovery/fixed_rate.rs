// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    counter::Counter,
    packet::number::PacketNumber,
    recovery::{Bandwidth, CongestionController, LeakyBucket, RttEstimator, MAX_SEGMENT_SIZE},
    time::{Duration, Timestamp},
};

/// How much sending the window admits ahead of the drain rate
const WINDOW_PERIOD: Duration = Duration::from_millis(10);

/// A sender that ignores congestion signals and emits at a fixed
/// configured rate through a leaky bucket.
///
/// The baseline algorithm for tests and controlled environments: the
/// window is whatever the rate transfers in 10ms, floored at one
/// segment.
#[derive(Clone, Debug)]
pub struct FixedRateSender {
    rate: Bandwidth,
    bucket: LeakyBucket,
    bytes_in_flight: Counter<u64>,
}

impl FixedRateSender {
    pub fn new(rate: Bandwidth) -> Self {
        Self {
            rate,
            bucket: LeakyBucket::new(rate),
            bytes_in_flight: Counter::<u64>::new(0),
        }
    }

    pub fn set_rate(&mut self, now: Timestamp, rate: Bandwidth) {
        self.rate = rate;
        self.bucket.set_drain_rate(now, rate);
    }

    fn window_bytes(&self) -> u64 {
        self.rate.bytes_per_period(WINDOW_PERIOD).max(MAX_SEGMENT_SIZE)
    }
}

impl CongestionController for FixedRateSender {
    fn on_packet_sent(
        &mut self,
        now: Timestamp,
        _packet_number: PacketNumber,
        bytes: usize,
        is_retransmittable: bool,
    ) -> bool {
        self.bucket.add(now, bytes as u64);
        if !is_retransmittable {
            return false;
        }
        self.bytes_in_flight += bytes as u64;
        true
    }

    fn on_packet_acked(
        &mut self,
        _packet_number: PacketNumber,
        bytes: usize,
        _rtt: &RttEstimator,
        _now: Timestamp,
    ) {
        self.bytes_in_flight -= bytes as u64;
    }

    fn on_packet_lost(&mut self, _packet_number: PacketNumber, bytes: usize, _now: Timestamp) {
        // losses don't change a fixed rate
        self.bytes_in_flight -= bytes as u64;
    }

    fn on_packet_abandoned(&mut self, bytes: usize) {
        self.bytes_in_flight -= bytes as u64;
    }

    fn on_retransmission_timeout(&mut self, _packets_retransmitted: bool) {}

    fn on_rtt_update(&mut self, _rtt: &RttEstimator) {}

    fn time_until_send(&self, now: Timestamp, _has_retransmittable: bool) -> Option<Duration> {
        let window = self.window_bytes();

        if self.bucket.bytes_pending(now) < window {
            if *self.bytes_in_flight >= window {
                // the bucket has headroom but the flight is full; only
                // an ack opens it again
                return None;
            }
            return Some(Duration::ZERO);
        }

        Some(self.bucket.time_remaining(now))
    }

    fn bandwidth_estimate(&self, _rtt: &RttEstimator) -> Bandwidth {
        self.rate
    }

    fn congestion_window_bytes(&self) -> u64 {
        self.window_bytes()
    }

    fn retransmission_delay(&self, rtt: &RttEstimator) -> Duration {
        if !rtt.has_samples() {
            return Duration::ZERO;
        }
        rtt.smoothed_rtt() + 4 * rtt.mean_deviation()
    }

    fn bytes_in_flight(&self) -> u64 {
        *self.bytes_in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{Clock, NoopClock};

    #[test]
    fn window_is_ten_milliseconds_of_rate() {
        let sender = FixedRateSender::new(Bandwidth::from_bytes_per_second(1_000_000));
        assert_eq!(sender.congestion_window_bytes(), 10_000);

        // slow rates floor at one segment
        let sender = FixedRateSender::new(Bandwidth::from_bytes_per_second(100));
        assert_eq!(sender.congestion_window_bytes(), MAX_SEGMENT_SIZE);
    }

    #[test]
    fn sending_fills_the_bucket() {
        let mut sender = FixedRateSender::new(Bandwidth::from_bytes_per_second(100_000));
        let mut now = NoopClock.get_time();

        assert_eq!(sender.time_until_send(now, true), Some(Duration::ZERO));

        // window is 1000 bytes; filling it forces a drain wait
        sender.on_packet_sent(now, PacketNumber::new(1), 600, true);
        assert_eq!(sender.time_until_send(now, true), Some(Duration::ZERO));
        sender.on_packet_sent(now, PacketNumber::new(2), 600, true);
        let delay = sender.time_until_send(now, true).unwrap();
        assert!(delay > Duration::ZERO);

        // after draining, sending reopens
        now += delay;
        assert_eq!(sender.time_until_send(now, true), Some(Duration::ZERO));
    }

    #[test]
    fn full_flight_waits_for_acks() {
        let mut sender = FixedRateSender::new(Bandwidth::from_bytes_per_second(100_000));
        let mut now = NoopClock.get_time();

        sender.on_packet_sent(now, PacketNumber::new(1), 1000, true);
        now += Duration::from_millis(20);

        // bucket drained, but a full window is outstanding
        assert_eq!(sender.time_until_send(now, true), None);

        let rtt = RttEstimator::new();
        sender.on_packet_acked(PacketNumber::new(1), 1000, &rtt, now);
        assert_eq!(sender.time_until_send(now, true), Some(Duration::ZERO));
    }
}
