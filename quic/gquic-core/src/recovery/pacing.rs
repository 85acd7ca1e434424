// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    packet::number::PacketNumber,
    recovery::{Bandwidth, CongestionController, LeakyBucket, RttEstimator, MAX_SEGMENT_SIZE},
    time::{Duration, Timestamp},
};

/// A short burst is allowed through without pacing delay
const BURST_SEGMENTS: u64 = 2;

/// Delays this close to now are scheduling noise, not pacing decisions
const MAX_SCHEDULING_DELAY: Duration = Duration::from_millis(2);

/// Spreads a congestion controller's bursts evenly over time.
///
/// Wraps any [`CongestionController`] and leaks sent bytes out of a
/// bucket at the controller's estimated bandwidth. Within the
/// scheduling window the inner controller's answer stands; beyond it
/// the bucket's refill time takes over.
#[derive(Clone, Debug)]
pub struct Pacer<C> {
    inner: C,
    bucket: LeakyBucket,
}

impl<C: CongestionController> Pacer<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            bucket: LeakyBucket::new(Bandwidth::ZERO),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    /// The bucket drains at the inner controller's estimate, falling
    /// back to cwnd over the smoothed RTT when there is none
    fn refresh_drain_rate(&mut self, rtt: &RttEstimator, now: Timestamp) {
        let mut rate = self.inner.bandwidth_estimate(rtt);
        if rate.is_zero() {
            rate = Bandwidth::from_bytes_and_period(
                self.inner.congestion_window_bytes(),
                rtt.smoothed_or_initial(),
            );
        }
        if rate != self.bucket.drain_rate() {
            self.bucket.set_drain_rate(now, rate);
        }
    }

    fn pacing_window(&self) -> u64 {
        let accuracy_window = self
            .bucket
            .drain_rate()
            .bytes_per_period(MAX_SCHEDULING_DELAY);
        accuracy_window.max(BURST_SEGMENTS * MAX_SEGMENT_SIZE)
    }
}

impl<C: CongestionController> CongestionController for Pacer<C> {
    fn on_packet_sent(
        &mut self,
        now: Timestamp,
        packet_number: PacketNumber,
        bytes: usize,
        is_retransmittable: bool,
    ) -> bool {
        self.bucket.add(now, bytes as u64);
        self.inner
            .on_packet_sent(now, packet_number, bytes, is_retransmittable)
    }

    fn on_packet_acked(
        &mut self,
        packet_number: PacketNumber,
        bytes: usize,
        rtt: &RttEstimator,
        now: Timestamp,
    ) {
        self.inner.on_packet_acked(packet_number, bytes, rtt, now);
        self.refresh_drain_rate(rtt, now);
    }

    fn on_packet_lost(&mut self, packet_number: PacketNumber, bytes: usize, now: Timestamp) {
        self.inner.on_packet_lost(packet_number, bytes, now);
    }

    fn on_packet_abandoned(&mut self, bytes: usize) {
        self.inner.on_packet_abandoned(bytes);
    }

    fn on_retransmission_timeout(&mut self, packets_retransmitted: bool) {
        self.inner.on_retransmission_timeout(packets_retransmitted);
    }

    fn on_rtt_update(&mut self, rtt: &RttEstimator) {
        self.inner.on_rtt_update(rtt);
    }

    fn time_until_send(&self, now: Timestamp, has_retransmittable: bool) -> Option<Duration> {
        let delay = self.inner.time_until_send(now, has_retransmittable)?;

        if delay >= MAX_SCHEDULING_DELAY {
            return Some(delay);
        }

        if self.bucket.bytes_pending(now) < self.pacing_window() {
            // the pacing window isn't full yet; let the burst through
            return Some(delay);
        }

        Some(self.bucket.time_remaining(now).max(delay))
    }

    fn bandwidth_estimate(&self, rtt: &RttEstimator) -> Bandwidth {
        self.inner.bandwidth_estimate(rtt)
    }

    fn congestion_window_bytes(&self) -> u64 {
        self.inner.congestion_window_bytes()
    }

    fn retransmission_delay(&self, rtt: &RttEstimator) -> Duration {
        self.inner.retransmission_delay(rtt)
    }

    fn bytes_in_flight(&self) -> u64 {
        self.inner.bytes_in_flight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        recovery::TcpSender,
        time::{Clock, NoopClock},
    };

    const MSS: usize = MAX_SEGMENT_SIZE as usize;

    fn pacer() -> Pacer<TcpSender> {
        Pacer::new(TcpSender::new(true, 1000))
    }

    #[test]
    fn small_bursts_pass_through() {
        let mut subject = pacer();
        let now = NoopClock.get_time();

        assert_eq!(subject.time_until_send(now, true), Some(Duration::ZERO));
        subject.on_packet_sent(now, PacketNumber::new(1), MSS, true);
        assert_eq!(subject.time_until_send(now, true), Some(Duration::ZERO));
    }

    #[test]
    fn sustained_sending_gets_paced() {
        let mut subject = pacer();
        let mut now = NoopClock.get_time();
        let rtt = {
            let mut rtt = RttEstimator::new();
            rtt.update(Duration::from_millis(100), Duration::ZERO);
            rtt
        };

        // establish a drain rate
        subject.on_packet_sent(now, PacketNumber::new(1), MSS, true);
        subject.on_packet_acked(PacketNumber::new(1), MSS, &rtt, now);

        // a burst beyond the pacing window starts accruing delay
        let mut pn = 2;
        let mut delay = Duration::ZERO;
        for _ in 0..8 {
            subject.on_packet_sent(now, PacketNumber::new(pn), MSS, true);
            pn += 1;
            if let Some(next) = subject.time_until_send(now, true) {
                delay = delay.max(next);
            }
        }
        assert!(delay > Duration::ZERO, "pacer never slowed the burst");

        // waiting out the delay reopens the gate
        now += delay;
        assert_eq!(subject.time_until_send(now, true), Some(Duration::ZERO));
    }
}
