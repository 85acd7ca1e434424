// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    counter::Counter,
    packet::number::PacketNumber,
    recovery::{
        Bandwidth, CongestionController, Cubic, HybridSlowStart, Prr, RttEstimator,
        MAX_SEGMENT_SIZE,
    },
    time::{Duration, Timestamp},
};

/// The smallest window a fast-retransmission cutback leaves behind.
/// The window after a timeout is still 1.
const MINIMUM_CONGESTION_WINDOW: u64 = 2;

/// The window after a retransmission timeout
const RTO_CONGESTION_WINDOW: u64 = 2;

/// The initial window in segments
const INITIAL_CONGESTION_WINDOW: u64 = 10;

/// Hybrid slow start only engages above this window
const HYBRID_START_LOW_WINDOW: u64 = 16;

/// The window is treated as utilized when the headroom falls below
/// this many segments
const MAX_BURST_LENGTH: u64 = 3;

/// A TCP-derived send algorithm: slow start with a hybrid exit
/// detector, then Reno or Cubic congestion avoidance, with PRR pacing
/// the window back open during recovery.
///
/// The window is counted in segments of [`MAX_SEGMENT_SIZE`] bytes.
#[derive(Clone, Debug)]
pub struct TcpSender {
    hybrid_slow_start: HybridSlowStart,
    cubic: Cubic,
    prr: Prr,
    /// Use classic Reno congestion avoidance instead of Cubic
    reno: bool,

    /// Window in segments
    congestion_window: u64,
    /// Slow start threshold in segments
    slowstart_threshold: u64,
    /// Upper bound on the window in segments
    max_congestion_window: u64,
    /// Acks seen since the window last grew (Reno only)
    congestion_window_count: u64,

    bytes_in_flight: Counter<u64>,

    largest_sent: PacketNumber,
    largest_acked: PacketNumber,
    /// The newest packet outstanding when the window was last cut.
    /// Losses at or below this point belong to the same event.
    largest_sent_at_last_cutback: PacketNumber,

    /// End of the current hybrid slow start round
    round_trip_end: PacketNumber,
}

impl TcpSender {
    pub fn new(reno: bool, max_congestion_window: u64) -> Self {
        Self {
            hybrid_slow_start: HybridSlowStart::new(),
            cubic: Cubic::new(),
            prr: Prr::new(),
            reno,
            congestion_window: INITIAL_CONGESTION_WINDOW,
            slowstart_threshold: max_congestion_window,
            max_congestion_window,
            congestion_window_count: 0,
            bytes_in_flight: Counter::<u64>::new(0),
            largest_sent: PacketNumber::ZERO,
            largest_acked: PacketNumber::ZERO,
            largest_sent_at_last_cutback: PacketNumber::ZERO,
            round_trip_end: PacketNumber::ZERO,
        }
    }

    #[inline]
    fn in_slow_start(&self) -> bool {
        self.congestion_window < self.slowstart_threshold
    }

    #[inline]
    fn in_recovery(&self) -> bool {
        self.largest_acked <= self.largest_sent_at_last_cutback
            && self.largest_acked != PacketNumber::ZERO
            && self.largest_sent_at_last_cutback != PacketNumber::ZERO
    }

    #[inline]
    fn available_send_window(&self) -> u64 {
        self.congestion_window_bytes()
            .saturating_sub(*self.bytes_in_flight)
    }

    /// The window only grows when it is close to being used; growing an
    /// idle window just stores up a burst.
    #[inline]
    fn is_cwnd_limited(&self) -> bool {
        let congestion_window = self.congestion_window_bytes();
        if *self.bytes_in_flight >= congestion_window {
            return true;
        }
        let headroom = congestion_window - *self.bytes_in_flight;
        headroom <= MAX_BURST_LENGTH * MAX_SEGMENT_SIZE
    }

    fn maybe_increase_cwnd(&mut self, acked: PacketNumber, rtt: &RttEstimator, now: Timestamp) {
        if !self.is_cwnd_limited() {
            return;
        }

        if acked <= self.largest_sent_at_last_cutback {
            // no growth while recovering
            return;
        }

        if self.in_slow_start() {
            if self.hybrid_slow_start.is_end_of_round(acked) {
                self.round_trip_end = self.largest_sent;
                self.hybrid_slow_start.start_round(self.round_trip_end);
            }
            if self.congestion_window < self.max_congestion_window {
                // exponential growth: one segment per ack
                self.congestion_window += 1;
            }
            return;
        }

        if self.congestion_window >= self.max_congestion_window {
            return;
        }

        if self.reno {
            // classic Reno: one segment per full window of acks
            self.congestion_window_count += 1;
            if self.congestion_window_count >= self.congestion_window {
                self.congestion_window += 1;
                self.congestion_window_count = 0;
            }
        } else {
            self.congestion_window = self
                .cubic
                .congestion_window_after_ack(self.congestion_window, rtt.min_rtt(), now)
                .min(self.max_congestion_window);
        }
    }
}

impl CongestionController for TcpSender {
    fn on_packet_sent(
        &mut self,
        _now: Timestamp,
        packet_number: PacketNumber,
        bytes: usize,
        is_retransmittable: bool,
    ) -> bool {
        if !is_retransmittable {
            return false;
        }

        self.bytes_in_flight += bytes as u64;
        if self.in_recovery() {
            self.prr.on_packet_sent(bytes as u64);
        }
        if self.largest_sent < packet_number {
            self.largest_sent = packet_number;
        }
        true
    }

    fn on_packet_acked(
        &mut self,
        packet_number: PacketNumber,
        bytes: usize,
        rtt: &RttEstimator,
        now: Timestamp,
    ) {
        self.bytes_in_flight -= bytes as u64;
        self.largest_acked = self.largest_acked.max(packet_number);

        if self.in_recovery() {
            self.prr.on_packet_acked(bytes as u64);
        }

        self.maybe_increase_cwnd(packet_number, rtt, now);
    }

    fn on_packet_lost(&mut self, packet_number: PacketNumber, bytes: usize, _now: Timestamp) {
        self.bytes_in_flight -= bytes as u64;

        //= https://www.rfc-editor.org/rfc/rfc6582#section-3.2
        //# losses in packets already sent when the cutback happened
        //# belong to the same congestion event
        if packet_number <= self.largest_sent_at_last_cutback {
            return;
        }

        self.prr.on_loss(*self.bytes_in_flight + bytes as u64);

        if self.reno {
            self.congestion_window /= 2;
        } else {
            self.congestion_window = self
                .cubic
                .congestion_window_after_packet_loss(self.congestion_window);
        }
        self.congestion_window = self.congestion_window.max(MINIMUM_CONGESTION_WINDOW);

        self.slowstart_threshold = self.congestion_window;
        self.largest_sent_at_last_cutback = self.largest_sent;
        self.congestion_window_count = 0;
    }

    fn on_packet_abandoned(&mut self, bytes: usize) {
        self.bytes_in_flight -= bytes as u64;
    }

    fn on_retransmission_timeout(&mut self, packets_retransmitted: bool) {
        self.largest_sent_at_last_cutback = PacketNumber::ZERO;
        if packets_retransmitted {
            self.cubic.reset();
            self.slowstart_threshold = self.congestion_window / 2;
            self.congestion_window = RTO_CONGESTION_WINDOW;
        }
    }

    fn on_rtt_update(&mut self, rtt: &RttEstimator) {
        // hybrid slow start only pays off once the window is large
        // enough for queue growth to show up in the samples
        if self.in_slow_start() && self.congestion_window >= HYBRID_START_LOW_WINDOW {
            if !self.hybrid_slow_start.is_started() {
                self.round_trip_end = self.largest_sent;
                self.hybrid_slow_start.start_round(self.round_trip_end);
            }
            if self
                .hybrid_slow_start
                .on_rtt_sample(rtt.latest_rtt(), rtt.min_rtt())
            {
                self.slowstart_threshold = self.congestion_window;
            }
        }
    }

    fn time_until_send(&self, _now: Timestamp, has_retransmittable: bool) -> Option<Duration> {
        if !has_retransmittable {
            // acks and probes may always leave immediately
            return Some(Duration::ZERO);
        }

        if self.in_recovery() {
            return if self.prr.can_send(
                self.congestion_window_bytes(),
                *self.bytes_in_flight,
                self.slowstart_threshold * MAX_SEGMENT_SIZE,
            ) {
                Some(Duration::ZERO)
            } else {
                None
            };
        }

        if self.available_send_window() > 0 {
            Some(Duration::ZERO)
        } else {
            None
        }
    }

    fn bandwidth_estimate(&self, rtt: &RttEstimator) -> Bandwidth {
        Bandwidth::from_bytes_and_period(self.congestion_window_bytes(), rtt.smoothed_or_initial())
    }

    fn congestion_window_bytes(&self) -> u64 {
        self.congestion_window * MAX_SEGMENT_SIZE
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
