// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    packet::number::PacketNumber,
    recovery::{Bandwidth, RttEstimator},
    time::{Duration, Timestamp},
};

/// A send algorithm.
///
/// The sent-packet manager drives every implementation through these
/// operations; nothing else mutates controller state. `time_until_send`
/// is the send gate: `Some(Duration::ZERO)` permits a packet now,
/// `Some(delay)` permits one after the delay, and `None` blocks until
/// the next ack arrives.
pub trait CongestionController {
    /// Called for every outgoing packet. Returns true if the packet
    /// counts against the congestion window (i.e. is now in flight).
    fn on_packet_sent(
        &mut self,
        now: Timestamp,
        packet_number: PacketNumber,
        bytes: usize,
        is_retransmittable: bool,
    ) -> bool;

    /// Called for each newly acked in-flight packet, in ascending order
    fn on_packet_acked(
        &mut self,
        packet_number: PacketNumber,
        bytes: usize,
        rtt: &RttEstimator,
        now: Timestamp,
    );

    /// Called for each packet the loss detector reports
    fn on_packet_lost(&mut self, packet_number: PacketNumber, bytes: usize, now: Timestamp);

    /// Called when an in-flight packet stops counting against the
    /// window without being acked or lost (e.g. it was superseded by a
    /// retransmission)
    fn on_packet_abandoned(&mut self, bytes: usize);

    /// Called when the retransmission timer fires as an RTO.
    /// `packets_retransmitted` reports whether any data was actually
    /// replayed.
    fn on_retransmission_timeout(&mut self, packets_retransmitted: bool);

    /// Called whenever the RTT estimate gains a sample
    fn on_rtt_update(&mut self, rtt: &RttEstimator);

    /// May `bytes_in_flight` grow right now?
    fn time_until_send(&self, now: Timestamp, has_retransmittable: bool) -> Option<Duration>;

    fn bandwidth_estimate(&self, rtt: &RttEstimator) -> Bandwidth;

    fn congestion_window_bytes(&self) -> u64;

    /// The base retransmission timeout this algorithm suggests
    fn retransmission_delay(&self, rtt: &RttEstimator) -> Duration;

    fn bytes_in_flight(&self) -> u64;
}
