// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Received-packet tracking and ack generation.

use gquic_core::{
    frame::{ack::AckRanges, Ack},
    packet::number::PacketNumber,
    time::{Duration, Timestamp},
    ufloat16::Ufloat16,
};

/// Retransmittable packets received before an ack must leave
const MAX_PACKETS_BEFORE_ACK: u32 = 2;

/// The most receive timestamps reported per ack frame
const MAX_TIMESTAMPS: usize = 255;

/// Tracks which packets arrived and decides when to ack them.
///
/// Acks ride along with outgoing data whenever possible; otherwise a
/// delayed-ack timer bounded by `min(max_ack_delay, srtt / 4)` forces
/// one out.
#[derive(Debug)]
pub struct ReceivedPacketManager {
    ranges: AckRanges,
    largest_received: PacketNumber,
    largest_received_time: Option<Timestamp>,
    /// Arrival times since the last ack left, newest packets last
    receive_times: Vec<(PacketNumber, Timestamp)>,
    /// The first arrival on the connection anchors the timestamp epoch
    epoch: Option<Timestamp>,

    /// Retransmittable packets seen since the last ack left
    packets_since_ack: u32,
    ack_pending: bool,
    delayed_ack_deadline: Option<Timestamp>,

    max_ack_delay: Duration,
}

impl ReceivedPacketManager {
    pub fn new(max_ack_delay: Duration) -> Self {
        Self {
            ranges: AckRanges::new(),
            largest_received: PacketNumber::ZERO,
            largest_received_time: None,
            receive_times: Vec::new(),
            epoch: None,
            packets_since_ack: 0,
            ack_pending: false,
            delayed_ack_deadline: None,
            max_ack_delay,
        }
    }

    /// The anchor for truncated packet number reconstruction
    #[inline]
    pub fn largest_received(&self) -> PacketNumber {
        self.largest_received
    }

    /// Records an arrival. Returns false for duplicates, which must not
    /// be processed again.
    pub fn record(
        &mut self,
        packet_number: PacketNumber,
        is_retransmittable: bool,
        now: Timestamp,
        smoothed_rtt: Duration,
    ) -> bool {
        if self.ranges.contains(packet_number) {
            return false;
        }

        self.ranges.insert(packet_number);
        self.epoch.get_or_insert(now);

        if packet_number > self.largest_received {
            self.largest_received = packet_number;
            self.largest_received_time = Some(now);
        }

        if self.receive_times.len() < MAX_TIMESTAMPS {
            self.receive_times.push((packet_number, now));
        }

        if is_retransmittable {
            self.mark_ack_eliciting(now, smoothed_rtt);
        }

        true
    }

    /// The packet recorded last carried retransmittable frames, so the
    /// peer expects an ack for it. Called separately when the frame
    /// contents only become known after the packet is recorded.
    pub fn mark_ack_eliciting(&mut self, now: Timestamp, smoothed_rtt: Duration) {
        self.packets_since_ack += 1;

        if self.packets_since_ack >= MAX_PACKETS_BEFORE_ACK {
            // enough data arrived; ack on the next write
            self.ack_pending = true;
            self.delayed_ack_deadline = None;
        } else if self.delayed_ack_deadline.is_none() {
            let delay = if smoothed_rtt.is_zero() {
                self.max_ack_delay
            } else {
                self.max_ack_delay.min(smoothed_rtt / 4)
            };
            self.delayed_ack_deadline = Some(now + delay);
        }
    }

    /// The peer will never retransmit below `least_unacked`; stop
    /// reporting those ranges
    pub fn on_stop_waiting(&mut self, least_unacked: PacketNumber) {
        self.ranges.remove_below(least_unacked);
        self.receive_times
            .retain(|(packet_number, _)| *packet_number >= least_unacked);
    }

    /// True when an ack should leave with the next packet
    pub fn should_ack(&self, now: Timestamp) -> bool {
        if self.ranges.is_empty() {
            return false;
        }
        self.ack_pending
            || self
                .delayed_ack_deadline
                .is_some_and(|deadline| deadline.has_elapsed(now))
    }

    /// An ack is wanted eventually; bundle it with any outgoing packet
    pub fn has_ack_content(&self) -> bool {
        !self.ranges.is_empty() && (self.ack_pending || self.delayed_ack_deadline.is_some())
    }

    /// The deadline of the delayed-ack timer, if armed
    pub fn ack_deadline(&self) -> Option<Timestamp> {
        if self.ack_pending {
            return None;
        }
        self.delayed_ack_deadline
    }

    /// Builds the ack frame and resets the ack clocks
    pub fn build_ack_frame(&mut self, now: Timestamp) -> Option<Ack> {
        let largest = self.ranges.largest()?;

        let ack_delay = self
            .largest_received_time
            .map(|received| now.saturating_duration_since(received))
            .unwrap_or(Duration::ZERO);

        let timestamps = self.build_timestamps(largest);

        self.ack_pending = false;
        self.packets_since_ack = 0;
        self.delayed_ack_deadline = None;
        self.receive_times.clear();

        Some(Ack {
            ack_delay: Ufloat16::from(ack_delay),
            ranges: self.ranges.clone(),
            timestamps,
        })
    }

    fn build_timestamps(
        &self,
        largest: PacketNumber,
    ) -> Option<gquic_core::frame::ack::Timestamps> {
        let epoch = self.epoch?;
        let mut entries = self.receive_times.iter().filter_map(|(packet_number, time)| {
            let delta = largest.checked_sub(*packet_number)?;
            let delta = u8::try_from(delta).ok()?;
            Some((delta, *time))
        });

        let (first_delta, first_time) = entries.next()?;
        let first_micros =
            u32::try_from(first_time.saturating_duration_since(epoch).as_micros()).ok()?;

        let mut previous = first_time;
        let subsequent = entries
            .map(|(delta, time)| {
                let gap = time.saturating_duration_since(previous);
                previous = time;
                (delta, Ufloat16::from(gap))
            })
            .collect();

        Some(gquic_core::frame::ack::Timestamps {
            delta_largest_acked: first_delta,
            first_micros,
            subsequent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gquic_core::time::{Clock, NoopClock};

    const MS: Duration = Duration::from_millis(1);

    fn manager() -> ReceivedPacketManager {
        ReceivedPacketManager::new(25 * MS)
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut manager = manager();
        let now = NoopClock.get_time();

        assert!(manager.record(PacketNumber::new(1), true, now, 100 * MS));
        assert!(!manager.record(PacketNumber::new(1), true, now, 100 * MS));
    }

    #[test]
    fn second_retransmittable_packet_forces_an_ack() {
        let mut manager = manager();
        let now = NoopClock.get_time();

        manager.record(PacketNumber::new(1), true, now, 100 * MS);
        assert!(!manager.should_ack(now));
        // the delayed-ack timer holds min(25ms, srtt / 4)
        assert_eq!(manager.ack_deadline(), Some(now + 25 * MS));

        manager.record(PacketNumber::new(2), true, now, 100 * MS);
        assert!(manager.should_ack(now));
        assert_eq!(manager.ack_deadline(), None);
    }

    #[test]
    fn delayed_ack_tracks_the_rtt() {
        let mut manager = manager();
        let now = NoopClock.get_time();

        manager.record(PacketNumber::new(1), true, now, 40 * MS);
        assert_eq!(manager.ack_deadline(), Some(now + 10 * MS));
        assert!(!manager.should_ack(now));
        assert!(manager.should_ack(now + 10 * MS));
    }

    #[test]
    fn ack_only_packets_never_force_an_ack() {
        let mut manager = manager();
        let now = NoopClock.get_time();

        for n in 1..10 {
            manager.record(PacketNumber::new(n), false, now, 100 * MS);
        }
        assert!(!manager.should_ack(now + Duration::from_secs(1)));
        assert!(!manager.has_ack_content());
    }

    #[test]
    fn ack_frame_reports_ranges_and_delay() {
        let mut manager = manager();
        let now = NoopClock.get_time();

        manager.record(PacketNumber::new(1), true, now, 100 * MS);
        manager.record(PacketNumber::new(3), true, now + 10 * MS, 100 * MS);

        let ack = manager.build_ack_frame(now + 15 * MS).unwrap();
        assert_eq!(ack.largest_acked(), PacketNumber::new(3));
        assert!(ack.ranges.contains(PacketNumber::new(1)));
        assert!(!ack.ranges.contains(PacketNumber::new(2)));
        assert_eq!(ack.ack_delay.as_micros(), 5_000);

        // the clocks reset after the frame leaves
        assert!(!manager.should_ack(now + Duration::from_secs(1)));
    }

    #[test]
    fn stop_waiting_drops_old_ranges() {
        let mut manager = manager();
        let now = NoopClock.get_time();

        manager.record(PacketNumber::new(1), true, now, 100 * MS);
        manager.record(PacketNumber::new(5), true, now, 100 * MS);

        manager.on_stop_waiting(PacketNumber::new(4));
        let ack = manager.build_ack_frame(now).unwrap();
        assert!(!ack.ranges.contains(PacketNumber::new(1)));
        assert!(ack.ranges.contains(PacketNumber::new(5)));

        // a duplicate of the dropped packet no longer registers as seen;
        // reprocessing is prevented by the packet number reconstruction
        // window long before this point matters in practice
        assert_eq!(manager.largest_received(), PacketNumber::new(5));
    }

    #[test]
    fn timestamps_cover_packets_since_last_ack() {
        let mut manager = manager();
        let now = NoopClock.get_time();

        manager.record(PacketNumber::new(1), true, now, 100 * MS);
        manager.record(PacketNumber::new(2), true, now + 3 * MS, 100 * MS);

        let ack = manager.build_ack_frame(now + 5 * MS).unwrap();
        let timestamps = ack.timestamps.unwrap();
        assert_eq!(timestamps.delta_largest_acked, 1);
        assert_eq!(timestamps.subsequent.len(), 1);
        assert_eq!(timestamps.subsequent[0].0, 0);
        assert_eq!(timestamps.subsequent[0].1.as_micros(), 3_000);
    }
}
