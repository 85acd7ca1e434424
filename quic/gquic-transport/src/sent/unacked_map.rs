// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use gquic_core::{
    counter::Counter,
    crypto::EncryptionLevel,
    frame::FrameOwned,
    packet::number::{PacketNumber, PacketNumberLen},
    time::Timestamp,
    transmission,
};
use std::{
    cell::RefCell,
    collections::{btree_map, BTreeMap, BTreeSet},
    rc::Rc,
};

/// The set of packet numbers that have ever carried one payload,
/// oldest first, shared by every ledger entry in the chain.
type Chain = Rc<RefCell<BTreeSet<PacketNumber>>>;

/// Everything remembered about a single sent packet
#[derive(Clone, Debug)]
pub struct TransmissionInfo {
    /// The frames to replay if the packet is declared lost. Empty once
    /// the payload moved to a newer transmission, or if the packet only
    /// ever carried acks and padding.
    pub retransmittable_frames: Vec<FrameOwned>,
    pub encryption_level: EncryptionLevel,
    pub packet_number_len: PacketNumberLen,
    pub bytes_sent: u32,
    pub sent_time: Timestamp,
    pub transmission_type: transmission::Type,
    /// Counts against the congestion window
    pub in_flight: bool,
    /// Kept only so a late ack can still prune the chain; never counts
    /// for RTT or congestion again
    pub is_unackable: bool,
    /// Carries data from the crypto stream
    pub has_crypto_handshake: bool,
    /// Number of later packets acked since this one was sent
    pub nack_count: u32,
    all_transmissions: Chain,
}

impl TransmissionInfo {
    /// The retransmission chain, oldest first
    pub fn all_transmissions(&self) -> Vec<PacketNumber> {
        self.all_transmissions.borrow().iter().copied().collect()
    }

    /// True if no retransmission of this payload was ever sent after
    /// this packet
    pub fn is_newest_transmission(&self, packet_number: PacketNumber) -> bool {
        self.all_transmissions
            .borrow()
            .iter()
            .next_back()
            .map_or(true, |newest| *newest == packet_number)
    }
}

/// The ordered ledger of packets still relevant for retransmission or
/// RTT measurement.
///
/// Keyed by packet number, iterated in ascending order. `bytes_in_flight`
/// is maintained as the sum of `bytes_sent` over entries with
/// `in_flight` set.
#[derive(Debug, Default)]
pub struct UnackedPacketMap {
    packets: BTreeMap<PacketNumber, TransmissionInfo>,
    largest_sent: PacketNumber,
    /// The largest packet number the peer has acked
    largest_observed: PacketNumber,
    bytes_in_flight: Counter<u64>,
}

impl UnackedPacketMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a freshly serialized packet.
    ///
    /// Packet numbers must arrive in increasing order; a retransmission
    /// is a *new* packet linked to its predecessor via
    /// [`Self::on_retransmitted`], never a reused number.
    #[allow(clippy::too_many_arguments)]
    pub fn add_sent(
        &mut self,
        packet_number: PacketNumber,
        retransmittable_frames: Vec<FrameOwned>,
        encryption_level: EncryptionLevel,
        packet_number_len: PacketNumberLen,
        transmission_type: transmission::Type,
        sent_time: Timestamp,
        bytes_sent: u32,
        set_in_flight: bool,
        has_crypto_handshake: bool,
    ) {
        debug_assert!(
            packet_number > self.largest_sent,
            "packet numbers are never reused"
        );

        let chain: Chain = Rc::new(RefCell::new(BTreeSet::from([packet_number])));

        if set_in_flight {
            self.bytes_in_flight += bytes_sent as u64;
        }
        self.largest_sent = self.largest_sent.max(packet_number);

        self.packets.insert(
            packet_number,
            TransmissionInfo {
                retransmittable_frames,
                encryption_level,
                packet_number_len,
                bytes_sent,
                sent_time,
                transmission_type,
                in_flight: set_in_flight,
                is_unackable: false,
                has_crypto_handshake,
                nack_count: 0,
                all_transmissions: chain,
            },
        );
    }

    /// Records that `old_packet`'s payload was replayed as
    /// `new_packet`. The frames move to the new entry; the old entry
    /// stays in the ledger (sharing the chain) until an ack of any
    /// chain member retires it.
    #[allow(clippy::too_many_arguments)]
    pub fn on_retransmitted(
        &mut self,
        old_packet: PacketNumber,
        new_packet: PacketNumber,
        encryption_level: EncryptionLevel,
        packet_number_len: PacketNumberLen,
        transmission_type: transmission::Type,
        sent_time: Timestamp,
        bytes_sent: u32,
    ) {
        debug_assert!(new_packet > self.largest_sent);

        let (frames, chain, has_crypto_handshake) = {
            let old = self
                .packets
                .get_mut(&old_packet)
                .expect("retransmitted packet is unacked");
            debug_assert!(
                !old.retransmittable_frames.is_empty(),
                "only packets with retransmittable frames are replayed"
            );
            (
                std::mem::take(&mut old.retransmittable_frames),
                old.all_transmissions.clone(),
                old.has_crypto_handshake,
            )
        };

        chain.borrow_mut().insert(new_packet);

        self.bytes_in_flight += bytes_sent as u64;
        self.largest_sent = self.largest_sent.max(new_packet);

        self.packets.insert(
            new_packet,
            TransmissionInfo {
                retransmittable_frames: frames,
                encryption_level,
                packet_number_len,
                bytes_sent,
                sent_time,
                transmission_type,
                in_flight: true,
                is_unackable: false,
                has_crypto_handshake,
                nack_count: 0,
                all_transmissions: chain,
            },
        );
    }

    /// Handles the ack of `packet_number`: every other chain member
    /// loses its retransmittable frames and becomes unackable, and the
    /// bytes each contributed leave the in-flight count. Returns the
    /// chain members that were neutered while still in flight, so the
    /// caller can tell the congestion controller their bytes were
    /// abandoned rather than delivered.
    pub fn on_packet_acked(&mut self, packet_number: PacketNumber) -> Vec<(PacketNumber, u32)> {
        let mut abandoned = Vec::new();

        let chain = match self.packets.get(&packet_number) {
            Some(info) => info.all_transmissions(),
            None => return abandoned,
        };

        for member in chain {
            let info = self
                .packets
                .get_mut(&member)
                .expect("chain members stay in the ledger together");
            info.retransmittable_frames.clear();
            info.is_unackable = true;
            if info.in_flight {
                info.in_flight = false;
                let bytes = info.bytes_sent;
                self.bytes_in_flight -= bytes as u64;
                if member != packet_number {
                    abandoned.push((member, bytes));
                }
            }
        }

        abandoned
    }

    /// Takes `packet_number` out of the in-flight count without acking
    /// or losing it
    pub fn remove_from_in_flight(&mut self, packet_number: PacketNumber) {
        if let Some(info) = self.packets.get_mut(&packet_number) {
            if info.in_flight {
                info.in_flight = false;
                self.bytes_in_flight -= info.bytes_sent as u64;
            }
        }
    }

    /// Drops the retransmittable frames of `packet_number` and marks it
    /// unackable, splitting it out of its chain. Used when the payload
    /// will never be needed again (e.g. unencrypted packets after the
    /// handshake settles).
    pub fn neuter(&mut self, packet_number: PacketNumber) {
        if let Some(info) = self.packets.get_mut(&packet_number) {
            if info.all_transmissions.borrow().len() > 1 {
                info.all_transmissions.borrow_mut().remove(&packet_number);
                info.all_transmissions = Rc::new(RefCell::new(BTreeSet::from([packet_number])));
            }
            info.retransmittable_frames.clear();
            info.is_unackable = true;
        }
        self.remove_from_in_flight(packet_number);
    }

    /// Bumps the nack count of `packet_number` to at least `min_nacks`
    pub fn nack(&mut self, packet_number: PacketNumber, min_nacks: u32) {
        if let Some(info) = self.packets.get_mut(&packet_number) {
            info.nack_count = min_nacks.max(info.nack_count + 1);
        }
    }

    /// Advances the peer's largest-acked and prunes entries that no
    /// longer serve retransmission, congestion accounting, or late-ack
    /// chain pruning.
    pub fn increase_largest_observed(&mut self, largest_observed: PacketNumber) {
        self.largest_observed = self.largest_observed.max(largest_observed);
        self.cleanup();
    }

    fn cleanup(&mut self) {
        let largest_observed = self.largest_observed;

        let removable: Vec<PacketNumber> = self
            .packets
            .iter()
            .take_while(|(packet_number, info)| {
                **packet_number <= largest_observed
                    && !info.in_flight
                    && info.retransmittable_frames.is_empty()
                    && info
                        .all_transmissions
                        .borrow()
                        .iter()
                        .all(|member| *member <= largest_observed)
            })
            .map(|(packet_number, _)| *packet_number)
            .collect();

        for packet_number in removable {
            if let Some(info) = self.packets.remove(&packet_number) {
                info.all_transmissions.borrow_mut().remove(&packet_number);
            }
        }
    }

    #[inline]
    pub fn get(&self, packet_number: PacketNumber) -> Option<&TransmissionInfo> {
        self.packets.get(&packet_number)
    }

    #[inline]
    pub fn is_unacked(&self, packet_number: PacketNumber) -> bool {
        self.packets.contains_key(&packet_number)
    }

    /// Iterates entries in ascending packet number order
    #[inline]
    pub fn iter(&self) -> btree_map::Iter<'_, PacketNumber, TransmissionInfo> {
        self.packets.iter()
    }

    /// The smallest packet number still in the ledger, or the next
    /// packet number when the ledger is empty
    #[inline]
    pub fn least_unacked(&self) -> PacketNumber {
        self.packets
            .keys()
            .next()
            .copied()
            .unwrap_or_else(|| self.largest_sent.next())
    }

    #[inline]
    pub fn largest_sent(&self) -> PacketNumber {
        self.largest_sent
    }

    #[inline]
    pub fn largest_observed(&self) -> PacketNumber {
        self.largest_observed
    }

    #[inline]
    pub fn bytes_in_flight(&self) -> u64 {
        *self.bytes_in_flight
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn has_in_flight_packets(&self) -> bool {
        self.packets.values().any(|info| info.in_flight)
    }

    pub fn has_unacked_retransmittable_frames(&self) -> bool {
        self.packets
            .values()
            .any(|info| info.in_flight && !info.retransmittable_frames.is_empty())
    }

    pub fn has_crypto_handshake_in_flight(&self) -> bool {
        self.packets
            .values()
            .any(|info| info.in_flight && info.has_crypto_handshake)
    }

    /// The sent time of the newest in-flight retransmittable packet
    pub fn last_retransmittable_sent_time(&self) -> Option<Timestamp> {
        self.packets
            .values()
            .rev()
            .find(|info| info.in_flight && !info.retransmittable_frames.is_empty())
            .map(|info| info.sent_time)
    }

    /// The sent time of the oldest in-flight packet
    pub fn first_in_flight_sent_time(&self) -> Option<Timestamp> {
        self.packets
            .values()
            .find(|info| info.in_flight)
            .map(|info| info.sent_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gquic_core::{
        frame::{Frame, Stream},
        stream::StreamId,
        time::{Clock, NoopClock},
    };

    fn stream_frame() -> FrameOwned {
        Frame::Stream(Stream {
            stream_id: StreamId::new(5),
            offset: 0,
            is_last_frame: false,
            is_fin: false,
            data: bytes::Bytes::from_static(b"data"),
        })
    }

    fn add(map: &mut UnackedPacketMap, packet_number: u64, frames: Vec<FrameOwned>) {
        map.add_sent(
            PacketNumber::new(packet_number),
            frames,
            EncryptionLevel::Unencrypted,
            PacketNumberLen::U16,
            transmission::Type::Initial,
            NoopClock.get_time(),
            1000,
            true,
            false,
        );
    }

    #[test]
    fn bytes_in_flight_is_the_sum_over_in_flight_entries() {
        let mut map = UnackedPacketMap::new();
        add(&mut map, 1, vec![stream_frame()]);
        add(&mut map, 2, vec![]);
        assert_eq!(map.bytes_in_flight(), 2000);

        map.remove_from_in_flight(PacketNumber::new(2));
        assert_eq!(map.bytes_in_flight(), 1000);

        // removal is idempotent
        map.remove_from_in_flight(PacketNumber::new(2));
        assert_eq!(map.bytes_in_flight(), 1000);
    }

    #[test]
    fn retransmission_moves_frames_and_links_chains() {
        let mut map = UnackedPacketMap::new();
        add(&mut map, 1, vec![stream_frame()]);

        map.on_retransmitted(
            PacketNumber::new(1),
            PacketNumber::new(2),
            EncryptionLevel::Unencrypted,
            PacketNumberLen::U16,
            transmission::Type::NackRetransmission,
            NoopClock.get_time(),
            1000,
        );

        let old = map.get(PacketNumber::new(1)).unwrap();
        let new = map.get(PacketNumber::new(2)).unwrap();

        assert!(old.retransmittable_frames.is_empty());
        assert_eq!(new.retransmittable_frames.len(), 1);

        // every chain member sees the identical chain
        let chain = vec![PacketNumber::new(1), PacketNumber::new(2)];
        assert_eq!(old.all_transmissions(), chain);
        assert_eq!(new.all_transmissions(), chain);

        assert!(!old.is_newest_transmission(PacketNumber::new(1)));
        assert!(new.is_newest_transmission(PacketNumber::new(2)));
    }

    #[test]
    fn acking_one_chain_member_neuters_the_rest() {
        let mut map = UnackedPacketMap::new();
        add(&mut map, 1, vec![stream_frame()]);
        map.on_retransmitted(
            PacketNumber::new(1),
            PacketNumber::new(2),
            EncryptionLevel::Unencrypted,
            PacketNumberLen::U16,
            transmission::Type::NackRetransmission,
            NoopClock.get_time(),
            1000,
        );
        assert_eq!(map.bytes_in_flight(), 2000);

        // ack the retransmission; the original is neutered and its
        // bytes are reported abandoned
        let abandoned = map.on_packet_acked(PacketNumber::new(2));
        assert_eq!(abandoned, vec![(PacketNumber::new(1), 1000)]);
        assert_eq!(map.bytes_in_flight(), 0);

        let old = map.get(PacketNumber::new(1)).unwrap();
        assert!(old.is_unackable);
        assert!(old.retransmittable_frames.is_empty());
    }

    #[test]
    fn cleanup_waits_for_the_whole_chain() {
        let mut map = UnackedPacketMap::new();
        add(&mut map, 1, vec![stream_frame()]);
        map.on_retransmitted(
            PacketNumber::new(1),
            PacketNumber::new(2),
            EncryptionLevel::Unencrypted,
            PacketNumberLen::U16,
            transmission::Type::NackRetransmission,
            NoopClock.get_time(),
            1000,
        );

        map.on_packet_acked(PacketNumber::new(2));

        // peer has only acked up to 1; packet 2 keeps the chain alive
        map.increase_largest_observed(PacketNumber::new(1));
        assert!(map.is_unacked(PacketNumber::new(1)));

        map.increase_largest_observed(PacketNumber::new(2));
        assert!(!map.is_unacked(PacketNumber::new(1)));
        assert!(!map.is_unacked(PacketNumber::new(2)));
        assert!(map.is_empty());
    }

    #[test]
    fn neuter_splits_the_chain() {
        let mut map = UnackedPacketMap::new();
        add(&mut map, 1, vec![stream_frame()]);
        map.on_retransmitted(
            PacketNumber::new(1),
            PacketNumber::new(2),
            EncryptionLevel::Unencrypted,
            PacketNumberLen::U16,
            transmission::Type::Handshake,
            NoopClock.get_time(),
            1000,
        );

        map.neuter(PacketNumber::new(1));

        let old = map.get(PacketNumber::new(1)).unwrap();
        let new = map.get(PacketNumber::new(2)).unwrap();
        assert_eq!(old.all_transmissions(), vec![PacketNumber::new(1)]);
        assert_eq!(new.all_transmissions(), vec![PacketNumber::new(2)]);
        assert!(old.is_unackable);
        assert!(!new.is_unackable);
    }

    #[test]
    fn least_unacked_tracks_the_ledger_head() {
        let mut map = UnackedPacketMap::new();
        assert_eq!(map.least_unacked(), PacketNumber::new(1));

        add(&mut map, 1, vec![stream_frame()]);
        add(&mut map, 2, vec![stream_frame()]);
        assert_eq!(map.least_unacked(), PacketNumber::new(1));

        map.on_packet_acked(PacketNumber::new(1));
        map.increase_largest_observed(PacketNumber::new(1));
        assert_eq!(map.least_unacked(), PacketNumber::new(2));
    }
}
