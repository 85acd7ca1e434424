// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::sent::UnackedPacketMap;
use gquic_core::{
    packet::number::PacketNumber,
    recovery::RttEstimator,
    time::{Duration, Timestamp},
};

/// How losses are inferred from the ack stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossDetectionMode {
    /// Fast retransmit: a packet is lost once enough later packets are
    /// acked, with a time backstop for the tail
    Nack,
    /// Purely time-threshold based
    Time,
    /// Time-threshold with the reordering window tuned down by observed
    /// spurious retransmits
    AdaptiveTime,
}

/// Packets this far below the largest acked are lost (FACK)
const NACKS_BEFORE_RETRANSMISSION: u64 = 3;

/// The minimum delay before a packet will be considered lost,
/// regardless of SRTT. Half of the minimum tail-loss probe, since the
/// algorithm only triggers when a nack has been received for the packet.
const MIN_LOSS_DELAY: Duration = Duration::from_millis(5);

/// Fraction of an RTT the algorithm waits before declaring loss by time
const DEFAULT_LOSS_DELAY_FRACTION: u32 = 4;
/// The wider starting fraction used by adaptive mode
const DEFAULT_ADAPTIVE_LOSS_DELAY_FRACTION: u32 = 16;

/// Infers lost packets from the ledger and the ack stream.
///
/// Emits the newly lost set per invocation plus a deadline for the next
/// time-based decision.
#[derive(Clone, Debug)]
pub struct LossDetector {
    mode: LossDetectionMode,
    loss_detection_timeout: Option<Timestamp>,
    /// Latches spurious-retransmit reactions to once per epoch
    largest_sent_on_spurious_retransmit: PacketNumber,
    reordering_fraction: u32,
}

impl LossDetector {
    pub fn new(mode: LossDetectionMode) -> Self {
        Self {
            mode,
            loss_detection_timeout: None,
            largest_sent_on_spurious_retransmit: PacketNumber::ZERO,
            reordering_fraction: match mode {
                LossDetectionMode::AdaptiveTime => DEFAULT_ADAPTIVE_LOSS_DELAY_FRACTION,
                _ => DEFAULT_LOSS_DELAY_FRACTION,
            },
        }
    }

    pub fn mode(&self) -> LossDetectionMode {
        self.mode
    }

    /// The deadline at which [`Self::detect_losses`] will declare more
    /// packets lost, if nothing is acked before then
    pub fn loss_timeout(&self) -> Option<Timestamp> {
        self.loss_detection_timeout
    }

    /// Walks the in-flight packets below `largest_newly_acked` and
    /// returns the `(packet_number, bytes_sent)` pairs now considered
    /// lost.
    pub fn detect_losses(
        &mut self,
        unacked: &UnackedPacketMap,
        now: Timestamp,
        rtt: &RttEstimator,
        largest_newly_acked: PacketNumber,
    ) -> Vec<(PacketNumber, u32)> {
        let mut lost = Vec::new();
        self.loss_detection_timeout = None;

        let max_rtt = rtt.previous_srtt().max(rtt.latest_rtt());
        let loss_delay = (max_rtt + max_rtt / self.reordering_fraction).max(MIN_LOSS_DELAY);

        for (&packet_number, info) in unacked.iter() {
            if packet_number > largest_newly_acked {
                break;
            }
            if !info.in_flight {
                continue;
            }

            if self.mode == LossDetectionMode::Nack {
                // FACK: enough later packets were acked
                if largest_newly_acked.as_u64() - packet_number.as_u64()
                    >= NACKS_BEFORE_RETRANSMISSION
                {
                    lost.push((packet_number, info.bytes_sent));
                    continue;
                }
            }

            // Early retransmit (RFC 5827) applies the time threshold to
            // the tail, where no further nacks can arrive; time modes
            // apply it everywhere.
            let time_based = matches!(
                self.mode,
                LossDetectionMode::Time | LossDetectionMode::AdaptiveTime
            );
            let early_retransmit = self.mode == LossDetectionMode::Nack
                && !info.retransmittable_frames.is_empty()
                && unacked.largest_sent() == largest_newly_acked;

            if time_based || early_retransmit {
                let when_lost = info.sent_time + loss_delay;
                if now < when_lost {
                    self.loss_detection_timeout = Some(when_lost);
                    break;
                }
                lost.push((packet_number, info.bytes_sent));
            }
        }

        lost
    }

    /// Reacts to a spurious retransmit: in adaptive mode the reordering
    /// fraction is halved (floor 1) until the extra time would have
    /// prevented the miscall. Latched once per epoch via the largest
    /// sent packet.
    pub fn on_spurious_retransmit(
        &mut self,
        unacked: &UnackedPacketMap,
        now: Timestamp,
        rtt: &RttEstimator,
        spurious_retransmission: PacketNumber,
    ) {
        if self.mode != LossDetectionMode::AdaptiveTime || self.reordering_fraction == 1 {
            return;
        }
        if spurious_retransmission <= self.largest_sent_on_spurious_retransmit {
            return;
        }
        self.largest_sent_on_spurious_retransmit = unacked.largest_sent();

        // How much more time would the original have needed? Measured
        // from the spurious retransmission's send time since the RTT
        // estimate may have moved since.
        let extra_time_needed = match unacked.get(spurious_retransmission) {
            Some(info) => now.saturating_duration_since(info.sent_time),
            None => return,
        };

        let max_rtt = rtt.previous_srtt().max(rtt.latest_rtt());
        loop {
            let proposed_extra_time = max_rtt / self.reordering_fraction;
            self.reordering_fraction >>= 1;
            if proposed_extra_time >= extra_time_needed || self.reordering_fraction <= 1 {
                self.reordering_fraction = self.reordering_fraction.max(1);
                break;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn reordering_fraction(&self) -> u32 {
        self.reordering_fraction
    }
}
