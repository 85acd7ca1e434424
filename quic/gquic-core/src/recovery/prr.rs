// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::recovery::MAX_SEGMENT_SIZE;

/// Proportional Rate Reduction
/// https://www.rfc-editor.org/rfc/rfc6937.html
///
/// Governs the send gate while the sender is in recovery: bytes leave
/// the endpoint in proportion to the bytes the acks report delivered,
/// instead of in one burst when the halved window opens up.
#[derive(Clone, Debug, Default)]
pub struct Prr {
    /// Total bytes sent during recovery (prr_out)
    bytes_sent: u64,

    /// Total bytes delivered during recovery (prr_delivered)
    bytes_delivered: u64,

    /// Acks processed during recovery
    ack_count: u64,

    /// FlightSize at the start of recovery (aka RecoverFS)
    bytes_in_flight_at_loss: u64,
}

impl Prr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_loss(&mut self, bytes_in_flight: u64) {
        self.bytes_sent = 0;
        self.bytes_in_flight_at_loss = bytes_in_flight;
        // Losses are only ever reported by an incoming ack, and acks are
        // processed before losses, so behave as though one ack arrived
        // directly after the loss. This lets one or two packets out
        // immediately, depending on whether PRR or PRR-SSRB applies.
        self.bytes_delivered = MAX_SEGMENT_SIZE;
        self.ack_count = 1;
    }

    pub fn on_packet_sent(&mut self, bytes: u64) {
        self.bytes_sent += bytes;
    }

    pub fn on_packet_acked(&mut self, bytes: u64) {
        self.bytes_delivered += bytes;
        self.ack_count += 1;
    }

    /// The recovery-phase send gate.
    ///
    /// With window headroom available, PRR-SSRB bounds sending to one
    /// extra segment per ack so burst retransmits cannot outrun the
    /// reduction. Without headroom, the proportional formula
    ///
    /// `CEIL(prr_delivered * ssthresh / RecoverFS) - prr_out`
    ///
    /// (rearranged to avoid the division) decides whether one more
    /// segment may leave.
    pub fn can_send(
        &self,
        congestion_window: u64,
        bytes_in_flight: u64,
        slowstart_threshold: u64,
    ) -> bool {
        if bytes_in_flight < congestion_window {
            //= https://www.rfc-editor.org/rfc/rfc6937.html#section-3.1
            //# // PRR-SSRB
            //# limit = MAX(prr_delivered - prr_out, DeliveredData) + MSS
            return self.bytes_delivered + self.ack_count * MAX_SEGMENT_SIZE >= self.bytes_sent;
        }

        //= https://www.rfc-editor.org/rfc/rfc6937.html#section-3.1
        //# sndcnt = CEIL(prr_delivered * ssthresh / RecoverFS) - prr_out
        self.bytes_delivered * slowstart_threshold > self.bytes_sent * self.bytes_in_flight_at_loss
    }
}
