// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection observability hooks.
//!
//! The core emits events instead of logging; binaries provide a
//! [`Subscriber`] to bridge them into whatever sink they use. Every
//! hook has an empty default body so subscribers implement only what
//! they care about.

use crate::{
    packet::number::PacketNumber,
    time::{Duration, Timestamp},
    transmission, transport,
};

pub trait Subscriber {
    #[inline]
    fn on_packet_sent(&mut self, packet_number: PacketNumber, bytes: usize, now: Timestamp) {
        let _ = (packet_number, bytes, now);
    }

    #[inline]
    fn on_packet_acked(&mut self, packet_number: PacketNumber, now: Timestamp) {
        let _ = (packet_number, now);
    }

    #[inline]
    fn on_packet_lost(&mut self, packet_number: PacketNumber, now: Timestamp) {
        let _ = (packet_number, now);
    }

    #[inline]
    fn on_rtt_updated(&mut self, latest_rtt: Duration, smoothed_rtt: Duration) {
        let _ = (latest_rtt, smoothed_rtt);
    }

    #[inline]
    fn on_retransmission(&mut self, packet_number: PacketNumber, kind: transmission::Type) {
        let _ = (packet_number, kind);
    }

    #[inline]
    fn on_spurious_retransmission(&mut self, packet_number: PacketNumber) {
        let _ = packet_number;
    }

    #[inline]
    fn on_connection_closed(&mut self, error: transport::Error) {
        let _ = error;
    }
}

/// Discards every event
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSubscriber;

impl Subscriber for NoopSubscriber {}
