// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::packet::number::PacketNumber;
use core::time::Duration;

/// An implementation of the Hybrid Slow Start exit heuristic described
/// in "Hybrid Slow Start for High-Bandwidth and Long-Distance Networks".
///
/// Samples the minimum RTT over the first packets of each round; if the
/// round's minimum rises a threshold above the connection minimum, the
/// path's queue is filling and slow start should end before loss does
/// it the hard way.
#[derive(Clone, Debug, Default)]
pub struct HybridSlowStart {
    sample_count: usize,
    current_min_rtt: Option<Duration>,
    end_packet_number: Option<PacketNumber>,
    exit_found: bool,
}

/// Number of RTT samples gathered per round before judging the delay
const N_SAMPLING: usize = 8;
/// Smallest delay increase worth reacting to
const MIN_DELAY_THRESHOLD: Duration = Duration::from_millis(4);
/// Largest delay increase considered; beyond this the connection min is
/// simply stale
const MAX_DELAY_THRESHOLD: Duration = Duration::from_millis(16);
/// The RTT divisor that sets the delay threshold
const THRESHOLD_DIVIDEND: u32 = 8;

impl HybridSlowStart {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a round has been started and not yet completed
    #[inline]
    pub fn is_started(&self) -> bool {
        self.end_packet_number.is_some()
    }

    /// Starts a sampling round which ends when `end_packet_number` is
    /// acknowledged
    pub fn start_round(&mut self, end_packet_number: PacketNumber) {
        self.sample_count = 0;
        self.current_min_rtt = None;
        self.end_packet_number = Some(end_packet_number);
        self.exit_found = false;
    }

    /// True if acking `packet_number` completes the current round
    #[inline]
    pub fn is_end_of_round(&self, packet_number: PacketNumber) -> bool {
        self.end_packet_number
            .map_or(true, |end| packet_number >= end)
    }

    /// Feeds one RTT sample; returns true once the round's delay
    /// increase crosses the exit threshold
    pub fn on_rtt_sample(&mut self, latest_rtt: Duration, min_rtt: Duration) -> bool {
        if self.exit_found {
            return true;
        }

        if self.sample_count < N_SAMPLING {
            self.sample_count += 1;
            self.current_min_rtt = Some(match self.current_min_rtt {
                Some(current) => current.min(latest_rtt),
                None => latest_rtt,
            });

            if self.sample_count == N_SAMPLING {
                let threshold = (min_rtt / THRESHOLD_DIVIDEND)
                    .clamp(MIN_DELAY_THRESHOLD, MAX_DELAY_THRESHOLD);

                if let Some(current) = self.current_min_rtt {
                    if current >= min_rtt + threshold {
                        self.exit_found = true;
                    }
                }
            }
        }

        self.exit_found
    }
}
