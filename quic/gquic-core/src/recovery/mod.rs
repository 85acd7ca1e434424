// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Send-rate algorithms: RTT estimation, congestion control and pacing.
//!
//! Loss detection and the sent-packet ledger live in the transport
//! crate; everything here is connection-state free and driven entirely
//! through the [`CongestionController`] operations.

mod bandwidth;
mod congestion_controller;
mod cubic;
mod fixed_rate;
mod hybrid_slow_start;
mod leaky_bucket;
mod pacing;
mod prr;
mod rtt_estimator;
mod tcp_sender;

pub use bandwidth::*;
pub use congestion_controller::*;
pub use cubic::*;
pub use fixed_rate::*;
pub use hybrid_slow_start::*;
pub use leaky_bucket::*;
pub use pacing::*;
pub use prr::*;
pub use rtt_estimator::*;
pub use tcp_sender::*;

/// The maximum segment size: the largest plaintext payload a single
/// packet carries, and the unit the TCP-derived senders count their
/// window in.
pub const MAX_SEGMENT_SIZE: u64 = 1460;
