// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::time::{Duration, Timestamp};
#[cfg(not(feature = "std"))]
use num_traits::Float as _;

//= https://www.rfc-editor.org/rfc/rfc8312#section-4.5
//# Parameter beta_cubic SHOULD be set to 0.7.
const BETA: f32 = 0.7;

//= https://www.rfc-editor.org/rfc/rfc8312#section-4.1
//# The constant C is the cubic
//# parameter.  It SHOULD be set to 0.4.
const C: f32 = 0.4;

/// The window-growth curve from "CUBIC for Fast Long-Distance Networks".
///
/// Operates in congestion-window units of segments, like the sender
/// that owns it. The curve is anchored at the window reached before the
/// last reduction (`w_max`); the window regrows toward that point along
/// a cubic, then probes beyond it. A parallel Reno-style estimate keeps
/// the window at least TCP-friendly.
#[derive(Clone, Debug, Default)]
pub struct Cubic {
    /// The window in segments when the last reduction happened
    w_max: f32,
    /// Seconds the curve needs to climb back to `w_max`
    k: f32,
    /// Start of the current growth epoch
    epoch_start: Option<Timestamp>,
}

impl Cubic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets all curve state, as after a retransmission timeout
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Computes the reduced window when a loss event ends the epoch
    pub fn congestion_window_after_packet_loss(&mut self, congestion_window: u64) -> u64 {
        let congestion_window = congestion_window as f32;

        //= https://www.rfc-editor.org/rfc/rfc8312#section-4.6
        //# With fast convergence, when a congestion event occurs, before the
        //# window reduction of the congestion window, a flow remembers the last
        //# value of W_max before it updates W_max for the current congestion
        //# event.
        if congestion_window < self.w_max {
            // the flow is shrinking; release bandwidth for newcomers
            self.w_max = congestion_window * (1.0 + BETA) / 2.0;
        } else {
            self.w_max = congestion_window;
        }

        self.epoch_start = None;

        (congestion_window * BETA).max(1.0) as u64
    }

    /// Computes the window permitted at `now`, at least
    /// `congestion_window`, growing along the cubic curve with a
    /// TCP-friendly floor
    pub fn congestion_window_after_ack(
        &mut self,
        congestion_window: u64,
        min_rtt: Duration,
        now: Timestamp,
    ) -> u64 {
        let epoch_start = match self.epoch_start {
            Some(epoch_start) => epoch_start,
            None => {
                //= https://www.rfc-editor.org/rfc/rfc8312#section-4.1
                //# K is the time period that the above
                //# function takes to increase the current window size to W_max if
                //# there are no further congestion events
                self.k = ((self.w_max * (1.0 - BETA)) / C).cbrt();
                self.epoch_start = Some(now);
                now
            }
        };

        let t = (now - epoch_start).as_secs_f32();

        //= https://www.rfc-editor.org/rfc/rfc8312#section-4.1
        //# W_cubic(t) = C*(t-K)^3 + W_max (Eq. 1)
        let delta = t - self.k;
        let w_cubic = C * delta * delta * delta + self.w_max;

        //= https://www.rfc-editor.org/rfc/rfc8312#section-4.2
        //# W_est(t) = W_max*beta_cubic +
        //#        [3*(1-beta_cubic)/(1+beta_cubic)] * (t/RTT) (Eq. 4)
        let rtt = min_rtt.as_secs_f32().max(f32::EPSILON);
        let w_est = self.w_max * BETA + (3.0 * (1.0 - BETA) / (1.0 + BETA)) * (t / rtt);

        let target = w_cubic.max(w_est);

        // never shrink on an ack
        (target as u64).max(congestion_window)
    }
}
