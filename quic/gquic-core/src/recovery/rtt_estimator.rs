// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{
    cmp::{max, min},
    time::Duration,
};

/// The assumed RTT before the first sample arrives
pub const INITIAL_RTT: Duration = Duration::from_millis(100);

/// The lowest RTT value the estimator is capable of tracking
pub const MIN_RTT: Duration = Duration::from_micros(1);

/// Round trip time statistics, updated once per eligible ack.
///
/// `smoothed_rtt` is the classic EWMA (gain 1/8) and `mean_deviation`
/// an EWMA (gain 1/4) of the deviation from it. `previous_srtt`
/// captures the smoothed value before the most recent sample, which
/// loss detection prefers when judging reordering windows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RttEstimator {
    latest_rtt: Duration,
    min_rtt: Duration,
    smoothed_rtt: Duration,
    previous_srtt: Duration,
    mean_deviation: Duration,
}

impl RttEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent sample; zero before any updates
    #[inline]
    pub fn latest_rtt(&self) -> Duration {
        self.latest_rtt
    }

    /// The minimum over the connection's lifetime; zero before any updates
    #[inline]
    pub fn min_rtt(&self) -> Duration {
        self.min_rtt
    }

    /// The EWMA smoothed RTT; zero before any updates
    #[inline]
    pub fn smoothed_rtt(&self) -> Duration {
        self.smoothed_rtt
    }

    /// The smoothed RTT prior to the most recent sample
    #[inline]
    pub fn previous_srtt(&self) -> Duration {
        self.previous_srtt
    }

    #[inline]
    pub fn mean_deviation(&self) -> Duration {
        self.mean_deviation
    }

    #[inline]
    pub fn has_samples(&self) -> bool {
        !self.smoothed_rtt.is_zero()
    }

    /// The smoothed RTT, or the initial assumption before any samples
    #[inline]
    pub fn smoothed_or_initial(&self) -> Duration {
        if self.has_samples() {
            self.smoothed_rtt
        } else {
            INITIAL_RTT
        }
    }

    /// Updates the estimate from an ack received `send_delta` after the
    /// packet was sent, where the peer reports having delayed the ack
    /// by `ack_delay`.
    pub fn update(&mut self, send_delta: Duration, ack_delay: Duration) {
        if send_delta.is_zero() {
            return;
        }

        // the ack delay is peer-reported; only trust it when it leaves
        // a plausible sample behind
        self.latest_rtt = if ack_delay < send_delta {
            max(send_delta - ack_delay, MIN_RTT)
        } else {
            send_delta
        };

        if self.min_rtt.is_zero() {
            self.min_rtt = self.latest_rtt;
        } else {
            self.min_rtt = min(self.min_rtt, self.latest_rtt);
        }

        self.previous_srtt = self.smoothed_rtt;

        if self.smoothed_rtt.is_zero() {
            self.smoothed_rtt = self.latest_rtt;
            self.mean_deviation = self.latest_rtt / 2;
            return;
        }

        let deviation = if self.smoothed_rtt > self.latest_rtt {
            self.smoothed_rtt - self.latest_rtt
        } else {
            self.latest_rtt - self.smoothed_rtt
        };
        self.mean_deviation = self.mean_deviation * 3 / 4 + deviation / 4;
        self.smoothed_rtt = self.smoothed_rtt * 7 / 8 + self.latest_rtt / 8;
    }

    /// Raises the smoothed metrics to the latest observations.
    ///
    /// Called on retransmission timeout: an RTO means the estimate was
    /// too optimistic, so the smoothed RTT must not stay below what the
    /// network last showed us.
    pub fn expire_smoothed_metrics(&mut self) {
        let deviation = if self.smoothed_rtt > self.latest_rtt {
            self.smoothed_rtt - self.latest_rtt
        } else {
            self.latest_rtt - self.smoothed_rtt
        };
        self.mean_deviation = max(self.mean_deviation, deviation);
        self.smoothed_rtt = max(self.smoothed_rtt, self.latest_rtt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn first_sample_initializes() {
        let mut rtt = RttEstimator::new();
        assert!(!rtt.has_samples());
        assert_eq!(rtt.smoothed_or_initial(), INITIAL_RTT);

        rtt.update(100 * MS, Duration::ZERO);
        assert_eq!(rtt.latest_rtt(), 100 * MS);
        assert_eq!(rtt.smoothed_rtt(), 100 * MS);
        assert_eq!(rtt.min_rtt(), 100 * MS);
        assert_eq!(rtt.mean_deviation(), 50 * MS);
        assert_eq!(rtt.previous_srtt(), Duration::ZERO);
    }

    #[test]
    fn ewma_update() {
        let mut rtt = RttEstimator::new();
        rtt.update(100 * MS, Duration::ZERO);
        rtt.update(200 * MS, Duration::ZERO);

        // 7/8 * 100 + 1/8 * 200
        assert_eq!(rtt.smoothed_rtt(), Duration::from_micros(112_500));
        // 3/4 * 50 + 1/4 * 100
        assert_eq!(rtt.mean_deviation(), Duration::from_micros(62_500));
        assert_eq!(rtt.previous_srtt(), 100 * MS);
        assert_eq!(rtt.min_rtt(), 100 * MS);
    }

    #[test]
    fn ack_delay_is_subtracted() {
        let mut rtt = RttEstimator::new();
        rtt.update(100 * MS, 20 * MS);
        assert_eq!(rtt.latest_rtt(), 80 * MS);
    }

    #[test]
    fn implausible_ack_delay_is_ignored() {
        let mut rtt = RttEstimator::new();
        rtt.update(100 * MS, 150 * MS);
        assert_eq!(rtt.latest_rtt(), 100 * MS);
    }

    #[test]
    fn sample_never_collapses_to_zero() {
        let mut rtt = RttEstimator::new();
        rtt.update(Duration::from_micros(10), Duration::from_micros(10) - MIN_RTT);
        assert_eq!(rtt.latest_rtt(), MIN_RTT);
    }

    #[test]
    fn expire_raises_smoothed_metrics() {
        let mut rtt = RttEstimator::new();
        rtt.update(100 * MS, Duration::ZERO);
        for _ in 0..10 {
            rtt.update(300 * MS, Duration::ZERO);
        }
        assert!(rtt.smoothed_rtt() < 300 * MS);

        rtt.expire_smoothed_metrics();
        assert_eq!(rtt.smoothed_rtt(), 300 * MS);
    }
}
