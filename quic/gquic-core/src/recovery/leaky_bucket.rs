// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    recovery::Bandwidth,
    time::{Duration, Timestamp},
};

/// A leaky bucket draining at a configurable rate.
///
/// Bytes are added as packets are sent; the pending count drains
/// continuously at the drain rate. Senders consult the pending count to
/// spread bursts over time.
#[derive(Clone, Debug)]
pub struct LeakyBucket {
    drain_rate: Bandwidth,
    bytes_added: u64,
    time_last_added: Option<Timestamp>,
}

impl LeakyBucket {
    pub fn new(drain_rate: Bandwidth) -> Self {
        Self {
            drain_rate,
            bytes_added: 0,
            time_last_added: None,
        }
    }

    pub fn set_drain_rate(&mut self, now: Timestamp, drain_rate: Bandwidth) {
        self.bytes_added = self.bytes_pending(now);
        self.time_last_added = Some(now);
        self.drain_rate = drain_rate;
    }

    pub fn drain_rate(&self) -> Bandwidth {
        self.drain_rate
    }

    /// Records `bytes` entering the bucket
    pub fn add(&mut self, now: Timestamp, bytes: u64) {
        self.bytes_added = self.bytes_pending(now) + bytes;
        self.time_last_added = Some(now);
    }

    /// The bytes still pending after draining up to `now`
    pub fn bytes_pending(&self, now: Timestamp) -> u64 {
        match self.time_last_added {
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                let drained = self.drain_rate.bytes_per_period(elapsed);
                self.bytes_added.saturating_sub(drained)
            }
            None => 0,
        }
    }

    /// The time until the bucket is fully drained
    pub fn time_remaining(&self, now: Timestamp) -> Duration {
        self.drain_rate.transfer_time(self.bytes_pending(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{Clock, NoopClock};

    #[test]
    fn drains_over_time() {
        let mut now = NoopClock.get_time();
        let mut bucket = LeakyBucket::new(Bandwidth::from_bytes_per_second(1000));

        bucket.add(now, 100);
        assert_eq!(bucket.bytes_pending(now), 100);
        assert_eq!(bucket.time_remaining(now), Duration::from_millis(100));

        now += Duration::from_millis(50);
        assert_eq!(bucket.bytes_pending(now), 50);

        now += Duration::from_millis(60);
        assert_eq!(bucket.bytes_pending(now), 0);
        assert_eq!(bucket.time_remaining(now), Duration::ZERO);
    }

    #[test]
    fn rate_change_preserves_pending_bytes() {
        let mut now = NoopClock.get_time();
        let mut bucket = LeakyBucket::new(Bandwidth::from_bytes_per_second(1000));

        bucket.add(now, 100);
        now += Duration::from_millis(50);
        bucket.set_drain_rate(now, Bandwidth::from_bytes_per_second(500));

        assert_eq!(bucket.bytes_pending(now), 50);
        assert_eq!(bucket.time_remaining(now), Duration::from_millis(100));
    }
}
