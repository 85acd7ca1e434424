// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{fmt, time::Duration};

/// A transfer rate in bytes per second
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bandwidth {
    bytes_per_second: u64,
}

impl Bandwidth {
    pub const ZERO: Self = Self {
        bytes_per_second: 0,
    };

    #[inline]
    pub const fn from_bytes_per_second(bytes_per_second: u64) -> Self {
        Self { bytes_per_second }
    }

    #[inline]
    pub fn from_bytes_and_period(bytes: u64, period: Duration) -> Self {
        if period.is_zero() {
            return Self::ZERO;
        }
        Self {
            bytes_per_second: (bytes as u128 * 1_000_000 / period.as_micros().max(1)) as u64,
        }
    }

    #[inline]
    pub const fn as_bytes_per_second(self) -> u64 {
        self.bytes_per_second
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.bytes_per_second == 0
    }

    /// The number of bytes this rate transfers within `period`
    #[inline]
    pub fn bytes_per_period(self, period: Duration) -> u64 {
        (self.bytes_per_second as u128 * period.as_micros() / 1_000_000) as u64
    }

    /// The time this rate needs to transfer `bytes`
    #[inline]
    pub fn transfer_time(self, bytes: u64) -> Duration {
        if self.is_zero() {
            return Duration::MAX;
        }
        Duration::from_micros((bytes as u128 * 1_000_000 / self.bytes_per_second as u128) as u64)
    }
}

impl fmt::Debug for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} B/s", self.bytes_per_second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        let rate = Bandwidth::from_bytes_and_period(1000, Duration::from_millis(100));
        assert_eq!(rate.as_bytes_per_second(), 10_000);
        assert_eq!(rate.bytes_per_period(Duration::from_millis(10)), 100);
        assert_eq!(rate.transfer_time(10_000), Duration::from_secs(1));
    }

    #[test]
    fn zero_rate_never_transfers() {
        assert_eq!(Bandwidth::ZERO.transfer_time(1), Duration::MAX);
        assert_eq!(Bandwidth::ZERO.bytes_per_period(Duration::from_secs(1)), 0);
    }
}
