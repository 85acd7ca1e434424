// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{cmp::Ordering, fmt, ops};

/// A checked-overflow counter
///
/// Rather than silently wrapping, counting errors are kept isolated: the
/// counter panics on overflow when `debug_assertions` are enabled and
/// saturates otherwise.
#[derive(Clone, Copy, Default, Hash, PartialEq, Eq)]
pub struct Counter<T>(T);

macro_rules! counter_impl {
    ($ty:ident) => {
        impl Counter<$ty> {
            /// Creates a new counter with an initial value
            #[inline]
            pub const fn new(value: $ty) -> Self {
                Self(value)
            }

            #[inline]
            pub fn set(&mut self, value: $ty) {
                self.0 = value;
            }
        }

        impl ops::AddAssign<$ty> for Counter<$ty> {
            #[inline]
            fn add_assign(&mut self, rhs: $ty) {
                if cfg!(debug_assertions) {
                    self.0 = self.0.checked_add(rhs).expect("counter overflow");
                } else {
                    self.0 = self.0.saturating_add(rhs);
                }
            }
        }

        impl ops::SubAssign<$ty> for Counter<$ty> {
            #[inline]
            fn sub_assign(&mut self, rhs: $ty) {
                if cfg!(debug_assertions) {
                    self.0 = self.0.checked_sub(rhs).expect("counter underflow");
                } else {
                    self.0 = self.0.saturating_sub(rhs);
                }
            }
        }

        impl PartialEq<$ty> for Counter<$ty> {
            #[inline]
            fn eq(&self, other: &$ty) -> bool {
                self.0.eq(other)
            }
        }

        impl PartialOrd<$ty> for Counter<$ty> {
            #[inline]
            fn partial_cmp(&self, other: &$ty) -> Option<Ordering> {
                self.0.partial_cmp(other)
            }
        }

        impl ops::Deref for Counter<$ty> {
            type Target = $ty;

            #[inline]
            fn deref(&self) -> &$ty {
                &self.0
            }
        }

        impl From<Counter<$ty>> for $ty {
            #[inline]
            fn from(counter: Counter<$ty>) -> $ty {
                counter.0
            }
        }

        impl fmt::Debug for Counter<$ty> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

counter_impl!(u32);
counter_impl!(u64);
counter_impl!(usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sub() {
        let mut counter = Counter::<u64>::new(10);
        counter += 5;
        assert_eq!(counter, 15u64);
        counter -= 15;
        assert_eq!(counter, 0u64);
    }

    #[test]
    #[should_panic = "counter underflow"]
    fn underflow_panics_in_debug() {
        let mut counter = Counter::<u32>::new(0);
        counter -= 1;
    }
}
