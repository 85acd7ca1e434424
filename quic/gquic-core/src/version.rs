// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::fmt;
use s2n_codec::{decoder_value, Encoder, EncoderValue};

/// A 4-byte wire version tag, e.g. `Q043`.
///
/// The first packet of a connection may carry a version; a server that
/// does not support the offered version answers with a
/// version-negotiation packet listing the versions it does.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version(u32);

impl Version {
    pub const fn from_tag(tag: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(tag))
    }

    pub const fn as_tag(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

/// The only wire version this endpoint speaks
pub const CURRENT: Version = Version::from_tag(*b"Q043");

/// Versions offered in a version-negotiation packet, newest first
pub const SUPPORTED: &[Version] = &[CURRENT];

#[inline]
pub fn is_supported(version: Version) -> bool {
    SUPPORTED.contains(&version)
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let tag = self.as_tag();
        if let Ok(tag) = core::str::from_utf8(&tag) {
            write!(f, "Version({tag})")
        } else {
            write!(f, "Version({:#010x})", self.0)
        }
    }
}

decoder_value!(
    impl<'a> Version {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (value, buffer) = buffer.decode::<u32>()?;
            Ok((Self(value), buffer))
        }
    }
);

impl EncoderValue for Version {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.0);
    }
}
