// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use core::fmt;
use s2n_codec::DecoderError;

/// A connection-level error code, carried on the wire in
/// CONNECTION_CLOSE and GOAWAY frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Code(u32);

impl Code {
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A connection-level transport error.
///
/// Every variant carries a fixed wire code; raising one of these
/// anywhere in the stack closes the connection with a CONNECTION_CLOSE
/// frame carrying the code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Error {
    pub code: Code,
    pub reason: &'static str,
}

impl Error {
    /// Creates a new `Error` with the specified code
    pub const fn new(code: Code) -> Self {
        Self { code, reason: "" }
    }

    /// Updates the `Error` with the specified `reason`
    #[must_use]
    pub const fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = reason;
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "TransportError({})", self.code)
        } else {
            f.write_str(self.reason)
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Internal convenience macro for defining standard error codes
macro_rules! def_error {
    ($doc:expr, $name:ident, $code:expr) => {
        impl Error {
            #[doc = $doc]
            pub const $name: Error = Error::new(Code::new($code));
        }
    };
}

def_error!(
    "The connection is being closed abruptly in the absence of any error.",
    NO_ERROR,
    0
);
def_error!(
    "The endpoint encountered an internal error and cannot continue.",
    INTERNAL_ERROR,
    1
);
def_error!(
    "Stream data was received after the stream was terminated.",
    STREAM_DATA_AFTER_TERMINATION,
    2
);
def_error!("A packet header was malformed.", INVALID_PACKET_HEADER, 3);
def_error!("A frame could not be decoded.", INVALID_FRAME_DATA, 4);
def_error!(
    "A RST_STREAM frame was malformed.",
    INVALID_RST_STREAM_DATA,
    6
);
def_error!(
    "A CONNECTION_CLOSE frame was malformed.",
    INVALID_CONNECTION_CLOSE_DATA,
    7
);
def_error!("A GOAWAY frame was malformed.", INVALID_GOAWAY_DATA, 8);
def_error!(
    "An ACK frame was malformed or referenced unsent packets.",
    INVALID_ACK_DATA,
    9
);
def_error!(
    "A version negotiation packet was malformed.",
    INVALID_VERSION_NEGOTIATION_PACKET,
    10
);
def_error!("A packet payload could not be decrypted.", DECRYPTION_FAILURE, 12);
def_error!(
    "No cipher was installed for the requested encryption level.",
    ENCRYPTION_FAILURE,
    13
);
def_error!(
    "A packet exceeded the maximum packet size.",
    PACKET_TOO_LARGE,
    14
);
def_error!(
    "The peer is going away and will accept no new streams.",
    PEER_GOING_AWAY,
    16
);
def_error!(
    "A frame referenced a stream id the peer could not have created.",
    INVALID_STREAM_ID,
    17
);
def_error!(
    "The peer opened more incoming streams than permitted.",
    TOO_MANY_OPEN_STREAMS,
    18
);
def_error!(
    "The connection was terminated by a public reset packet.",
    PUBLIC_RESET,
    19
);
def_error!("The offered wire version is not supported.", INVALID_VERSION, 20);
def_error!("The connection timed out.", CONNECTION_TIMED_OUT, 25);
def_error!(
    "A crypto handshake message carried an invalid parameter.",
    INVALID_CRYPTO_MESSAGE_PARAMETER,
    30
);
def_error!(
    "The peer sent more data than its advertised receive window allowed.",
    FLOW_CONTROL_RECEIVED_TOO_MUCH_DATA,
    59
);
def_error!(
    "More data was sent than the peer's advertised window allowed.",
    FLOW_CONTROL_SENT_TOO_MUCH_DATA,
    63
);

impl From<DecoderError> for Error {
    fn from(error: DecoderError) -> Self {
        match error {
            DecoderError::InvariantViolation(reason) => {
                Error::INVALID_FRAME_DATA.with_reason(reason)
            }
            _ => Error::INVALID_FRAME_DATA.with_reason("malformed frame"),
        }
    }
}

/// A stream-local error code, carried on the wire in RST_STREAM frames.
///
/// Stream errors reset only the stream they are raised on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamError {
    pub code: Code,
    pub reason: &'static str,
}

impl StreamError {
    pub const fn new(code: Code) -> Self {
        Self { code, reason: "" }
    }

    #[must_use]
    pub const fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = reason;
        self
    }
}

macro_rules! def_stream_error {
    ($doc:expr, $name:ident, $code:expr) => {
        impl StreamError {
            #[doc = $doc]
            pub const $name: StreamError = StreamError::new(Code::new($code));
        }
    };
}

def_stream_error!("The stream completed without error.", NO_ERROR, 0);
def_stream_error!(
    "The application layer could not parse the stream payload.",
    BAD_APPLICATION_PAYLOAD,
    3
);
def_stream_error!(
    "The stream was refused because the endpoint is going away.",
    STREAM_PEER_GOING_AWAY,
    5
);
def_stream_error!("The stream was cancelled locally.", STREAM_CANCELLED, 6);

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "StreamError({})", self.code)
        } else {
            f.write_str(self.reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::NO_ERROR.code.as_u32(), 0);
        assert_eq!(Error::INVALID_STREAM_ID.code.as_u32(), 17);
        assert_eq!(Error::FLOW_CONTROL_RECEIVED_TOO_MUCH_DATA.code.as_u32(), 59);
        assert_eq!(StreamError::STREAM_CANCELLED.code.as_u32(), 6);
    }

    #[test]
    fn decoder_errors_map_to_invalid_frame_data() {
        let error: Error = DecoderError::UnexpectedEof(4).into();
        assert_eq!(error.code, Error::INVALID_FRAME_DATA.code);
    }
}
