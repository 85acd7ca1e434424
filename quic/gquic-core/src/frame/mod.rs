// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! Frame codecs.
//!
//! A packet's decrypted payload is a sequence of frames, each
//! introduced by a single tag byte. `STREAM` and `ACK` overload the
//! high bits of the tag with field-length flags; the remaining kinds
//! use fixed tags in the low range.

use s2n_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderError, DecoderValue, Encoder, EncoderValue,
};

/// Decodes a big-endian unsigned integer of `len` bytes from either
/// buffer flavor
macro_rules! decode_uint {
    ($buffer:expr, $len:expr) => {{
        let (slice, buffer) = $buffer.decode_slice($len)?;
        let mut value = 0u64;
        for byte in slice.as_less_safe_slice() {
            value = (value << 8) | *byte as u64;
        }
        (value, buffer)
    }};
}

pub mod ack;
pub mod blocked;
pub mod connection_close;
pub mod goaway;
pub mod padding;
pub mod ping;
pub mod rst_stream;
pub mod stop_waiting;
pub mod stream;
pub mod window_update;

pub use ack::Ack;
pub use blocked::Blocked;
pub use connection_close::ConnectionClose;
pub use goaway::Goaway;
pub use padding::Padding;
pub use ping::Ping;
pub use rst_stream::RstStream;
pub use stop_waiting::StopWaiting;
pub use stream::Stream;
pub use window_update::WindowUpdate;

pub(crate) type Tag = u8;

/// Set on every STREAM tag
pub(crate) const STREAM_FRAME_BIT: Tag = 0x80;
/// Set on every ACK tag (when the stream bit is clear)
pub(crate) const ACK_FRAME_BIT: Tag = 0x40;

pub(crate) const PADDING_TAG: Tag = 0x00;
pub(crate) const RST_STREAM_TAG: Tag = 0x01;
pub(crate) const CONNECTION_CLOSE_TAG: Tag = 0x02;
pub(crate) const GOAWAY_TAG: Tag = 0x03;
pub(crate) const WINDOW_UPDATE_TAG: Tag = 0x04;
pub(crate) const BLOCKED_TAG: Tag = 0x05;
pub(crate) const STOP_WAITING_TAG: Tag = 0x06;
pub(crate) const PING_TAG: Tag = 0x07;

/// A frame was too large for the remaining packet capacity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FitError;

/// Bytes needed to hold `value` without leading zero bytes, minimum 1
#[inline]
pub(crate) fn uint_len(value: u64) -> usize {
    (8 - (value.leading_zeros() / 8) as usize).max(1)
}

#[inline]
pub(crate) fn encode_uint<E: Encoder>(buffer: &mut E, value: u64, len: usize) {
    buffer.write_sized(len, |bytes| {
        let be = value.to_be_bytes();
        bytes.copy_from_slice(&be[8 - len..]);
    });
}

/// A decoded frame.
///
/// `Data` is the payload representation: decoding borrows from the
/// packet buffer, while queued retransmissions own their payloads as
/// [`bytes::Bytes`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame<Data> {
    Padding(Padding),
    Ping(Ping),
    Stream(Stream<Data>),
    Ack(Ack),
    StopWaiting(StopWaiting),
    RstStream(RstStream),
    ConnectionClose(ConnectionClose<Data>),
    Goaway(Goaway<Data>),
    WindowUpdate(WindowUpdate),
    Blocked(Blocked),
}

/// A frame borrowing its payload from the packet buffer
pub type FrameRef<'a> = Frame<&'a [u8]>;

/// A frame owning its payload
#[cfg(feature = "alloc")]
pub type FrameOwned = Frame<bytes::Bytes>;

impl<Data> Frame<Data> {
    /// Returns true if the frame must be replayed when its packet is
    /// declared lost. Ack, padding and stop-waiting state regenerates
    /// on demand instead.
    #[inline]
    pub fn is_retransmittable(&self) -> bool {
        !matches!(
            self,
            Frame::Padding(_) | Frame::Ack(_) | Frame::StopWaiting(_)
        )
    }

    /// Converts the payload representation
    #[inline]
    pub fn map_data<F: Fn(Data) -> Out, Out>(self, map: F) -> Frame<Out> {
        match self {
            Frame::Padding(frame) => Frame::Padding(frame),
            Frame::Ping(frame) => Frame::Ping(frame),
            Frame::Stream(frame) => Frame::Stream(frame.map_data(&map)),
            Frame::Ack(frame) => Frame::Ack(frame),
            Frame::StopWaiting(frame) => Frame::StopWaiting(frame),
            Frame::RstStream(frame) => Frame::RstStream(frame),
            Frame::ConnectionClose(frame) => Frame::ConnectionClose(frame.map_data(&map)),
            Frame::Goaway(frame) => Frame::Goaway(frame.map_data(&map)),
            Frame::WindowUpdate(frame) => Frame::WindowUpdate(frame),
            Frame::Blocked(frame) => Frame::Blocked(frame),
        }
    }
}

#[cfg(feature = "alloc")]
impl<'a> FrameRef<'a> {
    /// Copies the payload out of the packet buffer.
    ///
    /// The decoder never retains borrowed slices past the packet
    /// boundary, so anything kept for retransmission goes through here.
    #[inline]
    pub fn to_owned(self) -> FrameOwned {
        self.map_data(bytes::Bytes::copy_from_slice)
    }
}

macro_rules! impl_from_frame {
    ($ty:ident) => {
        impl<Data> From<$ty> for Frame<Data> {
            #[inline]
            fn from(frame: $ty) -> Self {
                Frame::$ty(frame)
            }
        }
    };
    ($ty:ident, data) => {
        impl<Data> From<$ty<Data>> for Frame<Data> {
            #[inline]
            fn from(frame: $ty<Data>) -> Self {
                Frame::$ty(frame)
            }
        }
    };
}

impl_from_frame!(Padding);
impl_from_frame!(Ping);
impl_from_frame!(Stream, data);
impl_from_frame!(Ack);
impl_from_frame!(StopWaiting);
impl_from_frame!(RstStream);
impl_from_frame!(ConnectionClose, data);
impl_from_frame!(Goaway, data);
impl_from_frame!(WindowUpdate);
impl_from_frame!(Blocked);

impl<'a> FrameRef<'a> {
    /// Decodes the next frame from `buffer`, borrowing any payload
    #[inline]
    pub fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, FrameRef<'a>> {
        let (frame, buffer) = Frame::<DecoderBuffer<'a>>::decode_frame(buffer)?;
        Ok((frame.map_data(|data| data.into_less_safe_slice()), buffer))
    }
}

impl<'a, Data: DecoderValue<'a>> Frame<Data> {
    /// Decodes the next frame from `buffer`
    pub fn decode_frame(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Frame<Data>> {
        let tag = buffer.peek_byte(0)?;

        if tag & STREAM_FRAME_BIT != 0 {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode_parameterized::<Stream<Data>>(tag)?;
            return Ok((frame.into(), buffer));
        }

        if tag & ACK_FRAME_BIT != 0 {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode_parameterized::<Ack>(tag)?;
            return Ok((frame.into(), buffer));
        }

        let buffer = buffer.skip(1)?;
        match tag {
            PADDING_TAG => {
                let (frame, buffer) = buffer.decode::<Padding>()?;
                Ok((frame.into(), buffer))
            }
            PING_TAG => Ok((Ping.into(), buffer)),
            STOP_WAITING_TAG => {
                let (frame, buffer) = buffer.decode::<StopWaiting>()?;
                Ok((frame.into(), buffer))
            }
            RST_STREAM_TAG => {
                let (frame, buffer) = buffer.decode::<RstStream>()?;
                Ok((frame.into(), buffer))
            }
            CONNECTION_CLOSE_TAG => {
                let (frame, buffer) = buffer.decode::<ConnectionClose<Data>>()?;
                Ok((frame.into(), buffer))
            }
            GOAWAY_TAG => {
                let (frame, buffer) = buffer.decode::<Goaway<Data>>()?;
                Ok((frame.into(), buffer))
            }
            WINDOW_UPDATE_TAG => {
                let (frame, buffer) = buffer.decode::<WindowUpdate>()?;
                Ok((frame.into(), buffer))
            }
            BLOCKED_TAG => {
                let (frame, buffer) = buffer.decode::<Blocked>()?;
                Ok((frame.into(), buffer))
            }
            _ => Err(DecoderError::InvariantViolation("invalid frame tag")),
        }
    }
}

impl<Data: EncoderValue> EncoderValue for Frame<Data> {
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        match self {
            Frame::Padding(frame) => buffer.encode(frame),
            Frame::Ping(frame) => buffer.encode(frame),
            Frame::Stream(frame) => buffer.encode(frame),
            Frame::Ack(frame) => buffer.encode(frame),
            Frame::StopWaiting(frame) => buffer.encode(frame),
            Frame::RstStream(frame) => buffer.encode(frame),
            Frame::ConnectionClose(frame) => buffer.encode(frame),
            Frame::Goaway(frame) => buffer.encode(frame),
            Frame::WindowUpdate(frame) => buffer.encode(frame),
            Frame::Blocked(frame) => buffer.encode(frame),
        }
    }
}

#[cfg(test)]
mod tests;
