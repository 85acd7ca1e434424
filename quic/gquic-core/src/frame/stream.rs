// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{encode_uint, uint_len, FitError, Tag, STREAM_FRAME_BIT},
    stream::StreamId,
};
use s2n_codec::{decoder_parameterized_value, Encoder, EncoderValue};

const FIN_BIT: Tag = 0x40;
const DATA_LEN_BIT: Tag = 0x20;
const OFFSET_LEN_MASK: Tag = 0x1C;
const OFFSET_LEN_SHIFT: u32 = 2;
const STREAM_ID_LEN_MASK: Tag = 0x03;

/// Carries a contiguous run of stream bytes.
///
/// The tag byte encodes which fields are present: the stream id takes
/// 1-4 bytes, the offset 0 or 2-8 bytes, and the data length is either
/// explicit (2 bytes) or implied by the end of the packet when the
/// frame is last.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stream<Data> {
    pub stream_id: StreamId,

    /// The byte offset of `data` within the stream
    pub offset: u64,

    /// If true, the data length is implied by the packet boundary
    pub is_last_frame: bool,

    /// If true, the frame marks the end of the stream
    pub is_fin: bool,

    pub data: Data,
}

pub type StreamRef<'a> = Stream<&'a [u8]>;

impl<Data> Stream<Data> {
    #[inline]
    fn stream_id_len(&self) -> usize {
        uint_len(self.stream_id.as_u32() as u64)
    }

    #[inline]
    fn offset_len(&self) -> usize {
        if self.offset == 0 {
            0
        } else {
            uint_len(self.offset).max(2)
        }
    }

    #[inline]
    pub fn tag(&self) -> Tag {
        let mut tag = STREAM_FRAME_BIT;

        if self.is_fin {
            tag |= FIN_BIT;
        }

        if !self.is_last_frame {
            tag |= DATA_LEN_BIT;
        }

        let offset_len = self.offset_len();
        if offset_len != 0 {
            tag |= (((offset_len - 1) as Tag) << OFFSET_LEN_SHIFT) & OFFSET_LEN_MASK;
        }

        tag |= (self.stream_id_len() - 1) as Tag & STREAM_ID_LEN_MASK;

        tag
    }

    /// Converts the stream data from one type to another
    #[inline]
    pub fn map_data<F: FnOnce(Data) -> Out, Out>(self, map: F) -> Stream<Out> {
        Stream {
            stream_id: self.stream_id,
            offset: self.offset,
            is_last_frame: self.is_last_frame,
            is_fin: self.is_fin,
            data: map(self.data),
        }
    }
}

impl<Data: EncoderValue> Stream<Data> {
    /// Tries to fit the frame into the provided capacity.
    ///
    /// The `is_last_frame` field is updated by this call. On success the
    /// payload length that fits is returned; the caller truncates its
    /// data to that length before encoding.
    #[inline]
    pub fn try_fit(&mut self, capacity: usize) -> Result<usize, FitError> {
        let mut fixed_len = core::mem::size_of::<Tag>();
        fixed_len += self.stream_id_len();
        fixed_len += self.offset_len();

        let remaining_capacity = capacity.checked_sub(fixed_len).ok_or(FitError)?;

        let data_len = self.data.encoding_size();
        let max_data_len = remaining_capacity.min(data_len);

        // If data fits exactly into the capacity, mark it as the last frame
        if max_data_len == remaining_capacity {
            self.is_last_frame = true;
            return Ok(max_data_len);
        }

        self.is_last_frame = false;

        let prefixed_data_len = remaining_capacity
            .checked_sub(core::mem::size_of::<u16>())
            .ok_or(FitError)?;

        Ok(prefixed_data_len.min(data_len))
    }
}

decoder_parameterized_value!(
    impl<'a, Data> Stream<Data> {
        fn decode(tag: Tag, buffer: Buffer) -> Result<Self> {
            let is_fin = tag & FIN_BIT == FIN_BIT;
            let is_last_frame = tag & DATA_LEN_BIT != DATA_LEN_BIT;

            let stream_id_len = (tag & STREAM_ID_LEN_MASK) as usize + 1;
            let offset_len = match ((tag & OFFSET_LEN_MASK) >> OFFSET_LEN_SHIFT) as usize {
                0 => 0,
                value => value + 1,
            };

            let (stream_id, buffer) = decode_uint!(buffer, stream_id_len);
            let (offset, buffer) = decode_uint!(buffer, offset_len);

            let (data, buffer) = if !is_last_frame {
                buffer.decode_with_len_prefix::<u16, Data>()?
            } else {
                let len = buffer.len();
                let (data, buffer) = buffer.decode_slice(len)?;
                let (data, remaining) = data.decode()?;
                remaining.ensure_empty()?;
                (data, buffer)
            };

            let frame = Stream {
                stream_id: StreamId::new(stream_id as u32),
                offset,
                is_last_frame,
                is_fin,
                data,
            };

            Ok((frame, buffer))
        }
    }
);

impl<Data: EncoderValue> EncoderValue for Stream<Data> {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        encode_uint(buffer, self.stream_id.as_u32() as u64, self.stream_id_len());

        let offset_len = self.offset_len();
        if offset_len != 0 {
            encode_uint(buffer, self.offset, offset_len);
        }

        if self.is_last_frame {
            buffer.encode(&self.data);
        } else {
            buffer.encode_with_len_prefix::<u16, _>(&self.data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(stream_id: u32, offset: u64) -> Stream<&'static [u8]> {
        Stream {
            stream_id: StreamId::new(stream_id),
            offset,
            is_last_frame: false,
            is_fin: false,
            data: b"hello".as_slice(),
        }
    }

    #[test]
    fn field_lengths_shrink_to_fit() {
        assert_eq!(frame(5, 0).stream_id_len(), 1);
        assert_eq!(frame(0x1_00, 0).stream_id_len(), 2);
        assert_eq!(frame(0x1_0000, 0).stream_id_len(), 3);
        assert_eq!(frame(0x100_0000, 0).stream_id_len(), 4);

        // a zero offset is omitted entirely, anything else takes >= 2 bytes
        assert_eq!(frame(5, 0).offset_len(), 0);
        assert_eq!(frame(5, 1).offset_len(), 2);
        assert_eq!(frame(5, 0x1_0000).offset_len(), 3);
        assert_eq!(frame(5, u64::MAX).offset_len(), 8);
    }

    #[test]
    fn try_fit_marks_last_frame_on_exact_fit() {
        let mut subject = frame(5, 0);
        // tag + stream id + data
        let capacity = 1 + 1 + 5;
        assert_eq!(subject.try_fit(capacity).unwrap(), 5);
        assert!(subject.is_last_frame);

        // one spare byte forces a length prefix
        let mut subject = frame(5, 0);
        assert_eq!(subject.try_fit(capacity + 3).unwrap(), 5);
        assert!(!subject.is_last_frame);
    }

    #[test]
    fn try_fit_rejects_tiny_capacity() {
        let mut subject = frame(5, 1);
        assert!(subject.try_fit(3).is_err());
    }
}
