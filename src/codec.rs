//! DoIP stream framing utilities.

use std::io::{Read, Write};

use crate::error::{DecodeError, Result};
use crate::frame::{DoipFrame, FrameCodec};
use crate::header::{DoipHeader, HEADER_SIZE};

/// Read a complete DoIP frame from a stream.
///
/// Reads the header first, then the payload announced by its length field.
pub fn read_frame<R: Read>(reader: &mut R, codec: &FrameCodec) -> Result<DoipFrame> {
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf)?;

    let (_, _, payload_len) = DoipHeader::peek(&header_buf)?;
    if payload_len as usize > codec.max_payload_size() {
        return Err(DecodeError::PayloadTooLarge {
            length: payload_len,
            max: codec.max_payload_size(),
        }
        .into());
    }

    let mut data = vec![0u8; HEADER_SIZE + payload_len as usize];
    data[..HEADER_SIZE].copy_from_slice(&header_buf);
    if payload_len > 0 {
        reader.read_exact(&mut data[HEADER_SIZE..])?;
    }

    Ok(codec.decode(&data)?)
}

/// Write a complete DoIP frame to a stream.
pub fn write_frame<W: Write>(writer: &mut W, frame: &DoipFrame) -> Result<()> {
    writer.write_all(&frame.header.to_bytes())?;
    writer.write_all(&frame.payload)?;
    Ok(())
}

/// A buffered reader for DoIP frames arriving on a byte stream.
///
/// Accumulates partial reads until a complete frame is available. Frames
/// with an unknown payload type or an oversized payload are skipped; a
/// malformed header drops everything buffered since the stream cannot be
/// resynchronised.
#[derive(Debug)]
pub struct FrameReader {
    buffer: Vec<u8>,
    position: usize,
    discard: usize,
    codec: FrameCodec,
}

impl FrameReader {
    /// Create a new frame reader.
    pub fn new() -> Self {
        Self::with_codec(FrameCodec::default())
    }

    /// Create a frame reader enforcing the codec's payload limit.
    pub fn with_codec(codec: FrameCodec) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            position: 0,
            discard: 0,
            codec,
        }
    }

    /// Add data to the internal buffer.
    pub fn feed(&mut self, mut data: &[u8]) {
        if self.discard > 0 {
            let skip = self.discard.min(data.len());
            self.discard -= skip;
            data = &data[skip..];
        }
        self.buffer.extend_from_slice(data);
    }

    /// Try to parse a complete frame from the buffer.
    ///
    /// Returns `Ok(None)` if more data is needed. After an error the reader
    /// has already moved past the offending bytes, so parsing can continue.
    pub fn try_parse(&mut self) -> std::result::Result<Option<DoipFrame>, DecodeError> {
        let available = self.buffer.len() - self.position;
        if available < HEADER_SIZE {
            return Ok(None);
        }

        let header_data = &self.buffer[self.position..self.position + HEADER_SIZE];
        let (_, _, payload_len) = match DoipHeader::peek(header_data) {
            Ok(fields) => fields,
            Err(e) => {
                self.clear();
                return Err(e);
            }
        };

        if payload_len as usize > self.codec.max_payload_size() {
            let frame_len = HEADER_SIZE + payload_len as usize;
            let buffered = available.min(frame_len);
            self.discard = frame_len - buffered;
            self.position += buffered;
            self.compact();
            return Err(DecodeError::PayloadTooLarge {
                length: payload_len,
                max: self.codec.max_payload_size(),
            });
        }

        let total_len = HEADER_SIZE + payload_len as usize;
        if available < total_len {
            return Ok(None);
        }

        let frame_data = &self.buffer[self.position..self.position + total_len];
        let result = self.codec.decode(frame_data);
        self.position += total_len;

        if self.position > self.buffer.len() / 2 {
            self.compact();
        }

        result.map(Some)
    }

    /// Parse all complete frames, skipping undecodable ones.
    pub fn parse_all(&mut self) -> Vec<std::result::Result<DoipFrame, DecodeError>> {
        let mut frames = Vec::new();
        loop {
            match self.try_parse() {
                Ok(Some(frame)) => frames.push(Ok(frame)),
                Ok(None) => break,
                Err(e) => frames.push(Err(e)),
            }
        }
        frames
    }

    fn compact(&mut self) {
        if self.position > 0 {
            self.buffer.drain(..self.position);
            self.position = 0;
        }
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.position = 0;
    }

    /// Get the number of bytes in the buffer.
    pub fn len(&self) -> usize {
        self.buffer.len() - self.position
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DoipError;
    use crate::frame::encode;
    use crate::types::PayloadType;

    #[test]
    fn test_read_write_frame() {
        let original = DoipFrame::new(PayloadType::DiagnosticMessage, &b"\x0e\x80\x10\x01\x3e\x00"[..]).unwrap();

        let mut buffer = Vec::new();
        write_frame(&mut buffer, &original).unwrap();

        let mut cursor = std::io::Cursor::new(buffer);
        let parsed = read_frame(&mut cursor, &FrameCodec::default()).unwrap();

        assert_eq!(original, parsed);
    }

    #[test]
    fn test_read_frame_over_limit() {
        let data = encode(PayloadType::DiagnosticMessage, &[0u8; 64]).unwrap();
        let mut cursor = std::io::Cursor::new(data);
        let codec = FrameCodec::new().with_max_payload_size(16);

        let err = read_frame(&mut cursor, &codec).unwrap_err();
        assert!(matches!(
            err,
            DoipError::Decode(DecodeError::PayloadTooLarge { length: 64, max: 16 })
        ));
    }

    #[test]
    fn test_frame_reader_partial() {
        let data = encode(PayloadType::AliveCheckResponse, &[0x0E, 0x80]).unwrap();
        let mut reader = FrameReader::new();

        reader.feed(&data[..5]);
        assert_eq!(reader.try_parse(), Ok(None));

        reader.feed(&data[5..]);
        let frame = reader.try_parse().unwrap().unwrap();
        assert_eq!(frame.payload_type(), PayloadType::AliveCheckResponse);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_frame_reader_multiple() {
        let mut data = encode(PayloadType::DiagnosticMessagePositiveAck, &[0, 1, 0, 2, 0]).unwrap();
        data.extend(encode(PayloadType::DiagnosticMessage, &[0, 2, 0, 1, 0x50, 0x01]).unwrap());

        let mut reader = FrameReader::new();
        reader.feed(&data);

        let frames = reader.parse_all();
        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0].as_ref().unwrap().payload_type(),
            PayloadType::DiagnosticMessagePositiveAck
        );
        assert_eq!(
            frames[1].as_ref().unwrap().payload_type(),
            PayloadType::DiagnosticMessage
        );
    }

    #[test]
    fn test_frame_reader_skips_unknown_type() {
        let mut data = vec![0x02, 0xFD, 0x77, 0x77, 0x00, 0x00, 0x00, 0x02, 0xAA, 0xBB];
        data.extend(encode(PayloadType::AliveCheckRequest, &[]).unwrap());

        let mut reader = FrameReader::new();
        reader.feed(&data);

        assert_eq!(reader.try_parse(), Err(DecodeError::UnknownPayloadType(0x7777)));
        let frame = reader.try_parse().unwrap().unwrap();
        assert_eq!(frame.payload_type(), PayloadType::AliveCheckRequest);
    }

    #[test]
    fn test_frame_reader_skips_oversized_across_feeds() {
        let big = encode(PayloadType::DiagnosticMessage, &[0x55; 32]).unwrap();
        let next = encode(PayloadType::AliveCheckRequest, &[]).unwrap();

        let mut reader = FrameReader::with_codec(FrameCodec::new().with_max_payload_size(8));
        reader.feed(&big[..12]);
        assert!(matches!(
            reader.try_parse(),
            Err(DecodeError::PayloadTooLarge { length: 32, max: 8 })
        ));

        let mut rest = big[12..].to_vec();
        rest.extend_from_slice(&next);
        reader.feed(&rest);

        let frame = reader.try_parse().unwrap().unwrap();
        assert_eq!(frame.payload_type(), PayloadType::AliveCheckRequest);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_frame_reader_malformed_clears() {
        let mut reader = FrameReader::new();
        reader.feed(&[0x02, 0x02, 0x80, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01]);

        assert!(matches!(reader.try_parse(), Err(DecodeError::MalformedHeader(_))));
        assert!(reader.is_empty());
    }
}
