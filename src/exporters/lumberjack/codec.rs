// SPDX-License-Identifier: Apache-2.0

//! Lumberjack v1 frames.
//!
//! A batch goes on the wire as a window frame announcing the event count,
//! followed by one compressed frame whose zlib payload is the concatenation
//! of the batch's data frames. All integers are big-endian u32.

use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use tokio_util::codec::Decoder;

use crate::receivers::file::FileEvent;

pub const PROTOCOL_VERSION: u8 = b'1';
pub const FRAME_WINDOW: u8 = b'W';
pub const FRAME_COMPRESSED: u8 = b'C';
pub const FRAME_DATA: u8 = b'D';

/// Length of the acknowledgement the collector sends after each batch.
pub const ACK_LEN: usize = 6;

const COMPRESSION_LEVEL: u32 = 3;
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Encode a batch into window and compressed frames, numbering events from
/// `next_seq`. On return `next_seq` is one past the last assigned number.
pub fn encode_batch(events: &[FileEvent], hostname: &str, next_seq: &mut u32) -> io::Result<Bytes> {
    let mut data = BytesMut::new();
    for event in events {
        encode_data_frame(&mut data, *next_seq, event, hostname);
        *next_seq = next_seq.wrapping_add(1);
    }

    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(data.len() / 2),
        Compression::new(COMPRESSION_LEVEL),
    );
    encoder.write_all(&data)?;
    let compressed = encoder.finish()?;

    let compressed_len = u32::try_from(compressed.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "compressed payload too large")
    })?;
    let count = u32::try_from(events.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "batch too large"))?;

    let mut out = BytesMut::with_capacity(12 + compressed.len());
    out.put_u8(PROTOCOL_VERSION);
    out.put_u8(FRAME_WINDOW);
    out.put_u32(count);
    out.put_u8(PROTOCOL_VERSION);
    out.put_u8(FRAME_COMPRESSED);
    out.put_u32(compressed_len);
    out.put_slice(&compressed);
    Ok(out.freeze())
}

/// Append one data frame. Pairs are `file`, `host`, `offset`, `line`, then the
/// event's fields in key order.
pub fn encode_data_frame(buf: &mut BytesMut, seq: u32, event: &FileEvent, hostname: &str) {
    let offset = event.offset.to_string();

    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(FRAME_DATA);
    buf.put_u32(seq);
    buf.put_u32(4 + event.fields.len() as u32);

    put_pair(buf, b"file", event.source.as_bytes());
    put_pair(buf, b"host", hostname.as_bytes());
    put_pair(buf, b"offset", offset.as_bytes());
    put_pair(buf, b"line", &event.text);
    for (k, v) in event.fields.iter() {
        put_pair(buf, k.as_bytes(), v.as_bytes());
    }
}

fn put_pair(buf: &mut BytesMut, key: &[u8], value: &[u8]) {
    buf.put_u32(key.len() as u32);
    buf.put_slice(key);
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub seq: u32,
    pub pairs: Vec<(Bytes, Bytes)>,
}

impl DataFrame {
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.pairs
            .iter()
            .find(|(k, _)| k.as_ref() == key.as_bytes())
            .map(|(_, v)| v.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Window(u32),
    Compressed(Bytes),
    Data(DataFrame),
}

/// Decoder for the receiving side of the protocol.
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    fn check_len(&self, len: usize) -> io::Result<()> {
        if len > self.max_frame_size {
            return Err(invalid(format!(
                "Frame size {} exceeds maximum {}",
                len, self.max_frame_size
            )));
        }
        Ok(())
    }

    // Returns the total length of the data frame at the start of `src`, or
    // None if it is not complete yet.
    fn data_frame_len(&self, src: &[u8]) -> io::Result<Option<usize>> {
        if src.len() < 10 {
            return Ok(None);
        }
        let count = read_u32(&src[6..10]) as usize;
        let mut pos = 10;
        for _ in 0..count.saturating_mul(2) {
            if src.len() < pos + 4 {
                return Ok(None);
            }
            let len = read_u32(&src[pos..pos + 4]) as usize;
            self.check_len(len)?;
            pos += 4 + len;
            if src.len() < pos {
                return Ok(None);
            }
        }
        Ok(Some(pos))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameDecoder {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }
        if src[0] != PROTOCOL_VERSION {
            return Err(invalid(format!("Unsupported protocol version {:#04x}", src[0])));
        }

        match src[1] {
            FRAME_WINDOW => {
                if src.len() < 6 {
                    return Ok(None);
                }
                src.advance(2);
                Ok(Some(Frame::Window(src.get_u32())))
            }
            FRAME_COMPRESSED => {
                if src.len() < 6 {
                    return Ok(None);
                }
                let len = read_u32(&src[2..6]) as usize;
                self.check_len(len)?;
                if src.len() < 6 + len {
                    src.reserve(6 + len - src.len());
                    return Ok(None);
                }
                src.advance(6);
                Ok(Some(Frame::Compressed(src.split_to(len).freeze())))
            }
            FRAME_DATA => {
                let Some(total) = self.data_frame_len(src)? else {
                    return Ok(None);
                };
                let mut frame = src.split_to(total).freeze();
                frame.advance(2);
                let seq = frame.get_u32();
                let count = frame.get_u32() as usize;

                let mut pairs = Vec::with_capacity(count);
                for _ in 0..count {
                    let klen = frame.get_u32() as usize;
                    let key = frame.split_to(klen);
                    let vlen = frame.get_u32() as usize;
                    let value = frame.split_to(vlen);
                    pairs.push((key, value));
                }
                Ok(Some(Frame::Data(DataFrame { seq, pairs })))
            }
            other => Err(invalid(format!("Unknown frame type {:#04x}", other))),
        }
    }
}

/// Inflate a compressed frame's payload into its data frames.
pub fn decompress(payload: &[u8]) -> io::Result<Vec<DataFrame>> {
    let mut inflated = Vec::new();
    ZlibDecoder::new(payload).read_to_end(&mut inflated)?;

    let mut src = BytesMut::from(&inflated[..]);
    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    while !src.is_empty() {
        match decoder.decode(&mut src)? {
            Some(Frame::Data(frame)) => frames.push(frame),
            Some(other) => {
                return Err(invalid(format!("Unexpected frame in payload: {:?}", other)));
            }
            None => return Err(invalid("Truncated data frame in payload".to_string())),
        }
    }
    Ok(frames)
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
