//! Incremental response reader
//!
//! Socket reads are fed in as they arrive; [`ResponseReader::next_frame`]
//! yields a frame once one is complete. Chunked rowsets (`/` frames, possibly
//! wrapped in `%` compressed frames) are accumulated until the literal
//! [`ROWSET_CHUNKS_END`] sentinel and then surface as one `Frame::Rowset`.

use super::codec::{decode, decode_inner, parse_rowset_chunk, read_length, DecodeOptions, Decoded};
use super::compression::decompress_frame;
use super::error::{DriverError, Result};
use super::frame::{Frame, CMD_COMPRESSED, CMD_ROWSET_CHUNK, ROWSET_CHUNKS_END};
use super::rowset::RowsetBuilder;

#[derive(Debug, Default)]
pub struct ResponseReader {
    buffer: Vec<u8>,
    chunks: Option<RowsetBuilder>,
    in_chunk_stream: bool,
    options: DecodeOptions,
}

impl ResponseReader {
    pub fn new(options: DecodeOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed by a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn in_chunk_stream(&self) -> bool {
        self.in_chunk_stream
    }

    /// Drop buffered bytes and any partially assembled rowset.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.chunks = None;
        self.in_chunk_stream = false;
    }

    /// Next complete frame, or `None` until more bytes are fed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            let Some(&tag) = self.buffer.first() else {
                return Ok(None);
            };

            if self.in_chunk_stream || tag == CMD_ROWSET_CHUNK {
                if self.buffer.starts_with(ROWSET_CHUNKS_END) {
                    self.buffer.drain(..ROWSET_CHUNKS_END.len());
                    return self.finish_chunks().map(Some);
                }
                if self.buffer.len() < ROWSET_CHUNKS_END.len()
                    && ROWSET_CHUNKS_END.starts_with(&self.buffer)
                {
                    return Ok(None);
                }
                if tag == CMD_ROWSET_CHUNK {
                    let Some((start, end)) = self.complete_frame()? else {
                        return Ok(None);
                    };
                    parse_rowset_chunk(&self.buffer[start..end], &mut self.chunks, &self.options)?;
                    self.buffer.drain(..end);
                    self.in_chunk_stream = true;
                    continue;
                }
                if tag != CMD_COMPRESSED {
                    return Err(DriverError::ProtocolError(format!(
                        "unexpected frame tag {:?} inside a chunked rowset",
                        tag as char
                    )));
                }
            }

            if tag == CMD_COMPRESSED {
                let Some((start, end)) = self.complete_frame()? else {
                    return Ok(None);
                };
                let inner = decompress_frame(&self.buffer[start..end])?;
                self.buffer.drain(..end);

                if inner.tag == CMD_ROWSET_CHUNK {
                    let body = inner
                        .frame
                        .iter()
                        .position(|b| *b == b' ')
                        .map(|space| &inner.frame[space + 1..])
                        .ok_or_else(|| DriverError::protocol("compressed chunk has no header"))?;
                    parse_rowset_chunk(body, &mut self.chunks, &self.options)?;
                    self.in_chunk_stream = true;
                    continue;
                }
                if self.in_chunk_stream {
                    return Err(DriverError::protocol(
                        "compressed value frame inside a chunked rowset",
                    ));
                }
                return decode_inner(&inner.frame, &self.options).map(Some);
            }

            return match decode(&self.buffer, &self.options)? {
                Decoded::Complete { frame, consumed } => {
                    self.buffer.drain(..consumed);
                    Ok(Some(frame))
                }
                Decoded::Incomplete => Ok(None),
            };
        }
    }

    /// Payload bounds of the length-prefixed frame at the front of the buffer.
    fn complete_frame(&self) -> Result<Option<(usize, usize)>> {
        let Some((len, header_len)) = read_length(&self.buffer)? else {
            return Ok(None);
        };
        let end = header_len
            .checked_add(len)
            .ok_or_else(|| DriverError::protocol("frame length overflow"))?;
        if self.buffer.len() < end {
            return Ok(None);
        }
        Ok(Some((header_len, end)))
    }

    fn finish_chunks(&mut self) -> Result<Frame> {
        self.in_chunk_stream = false;
        let builder = self
            .chunks
            .take()
            .ok_or_else(|| DriverError::protocol("chunk sentinel without a rowset"))?;
        builder.finish().map(Frame::Rowset)
    }
}
