//! SCSP compressed frames
//!
//! Layout of a `%` frame payload:
//! `<compressed-size> <decompressed-size> <inner-tag><inner header><lz4 block>`
//!
//! The inner header (everything between the inner tag and the last
//! `compressed-size` bytes) travels uncompressed and is kept verbatim in
//! front of the decompressed block.

use super::codec::read_decimal;
use super::error::{DriverError, Result};
use super::frame::CMD_COMPRESSED;

/// Upper bound accepted for a declared decompressed size (512 MB)
pub const MAX_DECOMPRESSED_SIZE: usize = 512 * 1024 * 1024;

/// Inner frame recovered from a `%` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decompressed {
    pub tag: u8,
    /// Uncompressed header followed by the decompressed block
    pub frame: Vec<u8>,
}

pub fn compress_block(data: &[u8]) -> Vec<u8> {
    lz4_flex::block::compress(data)
}

/// Decompress exactly `decompressed_size` bytes or fail.
pub fn decompress_block(input: &[u8], decompressed_size: usize) -> Result<Vec<u8>> {
    if decompressed_size > MAX_DECOMPRESSED_SIZE {
        return Err(DriverError::ProtocolError(format!(
            "declared decompressed size {} exceeds limit",
            decompressed_size
        )));
    }
    let mut out = vec![0u8; decompressed_size];
    let written = lz4_flex::block::decompress_into(input, &mut out)
        .map_err(|e| DriverError::ProtocolError(format!("lz4 decompression failed: {}", e)))?;
    if written != decompressed_size {
        return Err(DriverError::ProtocolError(format!(
            "lz4 decompression produced {} bytes, expected {}",
            written, decompressed_size
        )));
    }
    Ok(out)
}

/// Recover the inner frame from the payload of a `%` frame.
pub fn decompress_frame(payload: &[u8]) -> Result<Decompressed> {
    let (compressed_size, rest) = read_decimal(payload)?;
    let (decompressed_size, inner) = read_decimal(rest)?;
    let compressed_size = usize::try_from(compressed_size)
        .map_err(|_| DriverError::protocol("negative compressed size"))?;
    let decompressed_size = usize::try_from(decompressed_size)
        .map_err(|_| DriverError::protocol("negative decompressed size"))?;

    let tag = *inner
        .first()
        .ok_or_else(|| DriverError::protocol("compressed frame has no inner frame"))?;
    if tag == CMD_COMPRESSED {
        return Err(DriverError::protocol("nested compressed frame"));
    }
    if compressed_size > inner.len() {
        return Err(DriverError::ProtocolError(format!(
            "compressed size {} exceeds frame payload of {} bytes",
            compressed_size,
            inner.len()
        )));
    }

    let split = inner.len() - compressed_size;
    let (header, block) = inner.split_at(split);
    let body = decompress_block(block, decompressed_size)?;

    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header);
    frame.extend_from_slice(&body);
    Ok(Decompressed { tag, frame })
}

/// Build a `%` frame around `inner_header` (starting with the inner tag) and
/// the uncompressed `body` that follows it.
pub fn encode_compressed(inner_header: &[u8], body: &[u8]) -> Vec<u8> {
    let block = compress_block(body);
    let mut payload = format!("{} {} ", block.len(), body.len()).into_bytes();
    payload.extend_from_slice(inner_header);
    payload.extend_from_slice(&block);

    let mut frame = format!("%{} ", payload.len()).into_bytes();
    frame.extend_from_slice(&payload);
    frame
}
