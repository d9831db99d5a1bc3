//! SCSP frame codec
//!
//! Pure functions, no I/O:
//! - [`encode_command`] serializes SQL text plus parameters
//! - [`decode`] reads one frame from the front of a buffer, reporting
//!   [`Decoded::Incomplete`] when more socket data is needed
//!
//! Frames are `<tag><length> <payload>` except integers, floats and null,
//! which are `<tag><value> ` with no length.

use serde::{Deserialize, Serialize};

use super::command::{Command, Value};
use super::compression::decompress_frame;
use super::error::{DriverError, Result, ServerError};
use super::frame::*;
use super::rowset::{ColumnMetadata, Rowset, RowsetBuilder};

/// Longest accepted decimal length header
const MAX_LENGTH_DIGITS: usize = 20;

/// Longest accepted untagged scalar (`:`, `,`, `_`) before its space. An
/// i64 needs at most 20 bytes and a shortest-form f64 at most 24.
const MAX_SCALAR_LEN: usize = 64;

/// Largest integer exactly representable as an f64
const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

/// How `:` frames are materialized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegerMode {
    /// Integers beyond +-(2^53 - 1) decode as floats
    Number,
    /// Always decode as i64
    #[default]
    BigInt,
    /// i64 for every value; kept for configuration compatibility
    Mixed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    pub integer_mode: IntegerMode,
}

/// Outcome of decoding the front of a buffer
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Complete { frame: Frame, consumed: usize },
    Incomplete,
}

// ============================================================================
// Encoding
// ============================================================================

/// Serialize a command for the wire.
///
/// Without parameters the SQL goes out as a plain `+` string. With
/// parameters an `=` array is sent whose first element is the SQL as a
/// zero-terminated `!` string, followed by each parameter.
pub fn encode_command(command: &Command) -> Vec<u8> {
    let mut out = Vec::with_capacity(command.sql.len() + 16);
    if command.params.is_empty() {
        write_string(&mut out, &command.sql, false);
        return out;
    }

    let mut body = format!("{} ", command.params.len() + 1).into_bytes();
    write_string(&mut body, &command.sql, true);
    for param in &command.params {
        write_value(&mut body, param);
    }
    write_header(&mut out, CMD_ARRAY, body.len());
    out.extend_from_slice(&body);
    out
}

/// Serialize a single parameter value.
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(&mut out, value);
    out
}

fn write_header(out: &mut Vec<u8>, tag: u8, len: usize) {
    out.push(tag);
    out.extend_from_slice(len.to_string().as_bytes());
    out.push(b' ');
}

fn write_string(out: &mut Vec<u8>, s: &str, zero_terminated: bool) {
    if zero_terminated {
        write_header(out, CMD_ZEROSTRING, s.len() + 1);
        out.extend_from_slice(s.as_bytes());
        out.push(0);
    } else {
        write_header(out, CMD_STRING, s.len());
        out.extend_from_slice(s.as_bytes());
    }
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.extend_from_slice(b"_ "),
        Value::Integer(v) => out.extend_from_slice(format!(":{} ", v).as_bytes()),
        // shortest round-trip form, exponent notation for tiny and huge values
        Value::Float(v) => out.extend_from_slice(format!(",{:?} ", v).as_bytes()),
        Value::Text(s) => write_string(out, s, true),
        Value::Blob(b) => {
            write_header(out, CMD_BLOB, b.len());
            out.extend_from_slice(b);
        }
        Value::Array(items) => {
            let mut body = format!("{} ", items.len()).into_bytes();
            for item in items {
                write_value(&mut body, item);
            }
            write_header(out, CMD_ARRAY, body.len());
            out.extend_from_slice(&body);
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

fn is_known_tag(tag: u8) -> bool {
    matches!(
        tag,
        CMD_STRING
            | CMD_ZEROSTRING
            | CMD_ERROR
            | CMD_INT
            | CMD_FLOAT
            | CMD_ROWSET
            | CMD_ROWSET_CHUNK
            | CMD_JSON
            | CMD_NULL
            | CMD_BLOB
            | CMD_COMPRESSED
            | CMD_COMMAND
            | CMD_ARRAY
            | CMD_PUBSUB
    )
}

/// Position of the first space at or after `from`, `None` if more data may
/// still bring it, an error once `limit` bytes went by without one.
fn find_space(buf: &[u8], from: usize, limit: usize) -> Result<Option<usize>> {
    let window = buf.get(from..).unwrap_or_default();
    match window.iter().position(|b| *b == b' ') {
        Some(i) if i <= limit => Ok(Some(from + i)),
        Some(_) => Err(DriverError::protocol("frame header too long")),
        None if window.len() > limit => Err(DriverError::protocol("frame header too long")),
        None => Ok(None),
    }
}

fn parse_ascii<T: std::str::FromStr>(bytes: &[u8], what: &str) -> Result<T> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            DriverError::ProtocolError(format!(
                "invalid {}: {:?}",
                what,
                String::from_utf8_lossy(bytes)
            ))
        })
}

/// Invalid sequences become U+FFFD; the frame boundary is intact so the
/// socket stays usable.
fn utf8(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Read a space-terminated decimal from a buffer known to be complete.
pub(crate) fn read_decimal(buf: &[u8]) -> Result<(i64, &[u8])> {
    let space = buf
        .iter()
        .position(|b| *b == b' ')
        .ok_or_else(|| DriverError::protocol("missing space after number"))?;
    let value = parse_ascii(&buf[..space], "number")?;
    Ok((value, &buf[space + 1..]))
}

/// Decode one frame from the front of `buf`.
///
/// `/` chunk frames are rejected here; chunk streams go through
/// [`ResponseReader`](super::reader::ResponseReader).
pub fn decode(buf: &[u8], options: &DecodeOptions) -> Result<Decoded> {
    let Some(&tag) = buf.first() else {
        return Ok(Decoded::Incomplete);
    };
    if !is_known_tag(tag) {
        return Err(DriverError::ProtocolError(format!(
            "unexpected frame tag {:?}",
            tag as char
        )));
    }

    if !has_length_prefix(tag) {
        let Some(space) = find_space(buf, 1, MAX_SCALAR_LEN)? else {
            return Ok(Decoded::Incomplete);
        };
        let frame = decode_scalar(tag, &buf[1..space], options)?;
        return Ok(Decoded::Complete {
            frame,
            consumed: space + 1,
        });
    }

    let Some((len, header_len)) = read_length(buf)? else {
        return Ok(Decoded::Incomplete);
    };
    let total = header_len
        .checked_add(len)
        .ok_or_else(|| DriverError::protocol("frame length overflow"))?;
    if buf.len() < total {
        return Ok(Decoded::Incomplete);
    }

    let payload = &buf[header_len..total];
    let frame = match tag {
        CMD_ROWSET_CHUNK => {
            return Err(DriverError::protocol(
                "rowset chunk outside a chunked response",
            ))
        }
        CMD_COMPRESSED => {
            let inner = decompress_frame(payload)?;
            if inner.tag == CMD_ROWSET_CHUNK {
                return Err(DriverError::protocol(
                    "compressed rowset chunk outside a chunked response",
                ));
            }
            decode_inner(&inner.frame, options)?
        }
        _ => decode_payload(tag, payload, options)?,
    };
    Ok(Decoded::Complete {
        frame,
        consumed: total,
    })
}

/// `(declared length, offset of payload)` of a length-prefixed frame.
pub(crate) fn read_length(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let Some(space) = find_space(buf, 1, MAX_LENGTH_DIGITS)? else {
        return Ok(None);
    };
    let len = parse_ascii(&buf[1..space], "frame length")?;
    Ok(Some((len, space + 1)))
}

fn decode_scalar(tag: u8, text: &[u8], options: &DecodeOptions) -> Result<Frame> {
    match tag {
        CMD_INT => {
            let value: i64 = parse_ascii(text, "integer")?;
            if options.integer_mode == IntegerMode::Number
                && value.unsigned_abs() > MAX_SAFE_INTEGER as u64
            {
                Ok(Frame::Float(value as f64))
            } else {
                Ok(Frame::Integer(value))
            }
        }
        CMD_FLOAT => Ok(Frame::Float(parse_ascii(text, "float")?)),
        _ => Ok(Frame::Null),
    }
}

/// Decode a frame recovered from a compressed wrapper. The body runs to the
/// end of the reconstructed bytes; the inner declared length is not used.
pub(crate) fn decode_inner(frame: &[u8], options: &DecodeOptions) -> Result<Frame> {
    let tag = *frame
        .first()
        .ok_or_else(|| DriverError::protocol("empty inner frame"))?;
    let space = frame
        .iter()
        .position(|b| *b == b' ')
        .ok_or_else(|| DriverError::protocol("inner frame has no header"))?;
    if !has_length_prefix(tag) {
        return decode_scalar(tag, &frame[1..space], options);
    }
    decode_payload(tag, &frame[space + 1..], options)
}

fn decode_payload(tag: u8, payload: &[u8], options: &DecodeOptions) -> Result<Frame> {
    match tag {
        CMD_STRING => Ok(Frame::Text(utf8(payload))),
        CMD_ZEROSTRING => {
            let text = payload.strip_suffix(&[0]).unwrap_or(payload);
            Ok(Frame::Text(utf8(text)))
        }
        CMD_COMMAND => Ok(Frame::Command(utf8(payload))),
        CMD_PUBSUB => Ok(Frame::PubSubEvent(utf8(payload))),
        CMD_BLOB => Ok(Frame::Blob(payload.to_vec())),
        CMD_JSON => serde_json::from_slice(payload)
            .map(Frame::Json)
            .map_err(|e| DriverError::ProtocolError(format!("invalid json frame: {}", e))),
        CMD_ERROR => Ok(Frame::Error(parse_error(payload))),
        CMD_ARRAY => {
            let mut parser = Parser::new(payload, *options);
            let count = parser.integer_until(b' ')?;
            let count = usize::try_from(count)
                .map_err(|_| DriverError::protocol("negative array length"))?;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(parser.frame()?);
            }
            Ok(Frame::Array(items))
        }
        CMD_ROWSET => {
            let mut parser = Parser::new(payload, *options);
            parser.rowset().map(Frame::Rowset)
        }
        other => Err(DriverError::ProtocolError(format!(
            "unexpected frame tag {:?}",
            other as char
        ))),
    }
}

/// Parse `code[:ext_code[:offset]] message`.
fn parse_error(payload: &[u8]) -> ServerError {
    let text = String::from_utf8_lossy(payload);
    let (codes, message) = text.split_once(' ').unwrap_or((text.as_ref(), ""));
    let mut parts = codes.split(':');
    let mut next = |default: i64| {
        parts
            .next()
            .and_then(|p| p.parse::<i64>().ok())
            .unwrap_or(default)
    };
    let code = next(0);
    let external_code = next(0);
    let offset = next(-1);
    ServerError {
        code,
        external_code,
        offset,
        message: message.to_string(),
    }
}

/// Apply one chunk body (`index:version rows cols ...`) to `builder`.
pub(crate) fn parse_rowset_chunk(
    body: &[u8],
    builder: &mut Option<RowsetBuilder>,
    options: &DecodeOptions,
) -> Result<()> {
    let mut parser = Parser::new(body, *options);
    let header = parser.rowset_header()?;

    if header.index == 1 {
        if builder.is_some() {
            return Err(DriverError::protocol("rowset chunk 1 received twice"));
        }
        let columns = parser.column_metadata(header.version, header.columns)?;
        *builder = Some(RowsetBuilder::begin(header.version, columns));
    }

    let Some(builder) = builder.as_mut() else {
        return Err(DriverError::ProtocolError(format!(
            "rowset chunk {} arrived before column metadata",
            header.index
        )));
    };
    let cells = parser.cells(header.rows, builder.column_count())?;
    builder.append_chunk(header.rows, cells)
}

struct RowsetHeader {
    index: i64,
    version: u8,
    rows: usize,
    columns: usize,
}

/// Sequential reader over a complete payload
struct Parser<'a> {
    buf: &'a [u8],
    pos: usize,
    options: DecodeOptions,
}

impl<'a> Parser<'a> {
    fn new(buf: &'a [u8], options: DecodeOptions) -> Self {
        Self {
            buf,
            pos: 0,
            options,
        }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn integer_until(&mut self, delim: u8) -> Result<i64> {
        let rest = self.remaining();
        let end = rest.iter().position(|b| *b == delim).ok_or_else(|| {
            DriverError::ProtocolError(format!("missing {:?} in frame header", delim as char))
        })?;
        let value = parse_ascii(&rest[..end], "header field")?;
        self.pos += end + 1;
        Ok(value)
    }

    fn count_until(&mut self, delim: u8) -> Result<usize> {
        usize::try_from(self.integer_until(delim)?)
            .map_err(|_| DriverError::protocol("negative count in rowset header"))
    }

    /// Decode one nested frame that must be entirely present.
    fn frame(&mut self) -> Result<Frame> {
        match decode(self.remaining(), &self.options)? {
            Decoded::Complete { frame, consumed } => {
                self.pos += consumed;
                Ok(frame)
            }
            Decoded::Incomplete => Err(DriverError::protocol("truncated nested frame")),
        }
    }

    fn rowset_header(&mut self) -> Result<RowsetHeader> {
        let index = self.integer_until(b':')?;
        let version = self.integer_until(b' ')?;
        let version = match version {
            1 => 1,
            2 => 2,
            other => {
                return Err(DriverError::ProtocolError(format!(
                    "unsupported rowset metadata version {}",
                    other
                )))
            }
        };
        let rows = self.count_until(b' ')?;
        let columns = self.count_until(b' ')?;
        Ok(RowsetHeader {
            index,
            version,
            rows,
            columns,
        })
    }

    fn column_metadata(&mut self, version: u8, count: usize) -> Result<Vec<ColumnMetadata>> {
        let mut columns = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let name = frame_to_string(self.frame()?).unwrap_or_default();
            columns.push(ColumnMetadata::new(name));
        }
        if version == 2 {
            for column in columns.iter_mut() {
                column.decl_type = frame_to_string(self.frame()?);
            }
            for column in columns.iter_mut() {
                column.database = frame_to_string(self.frame()?);
            }
            for column in columns.iter_mut() {
                column.table = frame_to_string(self.frame()?);
            }
            for column in columns.iter_mut() {
                column.origin_column = frame_to_string(self.frame()?);
            }
            for column in columns.iter_mut() {
                column.not_null = frame_to_bool(&self.frame()?);
            }
            for column in columns.iter_mut() {
                column.primary_key = frame_to_bool(&self.frame()?);
            }
            for column in columns.iter_mut() {
                column.auto_increment = frame_to_bool(&self.frame()?);
            }
        }
        Ok(columns)
    }

    fn cells(&mut self, rows: usize, columns: usize) -> Result<Vec<Frame>> {
        let total = rows
            .checked_mul(columns)
            .ok_or_else(|| DriverError::protocol("rowset dimensions overflow"))?;
        let mut cells = Vec::with_capacity(total.min(1 << 16));
        for _ in 0..total {
            cells.push(self.frame()?);
        }
        Ok(cells)
    }

    fn rowset(&mut self) -> Result<Rowset> {
        let header = self.rowset_header()?;
        let columns = self.column_metadata(header.version, header.columns)?;
        let cells = self.cells(header.rows, columns.len())?;
        let mut builder = RowsetBuilder::begin(header.version, columns);
        builder.append_chunk(header.rows, cells)?;
        builder.finish()
    }
}

fn frame_to_string(frame: Frame) -> Option<String> {
    match frame {
        Frame::Text(s) | Frame::Command(s) => Some(s),
        Frame::Integer(v) => Some(v.to_string()),
        Frame::Float(v) => Some(v.to_string()),
        _ => None,
    }
}

fn frame_to_bool(frame: &Frame) -> Option<bool> {
    match frame {
        Frame::Integer(v) => Some(*v != 0),
        Frame::Text(s) => s.trim().parse::<i64>().ok().map(|v| v != 0),
        _ => None,
    }
}
