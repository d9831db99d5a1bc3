use serde_json::Value as JsonValue;

use super::error::ServerError;
use super::rowset::Rowset;

pub const CMD_STRING: u8 = b'+';
pub const CMD_ZEROSTRING: u8 = b'!';
pub const CMD_ERROR: u8 = b'-';
pub const CMD_INT: u8 = b':';
pub const CMD_FLOAT: u8 = b',';
pub const CMD_ROWSET: u8 = b'*';
pub const CMD_ROWSET_CHUNK: u8 = b'/';
pub const CMD_JSON: u8 = b'#';
pub const CMD_NULL: u8 = b'_';
pub const CMD_BLOB: u8 = b'$';
pub const CMD_COMPRESSED: u8 = b'%';
pub const CMD_COMMAND: u8 = b'^';
pub const CMD_ARRAY: u8 = b'=';
pub const CMD_PUBSUB: u8 = b'|';

/// Terminates a chunked rowset stream. Matched literally.
pub const ROWSET_CHUNKS_END: &[u8] = b"/6 0 0 0 ";

/// Integers, floats and null run to the next space instead of carrying a length.
pub fn has_length_prefix(tag: u8) -> bool {
    !matches!(tag, CMD_INT | CMD_FLOAT | CMD_NULL)
}

/// One decoded SCSP value
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Integer(i64),
    Float(f64),
    Null,
    Text(String),
    /// Server acknowledgement/echo string (`^`)
    Command(String),
    Blob(Vec<u8>),
    Json(JsonValue),
    Array(Vec<Frame>),
    Rowset(Rowset),
    PubSubEvent(String),
    Error(ServerError),
}

impl Frame {
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Frame::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Integers widen to floats here; nothing else converts.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Frame::Float(v) => Some(*v),
            Frame::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Frame::Text(s) | Frame::Command(s) | Frame::PubSubEvent(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Frame::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Frame]> {
        match self {
            Frame::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_rowset(&self) -> Option<&Rowset> {
        match self {
            Frame::Rowset(rowset) => Some(rowset),
            _ => None,
        }
    }

    pub fn into_rowset(self) -> Option<Rowset> {
        match self {
            Frame::Rowset(rowset) => Some(rowset),
            _ => None,
        }
    }

    /// Render as JSON; rowsets become arrays of objects keyed by column name.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Frame::Integer(v) => JsonValue::from(*v),
            Frame::Float(v) => JsonValue::from(*v),
            Frame::Null => JsonValue::Null,
            Frame::Text(s) | Frame::Command(s) | Frame::PubSubEvent(s) => {
                JsonValue::String(s.clone())
            }
            Frame::Blob(b) => JsonValue::Array(b.iter().map(|byte| JsonValue::from(*byte)).collect()),
            Frame::Json(v) => v.clone(),
            Frame::Array(items) => JsonValue::Array(items.iter().map(Frame::to_json).collect()),
            Frame::Rowset(rowset) => rowset.to_json(),
            Frame::Error(err) => serde_json::json!({
                "code": err.code,
                "external_code": err.external_code,
                "offset": err.offset,
                "message": err.message,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_prefix_asymmetry() {
        assert!(!has_length_prefix(CMD_INT));
        assert!(!has_length_prefix(CMD_FLOAT));
        assert!(!has_length_prefix(CMD_NULL));
        for tag in [
            CMD_STRING,
            CMD_ZEROSTRING,
            CMD_ERROR,
            CMD_ROWSET,
            CMD_ROWSET_CHUNK,
            CMD_JSON,
            CMD_BLOB,
            CMD_COMPRESSED,
            CMD_COMMAND,
            CMD_ARRAY,
            CMD_PUBSUB,
        ] {
            assert!(has_length_prefix(tag), "tag {} should be length-prefixed", tag as char);
        }
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Frame::Integer(7).as_i64(), Some(7));
        assert_eq!(Frame::Integer(7).as_f64(), Some(7.0));
        assert_eq!(Frame::Text("x".into()).as_str(), Some("x"));
        assert_eq!(Frame::Text("x".into()).as_i64(), None);
        assert!(Frame::Null.is_null());
        assert_eq!(Frame::Blob(vec![1, 2]).as_bytes(), Some(&[1u8, 2][..]));
    }

    #[test]
    fn test_to_json() {
        let frame = Frame::Array(vec![
            Frame::Integer(1),
            Frame::Text("a".into()),
            Frame::Null,
            Frame::Blob(vec![255]),
        ]);
        assert_eq!(frame.to_json(), serde_json::json!([1, "a", null, [255]]));
    }
}
