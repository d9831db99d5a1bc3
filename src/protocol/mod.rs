//! Wire protocol definitions for the SCSP driver
//!
//! Byte-exact framing, block-LZ4 compressed frames and chunked rowset
//! reassembly. Nothing in here performs I/O.

pub mod codec;
pub mod command;
pub mod compression;
pub mod error;
pub mod frame;
pub mod reader;
pub mod rowset;

pub use codec::{decode, encode_command, encode_value, DecodeOptions, Decoded, IntegerMode};
pub use command::{Command, Value};
pub use error::{DriverError, Result, ServerError};
pub use frame::{Frame, ROWSET_CHUNKS_END};
pub use reader::ResponseReader;
pub use rowset::{ColumnMetadata, Row, Rowset, RowsetBuilder};
