//! SQLite Cloud native driver
//!
//! Speaks the SCSP binary protocol over a persistent TLS socket:
//! - frame codec with zero-terminated parameters and block-LZ4 frames
//! - rowsets with v1/v2 column metadata and chunked reassembly
//! - a single-flight queue serializing every caller onto one socket
//!
//! # Example
//!
//! ```rust,no_run
//! use sqlitecloud::{Command, Connection, ConnectionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sqlitecloud::DriverError> {
//!     let config = ConnectionConfig::builder("myproject.sqlite.cloud")
//!         .auth("admin", "password")
//!         .database("chinook.sqlite")
//!         .build();
//!     let conn = Connection::open(config).await?;
//!
//!     let frame = conn
//!         .send(Command::new("SELECT * FROM albums WHERE AlbumId = ?").bind(1))
//!         .await?;
//!     if let Some(rowset) = frame.as_rowset() {
//!         for row in rowset.rows() {
//!             println!("{:?}", row.get_by_name("Title"));
//!         }
//!     }
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod protocol;
pub mod queue;

pub use client::{
    Connection, ConnectionConfig, ConnectionConfigBuilder, ConnectionState, Credentials,
    SocketTransport, TlsOptions, Transport,
};
pub use protocol::{
    ColumnMetadata, Command, DriverError, Frame, IntegerMode, Result, Row, Rowset, ServerError,
    Value,
};
pub use queue::{Completion, Operation, OperationQueue};
