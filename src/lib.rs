//! Streaming of sandbox execution traces over a length-framed BSON protocol.
//!
//! The [`Sender`] runs next to the monitored process: it describes each
//! call index once with an info frame and then emits terse data frames.
//! The [`Receiver`] rebuilds typed [`Record`]s from that stream, keeping a
//! per-connection schema cache and tolerating the record layouts of older
//! monitors.

pub mod buffer;
pub mod category;
pub mod config;
pub mod convert;
pub mod error;
pub mod flags;
pub mod frame;
pub mod message;
pub mod process;
pub mod receiver;
pub mod record;
pub mod schema;
pub mod sender;

pub use buffer::{BufferSink, DirBufferSink};
pub use category::{CallTable, Category, StaticCallTable};
pub use config::ResultServerConfig;
pub use convert::{Converter, Value};
pub use error::{ConfigError, DecodeError, FrameError, SendError};
pub use frame::{read_frame, read_handshake, write_frame, Protocol, HANDSHAKE, MAX_FRAME_LEN};
pub use message::Message;
pub use receiver::Receiver;
pub use record::{ApiCall, JsonLinesSink, Record, RecordSink};
pub use schema::{CallDescriptor, SchemaCache};
pub use sender::Sender;
