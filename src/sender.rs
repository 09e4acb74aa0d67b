//! Emitting side: runs inside the monitored process and streams calls to
//! the result server over one shared connection.
//!
//! Each call index is described by an info frame exactly once per
//! connection, always before its first data frame. Checking the described
//! table and writing both frames happen under a single lock so that
//! concurrent emitters never interleave bytes or race the description.

use chrono::Utc;
use parking_lot::Mutex;
use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::buffer;
use crate::category::{resolve_category, CallTable, StaticCallTable};
use crate::config::ResultServerConfig;
use crate::convert::Value;
use crate::error::SendError;
use crate::frame::{send_all, write_frame, HANDSHAKE};
use crate::message::{ArgSpec, Data, Info, Message};
use crate::process::PROCESS_MARKER;

/// Number of call indices the described table can track
pub const EXPLAINED_CAPACITY: usize = 512;

/// Index reserved for process announcements
pub const PROCESS_INDEX: u32 = 511;

/// Wire representation chosen for one positional argument
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArgFormat {
    /// 64-bit integer
    Long,
    /// Text
    Unicode,
}

/// Integers travel as integers; everything else as text.
pub fn format_of(args: &[(String, Value)]) -> Vec<ArgFormat> {
    args.iter()
        .map(|(_, value)| match value {
            Value::Int(_) | Value::Bool(_) => ArgFormat::Long,
            _ => ArgFormat::Unicode,
        })
        .collect()
}

fn coerce(value: &Value, format: ArgFormat) -> bson::Bson {
    match (format, value.as_i64()) {
        (ArgFormat::Long, Some(v)) => bson::Bson::Int64(v),
        _ => bson::Bson::String(value.to_string()),
    }
}

struct Connection<W> {
    stream: W,
    explained: Vec<bool>,
}

impl<W: Write> Connection<W> {
    fn write(&mut self, message: &Message) -> Result<(), SendError> {
        let body = message.encode()?;
        write_frame(&mut self.stream, &body)?;
        Ok(())
    }
}

pub struct Sender<W: Write> {
    conn: Mutex<Connection<W>>,
    table: Box<dyn CallTable>,
    start: Instant,
    pid: AtomicI64,
}

impl Sender<TcpStream> {
    /// Connect and announce the protocol; failure is logged and reported as `None`.
    pub fn connect(config: &ResultServerConfig, start: Instant) -> Option<Self> {
        match Self::try_connect(config, start) {
            Ok(sender) => Some(sender),
            Err(e) => {
                error!(error = %e, "could not reach result server");
                None
            }
        }
    }

    pub fn try_connect(config: &ResultServerConfig, start: Instant) -> Result<Self, SendError> {
        let addr = config.addr();
        let stream = TcpStream::connect(&addr).map_err(|source| SendError::Connect {
            addr: addr.clone(),
            source,
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!(%addr, error = %e, "could not disable Nagle on result server socket");
        }
        debug!(%addr, "connected to result server");
        Self::handshake(stream, start)
    }
}

impl<W: Write> Sender<W> {
    /// Wrap an already-connected stream without writing the handshake
    pub fn new(stream: W, start: Instant) -> Self {
        Self {
            conn: Mutex::new(Connection {
                stream,
                explained: vec![false; EXPLAINED_CAPACITY],
            }),
            table: Box::new(StaticCallTable),
            start,
            pid: AtomicI64::new(-1),
        }
    }

    /// Write the unframed protocol marker, then wrap the stream
    pub fn handshake(mut stream: W, start: Instant) -> Result<Self, SendError> {
        send_all(&mut stream, HANDSHAKE)?;
        Ok(Self::new(stream, start))
    }

    pub fn with_call_table(mut self, table: impl CallTable + 'static) -> Self {
        self.table = Box::new(table);
        self
    }

    /// Syscall number for `name`, if the call table knows it
    pub fn resolve_index(&self, name: &str) -> Option<u32> {
        self.table.index_of(name)
    }

    pub fn pid(&self) -> i64 {
        self.pid.load(Ordering::Relaxed)
    }

    pub fn set_pid(&self, pid: i64) {
        self.pid.store(pid, Ordering::Relaxed);
    }

    pub fn into_inner(self) -> W {
        self.conn.into_inner().stream
    }

    fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Emit one call: its info frame if the index is new, then its data frame.
    pub fn emit(
        &self,
        index: u32,
        name: &str,
        is_success: bool,
        return_value: impl Into<Value>,
        args: &[(String, Value)],
    ) -> Result<(), SendError> {
        let formats = format_of(args);
        let mut conn = self.conn.lock();

        match conn.explained.get_mut(index as usize) {
            Some(explained) if !*explained => {
                *explained = true;
                let mut specs = vec![ArgSpec::bare("is_success"), ArgSpec::bare("retval")];
                specs.extend(args.iter().map(|(arg, _)| ArgSpec::bare(arg.clone())));

                let info = Message::Info(Info {
                    index: index as i64,
                    name: name.to_string(),
                    category: Some(resolve_category(self.table.as_ref(), name, args).to_string()),
                    args: specs,
                    ..Default::default()
                });
                debug!(index, name, "describing call");
                conn.write(&info)?;
            }
            Some(_) => {}
            None => error!(
                index,
                name,
                capacity = EXPLAINED_CAPACITY,
                "call index outside the described table, sending data without info"
            ),
        }

        let mut values = vec![
            bson::Bson::Int64(is_success as i64),
            return_value.into().to_bson(),
        ];
        values.extend(
            args.iter()
                .zip(&formats)
                .map(|((_, value), format)| coerce(value, *format)),
        );

        let data = Message::Data(Data {
            index: index as i64,
            tid: self.pid(),
            time: self.elapsed(),
            args: values,
            ..Default::default()
        });
        conn.write(&data)
    }

    /// Announce a new process using the epoch-milliseconds layout.
    pub fn log_new_process(
        &self,
        pid: i64,
        ppid: i64,
        module_path: Option<&str>,
    ) -> Result<(), SendError> {
        self.set_pid(pid);
        let args = vec![
            ("TimeStamp".to_string(), Value::Int(Utc::now().timestamp_millis())),
            ("ProcessIdentifier".to_string(), Value::Int(pid)),
            ("ParentProcessIdentifier".to_string(), Value::Int(ppid)),
            (
                "ModulePath".to_string(),
                Value::from(module_path.unwrap_or_default()),
            ),
        ];
        self.emit(PROCESS_INDEX, PROCESS_MARKER, true, 0, &args)
    }

    pub fn emit_debug(&self, message: &str) -> Result<(), SendError> {
        let debug = Message::Debug {
            tid: self.pid(),
            time: self.elapsed(),
            message: message.to_string(),
        };
        self.conn.lock().write(&debug)
    }

    /// Ship a raw memory dump addressed by its content checksum
    pub fn emit_buffer(&self, payload: &[u8]) -> Result<(), SendError> {
        let message = Message::Buffer {
            payload: payload.to_vec(),
            checksum: buffer::checksum(payload),
        };
        self.conn.lock().write(&message)
    }
}
