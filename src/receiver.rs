//! Stateful decoder turning a framed byte stream into trace records.
//!
//! A `Receiver` owns everything scoped to one connection: the schema cache
//! built from info frames, the pid of the most recent process announcement
//! (stamped onto later thread and API call records), and the byte cursor.
//! It yields records lazily and stops for good on clean end of stream or on
//! the first fatal error. Recoverable problems drop a single frame and are
//! reported through `tracing` only.

use std::io::Read;
use tracing::{debug, error, info, warn};

use crate::buffer::{self, BufferSink, DiscardBuffers};
use crate::category::{CallTable, StaticCallTable};
use crate::convert::Value;
use crate::error::DecodeError;
use crate::frame::{read_frame, LENGTH_PREFIX_SIZE};
use crate::message::{Data, Message};
use crate::process::{self, PROCESS_MARKER, THREAD_MARKER};
use crate::record::{ApiCall, Record, RecordSink};
use crate::schema::SchemaCache;

/// Outcome of consuming one frame
enum Step {
    Yield(Record),
    Skip,
    End,
}

pub struct Receiver<R: Read, B: BufferSink = DiscardBuffers> {
    reader: R,
    buffers: B,
    table: Box<dyn CallTable>,
    schema: SchemaCache,
    current_pid: Option<i64>,
    bytes_consumed: u64,
    done: bool,
    fault: Option<DecodeError>,
}

impl<R: Read> Receiver<R, DiscardBuffers> {
    pub fn new(reader: R) -> Self {
        Self::with_buffer_sink(reader, DiscardBuffers)
    }
}

impl<R: Read, B: BufferSink> Receiver<R, B> {
    pub fn with_buffer_sink(reader: R, buffers: B) -> Self {
        Self {
            reader,
            buffers,
            table: Box::new(StaticCallTable),
            schema: SchemaCache::new(),
            current_pid: None,
            bytes_consumed: 0,
            done: false,
            fault: None,
        }
    }

    /// Replace the table used to categorize info frames that carry no category
    pub fn with_call_table(mut self, table: impl CallTable + 'static) -> Self {
        self.table = Box::new(table);
        self
    }

    pub fn schema(&self) -> &SchemaCache {
        &self.schema
    }

    pub fn current_pid(&self) -> Option<i64> {
        self.current_pid
    }

    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    /// The fatal error that ended the stream, if it did not end cleanly
    pub fn fault(&self) -> Option<&DecodeError> {
        self.fault.as_ref()
    }

    pub fn buffer_sink(&self) -> &B {
        &self.buffers
    }

    pub fn into_buffer_sink(self) -> B {
        self.buffers
    }

    /// Forward every remaining record to `sink`; returns how many were delivered.
    pub fn drain(&mut self, sink: &mut dyn RecordSink) -> anyhow::Result<usize> {
        let mut count = 0;
        for record in self.by_ref() {
            sink.accept(record)?;
            count += 1;
        }
        Ok(count)
    }

    fn step(&mut self) -> Result<Step, DecodeError> {
        let Some(body) = read_frame(&mut self.reader)? else {
            return Ok(Step::End);
        };
        self.bytes_consumed += (body.len() + LENGTH_PREFIX_SIZE) as u64;

        match Message::decode(&body) {
            Ok(message) => self.handle(message),
            Err(e) => {
                let head = &body[..body.len().min(50)];
                warn!(error = %e, data = ?head, "undecodable frame body");
                Err(e)
            }
        }
    }

    fn handle(&mut self, message: Message) -> Result<Step, DecodeError> {
        match message {
            Message::Info(info) => {
                self.schema.describe(&info, self.table.as_ref());
                Ok(Step::Skip)
            }
            Message::Buffer { payload, checksum } => {
                let digest = buffer::verify(&payload, &checksum)?;
                if let Err(e) = self.buffers.store(&digest, &payload) {
                    warn!(checksum = %digest, error = %e, "failed to store buffer");
                }
                Ok(Step::Skip)
            }
            Message::Debug { tid, time, message } => {
                info!(tid, "debug message from monitor: {}", message);
                Ok(Step::Yield(Record::Debug { tid, time, message }))
            }
            Message::Data(data) => self.handle_data(data).map(Step::Yield),
        }
    }

    fn handle_data(&mut self, data: Data) -> Result<Record, DecodeError> {
        let desc = self
            .schema
            .get(data.index)
            .ok_or(DecodeError::UnknownIndex(data.index))?;

        let mut args = desc
            .bind(&data.args)
            .ok_or_else(|| DecodeError::ArgCountMismatch {
                api: desc.name.clone(),
                expected: desc.arg_names.len(),
                actual: data.args.len(),
            })?;

        match desc.name.as_str() {
            PROCESS_MARKER => {
                let proc = process::normalize(&args)?;
                self.current_pid = Some(proc.pid);
                Ok(Record::Process {
                    pid: proc.pid,
                    ppid: proc.ppid,
                    first_seen: proc.first_seen,
                    process_name: proc.process_name,
                })
            }
            THREAD_MARKER => {
                let pid = take(&mut args, "ProcessIdentifier")
                    .and_then(|v| v.as_i64())
                    .or(self.current_pid);
                Ok(Record::Thread { pid })
            }
            _ => {
                let status = match take(&mut args, "is_success") {
                    Some(raw) => raw.as_i64().unwrap_or_else(|| {
                        debug!(
                            api = %desc.name,
                            value = %raw,
                            "non-integer is_success, assuming success"
                        );
                        1
                    }),
                    None => 1,
                };
                let return_value = take(&mut args, "retval").unwrap_or(Value::Int(0));

                let flags = if self.schema.has_flags(&desc.name) {
                    self.schema.resolve_flags(&desc.name, &args)
                } else {
                    Default::default()
                };

                Ok(Record::ApiCall(ApiCall {
                    pid: self.current_pid,
                    tid: data.tid,
                    time: data.time,
                    api: desc.name.clone(),
                    category: desc.category.clone(),
                    status,
                    return_value,
                    arguments: args,
                    flags,
                    stacktrace: data.stacktrace,
                    uniqhash: data.uniqhash,
                    last_error: data.last_error,
                    nt_status: data.nt_status,
                }))
            }
        }
    }
}

impl<R: Read, B: BufferSink> Iterator for Receiver<R, B> {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        while !self.done {
            match self.step() {
                Ok(Step::Yield(record)) => return Some(record),
                Ok(Step::Skip) => continue,
                Ok(Step::End) => self.done = true,
                Err(e) if !e.is_fatal() => warn!(error = %e, "dropping frame"),
                Err(e) => {
                    error!(error = %e, offset = self.bytes_consumed, "stopping stream");
                    self.fault = Some(e);
                    self.done = true;
                }
            }
        }
        None
    }
}

/// Remove a named argument, keeping the order of the rest.
fn take(args: &mut Vec<(String, Value)>, name: &str) -> Option<Value> {
    let pos = args.iter().position(|(n, _)| n == name)?;
    Some(args.remove(pos).1)
}
