//! Structured trace records and the sinks that receive them.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::io::Write;

use crate::convert::Value;

/// One decoded API call
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ApiCall {
    pub pid: Option<i64>,
    pub tid: i64,
    /// Seconds since the monitored process started
    pub time: f64,
    pub api: String,
    pub category: String,
    pub status: i64,
    pub return_value: Value,
    #[serde(serialize_with = "ordered_map")]
    pub arguments: Vec<(String, Value)>,
    pub flags: BTreeMap<String, String>,
    pub stacktrace: Vec<Value>,
    pub uniqhash: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nt_status: Option<Value>,
}

impl ApiCall {
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// A record surfaced to the record sink
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Record {
    Debug {
        tid: i64,
        time: f64,
        message: String,
    },
    Process {
        pid: i64,
        ppid: i64,
        first_seen: DateTime<Utc>,
        process_name: String,
    },
    Thread {
        pid: Option<i64>,
    },
    #[serde(rename = "apicall")]
    ApiCall(ApiCall),
}

fn ordered_map<S: Serializer>(
    entries: &[(String, Value)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(entries.iter().map(|(k, v)| (k, v)))
}

/// Consumer of decoded records, called once per record in stream order
pub trait RecordSink {
    fn accept(&mut self, record: Record) -> anyhow::Result<()>;
}

impl RecordSink for Vec<Record> {
    fn accept(&mut self, record: Record) -> anyhow::Result<()> {
        self.push(record);
        Ok(())
    }
}

/// Writes each record as one JSON line
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn accept(&mut self, record: Record) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.out, &record)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_lines_shape() {
        let call = ApiCall {
            pid: Some(1234),
            tid: 1234,
            time: 0.5,
            api: "CreateFileW".into(),
            category: "filesystem".into(),
            status: 1,
            return_value: Value::Int(0),
            arguments: vec![
                ("lpFileName".into(), Value::from("C:\\a.txt")),
                ("dwAccess".into(), Value::from("0x00000003")),
            ],
            flags: BTreeMap::from([("dwAccess".to_string(), "READ|WRITE".to_string())]),
            stacktrace: Vec::new(),
            uniqhash: Value::Int(0),
            last_error: None,
            nt_status: None,
        };

        let mut sink = JsonLinesSink::new(Vec::new());
        sink.accept(Record::ApiCall(call)).unwrap();
        sink.accept(Record::Thread { pid: None }).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();

        let json: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(json["type"], "apicall");
        assert_eq!(json["api"], "CreateFileW");
        assert_eq!(json["arguments"]["lpFileName"], "C:\\a.txt");
        assert_eq!(json["flags"]["dwAccess"], "READ|WRITE");
        assert!(json.get("last_error").is_none());
        // argument order follows the descriptor
        assert!(lines[0].find("lpFileName").unwrap() < lines[0].find("dwAccess").unwrap());

        assert_eq!(lines[1], r#"{"type":"thread","pid":null}"#);
    }
}
