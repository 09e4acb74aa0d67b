//! Wire documents and their classification by kind.
//!
//! Every frame body is a BSON document. The `type` field selects the kind;
//! documents without one are data frames.
//!
//! ```text
//! info:   {type:"info", I, name, category?, args:[name | [name, tag]], flags_value?, flags_bitmask?}
//! buffer: {type:"buffer", buffer, checksum}
//! debug:  {type:"debug", T, t, msg}
//! data:   {I, T, t, args:[is_success, retval, ...], s?, h?, e?, E?}
//! ```

use bson::spec::BinarySubtype;
use bson::{doc, Binary, Bson, Document};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use tracing::warn;

use crate::convert::{Converter, Value};
use crate::error::DecodeError;
use crate::frame::LENGTH_PREFIX_SIZE;

/// One entry of an info frame's argument list
#[derive(Clone, Debug, PartialEq)]
pub struct ArgSpec {
    pub name: String,
    pub tag: Option<String>,
}

impl ArgSpec {
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: None,
        }
    }

    pub fn tagged(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: Some(tag.into()),
        }
    }

    /// Converter for this argument; unknown tags fall back to the default.
    pub fn converter(&self) -> Converter {
        match &self.tag {
            None => Converter::Default,
            Some(tag) => Converter::from_tag(tag).unwrap_or_else(|| {
                tracing::debug!(tag = %tag, arg = %self.name, "unknown format specifier");
                Converter::Default
            }),
        }
    }
}

/// Exact-match value table per argument
pub type FlagsValue = BTreeMap<String, HashMap<u64, String>>;

/// Ordered (mask, symbol) table per argument
pub type FlagsBitmask = BTreeMap<String, Vec<(u64, String)>>;

/// Schema-defining info frame
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Info {
    pub index: i64,
    pub name: String,
    pub category: Option<String>,
    pub args: Vec<ArgSpec>,
    pub flags_value: FlagsValue,
    pub flags_bitmask: FlagsBitmask,
}

/// Terse data frame referencing an info frame by index
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Data {
    pub index: i64,
    pub tid: i64,
    pub time: f64,
    pub args: Vec<Bson>,
    pub stacktrace: Vec<Value>,
    pub uniqhash: Value,
    pub last_error: Option<Value>,
    pub nt_status: Option<Value>,
}

/// A decoded frame body, one variant per kind
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Info(Info),
    Buffer { payload: Vec<u8>, checksum: String },
    Debug { tid: i64, time: f64, message: String },
    Data(Data),
}

impl Message {
    /// Parse a frame body (the document without its length prefix).
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        // The frame prefix doubles as the document's own length header.
        let total = (body.len() + LENGTH_PREFIX_SIZE) as i32;
        let mut raw = Vec::with_capacity(body.len() + LENGTH_PREFIX_SIZE);
        raw.extend_from_slice(&total.to_le_bytes());
        raw.extend_from_slice(body);

        let document = Document::from_reader(&mut Cursor::new(raw))?;
        Ok(Self::from_document(&document))
    }

    /// Serialize to a frame body (the document without its length prefix).
    pub fn encode(&self) -> Result<Vec<u8>, bson::ser::Error> {
        let mut raw = Vec::new();
        self.to_document().to_writer(&mut raw)?;
        Ok(raw.split_off(LENGTH_PREFIX_SIZE))
    }

    pub fn from_document(doc: &Document) -> Self {
        match doc.get_str("type").unwrap_or("none") {
            "info" => Message::Info(parse_info(doc)),
            "buffer" => Message::Buffer {
                payload: match doc.get("buffer") {
                    Some(Bson::Binary(bin)) => bin.bytes.clone(),
                    Some(Bson::String(s)) => s.as_bytes().to_vec(),
                    _ => Vec::new(),
                },
                checksum: doc.get_str("checksum").unwrap_or_default().to_string(),
            },
            "debug" => Message::Debug {
                tid: doc.get("T").and_then(bson_int).unwrap_or(0),
                time: doc.get("t").and_then(bson_float).unwrap_or(0.0),
                message: doc.get_str("msg").unwrap_or_default().to_string(),
            },
            _ => Message::Data(parse_data(doc)),
        }
    }

    pub fn to_document(&self) -> Document {
        match self {
            Message::Info(info) => {
                let args: Vec<Bson> = info
                    .args
                    .iter()
                    .map(|spec| match &spec.tag {
                        None => Bson::String(spec.name.clone()),
                        Some(tag) => Bson::Array(vec![
                            Bson::String(spec.name.clone()),
                            Bson::String(tag.clone()),
                        ]),
                    })
                    .collect();
                let mut out = doc! {
                    "I": info.index,
                    "name": info.name.clone(),
                    "type": "info",
                    "args": args,
                };
                if let Some(category) = &info.category {
                    out.insert("category", category.clone());
                }
                if !info.flags_value.is_empty() {
                    let mut tables = Document::new();
                    for (arg, values) in &info.flags_value {
                        let mut pairs: Vec<_> = values.iter().collect();
                        pairs.sort();
                        let pairs: Vec<Bson> = pairs
                            .into_iter()
                            .map(|(v, sym)| {
                                Bson::Array(vec![Bson::Int64(*v as i64), Bson::String(sym.clone())])
                            })
                            .collect();
                        tables.insert(arg.clone(), pairs);
                    }
                    out.insert("flags_value", tables);
                }
                if !info.flags_bitmask.is_empty() {
                    let mut tables = Document::new();
                    for (arg, masks) in &info.flags_bitmask {
                        let pairs: Vec<Bson> = masks
                            .iter()
                            .map(|(m, sym)| {
                                Bson::Array(vec![Bson::Int64(*m as i64), Bson::String(sym.clone())])
                            })
                            .collect();
                        tables.insert(arg.clone(), pairs);
                    }
                    out.insert("flags_bitmask", tables);
                }
                out
            }
            Message::Buffer { payload, checksum } => doc! {
                "type": "buffer",
                "buffer": Binary { subtype: BinarySubtype::Generic, bytes: payload.clone() },
                "checksum": checksum.clone(),
            },
            Message::Debug { tid, time, message } => doc! {
                "type": "debug",
                "T": *tid,
                "t": *time,
                "msg": message.clone(),
            },
            Message::Data(data) => {
                let mut out = doc! {
                    "I": data.index,
                    "T": data.tid,
                    "t": data.time,
                    "args": data.args.clone(),
                };
                if !data.stacktrace.is_empty() {
                    out.insert(
                        "s",
                        data.stacktrace.iter().map(Value::to_bson).collect::<Vec<_>>(),
                    );
                }
                if data.uniqhash != Value::Null {
                    out.insert("h", data.uniqhash.to_bson());
                }
                if let (Some(e), Some(big_e)) = (&data.last_error, &data.nt_status) {
                    out.insert("e", e.to_bson());
                    out.insert("E", big_e.to_bson());
                }
                out
            }
        }
    }
}

fn parse_info(doc: &Document) -> Info {
    let args = doc
        .get_array("args")
        .map(|items| items.iter().map(parse_arg_spec).collect())
        .unwrap_or_default();

    let mut flags_value = FlagsValue::new();
    if let Ok(tables) = doc.get_document("flags_value") {
        for (arg, pairs) in tables {
            let values = flag_pairs(pairs).into_iter().collect();
            flags_value.insert(arg.clone(), values);
        }
    }

    let mut flags_bitmask = FlagsBitmask::new();
    if let Ok(tables) = doc.get_document("flags_bitmask") {
        for (arg, pairs) in tables {
            flags_bitmask.insert(arg.clone(), flag_pairs(pairs));
        }
    }

    Info {
        index: doc.get("I").and_then(bson_int).unwrap_or(-1),
        name: doc.get_str("name").unwrap_or("NONAME").to_string(),
        category: doc.get_str("category").ok().map(str::to_string),
        args,
        flags_value,
        flags_bitmask,
    }
}

fn parse_arg_spec(item: &Bson) -> ArgSpec {
    match item {
        Bson::String(name) => ArgSpec::bare(name.clone()),
        Bson::Array(pair) => {
            let name = match pair.first() {
                Some(Bson::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            match pair.get(1) {
                Some(Bson::String(tag)) => ArgSpec::tagged(name, tag.clone()),
                _ => ArgSpec::bare(name),
            }
        }
        other => ArgSpec::bare(other.to_string()),
    }
}

/// `[[value, "SYMBOL"], ...]` into (value, symbol) pairs, in order
fn flag_pairs(pairs: &Bson) -> Vec<(u64, String)> {
    let Bson::Array(pairs) = pairs else {
        return Vec::new();
    };

    let mut out = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let parsed = match pair {
            Bson::Array(kv) if kv.len() == 2 => match (flag_int(&kv[0]), kv[1].as_str()) {
                (Some(v), Some(sym)) => Some((v, sym.to_string())),
                _ => None,
            },
            _ => None,
        };
        match parsed {
            Some(entry) => out.push(entry),
            None => warn!(entry = %pair, "ignoring malformed flag table entry"),
        }
    }
    out
}

/// Flag constants share the sign normalization of the default converter.
fn flag_int(raw: &Bson) -> Option<u64> {
    match raw {
        Bson::Int32(v) => Some(*v as u32 as u64),
        Bson::Int64(v) => Some(*v as u64),
        _ => None,
    }
}

fn parse_data(doc: &Document) -> Data {
    // Call-site metadata is kept as sent; only declared arguments are converted.
    let stacktrace = doc
        .get_array("s")
        .map(|frames| frames.iter().map(Value::from_bson).collect())
        .unwrap_or_default();

    let (last_error, nt_status) = match (doc.get("e"), doc.get("E")) {
        (Some(e), Some(big_e)) => (Some(Value::from_bson(e)), Some(Value::from_bson(big_e))),
        _ => (None, None),
    };

    Data {
        index: doc.get("I").and_then(bson_int).unwrap_or(-1),
        tid: doc.get("T").and_then(bson_int).unwrap_or(0),
        time: doc.get("t").and_then(bson_float).unwrap_or(0.0),
        args: doc.get_array("args").cloned().unwrap_or_default(),
        stacktrace,
        uniqhash: doc
            .get("h")
            .map(Value::from_bson)
            .unwrap_or(Value::Int(0)),
        last_error,
        nt_status,
    }
}

pub(crate) fn bson_int(raw: &Bson) -> Option<i64> {
    match raw {
        Bson::Int32(v) => Some(*v as i64),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) => Some(*v as i64),
        _ => None,
    }
}

fn bson_float(raw: &Bson) -> Option<f64> {
    match raw {
        Bson::Double(v) => Some(*v),
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_with_tags_and_flags() {
        let doc = doc! {
            "type": "info",
            "I": 5,
            "name": "NtCreateFile",
            "category": "filesystem",
            "args": ["is_success", "retval", ["FileHandle", "p"], "DesiredAccess"],
            "flags_value": { "Disposition": [[1, "FILE_OPEN"], [2, "FILE_CREATE"]] },
            "flags_bitmask": { "DesiredAccess": [[1, "READ"], [2, "WRITE"]] },
        };

        let Message::Info(info) = Message::from_document(&doc) else {
            panic!("expected info");
        };
        assert_eq!(info.index, 5);
        assert_eq!(info.category.as_deref(), Some("filesystem"));
        assert_eq!(info.args[2], ArgSpec::tagged("FileHandle", "p"));
        assert_eq!(info.args[2].converter(), Converter::Pointer);
        assert_eq!(info.args[3].converter(), Converter::Default);
        assert_eq!(info.flags_value["Disposition"][&2], "FILE_CREATE");
        assert_eq!(
            info.flags_bitmask["DesiredAccess"],
            vec![(1, "READ".to_string()), (2, "WRITE".to_string())]
        );
    }

    #[test]
    fn test_untyped_document_is_data() {
        let doc = doc! {
            "I": 5,
            "T": 1234,
            "t": 0.5,
            "args": [1, 0, "C:\\a.txt"],
            "s": [0x401000_i64],
            "h": 99,
            "e": 2,
            "E": -1073741772_i32,
        };

        let Message::Data(data) = Message::from_document(&doc) else {
            panic!("expected data");
        };
        assert_eq!(data.index, 5);
        assert_eq!(data.tid, 1234);
        assert_eq!(data.time, 0.5);
        assert_eq!(data.args.len(), 3);
        assert_eq!(data.stacktrace, vec![Value::Int(0x401000)]);
        assert_eq!(data.uniqhash, Value::Int(99));
        assert_eq!(data.last_error, Some(Value::Int(2)));
        assert_eq!(data.nt_status, Some(Value::Int(-1073741772)));
    }

    #[test]
    fn test_last_error_needs_both_fields() {
        let doc = doc! { "I": 1, "args": [1, 0], "e": 5 };
        let Message::Data(data) = Message::from_document(&doc) else {
            panic!("expected data");
        };
        assert_eq!(data.last_error, None);
        assert_eq!(data.nt_status, None);
    }

    #[test]
    fn test_body_excludes_document_header() {
        let msg = Message::Debug {
            tid: 7,
            time: 1.25,
            message: "hello".into(),
        };
        let body = msg.encode().unwrap();

        let mut full = Vec::new();
        msg.to_document().to_writer(&mut full).unwrap();
        assert_eq!(body.len() + LENGTH_PREFIX_SIZE, full.len());
        assert_eq!(Message::decode(&body).unwrap(), msg);
    }

    #[test]
    fn test_garbage_body_fails() {
        assert!(Message::decode(&[0xff, 0x00, 0x13, 0x37]).is_err());
    }
}
