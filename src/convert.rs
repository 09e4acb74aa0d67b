//! Argument values and the converters that normalize them.

use bson::Bson;
use serde::Serialize;
use std::fmt;

/// A normalized argument value
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view used by flag resolution: numbers as-is, text parsed as hex.
    pub fn flag_bits(&self) -> Option<u64> {
        match self {
            Value::Int(v) => Some(*v as u64),
            Value::Bool(b) => Some(*b as u64),
            Value::Text(s) => {
                let s = s.trim();
                let digits = s
                    .strip_prefix("0x")
                    .or_else(|| s.strip_prefix("0X"))
                    .unwrap_or(s);
                u64::from_str_radix(digits, 16).ok()
            }
            _ => None,
        }
    }

    /// Take a wire value as sent, with no sign or pointer normalization
    pub fn from_bson(raw: &Bson) -> Self {
        match raw {
            Bson::Int64(v) => Value::Int(*v),
            Bson::Int32(v) => Value::Int(*v as i64),
            Bson::Double(v) => Value::Float(*v),
            Bson::Boolean(b) => Value::Bool(*b),
            Bson::String(s) => Value::Text(s.clone()),
            Bson::Binary(bin) => Value::Text(latin1(&bin.bytes)),
            Bson::Array(items) => Value::List(items.iter().map(Value::from_bson).collect()),
            Bson::Null | Bson::Undefined => Value::Null,
            other => Value::Text(other.to_string()),
        }
    }

    /// Encode for the wire
    pub fn to_bson(&self) -> Bson {
        match self {
            Value::Null => Bson::Null,
            Value::Bool(b) => Bson::Boolean(*b),
            Value::Int(v) => Bson::Int64(*v),
            Value::Float(v) => Bson::Double(*v),
            Value::Text(s) => Bson::String(s.clone()),
            Value::List(items) => Bson::Array(items.iter().map(Value::to_bson).collect()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("None"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// Per-argument conversion selected by the type tag of an info frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Converter {
    Default,
    /// Tag `p`: render as a zero-padded hex pointer
    Pointer,
}

impl Converter {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "p" => Some(Converter::Pointer),
            _ => None,
        }
    }

    pub fn apply(&self, raw: &Bson) -> Value {
        match self {
            Converter::Default => default_convert(raw),
            Converter::Pointer => pointer_convert(raw),
        }
    }
}

/// 64-bit pointers keep 16 digits, everything else is treated as 32-bit.
/// Negative values wrap, since 0xffffffff is a common pointer.
fn pointer_convert(raw: &Bson) -> Value {
    match raw {
        Bson::Int64(v) => Value::Text(format!("0x{:016x}", *v as u64)),
        Bson::Int32(v) => Value::Text(format!("0x{:08x}", *v as u32)),
        other => default_convert(other),
    }
}

/// Signed 32-bit integers become unsigned; 64-bit integers stay signed.
fn default_convert(raw: &Bson) -> Value {
    match raw {
        Bson::Int32(v) if *v < 0 => Value::Int(*v as u32 as i64),
        Bson::Array(items) => Value::List(items.iter().map(default_convert).collect()),
        other => Value::from_bson(other),
    }
}

/// Decode bytes as latin-1 so that no input byte is ever rejected
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::spec::BinarySubtype;
    use bson::Binary;

    #[test]
    fn test_pointer_widths() {
        let p = Converter::Pointer;
        assert_eq!(p.apply(&Bson::Int32(0x1000)), Value::Text("0x00001000".into()));
        assert_eq!(p.apply(&Bson::Int32(-1)), Value::Text("0xffffffff".into()));
        assert_eq!(
            p.apply(&Bson::Int64(0x7ff6_1234_0000)),
            Value::Text("0x00007ff612340000".into())
        );
        assert_eq!(
            p.apply(&Bson::Int64(-1)),
            Value::Text("0xffffffffffffffff".into())
        );
    }

    #[test]
    fn test_default_sign_normalization() {
        let d = Converter::Default;
        assert_eq!(d.apply(&Bson::Int32(-2)), Value::Int(0xffff_fffe));
        assert_eq!(d.apply(&Bson::Int32(5)), Value::Int(5));
        assert_eq!(d.apply(&Bson::Int64(-2)), Value::Int(-2));
    }

    #[test]
    fn test_default_decodes_byte_strings() {
        let raw = Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: vec![b'a', 0xe9, b'z'],
        });
        assert_eq!(Converter::Default.apply(&raw), Value::Text("a\u{e9}z".into()));
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(Converter::from_tag("p"), Some(Converter::Pointer));
        assert_eq!(Converter::from_tag("s"), None);
    }

    #[test]
    fn test_flag_bits() {
        assert_eq!(Value::Text("0x3".into()).flag_bits(), Some(3));
        assert_eq!(Value::Text("00000010".into()).flag_bits(), Some(16));
        assert_eq!(Value::Int(7).flag_bits(), Some(7));
        assert_eq!(Value::Text("nope".into()).flag_bits(), None);
    }
}
