//! Normalization of the three process-record layouts sent by different
//! monitor generations into one canonical shape.

use chrono::{DateTime, Utc};

use crate::convert::Value;
use crate::error::DecodeError;

/// Reserved call name announcing a new process
pub const PROCESS_MARKER: &str = "__process__";

/// Reserved call name announcing a new thread
pub const THREAD_MARKER: &str = "__thread__";

/// 100ns intervals between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_OFFSET: i128 = 116_444_736_000_000_000;

/// Known layouts of a `__process__` argument map
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProcessLayout {
    /// `TimeLow`/`TimeHigh` FILETIME halves with PascalCase fields
    FileTimePascal,
    /// `time_low`/`time_high` FILETIME halves with snake_case fields
    FileTimeSnake,
    /// `TimeStamp` in milliseconds since the unix epoch
    EpochMillis,
}

/// Canonical process announcement
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessInfo {
    pub pid: i64,
    pub ppid: i64,
    pub first_seen: DateTime<Utc>,
    pub process_name: String,
}

/// Detect the layout from the field names alone.
pub fn classify(args: &[(String, Value)]) -> Option<ProcessLayout> {
    let has = |field: &str| args.iter().any(|(name, _)| name == field);
    if has("TimeLow") {
        Some(ProcessLayout::FileTimePascal)
    } else if has("time_low") {
        Some(ProcessLayout::FileTimeSnake)
    } else if has("TimeStamp") {
        Some(ProcessLayout::EpochMillis)
    } else {
        None
    }
}

pub fn normalize(args: &[(String, Value)]) -> Result<ProcessInfo, DecodeError> {
    let layout = classify(args).ok_or_else(|| {
        let fields: Vec<&str> = args.iter().map(|(name, _)| name.as_str()).collect();
        DecodeError::UnknownProcessLayout(fields.join(","))
    })?;

    let (first_seen, pid, ppid, module_path) = match layout {
        ProcessLayout::FileTimePascal => (
            filetime(int_field(args, "TimeLow")?, int_field(args, "TimeHigh")?)?,
            int_field(args, "ProcessIdentifier")?,
            int_field(args, "ParentProcessIdentifier")?,
            text_field(args, "ModulePath")?,
        ),
        ProcessLayout::FileTimeSnake => {
            let (pid, ppid) = if field(args, "pid").is_some() {
                (int_field(args, "pid")?, int_field(args, "ppid")?)
            } else {
                (
                    int_field(args, "process_identifier")?,
                    int_field(args, "parent_process_identifier")?,
                )
            };
            (
                filetime(int_field(args, "time_low")?, int_field(args, "time_high")?)?,
                pid,
                ppid,
                text_field(args, "module_path")?,
            )
        }
        ProcessLayout::EpochMillis => {
            let millis = int_field(args, "TimeStamp")?;
            (
                DateTime::<Utc>::from_timestamp_millis(millis)
                    .ok_or(DecodeError::BadProcessField("TimeStamp"))?,
                int_field(args, "ProcessIdentifier")?,
                int_field(args, "ParentProcessIdentifier")?,
                text_field(args, "ModulePath")?,
            )
        }
    };

    Ok(ProcessInfo {
        pid,
        ppid,
        first_seen,
        process_name: file_name(module_path).to_string(),
    })
}

/// Combine two 32-bit halves of a FILETIME into a UTC timestamp.
fn filetime(low: i64, high: i64) -> Result<DateTime<Utc>, DecodeError> {
    let ticks = ((high as u32 as u64) << 32) | (low as u32 as u64);
    let unix_ticks = ticks as i128 - FILETIME_UNIX_OFFSET;
    let secs = unix_ticks.div_euclid(10_000_000) as i64;
    let nanos = (unix_ticks.rem_euclid(10_000_000) * 100) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos).ok_or(DecodeError::BadProcessField("TimeLow"))
}

/// Final component of a Windows or POSIX path
pub fn file_name(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

fn field<'a>(args: &'a [(String, Value)], name: &str) -> Option<&'a Value> {
    args.iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

fn int_field(args: &[(String, Value)], name: &'static str) -> Result<i64, DecodeError> {
    field(args, name)
        .and_then(Value::as_i64)
        .ok_or(DecodeError::BadProcessField(name))
}

fn text_field<'a>(
    args: &'a [(String, Value)],
    name: &'static str,
) -> Result<&'a str, DecodeError> {
    match field(args, name) {
        Some(Value::Text(s)) => Ok(s),
        Some(Value::Null) => Ok(""),
        _ => Err(DecodeError::BadProcessField(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, Value)]) -> Vec<(String, Value)> {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect()
    }

    // 2015-01-01T00:00:00Z as FILETIME
    const FT_2015: u64 = 130_645_440_000_000_000;

    #[test]
    fn test_pascal_and_snake_layouts_agree() {
        let low = (FT_2015 & 0xffff_ffff) as i64;
        let high = (FT_2015 >> 32) as i64;

        let pascal = normalize(&args(&[
            ("TimeLow", Value::Int(low)),
            ("TimeHigh", Value::Int(high)),
            ("ProcessIdentifier", Value::Int(1234)),
            ("ParentProcessIdentifier", Value::Int(1)),
            ("ModulePath", Value::from("C:\\Windows\\notepad.exe")),
        ]))
        .unwrap();

        let snake = normalize(&args(&[
            ("time_low", Value::Int(low)),
            ("time_high", Value::Int(high)),
            ("pid", Value::Int(1234)),
            ("ppid", Value::Int(1)),
            ("module_path", Value::from("C:\\Windows\\notepad.exe")),
        ]))
        .unwrap();

        assert_eq!(pascal, snake);
        assert_eq!(pascal.process_name, "notepad.exe");
        assert_eq!(pascal.first_seen.to_rfc3339(), "2015-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_snake_long_identifier_names() {
        let info = normalize(&args(&[
            ("time_low", Value::Int(0)),
            ("time_high", Value::Int(0)),
            ("process_identifier", Value::Int(8)),
            ("parent_process_identifier", Value::Int(4)),
            ("module_path", Value::from("/usr/bin/python3")),
        ]))
        .unwrap();
        assert_eq!(info.pid, 8);
        assert_eq!(info.ppid, 4);
        assert_eq!(info.process_name, "python3");
    }

    #[test]
    fn test_epoch_millis_layout() {
        let info = normalize(&args(&[
            ("TimeStamp", Value::Int(1_420_070_400_500)),
            ("ProcessIdentifier", Value::Int(77)),
            ("ParentProcessIdentifier", Value::Int(1)),
            ("ModulePath", Value::from("/bin/sh")),
        ]))
        .unwrap();
        assert_eq!(
            classify(&args(&[("TimeStamp", Value::Int(0))])),
            Some(ProcessLayout::EpochMillis)
        );
        assert_eq!(info.first_seen.timestamp_millis(), 1_420_070_400_500);
        assert_eq!(info.process_name, "sh");
    }

    #[test]
    fn test_unknown_layout() {
        let err = normalize(&args(&[("Pid", Value::Int(1))])).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownProcessLayout(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_wrong_field_type() {
        let err = normalize(&args(&[
            ("TimeStamp", Value::from("yesterday")),
            ("ProcessIdentifier", Value::Int(77)),
            ("ParentProcessIdentifier", Value::Int(1)),
            ("ModulePath", Value::from("/bin/sh")),
        ]))
        .unwrap_err();
        assert!(matches!(err, DecodeError::BadProcessField("TimeStamp")));
    }
}
