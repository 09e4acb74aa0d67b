//! Per-connection cache of call-site descriptors built from info frames.

use bson::Bson;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::category::{resolve_category, CallTable};
use crate::convert::{Converter, Value};
use crate::flags::resolve_flags;
use crate::message::{FlagsBitmask, FlagsValue, Info};

/// Everything the receiver knows about one call-site index
#[derive(Clone, Debug, PartialEq)]
pub struct CallDescriptor {
    pub name: String,
    pub category: String,
    pub arg_names: Vec<String>,
    pub converters: Vec<Converter>,
}

impl CallDescriptor {
    pub fn from_info(info: &Info, table: &dyn CallTable) -> Self {
        let category = info
            .category
            .clone()
            .unwrap_or_else(|| resolve_category(table, &info.name, &[]).to_string());

        Self {
            name: info.name.clone(),
            category,
            arg_names: info.args.iter().map(|spec| spec.name.clone()).collect(),
            converters: info.args.iter().map(|spec| spec.converter()).collect(),
        }
    }

    /// Zip positional values with names through their converters.
    ///
    /// Returns `None` when the value count does not match the names.
    pub fn bind(&self, values: &[Bson]) -> Option<Vec<(String, Value)>> {
        if values.len() != self.arg_names.len() {
            return None;
        }
        Some(
            self.arg_names
                .iter()
                .zip(&self.converters)
                .zip(values)
                .map(|((name, conv), raw)| (name.clone(), conv.apply(raw)))
                .collect(),
        )
    }
}

/// Index -> descriptor map owned by one receiver
///
/// Flag tables belong to the call name rather than the index, so every
/// index describing the same call shares them. A description without
/// tables leaves the ones already registered for its name in place.
#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: HashMap<i64, CallDescriptor>,
    flags_value: HashMap<String, FlagsValue>,
    flags_bitmask: HashMap<String, FlagsBitmask>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the descriptor for `info.index`, replacing any previous one.
    pub fn describe(&mut self, info: &Info, table: &dyn CallTable) {
        let descriptor = CallDescriptor::from_info(info, table);
        debug!(
            index = info.index,
            name = %descriptor.name,
            args = descriptor.arg_names.len(),
            "call described"
        );
        if !info.flags_value.is_empty() {
            self.flags_value.insert(info.name.clone(), info.flags_value.clone());
        }
        if !info.flags_bitmask.is_empty() {
            self.flags_bitmask.insert(info.name.clone(), info.flags_bitmask.clone());
        }
        self.entries.insert(info.index, descriptor);
    }

    pub fn has_flags(&self, name: &str) -> bool {
        self.flags_value.contains_key(name) || self.flags_bitmask.contains_key(name)
    }

    /// Resolve `args` against the flag tables registered for `name`.
    pub fn resolve_flags(
        &self,
        name: &str,
        args: &[(String, Value)],
    ) -> BTreeMap<String, String> {
        let empty_value = FlagsValue::new();
        let empty_bitmask = FlagsBitmask::new();
        resolve_flags(
            self.flags_value.get(name).unwrap_or(&empty_value),
            self.flags_bitmask.get(name).unwrap_or(&empty_bitmask),
            args,
        )
    }

    pub fn get(&self, index: i64) -> Option<&CallDescriptor> {
        self.entries.get(&index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::StaticCallTable;
    use crate::message::ArgSpec;

    fn info(index: i64, name: &str, args: &[&str]) -> Info {
        Info {
            index,
            name: name.to_string(),
            category: None,
            args: args.iter().map(|a| ArgSpec::bare(*a)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_category_is_resolved() {
        let mut cache = SchemaCache::new();
        cache.describe(&info(3, "connect", &["is_success", "retval"]), &StaticCallTable);
        cache.describe(&info(4, "frobnicate", &["is_success", "retval"]), &StaticCallTable);

        assert_eq!(cache.get(3).unwrap().category, "network");
        assert_eq!(cache.get(4).unwrap().category, "unknown");
    }

    #[test]
    fn test_redescribe_overwrites() {
        let mut cache = SchemaCache::new();
        cache.describe(&info(1, "open", &["is_success", "retval"]), &StaticCallTable);
        cache.describe(&info(1, "close", &["is_success", "retval", "fd"]), &StaticCallTable);

        assert_eq!(cache.len(), 1);
        let desc = cache.get(1).unwrap();
        assert_eq!(desc.name, "close");
        assert_eq!(desc.arg_names.len(), 3);
    }

    #[test]
    fn test_flag_tables_follow_the_call_name() {
        let mut modes = FlagsValue::new();
        modes.insert("mode".into(), HashMap::from([(2, "O_RDWR".to_string())]));
        let mut described = info(5, "open", &["is_success", "retval", "mode"]);
        described.flags_value = modes;

        let mut cache = SchemaCache::new();
        cache.describe(&described, &StaticCallTable);
        cache.describe(&info(6, "open", &["is_success", "retval", "mode"]), &StaticCallTable);
        cache.describe(&info(5, "open", &["is_success", "retval", "mode"]), &StaticCallTable);

        assert!(cache.has_flags("open"));
        assert!(!cache.has_flags("close"));
        let args = vec![("mode".to_string(), Value::Int(2))];
        assert_eq!(cache.resolve_flags("open", &args)["mode"], "O_RDWR");
        assert!(cache.resolve_flags("close", &args).is_empty());
    }

    #[test]
    fn test_bind_checks_count() {
        let mut spec = info(2, "mmap", &["is_success", "retval"]);
        spec.args.push(ArgSpec::tagged("addr", "p"));
        let desc = CallDescriptor::from_info(&spec, &StaticCallTable);

        assert!(desc.bind(&[Bson::Int32(1), Bson::Int32(0)]).is_none());

        let bound = desc
            .bind(&[Bson::Int32(1), Bson::Int32(0), Bson::Int32(0x1000)])
            .unwrap();
        assert_eq!(bound[2], ("addr".to_string(), Value::Text("0x00001000".into())));
    }
}
