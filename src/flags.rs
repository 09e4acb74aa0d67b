//! Symbolic resolution of flag arguments.

use std::collections::BTreeMap;
use tracing::debug;

use crate::convert::Value;
use crate::message::{FlagsBitmask, FlagsValue};

/// Resolve every argument that has a registered flag table.
///
/// Exact value matches win; bitmask tables only apply to arguments the
/// value tables left unresolved.
pub fn resolve_flags(
    flags_value: &FlagsValue,
    flags_bitmask: &FlagsBitmask,
    args: &[(String, Value)],
) -> BTreeMap<String, String> {
    let mut flags = BTreeMap::new();

    for (arg, table) in flags_value {
        let Some(bits) = arg_bits(args, arg) else {
            continue;
        };
        if let Some(symbol) = table.get(&bits) {
            flags.insert(arg.clone(), symbol.clone());
        }
    }

    for (arg, masks) in flags_bitmask {
        if flags.contains_key(arg) {
            continue;
        }
        let Some(bits) = arg_bits(args, arg) else {
            continue;
        };
        flags.insert(arg.clone(), bitmask_symbols(bits, masks));
    }

    flags
}

/// Join the symbols of every mask fully set in `bits`, in table order.
pub fn bitmask_symbols(bits: u64, masks: &[(u64, String)]) -> String {
    masks
        .iter()
        .filter(|(mask, _)| bits & mask == *mask)
        .map(|(_, symbol)| symbol.as_str())
        .collect::<Vec<_>>()
        .join("|")
}

fn arg_bits(args: &[(String, Value)], arg: &str) -> Option<u64> {
    let (_, value) = args.iter().find(|(name, _)| name == arg)?;
    let bits = value.flag_bits();
    if bits.is_none() {
        debug!(arg, value = %value, "flag argument is not an integer");
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn access_masks() -> FlagsBitmask {
        let mut masks = FlagsBitmask::new();
        masks.insert(
            "access".to_string(),
            vec![(0x1, "READ".to_string()), (0x2, "WRITE".to_string())],
        );
        masks
    }

    #[test]
    fn test_bitmask_join() {
        let args = vec![("access".to_string(), Value::Text("0x3".into()))];
        let flags = resolve_flags(&FlagsValue::new(), &access_masks(), &args);
        assert_eq!(flags["access"], "READ|WRITE");
    }

    #[test]
    fn test_bitmask_no_match_is_empty() {
        let args = vec![("access".to_string(), Value::Int(0x4))];
        let flags = resolve_flags(&FlagsValue::new(), &access_masks(), &args);
        assert_eq!(flags["access"], "");
    }

    #[test]
    fn test_value_match_wins_over_bitmask() {
        let mut values = FlagsValue::new();
        values.insert(
            "access".to_string(),
            HashMap::from([(3, "READ_WRITE".to_string())]),
        );
        let args = vec![("access".to_string(), Value::Int(3))];

        let flags = resolve_flags(&values, &access_masks(), &args);
        assert_eq!(flags["access"], "READ_WRITE");
    }

    #[test]
    fn test_value_miss_falls_through_to_bitmask() {
        let mut values = FlagsValue::new();
        values.insert("access".to_string(), HashMap::from([(8, "EXEC".to_string())]));
        let args = vec![("access".to_string(), Value::Int(1))];

        let flags = resolve_flags(&values, &access_masks(), &args);
        assert_eq!(flags["access"], "READ");
    }

    #[test]
    fn test_unparseable_or_missing_argument_skipped() {
        let args = vec![("access".to_string(), Value::Text("rw".into()))];
        assert!(resolve_flags(&FlagsValue::new(), &access_masks(), &args).is_empty());
        assert!(resolve_flags(&FlagsValue::new(), &access_masks(), &[]).is_empty());
    }
}
