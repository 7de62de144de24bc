//! Node selector parsing.

use std::collections::BTreeMap;
use tracing::warn;

/// Parses `key1=value1,key2=value2` into a label map.
///
/// Pairs that are not exactly `key=value` are skipped with a warning.
#[must_use]
pub fn parse_node_selector(selector: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    if selector.trim().is_empty() {
        return labels;
    }

    for pair in selector.split(',') {
        let kv: Vec<&str> = pair.split('=').collect();
        match kv.as_slice() {
            [key, value] if !key.trim().is_empty() => {
                labels.insert(key.trim().to_string(), value.trim().to_string());
            }
            _ => warn!(pair = %pair, "unable to parse node selector pair"),
        }
    }
    labels
}

/// Renders a label map back into selector syntax.
#[must_use]
pub fn format_node_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_selector() {
        assert!(parse_node_selector("").is_empty());
        assert!(parse_node_selector("   ").is_empty());
    }

    #[test]
    fn test_parse_pairs() {
        let labels = parse_node_selector("role=storage, zone=us-east-1a");
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get("role").map(String::as_str), Some("storage"));
        assert_eq!(labels.get("zone").map(String::as_str), Some("us-east-1a"));
    }

    #[test]
    fn test_malformed_pairs_are_skipped() {
        let labels = parse_node_selector("role=storage,broken,a=b=c,=x");
        assert_eq!(labels.len(), 1);
        assert!(labels.contains_key("role"));
    }

    #[test]
    fn test_format_round_trip_is_sorted() {
        let labels = parse_node_selector("b=2,a=1");
        assert_eq!(format_node_selector(&labels), "a=1,b=2");
    }
}
