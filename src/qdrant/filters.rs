//! Filter helpers for Qdrant count/scroll requests and payload accumulation.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

/// Exact-match filter on the `source_filename` payload field.
pub fn source_filter(source_filename: &str) -> Value {
    json!({
        "must": [
            {
                "key": "source_filename",
                "match": { "value": source_filename }
            }
        ]
    })
}

/// Count one record for the payload's source file.
pub fn accumulate_source(payload: &Map<String, Value>, counts: &mut BTreeMap<String, usize>) {
    if let Some(Value::String(source)) = payload.get("source_filename") {
        let trimmed = source.trim();
        if !trimmed.is_empty() {
            *counts.entry(trimmed.to_string()).or_insert(0) += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_filter_matches_exact_filename() {
        let filter = source_filter("report.pdf");
        assert_eq!(filter["must"][0]["key"], "source_filename");
        assert_eq!(filter["must"][0]["match"]["value"], "report.pdf");
    }

    #[test]
    fn accumulate_source_counts_and_skips_blank() {
        let mut counts = BTreeMap::new();
        for source in ["a.pdf", " a.pdf ", "b.pdf", "   "] {
            let mut payload = Map::new();
            payload.insert("source_filename".into(), Value::String(source.into()));
            accumulate_source(&payload, &mut counts);
        }
        accumulate_source(&Map::new(), &mut counts);

        assert_eq!(counts.get("a.pdf"), Some(&2));
        assert_eq!(counts.get("b.pdf"), Some(&1));
        assert_eq!(counts.len(), 2);
    }
}
