//! Dashboard Metrics
//!
//! Combine function behind the dashboard counters aggregate.

use serde_json::{Map, Value};

use crate::aggregate::{combine, BucketCounts, CombineFn, StatusClassifier};

/// Builds the counters combine function.
///
/// `resources[i]` names the i-th source. The output holds an item count per
/// resource and, for `status_resource`, the bucketed `status` field of its
/// items:
///
/// ```json
/// { "users": 12, "activities": 40, "posts": 7,
///   "activities_by_status": { "pending": 3, "active": 20, ... } }
/// ```
///
/// Sources may be a JSON array or an object wrapping one under `data`;
/// anything else counts as empty.
pub fn dashboard_counters(
    resources: Vec<String>,
    status_resource: Option<String>,
    classifier: StatusClassifier,
) -> CombineFn<Value> {
    combine(move |sources: &[Value]| {
        let mut out = Map::new();

        for (name, source) in resources.iter().zip(sources) {
            let items = items_of(source);
            out.insert(name.clone(), Value::from(items.len()));

            if status_resource.as_deref() == Some(name.as_str()) {
                let mut counts = BucketCounts::default();
                for item in items {
                    counts.record(classifier.classify_value(item.get("status")));
                }
                out.insert(format!("{name}_by_status"), counts.to_json());
            }
        }

        Value::Object(out)
    })
}

fn items_of(source: &Value) -> &[Value] {
    match source {
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => obj
            .get("data")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_counts_and_status_buckets() {
        let counters = dashboard_counters(
            names(&["users", "activities"]),
            Some("activities".to_string()),
            StatusClassifier::default(),
        );

        let out = counters(&[
            json!([{"id": 1}, {"id": 2}]),
            json!({"data": [
                {"status": "done"},
                {"status": "In Progress"},
                {"status": 7},
                {}
            ]}),
        ]);

        assert_eq!(out["users"], 2);
        assert_eq!(out["activities"], 4);
        assert_eq!(out["activities_by_status"]["completed"], 1);
        assert_eq!(out["activities_by_status"]["active"], 1);
        assert_eq!(out["activities_by_status"]["unclassified"], 2);
    }

    #[test]
    fn test_unexpected_shapes_count_as_empty() {
        let counters = dashboard_counters(names(&["posts"]), None, StatusClassifier::default());

        assert_eq!(counters(&[json!("not a list")])["posts"], 0);
        assert_eq!(counters(&[json!({"data": 5})])["posts"], 0);
        assert_eq!(counters(&[Value::Null])["posts"], 0);
    }

    #[test]
    fn test_missing_sources_are_skipped() {
        let counters = dashboard_counters(names(&["users", "posts"]), None, StatusClassifier::default());
        let out = counters(&[json!([1])]);
        assert_eq!(out, json!({"users": 1}));
    }
}
