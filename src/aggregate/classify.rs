//! Status Classification
//!
//! Total mapping of free-text statuses onto a closed set of buckets.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::{Map, Value};

// == Status Bucket ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusBucket {
    Pending,
    Active,
    Completed,
    Cancelled,
    /// Anything the mapping does not recognise
    Unclassified,
}

impl StatusBucket {
    pub const ALL: [StatusBucket; 5] = [
        StatusBucket::Pending,
        StatusBucket::Active,
        StatusBucket::Completed,
        StatusBucket::Cancelled,
        StatusBucket::Unclassified,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusBucket::Pending => "pending",
            StatusBucket::Active => "active",
            StatusBucket::Completed => "completed",
            StatusBucket::Cancelled => "cancelled",
            StatusBucket::Unclassified => "unclassified",
        }
    }
}

// == Status Classifier ==
/// Explicit status-to-bucket table with a default bucket.
///
/// Lookups ignore case, surrounding whitespace, and `-`/space vs `_`.
#[derive(Debug, Clone)]
pub struct StatusClassifier {
    mapping: HashMap<String, StatusBucket>,
    fallback: StatusBucket,
}

impl StatusClassifier {
    /// An empty table sending everything to `fallback`.
    pub fn new(fallback: StatusBucket) -> Self {
        Self {
            mapping: HashMap::new(),
            fallback,
        }
    }

    /// Adds a mapping entry.
    pub fn with(mut self, status: &str, bucket: StatusBucket) -> Self {
        self.mapping.insert(normalize(status), bucket);
        self
    }

    pub fn classify(&self, status: &str) -> StatusBucket {
        self.mapping
            .get(&normalize(status))
            .copied()
            .unwrap_or(self.fallback)
    }

    /// Classifies a raw JSON status; missing or non-string values use the default bucket.
    pub fn classify_value(&self, status: Option<&Value>) -> StatusBucket {
        match status.and_then(Value::as_str) {
            Some(s) => self.classify(s),
            None => self.fallback,
        }
    }

    pub fn count<'a, I>(&self, statuses: I) -> BucketCounts
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut counts = BucketCounts::default();
        for status in statuses {
            counts.record(self.classify(status));
        }
        counts
    }
}

impl Default for StatusClassifier {
    fn default() -> Self {
        use StatusBucket::*;

        [
            ("pending", Pending),
            ("planned", Pending),
            ("scheduled", Pending),
            ("draft", Pending),
            ("active", Active),
            ("in_progress", Active),
            ("ongoing", Active),
            ("started", Active),
            ("completed", Completed),
            ("done", Completed),
            ("finished", Completed),
            ("cancelled", Cancelled),
            ("canceled", Cancelled),
            ("abandoned", Cancelled),
        ]
        .into_iter()
        .fold(Self::new(Unclassified), |classifier, (status, bucket)| {
            classifier.with(status, bucket)
        })
    }
}

fn normalize(status: &str) -> String {
    status
        .trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

// == Bucket Counts ==
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketCounts {
    counts: BTreeMap<StatusBucket, usize>,
}

impl BucketCounts {
    pub fn record(&mut self, bucket: StatusBucket) {
        *self.counts.entry(bucket).or_insert(0) += 1;
    }

    pub fn get(&self, bucket: StatusBucket) -> usize {
        self.counts.get(&bucket).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// JSON object with every bucket present, zeros included.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = StatusBucket::ALL
            .iter()
            .map(|bucket| (bucket.as_str().to_string(), Value::from(self.get(*bucket))))
            .collect();
        Value::Object(map)
    }
}
