//! Raw timing-residual streams as supplied by ingestion.

use std::collections::BTreeMap;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::GtiError;

/// One `(timestamp, value)` observation; timestamp in seconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: f64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: f64, value: f64) -> Self {
        Self { timestamp, value }
    }

    fn is_finite(&self) -> bool {
        self.timestamp.is_finite() && self.value.is_finite()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SampleRepr {
    Pair(f64, f64),
    Named { timestamp: f64, value: f64 },
}

impl<'de> Deserialize<'de> for Sample {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match SampleRepr::deserialize(deserializer)? {
            SampleRepr::Pair(timestamp, value) => Self { timestamp, value },
            SampleRepr::Named { timestamp, value } => Self { timestamp, value },
        })
    }
}

/// Named streams (`TAI`, `GNSS`, `VLBI`, `PTA`, ...) in name order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamSet {
    streams: BTreeMap<String, Vec<Sample>>,
}

impl StreamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a stream. Non-finite samples are dropped.
    pub fn insert(&mut self, name: impl Into<String>, samples: Vec<Sample>) {
        let name = name.into();
        let before = samples.len();
        let clean: Vec<Sample> = samples.into_iter().filter(Sample::is_finite).collect();
        if clean.len() < before {
            warn!(
                "stream {name}: dropped {} non-finite sample(s)",
                before - clean.len()
            );
        }
        self.streams.insert(name, clean);
    }

    /// Build a stream from parallel timestamp/value slices.
    pub fn insert_series(&mut self, name: impl Into<String>, timestamps: &[f64], values: &[f64]) {
        let samples = timestamps
            .iter()
            .zip(values)
            .map(|(&t, &v)| Sample::new(t, v))
            .collect();
        self.insert(name, samples);
    }

    pub fn get(&self, name: &str) -> Option<&[Sample]> {
        self.streams.get(name).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Sample])> {
        self.streams.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// True when there are no streams or every stream has no samples.
    pub fn has_no_samples(&self) -> bool {
        self.streams.values().all(Vec::is_empty)
    }

    /// Parse `{"NAME": [[t, v], ...], ...}` (objects `{timestamp, value}` also accepted).
    pub fn from_json_str(text: &str) -> Result<Self, GtiError> {
        let raw: BTreeMap<String, Vec<Sample>> = serde_json::from_str(text)?;
        let mut set = Self::new();
        for (name, samples) in raw {
            set.insert(name, samples);
        }
        Ok(set)
    }

    pub fn load(path: &Path) -> Result<Self, GtiError> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }
}

impl FromIterator<(String, Vec<Sample>)> for StreamSet {
    fn from_iter<I: IntoIterator<Item = (String, Vec<Sample>)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (name, samples) in iter {
            set.insert(name, samples);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs_and_objects() {
        let set = StreamSet::from_json_str(
            r#"{"TAI": [[0.0, 1.5], [1.0, 2.5]], "GNSS": [{"timestamp": 0.0, "value": -1.0}]}"#,
        )
        .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("TAI").unwrap()[1], Sample::new(1.0, 2.5));
        assert_eq!(set.get("GNSS").unwrap()[0].value, -1.0);
    }

    #[test]
    fn test_iteration_is_name_ordered() {
        let mut set = StreamSet::new();
        set.insert("VLBI", vec![]);
        set.insert("GNSS", vec![]);
        set.insert("PTA", vec![]);
        let names: Vec<&str> = set.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["GNSS", "PTA", "VLBI"]);
        assert!(set.has_no_samples());
    }

    #[test]
    fn test_non_finite_samples_dropped() {
        let mut set = StreamSet::new();
        set.insert(
            "TAI",
            vec![
                Sample::new(0.0, 1.0),
                Sample::new(1.0, f64::NAN),
                Sample::new(f64::INFINITY, 2.0),
            ],
        );
        assert_eq!(set.get("TAI").unwrap().len(), 1);
    }

    #[test]
    fn test_insert_series() {
        let mut set = StreamSet::new();
        set.insert_series("PTA", &[0.0, 1.0, 2.0], &[5.0, 6.0, 7.0]);
        assert_eq!(set.get("PTA").unwrap().len(), 3);
        assert!(!set.has_no_samples());
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(matches!(
            StreamSet::from_json_str(r#"{"TAI": "nope"}"#),
            Err(GtiError::Json(_))
        ));
    }
}
