//! Serialization boundary helpers.
//!
//! JSON has no NaN or infinity. Any float that may be non-finite goes out
//! through these helpers and becomes `null`.

use serde::Serializer;

/// `Some(x)` when `x` is finite.
pub fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}

/// Serialize an `f64`, writing `null` for NaN and ±∞.
pub fn finite_or_null<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    match finite(*value) {
        Some(v) => serializer.serialize_f64(v),
        None => serializer.serialize_none(),
    }
}

/// Like [`finite_or_null`] for `Option<f64>`.
pub fn opt_finite_or_null<S: Serializer>(
    value: &Option<f64>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value.and_then(finite) {
        Some(v) => serializer.serialize_f64(v),
        None => serializer.serialize_none(),
    }
}

/// Serialize a slice of floats with non-finite entries as `null`.
pub fn finite_vec<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(values.iter().map(|&v| finite(v)))
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    #[derive(Serialize)]
    struct Reading {
        #[serde(serialize_with = "super::finite_or_null")]
        a: f64,
        #[serde(serialize_with = "super::opt_finite_or_null")]
        b: Option<f64>,
        #[serde(serialize_with = "super::finite_vec")]
        c: Vec<f64>,
    }

    #[test]
    fn test_non_finite_becomes_null() {
        let p = Reading {
            a: f64::INFINITY,
            b: Some(f64::NAN),
            c: vec![1.0, f64::NEG_INFINITY],
        };
        let v = serde_json::to_value(&p).unwrap();
        assert!(v["a"].is_null());
        assert!(v["b"].is_null());
        assert_eq!(v["c"][0], 1.0);
        assert!(v["c"][1].is_null());
    }

    #[test]
    fn test_finite_passes_through() {
        let p = Reading {
            a: 2.5,
            b: None,
            c: vec![],
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["a"], 2.5);
        assert!(v["b"].is_null());
    }
}
