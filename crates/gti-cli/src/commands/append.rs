use chrono::{DateTime, Utc};
use gti_core::{GtiError, HistoryStore, PhaseGapSample, parse_timestamp};
use log::info;

pub fn parse_at(s: &str) -> Result<DateTime<Utc>, String> {
    parse_timestamp(s).ok_or_else(|| format!("'{s}' is not an ISO-8601 timestamp"))
}

pub fn parse_degrees(s: &str) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("'{s}' is not a finite number of degrees")),
    }
}

pub fn run(
    history_path: &str,
    degrees: f64,
    at: Option<DateTime<Utc>>,
    config_path: Option<&str>,
) -> Result<(), GtiError> {
    let config = super::load_config(config_path)?;
    let store = HistoryStore::new(history_path, config.history.max_entries);
    let at = at.unwrap_or_else(Utc::now);
    let sample = PhaseGapSample::new(at, degrees).with_source("manual");
    let history = store.append(sample)?;
    info!("appended {degrees:.4}° as of {} to {history_path}", at.to_rfc3339());
    println!(
        "Appended {degrees:.4}° to {history_path} ({} entries)",
        history.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_at() {
        assert!(parse_at("2025-03-01T12:00:00Z").is_ok());
        assert!(parse_at("2025-03-01T12:00:00").is_ok());
        assert!(parse_at("yesterday").is_err());
    }

    #[test]
    fn test_parse_degrees() {
        assert_eq!(parse_degrees("-12.5"), Ok(-12.5));
        assert!(parse_degrees("NaN").is_err());
        assert!(parse_degrees("inf").is_err());
    }
}
