pub mod analyze;
pub mod append;
pub mod eta;
pub mod merge;

use std::path::Path;

use gti_core::{GtiConfig, GtiError};
use log::{debug, info};
use serde::Serialize;

/// Load configuration from `path`, or defaults when none is given.
pub fn load_config(path: Option<&str>) -> Result<GtiConfig, GtiError> {
    match path {
        Some(p) => debug!("loading configuration from {p}"),
        None => debug!("no configuration file; using defaults"),
    }
    GtiConfig::load(path.map(Path::new))
}

/// Pretty-print `value` to `path`.
pub fn write_json<T: Serialize>(path: &str, value: &T) -> Result<(), GtiError> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, &json)?;
    info!("wrote {} bytes of JSON to {path}", json.len());
    println!("\nResults written to {path}");
    Ok(())
}

/// `12.3` or `—` for a missing value.
pub fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.decimals$}"),
        _ => "—".to_string(),
    }
}
