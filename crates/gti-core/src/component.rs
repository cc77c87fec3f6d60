//! Common-mode extraction by principal component analysis.

use gti_stats::pca;
use serde::Serialize;

use crate::json::finite_vec;
use crate::residuals::WhitenedSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommonComponent {
    /// First principal component scores, one per shared sample.
    #[serde(serialize_with = "finite_vec")]
    pub component: Vec<f64>,
    /// PC1 share of total variance, in [0, 1].
    pub variance_explained: f64,
    pub explained_variance_ratio: Vec<f64>,
    /// PC1 loading per stream, in the order of `streams`.
    pub loadings: Vec<f64>,
    pub streams: Vec<String>,
}

/// PCA over whitened streams truncated to their shortest length.
///
/// Loadings are sign-normalised so the dominant stream loads positively,
/// which fixes the otherwise arbitrary sign of the component.
pub fn extract_common_component(whitened: &WhitenedSet) -> CommonComponent {
    let Some(shared) = whitened.values().map(|w| w.values.len()).min() else {
        return CommonComponent::default();
    };
    let streams: Vec<String> = whitened.keys().cloned().collect();
    let columns: Vec<Vec<f64>> = whitened
        .values()
        .map(|w| w.values[..shared].to_vec())
        .collect();

    match pca(&columns) {
        Some(result) => CommonComponent {
            variance_explained: result
                .explained_variance_ratio
                .first()
                .copied()
                .unwrap_or(0.0),
            component: result.scores.into_iter().next().unwrap_or_default(),
            loadings: result.components.into_iter().next().unwrap_or_default(),
            explained_variance_ratio: result.explained_variance_ratio,
            streams,
        },
        None => CommonComponent {
            streams,
            ..CommonComponent::default()
        },
    }
}
