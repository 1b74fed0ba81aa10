// Alignment stage - peak normalization and infection-lag back-shift
use crate::domain::error::PipelineError;
use crate::domain::series::{Series, SeriesPoint};
use chrono::Duration;

/// Divides every value by `peak` and relabels day `d` as `d - lag_days`.
///
/// `peak` must be taken from the unnormalized rolling series before any
/// shifting. Apply this separately to the stable and unstable partitions.
pub fn align(series: &Series, peak: Option<f64>, lag_days: i64) -> Result<Series, PipelineError> {
    let peak = match peak {
        Some(peak) if peak.is_finite() && peak > 0.0 => peak,
        _ => return Err(PipelineError::DegenerateSeries),
    };

    let lag = Duration::days(lag_days);
    Ok(Series::new(
        series
            .points()
            .iter()
            .map(|p| SeriesPoint::new(p.date - lag, p.value.map(|v| v / peak)))
            .collect(),
    ))
}
