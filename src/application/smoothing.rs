// Smoothing stage - centered rolling mean and the stable/unstable split
use crate::domain::error::PipelineError;
use crate::domain::series::{Series, SeriesPoint};
use chrono::{Duration, NaiveDate};

/// Centered moving average over `window_days` consecutive calendar days.
///
/// Positions whose window reaches past either end of the data, or covers a
/// gap, stay undefined. Nothing is zero-filled or clamped.
pub fn smooth(series: &Series, window_days: usize) -> Result<Series, PipelineError> {
    if window_days == 0 || window_days % 2 == 0 {
        return Err(PipelineError::InvalidWindow(window_days));
    }

    let half = window_days / 2;
    let points = series.points();
    let span = Duration::days(2 * half as i64);

    let smoothed = points
        .iter()
        .enumerate()
        .map(|(i, point)| {
            if i < half || i + half >= points.len() {
                return SeriesPoint::new(point.date, None);
            }
            let window = &points[i - half..=i + half];
            // a missing day inside the index would stretch the window
            if window[window.len() - 1].date - window[0].date != span {
                return SeriesPoint::new(point.date, None);
            }
            let mean = window
                .iter()
                .map(|p| p.value)
                .sum::<Option<f64>>()
                .map(|sum| sum / window_days as f64);
            SeriesPoint::new(point.date, mean)
        })
        .collect();

    Ok(Series::new(smoothed))
}

/// Splits a series at `cutoff`: values before it are stable, values at or
/// after it are unstable. Both halves keep the full date index and carry
/// gaps where the other half has values.
pub fn partition(series: &Series, cutoff: NaiveDate) -> (Series, Series) {
    let keep = |stable: bool| {
        Series::new(
            series
                .points()
                .iter()
                .map(|p| {
                    let value = if (p.date < cutoff) == stable { p.value } else { None };
                    SeriesPoint::new(p.date, value)
                })
                .collect(),
        )
    };

    (keep(true), keep(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 3, 1).unwrap()
    }

    fn daily(values: &[f64]) -> Series {
        let values: Vec<Option<f64>> = values.iter().map(|v| Some(*v)).collect();
        Series::from_daily(start(), &values)
    }

    #[test]
    fn test_week_of_counts_yields_single_mean() {
        let smoothed = smooth(&daily(&[10.0, 12.0, 9.0, 15.0, 20.0, 18.0, 16.0]), 7).unwrap();
        let values = smoothed.values();

        assert_eq!(values.iter().filter(|v| v.is_some()).count(), 1);
        let center = values[3].unwrap();
        assert!((center - 100.0 / 7.0).abs() < 1e-12);
        assert!((center - 14.2857).abs() < 1e-4);
    }

    #[test]
    fn test_undefined_edges_for_every_odd_window() {
        let input = daily(&(0..30).map(|i| i as f64).collect::<Vec<_>>());
        for window in [1, 3, 5, 7, 9, 29] {
            let values = smooth(&input, window).unwrap().values();
            let half = window / 2;
            assert!(values[..half].iter().all(|v| v.is_none()), "window {window}");
            assert!(values[values.len() - half..].iter().all(|v| v.is_none()), "window {window}");
            assert!(values[half..values.len() - half].iter().all(|v| v.is_some()), "window {window}");
        }
    }

    #[test]
    fn test_input_shorter_than_window_is_all_undefined() {
        let smoothed = smooth(&daily(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]), 7).unwrap();
        assert_eq!(smoothed.len(), 6);
        assert!(smoothed.values().iter().all(|v| v.is_none()));
    }

    #[test]
    fn test_even_or_zero_window_is_rejected() {
        assert_eq!(smooth(&daily(&[1.0; 10]), 4).unwrap_err(), PipelineError::InvalidWindow(4));
        assert_eq!(smooth(&daily(&[1.0; 10]), 0).unwrap_err(), PipelineError::InvalidWindow(0));
    }

    #[test]
    fn test_gap_poisons_covering_windows() {
        let mut values = vec![Some(5.0); 9];
        values[4] = None;
        let smoothed = smooth(&Series::from_daily(start(), &values), 3).unwrap().values();
        assert_eq!(smoothed[2], Some(5.0));
        assert_eq!(smoothed[3], None);
        assert_eq!(smoothed[4], None);
        assert_eq!(smoothed[5], None);
        assert_eq!(smoothed[6], Some(5.0));
    }

    #[test]
    fn test_partition_at_cutoff() {
        let series = daily(&[1.0, 2.0, 3.0, 4.0]);
        let cutoff = start() + Duration::days(2);
        let (stable, unstable) = partition(&series, cutoff);

        assert_eq!(stable.values(), vec![Some(1.0), Some(2.0), None, None]);
        assert_eq!(unstable.values(), vec![None, None, Some(3.0), Some(4.0)]);
    }
}
