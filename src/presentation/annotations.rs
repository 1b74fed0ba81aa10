// Legend captions, note boxes and titles drawn on the chart
use crate::application::curve_pipeline::MetricFit;
use chrono::{NaiveDate, NaiveDateTime};

pub fn chart_title(country: &str, data_source: &str, generated_at: NaiveDateTime) -> (String, String) {
    (
        format!("Covid-19 Pandemic in {}", country),
        format!(
            "(Last updated on {}. Data source: {})",
            generated_at.format("%Y-%m-%d %H:%M"),
            data_source
        ),
    )
}

pub fn raw_label(label: &str) -> String {
    format!("{} (raw)", label)
}

pub fn rolling_label(label: &str, roll_days: usize) -> String {
    format!("{} ({} day rolling avg.)", label, roll_days)
}

pub fn fit_label(fit: &MetricFit) -> String {
    format!(
        "Fit: {:5.1} e^({:5.4} x), estimated R: {:5.3}",
        fit.fit.a, fit.fit.b, fit.reproduction_number
    )
}

pub fn overlay_label(label: &str, lag_days: i64) -> String {
    format!("{} (offset by {} days)", label, -lag_days)
}

pub fn metric_note(lag_days: i64, unstable_days: i64, fit_start: NaiveDate) -> Vec<String> {
    vec![
        format!("Milestones are offset by {} days.", lag_days),
        format!("Data for the last {} days is incomplete.", unstable_days),
        format!("Complete data from {} on is", fit_start.format("%Y-%m-%d")),
        "used for least squares curve fitting.".to_string(),
    ]
}

pub fn overlay_note() -> Vec<String> {
    vec![
        "Curves are peak-normalized and offset".to_string(),
        "by the amount indicated in the legend.".to_string(),
    ]
}

/// `#rrggbb` to its components
pub fn parse_hex_color(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 || !digits.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}
