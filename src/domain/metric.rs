// Metric domain model - the tracked series and their fixed attributes
use serde::Deserialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    PositiveTests,
    IcuAdmissions,
    Deaths,
}

impl Metric {
    #[cfg(test)]
    pub const ALL: [Metric; 3] = [Metric::PositiveTests, Metric::IcuAdmissions, Metric::Deaths];

    fn index(self) -> usize {
        match self {
            Metric::PositiveTests => 0,
            Metric::IcuAdmissions => 1,
            Metric::Deaths => 2,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Metric::PositiveTests => "pos",
            Metric::IcuAdmissions => "icu",
            Metric::Deaths => "died",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Immutable attributes of one metric.
///
/// `lag_days` is the assumed delay from infection to the observable event.
/// It is calibrated outside this program and never derived from the data.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MetricProfile {
    pub title: String,
    pub label: String,
    pub color: String,
    pub source_field: String,
    pub lag_days: i64,
    /// Slot in the 2x2 chart grid, 1-based, row major
    pub panel: usize,
}

impl MetricProfile {
    pub fn new(title: &str, label: &str, color: &str, source_field: &str, lag_days: i64, panel: usize) -> Self {
        Self {
            title: title.to_string(),
            label: label.to_string(),
            color: color.to_string(),
            source_field: source_field.to_string(),
            lag_days,
            panel,
        }
    }
}

/// Fixed mapping from metric to its profile, built once at startup and only
/// ever handed out by reference.
#[derive(Debug, Clone)]
pub struct MetricCatalog {
    profiles: [(Metric, MetricProfile); 3],
}

impl MetricCatalog {
    pub fn new(positive_tests: MetricProfile, icu_admissions: MetricProfile, deaths: MetricProfile) -> Self {
        Self {
            profiles: [
                (Metric::PositiveTests, positive_tests),
                (Metric::IcuAdmissions, icu_admissions),
                (Metric::Deaths, deaths),
            ],
        }
    }

    pub fn profile(&self, metric: Metric) -> &MetricProfile {
        &self.profiles[metric.index()].1
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, &MetricProfile)> {
        self.profiles.iter().map(|(m, p)| (*m, p))
    }

    pub fn source_fields(&self) -> Vec<&str> {
        self.iter().map(|(_, p)| p.source_field.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> MetricCatalog {
        MetricCatalog::new(
            MetricProfile::new("Positive", "Pos", "#0000ff", "pos_field", 7, 3),
            MetricProfile::new("ICU", "Icu", "#ff0000", "icu_field", 11, 1),
            MetricProfile::new("Deaths", "Died", "#000000", "died_field", 17, 2),
        )
    }

    #[test]
    fn test_profile_lookup() {
        let catalog = catalog();
        assert_eq!(catalog.profile(Metric::IcuAdmissions).lag_days, 11);
        assert_eq!(catalog.profile(Metric::Deaths).source_field, "died_field");
        assert_eq!(catalog.profile(Metric::PositiveTests).panel, 3);
    }

    #[test]
    fn test_source_fields_follow_declaration_order() {
        assert_eq!(catalog().source_fields(), vec!["pos_field", "icu_field", "died_field"]);
    }

    #[test]
    fn test_metric_codes() {
        assert_eq!(Metric::PositiveTests.to_string(), "pos");
        assert_eq!(Metric::Deaths.code(), "died");
    }
}
