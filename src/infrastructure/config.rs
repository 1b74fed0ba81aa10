use crate::application::curve_fit::Epidemiology;
use crate::domain::metric::{MetricCatalog, MetricProfile};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::PathBuf;

/// Every field defaults to the values the charts were calibrated with, so
/// running without a config file reproduces them exactly.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub source: SourceSettings,
    pub metrics: MetricSettings,
    pub pipeline: PipelineSettings,
    pub epidemiology: Epidemiology,
    pub chart: ChartSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourceSettings {
    pub endpoint: String,
    pub date_field: String,
    pub result_record_count: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://services5.arcgis.com/fsYDFeRKu1hELJJs/arcgis/rest/services/FOHM_Covid_19_FME_1/FeatureServer/1/query".to_string(),
            date_field: "Statistikdatum".to_string(),
            result_record_count: 32000,
        }
    }
}

/// Overriding a metric replaces its whole profile
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MetricSettings {
    pub positive_tests: MetricProfile,
    pub icu_admissions: MetricProfile,
    pub deaths: MetricProfile,
}

impl Default for MetricSettings {
    fn default() -> Self {
        Self {
            // reporting delay estimated at 7-8 days
            positive_tests: MetricProfile::new(
                "Positive tests per day",
                "Positive tests",
                "#0000ff",
                "Totalt_antal_fall",
                7,
                3,
            ),
            // onset to ICU care is about 11 days
            icu_admissions: MetricProfile::new(
                "Intensive care hospitalizations per day",
                "Entered ICU",
                "#ff0000",
                "Antal_intensivvardade",
                11,
                1,
            ),
            // 11.5 days symptom to death plus 5.1 days incubation
            deaths: MetricProfile::new("Deaths per day", "Died", "#000000", "Antal_avlidna", 17, 2),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineSettings {
    pub roll_days: usize,
    pub unstable_days: i64,
    /// Assumed peak day of infections; each metric's fit starts here plus its lag
    pub hump_day: NaiveDate,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            roll_days: 7,
            unstable_days: 10,
            hump_day: NaiveDate::from_ymd_opt(2020, 3, 24).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChartSettings {
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub plot_start: NaiveDate,
    pub overlay_start: NaiveDate,
    pub country: String,
    pub data_source: String,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("docs/sweden.png"),
            width: 2400,
            height: 2400,
            plot_start: NaiveDate::from_ymd_opt(2020, 3, 15).unwrap_or_default(),
            overlay_start: NaiveDate::from_ymd_opt(2020, 3, 1).unwrap_or_default(),
            country: "Sweden".to_string(),
            data_source: "Folkhälsomyndigheten".to_string(),
        }
    }
}

impl AppConfig {
    pub fn catalog(&self) -> MetricCatalog {
        MetricCatalog::new(
            self.metrics.positive_tests.clone(),
            self.metrics.icu_admissions.clone(),
            self.metrics.deaths.clone(),
        )
    }
}

/// Defaults, overridden by `config/curves.*` when present, then by
/// `CURVES__SECTION__KEY` environment variables
pub fn load_config() -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/curves").required(false))
        .add_source(
            config::Environment::with_prefix("CURVES")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metric::Metric;

    fn from_toml(text: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_empty_config_yields_defaults() {
        let config = from_toml("");

        assert_eq!(config.pipeline.roll_days, 7);
        assert_eq!(config.pipeline.unstable_days, 10);
        assert_eq!(config.pipeline.hump_day, NaiveDate::from_ymd_opt(2020, 3, 24).unwrap());
        assert_eq!(config.epidemiology, Epidemiology::default());
        assert_eq!(config.chart.output_path, PathBuf::from("docs/sweden.png"));
        assert_eq!(config.source.result_record_count, 32000);
    }

    #[test]
    fn test_partial_override() {
        let config = from_toml(
            r#"
            [pipeline]
            roll_days = 5
            hump_day = "2020-04-01"

            [epidemiology]
            latency_days = 6.0
            "#,
        );

        assert_eq!(config.pipeline.roll_days, 5);
        assert_eq!(config.pipeline.unstable_days, 10);
        assert_eq!(config.pipeline.hump_day, NaiveDate::from_ymd_opt(2020, 4, 1).unwrap());
        assert_eq!(config.epidemiology.latency_days, 6.0);
        assert_eq!(config.epidemiology.infectious_days, 5.0);
    }

    #[test]
    fn test_default_catalog() {
        let catalog = AppConfig::default().catalog();

        assert_eq!(catalog.profile(Metric::PositiveTests).lag_days, 7);
        assert_eq!(catalog.profile(Metric::IcuAdmissions).lag_days, 11);
        assert_eq!(catalog.profile(Metric::Deaths).lag_days, 17);
        assert_eq!(
            catalog.source_fields(),
            vec!["Totalt_antal_fall", "Antal_intensivvardade", "Antal_avlidna"]
        );
    }
}
