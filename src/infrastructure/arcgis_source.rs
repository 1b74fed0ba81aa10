// ArcGIS feature service client for the public statistics API
use crate::application::observation_source::ObservationSource;
use crate::domain::error::PipelineError;
use crate::domain::series::RawRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response is not a feature set: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed feature: {0}")]
    Payload(#[from] PipelineError),
}

#[derive(Debug, Deserialize)]
struct FeatureSet {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    attributes: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ArcGisSource {
    endpoint: String,
    date_field: String,
    metric_fields: Vec<String>,
    result_record_count: u32,
    client: reqwest::Client,
}

impl ArcGisSource {
    pub fn new(endpoint: String, date_field: String, metric_fields: Vec<String>, result_record_count: u32) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            date_field,
            metric_fields,
            result_record_count,
            client: reqwest::Client::new(),
        }
    }

    fn build_query_url(&self) -> String {
        let mut out_fields = vec![self.date_field.as_str()];
        out_fields.extend(self.metric_fields.iter().map(String::as_str));
        let out_fields = out_fields.join(", ");
        let order_by = format!("{} asc", self.date_field);
        let record_count = self.result_record_count.to_string();

        let params = [
            ("f", "json"),
            ("where", "1=1"),
            ("returnGeometry", "false"),
            ("spatialRel", "esriSpatialRelIntersects"),
            ("outFields", out_fields.as_str()),
            ("orderByFields", order_by.as_str()),
            ("resultOffset", "0"),
            ("resultRecordCount", record_count.as_str()),
            ("resultType", "standard"),
            ("cacheHint", "true"),
        ];

        let query = params
            .iter()
            .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");

        format!("{}?{}", self.endpoint, query)
    }

    async fn execute_query(&self) -> Result<String, AcquisitionError> {
        let url = self.build_query_url();
        tracing::debug!("Fetching observations from {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "*/*")
            .header("Accept-Language", "de,en;q=0.9,en-US;q=0.8")
            .header("Referer", "https://fohm.maps.arcgis.com/apps/opsdashboard/index.html")
            .send()
            .await?;

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if !status.is_success() => {
                tracing::warn!("Could not read error body for status {}: {}", status, e);
                String::new()
            }
            Err(e) => return Err(e.into()),
        };

        check_status(status, body)
    }

    /// Strict decoding of a feature set. Every requested metric field that is
    /// present must be a non-negative integer; absent ones are reported by
    /// the series store during ingest.
    pub fn parse_features(&self, body: &str) -> Result<Vec<RawRecord>, AcquisitionError> {
        let feature_set: FeatureSet = serde_json::from_str(body)?;

        let mut records = Vec::with_capacity(feature_set.features.len());
        for feature in feature_set.features {
            let attributes = feature.attributes;
            let date = attributes
                .get(&self.date_field)
                .and_then(|v| v.as_i64())
                .and_then(date_from_millis)
                .ok_or_else(|| PipelineError::MissingField {
                    field: self.date_field.clone(),
                    date: None,
                })?;

            let mut values = BTreeMap::new();
            for field in &self.metric_fields {
                if let Some(value) = attributes.get(field) {
                    let count = value.as_u64().ok_or_else(|| PipelineError::MissingField {
                        field: field.clone(),
                        date: Some(date),
                    })?;
                    values.insert(field.clone(), count);
                }
            }
            records.push(RawRecord::new(date, values));
        }

        Ok(records)
    }
}

/// Passes the body through on success, otherwise turns it into a status error
fn check_status(status: reqwest::StatusCode, body: String) -> Result<String, AcquisitionError> {
    if status.is_success() {
        Ok(body)
    } else {
        Err(AcquisitionError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

fn date_from_millis(millis: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}

#[async_trait]
impl ObservationSource for ArcGisSource {
    async fn fetch(&self) -> Result<Vec<RawRecord>> {
        let body = self
            .execute_query()
            .await
            .context("Failed to fetch observations")?;
        let records = self
            .parse_features(&body)
            .context("Failed to parse observation payload")?;

        tracing::info!("Fetched {} daily records from {}", records.len(), self.endpoint);
        Ok(records)
    }
}
