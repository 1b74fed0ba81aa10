// Report service - Use case for building the curve report from a source
use crate::application::curve_pipeline::{CurvePipeline, CurveReport};
use crate::application::observation_source::ObservationSource;
use crate::domain::series::SeriesStore;
use anyhow::Context;
use std::sync::Arc;

#[derive(Clone)]
pub struct ReportService {
    source: Arc<dyn ObservationSource>,
    pipeline: CurvePipeline,
}

impl ReportService {
    pub fn new(source: Arc<dyn ObservationSource>, pipeline: CurvePipeline) -> Self {
        Self { source, pipeline }
    }

    pub fn pipeline(&self) -> &CurvePipeline {
        &self.pipeline
    }

    /// One full refetch followed by every metric pipeline
    pub async fn build_report(&self) -> anyhow::Result<CurveReport> {
        let records = self.source.fetch().await?;
        let store = SeriesStore::ingest(records, self.pipeline.catalog())
            .context("Failed to ingest observations")?;
        tracing::debug!(
            "Series spans {} to {}, {} revised date(s)",
            store.first_date(),
            store.last_date(),
            store.replaced_dates().len()
        );

        Ok(self.pipeline.run(store))
    }
}
