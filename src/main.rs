// Main entry point - Wiring of source, pipeline and renderer
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::application::curve_pipeline::CurvePipeline;
use crate::application::report_service::ReportService;
use crate::infrastructure::arcgis_source::ArcGisSource;
use crate::infrastructure::config::load_config;
use crate::presentation::chart_renderer::ChartRenderer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = load_config()?;
    let catalog = config.catalog();

    // Create source (infrastructure layer)
    let fields = catalog.source_fields().into_iter().map(String::from).collect();
    let source = Arc::new(ArcGisSource::new(
        config.source.endpoint.clone(),
        config.source.date_field.clone(),
        fields,
        config.source.result_record_count,
    ));

    // Create services (application layer)
    let pipeline = CurvePipeline::new(catalog, config.pipeline.clone(), config.epidemiology);
    let service = ReportService::new(source, pipeline);

    let report = service.build_report().await?;
    tracing::info!(
        "fitted {} metric(s), data from {} onwards treated as unstable",
        report.fits.len(),
        report.cutoff
    );

    // Render (presentation layer)
    let renderer = ChartRenderer::new(
        config.chart.clone(),
        config.pipeline.roll_days,
        config.pipeline.unstable_days,
    );
    renderer.render(&report, service.pipeline())?;

    if !report.is_complete() {
        anyhow::bail!(
            "{} pipeline stage(s) failed, affected panels are incomplete",
            report.failures.len()
        );
    }

    Ok(())
}
