// Curve pipeline - smoothing, fitting and alignment for every metric
use crate::application::alignment::align;
use crate::application::curve_fit::{fit, Epidemiology, ExponentialFit};
use crate::application::smoothing::{partition, smooth};
use crate::domain::error::PipelineError;
use crate::domain::metric::{Metric, MetricCatalog, MetricProfile};
use crate::domain::series::{ColumnKind, Series, SeriesStore};
use crate::infrastructure::config::PipelineSettings;
use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Smoothing,
    Fit,
    Overlay,
    Store,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Smoothing => "smoothing",
            Stage::Fit => "curve fit",
            Stage::Overlay => "overlay",
            Stage::Store => "series store",
        };
        f.write_str(name)
    }
}

/// A stage that failed for one metric. Other metrics are unaffected.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFailure {
    pub metric: Metric,
    pub stage: Stage,
    pub error: PipelineError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricFit {
    pub fit: ExponentialFit,
    pub reproduction_number: f64,
}

#[derive(Debug)]
pub struct CurveReport {
    pub store: SeriesStore,
    pub cutoff: NaiveDate,
    pub fits: BTreeMap<Metric, MetricFit>,
    pub failures: Vec<MetricFailure>,
}

impl CurveReport {
    #[cfg(test)]
    pub fn failure(&self, metric: Metric, stage: Stage) -> Option<&MetricFailure> {
        self.failures
            .iter()
            .find(|f| f.metric == metric && f.stage == stage)
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Default)]
struct MetricAnalysis {
    columns: Vec<(ColumnKind, Series)>,
    fit: Option<MetricFit>,
    failures: Vec<MetricFailure>,
}

#[derive(Debug, Clone)]
pub struct CurvePipeline {
    catalog: MetricCatalog,
    settings: PipelineSettings,
    epidemiology: Epidemiology,
}

impl CurvePipeline {
    pub fn new(catalog: MetricCatalog, settings: PipelineSettings, epidemiology: Epidemiology) -> Self {
        Self {
            catalog,
            settings,
            epidemiology,
        }
    }

    pub fn catalog(&self) -> &MetricCatalog {
        &self.catalog
    }

    /// First day of the fit window for a metric
    pub fn fit_start(&self, profile: &MetricProfile) -> NaiveDate {
        self.settings.hump_day + Duration::days(profile.lag_days)
    }

    pub fn run(&self, mut store: SeriesStore) -> CurveReport {
        let cutoff = store.stability_cutoff(self.settings.unstable_days);
        let mut fits = BTreeMap::new();
        let mut failures = Vec::new();

        for (metric, profile) in self.catalog.iter() {
            let analysis = self.analyze(&store, metric, profile, cutoff);

            for (kind, series) in analysis.columns {
                if let Err(error) = store.append(metric, kind, series) {
                    failures.push(MetricFailure {
                        metric,
                        stage: Stage::Store,
                        error,
                    });
                }
            }
            if let Some(fit) = analysis.fit {
                fits.insert(metric, fit);
            }
            failures.extend(analysis.failures);
        }

        for failure in &failures {
            tracing::error!("{} {} failed: {}", failure.metric, failure.stage, failure.error);
        }

        CurveReport {
            store,
            cutoff,
            fits,
            failures,
        }
    }

    fn analyze(&self, store: &SeriesStore, metric: Metric, profile: &MetricProfile, cutoff: NaiveDate) -> MetricAnalysis {
        let mut analysis = MetricAnalysis::default();
        let fail = |stage, error| MetricFailure { metric, stage, error };

        let Some(raw) = store.column(metric, ColumnKind::Raw) else {
            analysis.failures.push(fail(Stage::Smoothing, PipelineError::EmptySeries));
            return analysis;
        };

        let rolling = match smooth(raw, self.settings.roll_days) {
            Ok(rolling) => rolling,
            Err(error) => {
                analysis.failures.push(fail(Stage::Smoothing, error));
                return analysis;
            }
        };
        let (stable, unstable) = partition(&rolling, cutoff);

        let start = self.fit_start(profile);
        match fit(&stable, start, cutoff) {
            Ok(fit) => {
                let reproduction_number = self.epidemiology.reproduction_number(fit.b);
                let [a_err, b_err] = fit.std_errors();
                tracing::info!(
                    "{}: fit ({:.1} ± {:.1}) e^(({:.4} ± {:.4}) x) from {} over {} points, estimated R {:.3}",
                    metric,
                    fit.a,
                    a_err,
                    fit.b,
                    b_err,
                    start,
                    fit.points_used,
                    reproduction_number
                );
                analysis.columns.push((ColumnKind::Fit, fit.curve_over(&rolling)));
                analysis.fit = Some(MetricFit {
                    fit,
                    reproduction_number,
                });
            }
            Err(error) => analysis.failures.push(fail(Stage::Fit, error)),
        }

        // peak of the unnormalized rolling mean, before any shift
        let peak = rolling.max();
        match (
            align(&stable, peak, profile.lag_days),
            align(&unstable, peak, profile.lag_days),
        ) {
            (Ok(overlay_stable), Ok(overlay_unstable)) => {
                analysis.columns.push((ColumnKind::OverlayStable, overlay_stable));
                analysis.columns.push((ColumnKind::OverlayUnstable, overlay_unstable));
            }
            (Err(error), _) | (_, Err(error)) => analysis.failures.push(fail(Stage::Overlay, error)),
        }

        analysis.columns.push((ColumnKind::Rolling, rolling));
        analysis.columns.push((ColumnKind::Stable, stable));
        analysis.columns.push((ColumnKind::Unstable, unstable));
        analysis
    }
}
