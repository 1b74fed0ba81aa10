// Series store - date-indexed raw counts and derived columns per metric
use crate::domain::error::PipelineError;
use crate::domain::metric::{Metric, MetricCatalog};
use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;

/// One reporting day as delivered by the acquisition boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub date: NaiveDate,
    /// Keyed by source field name
    pub values: BTreeMap<String, u64>,
}

impl RawRecord {
    pub fn new(date: NaiveDate, values: BTreeMap<String, u64>) -> Self {
        Self { date, values }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    /// `None` marks a gap: missing input or an undefined derived value
    pub value: Option<f64>,
}

impl SeriesPoint {
    pub fn new(date: NaiveDate, value: Option<f64>) -> Self {
        Self { date, value }
    }
}

/// Date-ordered sequence of optional values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Series {
    points: Vec<SeriesPoint>,
}

impl Series {
    pub fn new(points: Vec<SeriesPoint>) -> Self {
        Self { points }
    }

    /// Consecutive daily values starting at `start`
    #[cfg(test)]
    pub fn from_daily(start: NaiveDate, values: &[Option<f64>]) -> Self {
        let points = values
            .iter()
            .enumerate()
            .map(|(i, v)| SeriesPoint::new(start + Duration::days(i as i64), *v))
            .collect();
        Self { points }
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[cfg(test)]
    pub fn values(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.value).collect()
    }

    /// Only the points carrying a value
    pub fn defined(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.points.iter().filter_map(|p| p.value.map(|v| (p.date, v)))
    }

    pub fn max(&self) -> Option<f64> {
        self.defined().map(|(_, v)| v).reduce(f64::max)
    }

    #[cfg(test)]
    pub fn value_at(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .and_then(|idx| self.points[idx].value)
    }

    /// Inclusive date range `[start, end]`
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> Series {
        Self::new(
            self.points
                .iter()
                .filter(|p| p.date >= start && p.date <= end)
                .copied()
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ColumnKind {
    Raw,
    Rolling,
    Stable,
    Unstable,
    Fit,
    OverlayStable,
    OverlayUnstable,
}

/// In-memory table over a dense daily date index.
///
/// Raw columns are written once by [`SeriesStore::ingest`]. Derived columns
/// can be appended exactly once each and are never rewritten.
#[derive(Debug, Clone)]
pub struct SeriesStore {
    dates: Vec<NaiveDate>,
    columns: BTreeMap<(Metric, ColumnKind), Series>,
    replaced_dates: Vec<NaiveDate>,
}

impl SeriesStore {
    pub fn ingest(records: Vec<RawRecord>, catalog: &MetricCatalog) -> Result<Self, PipelineError> {
        if records.is_empty() {
            return Err(PipelineError::EmptySeries);
        }

        for record in &records {
            for (_, profile) in catalog.iter() {
                if !record.values.contains_key(&profile.source_field) {
                    return Err(PipelineError::MissingField {
                        field: profile.source_field.clone(),
                        date: Some(record.date),
                    });
                }
            }
        }

        // Later records replace earlier ones for the same date. Upstream
        // revisions of a day would silently win here.
        let mut by_date: BTreeMap<NaiveDate, RawRecord> = BTreeMap::new();
        let mut replaced_dates = Vec::new();
        for record in records {
            let date = record.date;
            if by_date.insert(date, record).is_some() {
                tracing::warn!("duplicate record for {}, keeping the later one", date);
                replaced_dates.push(date);
            }
        }

        let (first, last) = match (by_date.keys().next(), by_date.keys().next_back()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Err(PipelineError::EmptySeries),
        };
        let dates: Vec<NaiveDate> = first.iter_days().take_while(|d| *d <= last).collect();

        let mut columns = BTreeMap::new();
        for (metric, profile) in catalog.iter() {
            let points = dates
                .iter()
                .map(|date| {
                    let value = by_date
                        .get(date)
                        .and_then(|r| r.values.get(&profile.source_field))
                        .map(|v| *v as f64);
                    SeriesPoint::new(*date, value)
                })
                .collect();
            columns.insert((metric, ColumnKind::Raw), Series::new(points));
        }

        tracing::info!(
            "ingested {} days from {} to {} ({} gaps, {} duplicates)",
            dates.len(),
            first,
            last,
            dates.len() - by_date.len(),
            replaced_dates.len()
        );

        Ok(Self {
            dates,
            columns,
            replaced_dates,
        })
    }

    pub fn column(&self, metric: Metric, kind: ColumnKind) -> Option<&Series> {
        self.columns.get(&(metric, kind))
    }

    pub fn append(&mut self, metric: Metric, kind: ColumnKind, series: Series) -> Result<(), PipelineError> {
        if kind == ColumnKind::Raw || self.columns.contains_key(&(metric, kind)) {
            return Err(PipelineError::ColumnConflict { metric, column: kind });
        }
        self.columns.insert((metric, kind), series);
        Ok(())
    }

    #[cfg(test)]
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn first_date(&self) -> NaiveDate {
        // ingest never builds an empty index
        self.dates[0]
    }

    pub fn last_date(&self) -> NaiveDate {
        self.dates[self.dates.len() - 1]
    }

    /// Dates before this one are final; the cutoff and later may still be revised
    pub fn stability_cutoff(&self, unstable_days: i64) -> NaiveDate {
        self.last_date() - Duration::days(unstable_days)
    }

    pub fn replaced_dates(&self) -> &[NaiveDate] {
        &self.replaced_dates
    }
}
