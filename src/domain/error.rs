// Pipeline error taxonomy
use crate::domain::metric::Metric;
use crate::domain::series::ColumnKind;
use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    /// The upstream payload carried no records at all
    #[error("no observations in upstream payload")]
    EmptySeries,

    /// A record lacks a required field, or carries it with the wrong type.
    /// `date` is unknown when the date field itself is the one missing.
    #[error("record{} is missing field `{field}`", describe_date(.date))]
    MissingField { field: String, date: Option<NaiveDate> },

    #[error("smoothing window must be a positive odd number of days, got {0}")]
    InvalidWindow(usize),

    #[error("fit needs at least {required} defined points, found {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("exponential fit did not converge within {iterations} iterations")]
    FitDidNotConverge { iterations: usize },

    /// Peak is zero or undefined, so the curve cannot be normalized
    #[error("series has no positive peak to normalize against")]
    DegenerateSeries,

    #[error("column {column:?} of {metric} is already present")]
    ColumnConflict { metric: Metric, column: ColumnKind },
}

fn describe_date(date: &Option<NaiveDate>) -> String {
    date.map(|d| format!(" for {d}")).unwrap_or_default()
}
