// Domain layer - Metrics, series and pipeline errors
pub mod error;
pub mod metric;
pub mod milestone;
pub mod series;
