// Application layer - Use cases and the curve pipeline stages
pub mod alignment;
pub mod curve_fit;
pub mod curve_pipeline;
pub mod observation_source;
pub mod report_service;
pub mod smoothing;
