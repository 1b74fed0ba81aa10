// Presentation layer - Chart rendering and its text annotations
pub mod annotations;
pub mod chart_renderer;
