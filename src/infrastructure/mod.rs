// Infrastructure layer - External dependencies and adapters
pub mod arcgis_source;
pub mod config;
