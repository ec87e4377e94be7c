/// Groundwater trend service.
///
/// Downloads groundwater level readings for a registry of monitoring wells,
/// cleans them, aggregates them to water-year depth series, classifies the
/// long-term trend of each well and scores how consistent those trends are
/// among neighboring wells in the same aquifer.

pub mod analysis;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod stations;
pub mod store;
pub mod verify;
