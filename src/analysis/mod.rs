/// Analytical core of the groundwater trend service.
///
/// Everything here is pure: series in, series or results out. Fetching,
/// persistence and batch control live in `ingest`, `store` and `pipeline`.
///
/// Submodules:
/// - `resample`: daily / monthly / water-year aggregation and depth conversion.
/// - `quality`: the three-stage quality filter.
/// - `robust`: median, population std, Theil-Sen with confidence bounds.
/// - `piecewise`: flat-ramp-flat model and its bounded fit.
/// - `classify`: trend labels from slope, step test and stability.
/// - `spatial`: neighbor search and pairwise consistency scoring.

pub mod classify;
pub mod piecewise;
pub mod quality;
pub mod resample;
pub mod robust;
pub mod spatial;
