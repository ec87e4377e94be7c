/// Raw reading acquisition.
///
/// The analysis only needs "give me the readings behind this locator";
/// `ReadingSource` is that seam. `ea` implements it against the
/// Environment Agency hydrology API, tests implement it in memory.

pub mod ea;

use crate::model::{RawReading, SourceError};

/// A data source that resolves a registry locator into raw readings.
///
/// Implementations must return `Ok(vec![])` when the source answers but has
/// no valid readings, and an error only when the source is unreachable or
/// answers with a non-success status / malformed payload.
pub trait ReadingSource {
    fn fetch_readings(&self, locator: &str) -> Result<Vec<RawReading>, SourceError>;
}

impl<T: ReadingSource + ?Sized> ReadingSource for &T {
    fn fetch_readings(&self, locator: &str) -> Result<Vec<RawReading>, SourceError> {
        (**self).fetch_readings(locator)
    }
}
