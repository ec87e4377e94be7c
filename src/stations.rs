/// Station registry for the groundwater trend service.
///
/// The registry is a CSV table with one row per monitoring well: its id,
/// up to two readings locators (manual "dipped" and automated "logged"),
/// datum elevation, position and aquifer. It is the single source of truth
/// for which wells are processed; every batch stage starts from it.
///
/// Expected header (extra columns are ignored):
///
/// ```text
/// No,dipped,logged,Elevation,lat,long,Revised aquifers
/// ```

use crate::model::StationMeta;
use serde::Deserialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum RegistryError {
    Io(std::io::Error),
    Csv(csv::Error),
    /// Row-level problem, e.g. a duplicate id or a non-finite coordinate.
    Invalid(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Io(e) => write!(f, "Registry I/O error: {}", e),
            RegistryError::Csv(e) => write!(f, "Registry CSV error: {}", e),
            RegistryError::Invalid(msg) => write!(f, "Invalid registry: {}", msg),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<std::io::Error> for RegistryError {
    fn from(e: std::io::Error) -> Self {
        RegistryError::Io(e)
    }
}

impl From<csv::Error> for RegistryError {
    fn from(e: csv::Error) -> Self {
        RegistryError::Csv(e)
    }
}

// ---------------------------------------------------------------------------
// Row format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RegistryRow {
    #[serde(rename = "No")]
    station_id: String,
    #[serde(default)]
    dipped: Option<String>,
    #[serde(default)]
    logged: Option<String>,
    #[serde(rename = "Elevation")]
    elevation: f64,
    lat: f64,
    long: f64,
    #[serde(rename = "Revised aquifers", alias = "aquifer", default)]
    aquifer: String,
}

/// Blank and "nan" cells both mean "no locator".
fn locator(cell: Option<String>) -> Option<String> {
    cell.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("nan"))
}

impl RegistryRow {
    fn into_meta(self) -> Result<StationMeta, RegistryError> {
        let station_id = self.station_id.trim().to_string();
        if station_id.is_empty() {
            return Err(RegistryError::Invalid("row with empty station id".into()));
        }
        if !(self.elevation.is_finite() && self.lat.is_finite() && self.long.is_finite()) {
            return Err(RegistryError::Invalid(format!(
                "station '{}' has a non-finite elevation or coordinate",
                station_id
            )));
        }
        Ok(StationMeta {
            station_id,
            dipped: locator(self.dipped),
            logged: locator(self.logged),
            elevation: self.elevation,
            latitude: self.lat,
            longitude: self.long,
            aquifer: self.aquifer.trim().to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Parses a registry from any reader and validates it.
pub fn parse_registry<R: Read>(reader: R) -> Result<Vec<StationMeta>, RegistryError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut stations = Vec::new();
    for row in rdr.deserialize::<RegistryRow>() {
        stations.push(row?.into_meta()?);
    }
    validate_registry(&stations)?;
    Ok(stations)
}

pub fn load_registry(path: &Path) -> Result<Vec<StationMeta>, RegistryError> {
    let file = std::fs::File::open(path)?;
    parse_registry(file)
}

/// Station ids must be unique; they name the per-station output files.
pub fn validate_registry(stations: &[StationMeta]) -> Result<(), RegistryError> {
    let mut seen = HashSet::new();
    for station in stations {
        if !seen.insert(station.station_id.as_str()) {
            return Err(RegistryError::Invalid(format!(
                "duplicate station id '{}'",
                station.station_id
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
No,dipped,logged,Elevation,lat,long,Revised aquifers
SU01,https://example.test/measures/SU01-gw-dipped,,85.2,51.05,-1.32,Chalk
SU02,,https://example.test/measures/SU02-gw-logged,102.0,51.10,-1.30,Chalk
SU03,,,60.5,51.20,-1.10,Unallocated to aquifers
";

    #[test]
    fn test_parse_registry_reads_all_rows() {
        let stations = parse_registry(SAMPLE.as_bytes()).expect("sample registry should parse");
        assert_eq!(stations.len(), 3);
        assert_eq!(stations[0].station_id, "SU01");
        assert_eq!(stations[0].elevation, 85.2);
        assert_eq!(stations[1].aquifer, "Chalk");
    }

    #[test]
    fn test_empty_locators_become_none() {
        let stations = parse_registry(SAMPLE.as_bytes()).unwrap();
        assert!(stations[0].dipped.is_some());
        assert!(stations[0].logged.is_none(), "blank logged cell should be None");
        assert_eq!(stations[2].locators().count(), 0, "station without locators is still loaded");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let text = "No,dipped,logged,Elevation,lat,long,Revised aquifers\nA,,,1,50,0,Chalk\nA,,,2,50,0,Chalk\n";
        assert!(matches!(parse_registry(text.as_bytes()), Err(RegistryError::Invalid(_))));
    }

    #[test]
    fn test_non_numeric_elevation_is_csv_error() {
        let text = "No,dipped,logged,Elevation,lat,long,Revised aquifers\nA,,,high,50,0,Chalk\n";
        assert!(matches!(parse_registry(text.as_bytes()), Err(RegistryError::Csv(_))));
    }

    #[test]
    fn test_aquifer_alias_column() {
        let text = "No,dipped,logged,Elevation,lat,long,aquifer\nA,,,1,50,0,Greensand\n";
        let stations = parse_registry(text.as_bytes()).unwrap();
        assert_eq!(stations[0].aquifer, "Greensand");
    }

    #[test]
    fn test_load_registry_missing_file_is_io_error() {
        let result = load_registry(Path::new("/nonexistent/registry.csv"));
        assert!(matches!(result, Err(RegistryError::Io(_))));
    }
}
