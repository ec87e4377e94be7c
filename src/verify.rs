//! Registry Locator Verification
//!
//! Checks every locator in the station registry against the data source
//! and reports which stations are reachable and returning usable readings.
//! Run this before a full download to spot withdrawn or mistyped measures.

use crate::ingest::ReadingSource;
use crate::logging;
use crate::model::StationMeta;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub results: Vec<StationVerification>,
    pub summary: VerificationSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub working: usize,
    pub partial: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationVerification {
    pub station_id: String,
    pub status: VerificationStatus,
    pub locators: Vec<LocatorCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorCheck {
    pub locator: String,
    pub responsive: bool,
    /// Readings flagged Good or Estimated.
    pub usable_readings: usize,
    pub total_readings: usize,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VerificationStatus {
    /// Every locator returned usable readings.
    Success,
    /// At least one locator did, but not all.
    PartialSuccess,
    /// No locator returned usable readings, or the station has none.
    Failed,
}

// ============================================================================
// Verification
// ============================================================================

pub fn check_locator<S: ReadingSource>(source: &S, locator: &str) -> LocatorCheck {
    match source.fetch_readings(locator) {
        Ok(readings) => LocatorCheck {
            locator: locator.to_string(),
            responsive: true,
            usable_readings: readings.iter().filter(|r| r.quality.is_usable()).count(),
            total_readings: readings.len(),
            error_message: None,
        },
        Err(e) => LocatorCheck {
            locator: locator.to_string(),
            responsive: false,
            usable_readings: 0,
            total_readings: 0,
            error_message: Some(e.to_string()),
        },
    }
}

pub fn verify_station<S: ReadingSource>(source: &S, station: &StationMeta) -> StationVerification {
    let locators: Vec<LocatorCheck> = station.locators().map(|l| check_locator(source, l)).collect();
    let with_data = locators.iter().filter(|c| c.usable_readings > 0).count();
    let status = if with_data == 0 {
        VerificationStatus::Failed
    } else if with_data == locators.len() {
        VerificationStatus::Success
    } else {
        VerificationStatus::PartialSuccess
    };
    StationVerification {
        station_id: station.station_id.clone(),
        status,
        locators,
    }
}

pub fn run_verification<S: ReadingSource>(source: &S, stations: &[StationMeta]) -> VerificationReport {
    let mut summary = VerificationSummary { total: stations.len(), ..Default::default() };
    let mut results = Vec::with_capacity(stations.len());

    for station in stations {
        let result = verify_station(source, station);
        match result.status {
            VerificationStatus::Success => summary.working += 1,
            VerificationStatus::PartialSuccess => summary.partial += 1,
            VerificationStatus::Failed => {
                let reason = result
                    .locators
                    .iter()
                    .find_map(|c| c.error_message.as_deref())
                    .unwrap_or("no usable readings");
                logging::warn(logging::Component::Source, Some(&station.station_id), reason);
                summary.failed += 1;
            }
        }
        results.push(result);
    }

    VerificationReport {
        timestamp: Utc::now().to_rfc3339(),
        results,
        summary,
    }
}

pub fn write_report(path: &Path, report: &VerificationReport) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report).map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}

pub fn print_summary(report: &VerificationReport) {
    let s = &report.summary;
    println!("\n═══════════════════════════════════════════════════════════");
    println!("REGISTRY VERIFICATION SUMMARY");
    println!("═══════════════════════════════════════════════════════════");
    println!("Stations:  {} total", s.total);
    println!("Working:   {}", s.working);
    println!("Partial:   {}", s.partial);
    println!("Failed:    {}", s.failed);

    let success_rate = if s.total > 0 {
        ((s.working + s.partial) as f64 / s.total as f64) * 100.0
    } else {
        0.0
    };
    println!("Overall Success Rate: {:.1}% ({}/{})", success_rate, s.working + s.partial, s.total);
    println!("═══════════════════════════════════════════════════════════");
}
