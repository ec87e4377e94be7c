/// Environment Agency Hydrology API Client
///
/// Retrieves groundwater level readings for a single measure from the EA
/// hydrology data API. Registry locators are measure URLs; readings live
/// under `{measure}/readings`.
///
/// API Documentation: https://environment.data.gov.uk/hydrology/doc/reference

use crate::config::SourceConfig;
use crate::ingest::ReadingSource;
use crate::model::{QualityFlag, RawReading, SourceError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use std::time::Duration;

// ============================================================================
// EA API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EaReadingsResponse {
    pub items: Vec<EaReadingItem>,
}

/// One element of `items[]`. Readings without a value do occur (gaps the
/// API still lists) and are skipped.
#[derive(Debug, Deserialize)]
pub struct EaReadingItem {
    #[serde(rename = "dateTime")]
    pub date_time: Option<String>,
    pub date: Option<String>,
    pub value: Option<serde_json::Value>,
    pub quality: Option<String>,
}

// ============================================================================
// URL construction and parsing
// ============================================================================

/// Builds the readings URL for a measure locator.
pub fn build_readings_url(measure: &str, limit: u64) -> String {
    format!("{}/readings?_limit={}", measure.trim().trim_end_matches('/'), limit)
}

/// Parses a readings payload into raw readings, keeping the quality flag.
///
/// Quality filtering happens downstream; this only decodes.
pub fn parse_readings_response(body: &str) -> Result<Vec<RawReading>, SourceError> {
    let response: EaReadingsResponse =
        serde_json::from_str(body).map_err(|e| SourceError::Parse(e.to_string()))?;

    let mut readings = Vec::with_capacity(response.items.len());
    for item in response.items {
        let Some(value) = item.value.as_ref().and_then(numeric_value) else {
            continue;
        };
        let timestamp = reading_timestamp(&item)?;

        readings.push(RawReading {
            timestamp,
            value,
            quality: QualityFlag::from_api(item.quality.as_deref().unwrap_or("")),
        });
    }
    Ok(readings)
}

/// The calendar day comes from `date` when the API sends it, so readings
/// bucket into the same days the API reports. `dateTime` only supplies the
/// time of day, or the whole timestamp when `date` is absent.
fn reading_timestamp(item: &EaReadingItem) -> Result<NaiveDateTime, SourceError> {
    let date_time = item.date_time.as_deref().map(parse_timestamp).transpose()?;
    match (item.date.as_deref(), date_time) {
        (Some(day), dt) => {
            let day = parse_timestamp(day)?.date();
            Ok(day.and_time(dt.map_or(NaiveTime::MIN, |t| t.time())))
        }
        (None, Some(dt)) => Ok(dt),
        (None, None) => Err(SourceError::Parse("reading has neither dateTime nor date".into())),
    }
}

/// The API normally sends numbers, but older measures serialise some
/// values as strings.
fn numeric_value(value: &serde_json::Value) -> Option<f64> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Accepts RFC 3339 (`2020-01-01T09:00:00Z`), offset-less date-times and
/// bare dates. Everything is normalised to naive UTC.
fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, SourceError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }
    if let Some(dt) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(dt);
    }
    Err(SourceError::Parse(format!("unparseable timestamp '{}'", raw)))
}

// ============================================================================
// Retry policy
// ============================================================================

/// Bounded exponential backoff around a single fetch.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based): initial * 2^attempt, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Transport failures, throttling and server errors are worth another
    /// try; client errors and bad payloads are not.
    pub fn is_retryable(err: &SourceError) -> bool {
        match err {
            SourceError::Transport(_) => true,
            SourceError::Http(code) => *code == 429 || *code >= 500,
            SourceError::Parse(_) => false,
        }
    }

    /// Runs `op` until it succeeds, fails permanently, or retries run out.
    pub fn run<T, F>(&self, mut op: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Result<T, SourceError>,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries && Self::is_retryable(&err) => {
                    std::thread::sleep(self.delay_for(attempt));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// ============================================================================
// API Client
// ============================================================================

pub struct EaClient {
    client: reqwest::blocking::Client,
    readings_limit: u64,
    retry: RetryPolicy,
}

impl EaClient {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            readings_limit: config.readings_limit,
            retry: RetryPolicy::from_config(config),
        })
    }

    fn fetch_once(&self, url: &str) -> Result<Vec<RawReading>, SourceError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SourceError::Http(response.status().as_u16()));
        }

        let body = response
            .text()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        parse_readings_response(&body)
    }
}

impl ReadingSource for EaClient {
    fn fetch_readings(&self, locator: &str) -> Result<Vec<RawReading>, SourceError> {
        let url = build_readings_url(locator, self.readings_limit);
        self.retry.run(|| self.fetch_once(&url))
    }
}

// ============================================================================
// Tests
// ============================================================================
