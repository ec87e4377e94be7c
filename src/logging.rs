/// Structured logging for the groundwater trend service
///
/// Provides context-rich logging with station identifiers, pipeline
/// component tags, timestamps and severity levels. Supports both console
/// output and file-based logging for long batch runs.

use crate::model::SourceError;
use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Source,
    Quality,
    Classifier,
    Spatial,
    Store,
    System,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Source => write!(f, "SOURCE"),
            Component::Quality => write!(f, "QC"),
            Component::Classifier => write!(f, "CLASSIFY"),
            Component::Spatial => write!(f, "SPATIAL"),
            Component::Store => write!(f, "STORE"),
            Component::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - the measure is not published (withdrawn or never existed)
    Expected,
    /// Unexpected failure - indicates service degradation or an API change
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };

        if let Ok(mut slot) = LOGGER.lock() {
            *slot = Some(logger);
        }
    }

    fn log(&self, level: LogLevel, component: Component, station_id: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let station_part = station_id.map(|s| format!(" [{}]", s)).unwrap_or_default();
        let log_entry = format_entry(&timestamp.to_string(), level, component, station_id, message);

        if self.console_timestamps {
            match level {
                LogLevel::Error | LogLevel::Warning => eprintln!("{}", log_entry),
                LogLevel::Info | LogLevel::Debug => println!("{}", log_entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", component, station_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", component, station_part, message),
                LogLevel::Info => println!("   {}{}: {}", component, station_part, message),
                LogLevel::Debug => println!("   [DEBUG] {}{}: {}", component, station_part, message),
            }
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

fn format_entry(
    timestamp: &str,
    level: LogLevel,
    component: Component,
    station_id: Option<&str>,
    message: &str,
) -> String {
    let station_part = station_id.map(|s| format!(" [{}]", s)).unwrap_or_default();
    format!("{} {} {}{}: {}", timestamp, level, component, station_part, message)
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

fn dispatch(level: LogLevel, component: Component, station_id: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, component, station_id, message);
        }
    }
}

pub fn info(component: Component, station_id: Option<&str>, message: &str) {
    dispatch(LogLevel::Info, component, station_id, message);
}

pub fn warn(component: Component, station_id: Option<&str>, message: &str) {
    dispatch(LogLevel::Warning, component, station_id, message);
}

pub fn error(component: Component, station_id: Option<&str>, message: &str) {
    dispatch(LogLevel::Error, component, station_id, message);
}

pub fn debug(component: Component, station_id: Option<&str>, message: &str) {
    dispatch(LogLevel::Debug, component, station_id, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a data source failure.
///
/// A 404 on a measure URL means the registry points at a measure the API no
/// longer publishes, which is routine for decommissioned boreholes.
pub fn classify_source_failure(err: &SourceError) -> FailureType {
    match err {
        SourceError::Http(404) | SourceError::Http(410) => FailureType::Expected,
        SourceError::Http(_) => FailureType::Unexpected,
        SourceError::Parse(_) => FailureType::Unexpected,
        SourceError::Transport(msg) if msg.contains("timed out") => FailureType::Unknown,
        SourceError::Transport(_) => FailureType::Unexpected,
    }
}

/// Log a data source failure with automatic classification
pub fn log_source_failure(station_id: &str, locator: &str, err: &SourceError) {
    let failure_type = classify_source_failure(err);
    let message = format!("fetch {} failed [{}]: {}", locator, failure_type, err);

    match failure_type {
        FailureType::Expected => debug(Component::Source, Some(station_id), &message),
        FailureType::Unexpected => error(Component::Source, Some(station_id), &message),
        FailureType::Unknown => warn(Component::Source, Some(station_id), &message),
    }
}

// ---------------------------------------------------------------------------
// Batch Summary Logging
// ---------------------------------------------------------------------------

pub fn log_batch_summary(component: Component, stage: &str, total: usize, successful: usize, failed: usize) {
    let message = format!(
        "{} complete: {}/{} successful, {} failed",
        stage, successful, total, failed
    );

    if failed == 0 {
        info(component, None, &message);
    } else if successful == 0 {
        error(component, None, &message);
    } else {
        warn(component, None, &message);
    }
}

/// Download-stage summary. Unqualified stations are a normal outcome, so
/// the level only reflects locator fetch failures.
pub fn download_summary(
    stations: usize,
    qualified: usize,
    locators: usize,
    failed_locators: usize,
) -> (LogLevel, String) {
    let message = format!(
        "Download complete: {}/{} stations qualified, {} not qualified; {}/{} locator fetches failed",
        qualified,
        stations,
        stations.saturating_sub(qualified),
        failed_locators,
        locators
    );
    let level = if failed_locators == 0 {
        LogLevel::Info
    } else if failed_locators == locators {
        LogLevel::Error
    } else {
        LogLevel::Warning
    };
    (level, message)
}

pub fn log_download_summary(stations: usize, qualified: usize, locators: usize, failed_locators: usize) {
    let (level, message) = download_summary(stations, qualified, locators, failed_locators);
    dispatch(level, Component::Source, None, &message);
}
