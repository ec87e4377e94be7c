//! Runtime configuration.
//!
//! Everything is read from a TOML file whose sections mirror the pipeline
//! stages. Every field has a default, so an empty file (or no file at all)
//! yields the production configuration. A `.env` file is honoured for the
//! handful of environment overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "GWTREND_CONFIG";
/// Environment override for `[logging] level`.
pub const LOG_LEVEL_ENV: &str = "GWTREND_LOG_LEVEL";
/// Environment override for `[paths] output_dir`.
pub const OUTPUT_DIR_ENV: &str = "GWTREND_OUTPUT_DIR";

const DEFAULT_CONFIG_FILE: &str = "gwtrend.toml";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub source: SourceConfig,
    pub quality: QualityConfig,
    pub qualification: QualificationConfig,
    pub classifier: ClassifierConfig,
    pub spatial: SpatialConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Input station registry CSV.
    pub registry: PathBuf,
    /// Root for everything the service writes.
    pub output_dir: PathBuf,
    /// Per-station annual series files, relative to `output_dir`.
    pub annual_dir: PathBuf,
    pub summary_report: PathBuf,
    pub classification_report: PathBuf,
    pub consistency_report: PathBuf,
    /// JSON output of the `verify` command.
    pub verification_report: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            registry: PathBuf::from("stations.csv"),
            output_dir: PathBuf::from("output"),
            annual_dir: PathBuf::from("annual"),
            summary_report: PathBuf::from("stations_info.csv"),
            classification_report: PathBuf::from("classification.csv"),
            consistency_report: PathBuf::from("consistency.csv"),
            verification_report: PathBuf::from("verification.json"),
        }
    }
}

impl PathsConfig {
    pub fn annual_dir(&self) -> PathBuf {
        self.output_dir.join(&self.annual_dir)
    }

    pub fn summary_report(&self) -> PathBuf {
        self.output_dir.join(&self.summary_report)
    }

    pub fn classification_report(&self) -> PathBuf {
        self.output_dir.join(&self.classification_report)
    }

    pub fn consistency_report(&self) -> PathBuf {
        self.output_dir.join(&self.consistency_report)
    }

    pub fn verification_report(&self) -> PathBuf {
        self.output_dir.join(&self.verification_report)
    }
}

/// Data source client settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// `_limit` query parameter for the readings endpoint.
    pub readings_limit: u64,
    pub timeout_secs: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            readings_limit: 2_000_000,
            timeout_secs: 120,
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

/// Quality filter thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Runs of identical values at least this long are removed.
    pub flat_run_length: usize,
    /// Rows further than this many standard deviations from the mean are removed.
    pub z_threshold: f64,
    pub rvi_min: f64,
    pub rvi_max: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            flat_run_length: 3,
            z_threshold: 3.0,
            rvi_min: 0.2,
            rvi_max: 5.0,
        }
    }
}

/// Data amount rules deciding whether a station is analysed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualificationConfig {
    /// Cleaned daily rows must exceed this.
    pub min_daily_points: usize,
    /// Annual points must exceed this.
    pub min_annual_points: usize,
    pub require_positive_mean_depth: bool,
}

impl Default for QualificationConfig {
    fn default() -> Self {
        Self {
            min_daily_points: 100,
            min_annual_points: 8,
            require_positive_mean_depth: true,
        }
    }
}

/// Trend classifier constants.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Theil-Sen confidence level for the reported slope bounds.
    pub confidence: f64,
    /// Slopes within `±dead_zone` are "No trend".
    pub dead_zone: f64,
    /// Every leave-one-out slope must stay below this for a steady increase.
    pub increasing_stability_bound: f64,
    /// Every leave-one-out slope must stay above this for a steady decrease.
    pub decreasing_stability_bound: f64,
    pub min_r_squared: f64,
    pub max_window_fraction: f64,
    pub max_window_years: u32,
    pub value_lower_bound: f64,
    pub value_upper_bound: f64,
    pub max_fit_iterations: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            confidence: 0.9,
            dead_zone: 0.02,
            increasing_stability_bound: 0.1,
            decreasing_stability_bound: -0.02,
            min_r_squared: 0.7,
            max_window_fraction: 0.5,
            max_window_years: 15,
            value_lower_bound: -100.0,
            value_upper_bound: 1000.0,
            max_fit_iterations: 400,
        }
    }
}

/// Neighbor selection for the spatial consistency check.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    pub lat_window_deg: f64,
    pub long_window_deg: f64,
    pub max_distance_km: f64,
    /// Each restricted series must have more points than this.
    pub min_overlap_points: usize,
    /// Stations must span more years than this to take part.
    pub min_total_years: u32,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            lat_window_deg: 0.15,
            long_window_deg: 0.25,
            max_distance_km: 15.0,
            min_overlap_points: 8,
            min_total_years: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// debug | info | warn | error
    pub level: String,
    pub file: Option<String>,
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            timestamps: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot read config {}: {}", path.display(), source)
            }
            ConfigError::Parse(msg) => write!(f, "config parse error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Loads configuration, in order of precedence: `explicit` path, then
    /// `$GWTREND_CONFIG`, then `./gwtrend.toml`. A missing default file is
    /// not an error; a missing explicitly named file is.
    pub fn load(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
        dotenv::dotenv().ok();

        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from));

        let mut config = match named {
            Some(path) => Self::from_file(&path)?,
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    AppConfig::default()
                }
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<AppConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<AppConfig, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        if let Some(level) = non_empty_env(LOG_LEVEL_ENV) {
            self.logging.level = level;
        }
        if let Some(dir) = non_empty_env(OUTPUT_DIR_ENV) {
            self.paths.output_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let q = &self.quality;
        if q.flat_run_length < 2 {
            return Err(ConfigError::Invalid("quality.flat_run_length must be at least 2".into()));
        }
        if !(q.z_threshold > 0.0) {
            return Err(ConfigError::Invalid("quality.z_threshold must be positive".into()));
        }
        if !(q.rvi_min >= 0.0 && q.rvi_min < q.rvi_max) {
            return Err(ConfigError::Invalid(
                "quality.rvi_min must be non-negative and below quality.rvi_max".into(),
            ));
        }

        let c = &self.classifier;
        if !(c.confidence > 0.0 && c.confidence < 1.0) {
            return Err(ConfigError::Invalid("classifier.confidence must lie in (0, 1)".into()));
        }
        if !(c.dead_zone >= 0.0) {
            return Err(ConfigError::Invalid("classifier.dead_zone must be non-negative".into()));
        }
        if !(c.value_lower_bound < c.value_upper_bound) {
            return Err(ConfigError::Invalid(
                "classifier.value_lower_bound must be below value_upper_bound".into(),
            ));
        }
        if c.max_fit_iterations == 0 {
            return Err(ConfigError::Invalid("classifier.max_fit_iterations must be positive".into()));
        }

        let s = &self.spatial;
        if !(s.lat_window_deg > 0.0 && s.long_window_deg > 0.0 && s.max_distance_km > 0.0) {
            return Err(ConfigError::Invalid("spatial windows and distance must be positive".into()));
        }

        if self.logging.level.parse::<crate::logging::LogLevel>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "unknown logging.level '{}'",
                self.logging.level
            )));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_production_defaults() {
        let config = AppConfig::from_toml_str("").expect("empty config should parse");
        assert_eq!(config.classifier.dead_zone, 0.02);
        assert_eq!(config.classifier.increasing_stability_bound, 0.1);
        assert_eq!(config.classifier.decreasing_stability_bound, -0.02);
        assert_eq!(config.quality.flat_run_length, 3);
        assert_eq!(config.qualification.min_annual_points, 8);
        assert_eq!(config.spatial.max_distance_km, 15.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = AppConfig::from_toml_str(
            "[classifier]\ndead_zone = 0.1\n\n[paths]\noutput_dir = \"/tmp/gw\"\n",
        )
        .expect("partial config should parse");
        assert_eq!(config.classifier.dead_zone, 0.1);
        assert_eq!(config.classifier.min_r_squared, 0.7);
        assert_eq!(config.paths.annual_dir(), PathBuf::from("/tmp/gw/annual"));
    }

    #[test]
    fn test_validate_rejects_inverted_rvi_bounds() {
        let config = AppConfig::from_toml_str("[quality]\nrvi_min = 5.0\nrvi_max = 0.2\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let config = AppConfig::from_toml_str("[logging]\nlevel = \"chatty\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let result = AppConfig::from_toml_str("[classifier\ndead_zone = ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_explicit_file_is_io_error() {
        let result = AppConfig::from_file(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
