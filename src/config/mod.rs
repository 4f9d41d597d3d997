//! Application Configuration
//!
//! Settings stored in TOML format. Every section and field has a default,
//! so a partial file only overrides what it names.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::capture::SchedulerConfig;
use crate::storage::registry::{PlateFormat, DEFAULT_PLATE_PATTERN};
use crate::vision::{CandidatePolicy, OcrPreprocessing, ProposerConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Frame source and pacing
    pub capture: CaptureSettings,
    /// Candidate region geometry
    pub detection: DetectionSettings,
    /// OCR engine settings
    pub ocr: OcrSettings,
    /// Access decision settings
    pub verification: VerificationSettings,
    /// Registry database settings
    pub registry: RegistrySettings,
    /// Log output settings
    pub logging: LoggingSettings,
}

/// Capture-related settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Source URI: stub://WxH, an image file or directory, or a stream URL
    pub source: String,
    /// Minimum interval between displayed frames (25 fps at 40)
    pub display_interval_ms: u64,
    /// Pause before retrying after a failed frame read
    pub read_retry_backoff_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            source: "stub://640x480".to_string(),
            display_interval_ms: 40,
            read_retry_backoff_ms: 1000,
        }
    }
}

impl CaptureSettings {
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            display_interval: Duration::from_millis(self.display_interval_ms),
            read_retry_backoff: Duration::from_millis(self.read_retry_backoff_ms),
            ..SchedulerConfig::default()
        }
    }
}

/// Region proposal settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub min_aspect_ratio: f32,
    pub max_aspect_ratio: f32,
    pub min_width: u32,
    pub min_height: u32,
    pub intensity_low: u8,
    pub intensity_high: u8,
    /// Pixels trimmed from each side of a candidate before OCR
    pub crop_margin: u32,
    /// How texts from several regions of one frame are combined
    pub candidate_policy: CandidatePolicy,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        let proposer = ProposerConfig::default();
        Self {
            min_aspect_ratio: proposer.min_aspect_ratio,
            max_aspect_ratio: proposer.max_aspect_ratio,
            min_width: proposer.min_width,
            min_height: proposer.min_height,
            intensity_low: proposer.intensity_low,
            intensity_high: proposer.intensity_high,
            crop_margin: proposer.crop_margin,
            candidate_policy: CandidatePolicy::default(),
        }
    }
}

impl DetectionSettings {
    pub fn proposer(&self) -> ProposerConfig {
        ProposerConfig {
            min_aspect_ratio: self.min_aspect_ratio,
            max_aspect_ratio: self.max_aspect_ratio,
            min_width: self.min_width,
            min_height: self.min_height,
            intensity_low: self.intensity_low,
            intensity_high: self.intensity_high,
            crop_margin: self.crop_margin,
        }
    }
}

/// OCR engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Tesseract executable
    pub command: String,
    /// Tesseract language pack
    pub language: String,
    /// Tesseract page segmentation mode (7 = single line)
    pub page_segmentation: u8,
    /// Integer upscale applied to each region
    pub upscale: u32,
    /// Otsu binarization before OCR
    pub binarize: bool,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            command: "tesseract".to_string(),
            language: "rus".to_string(),
            page_segmentation: 7,
            upscale: 2,
            binarize: true,
        }
    }
}

impl OcrSettings {
    pub fn preprocessing(&self) -> OcrPreprocessing {
        OcrPreprocessing {
            binarize: self.binarize,
            upscale: self.upscale,
        }
    }
}

/// Access decision settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSettings {
    /// Minimum similarity (0 - 100) for a registry match
    pub threshold: f64,
    /// Treat digit 0 and letter О as the same symbol when comparing
    pub fold_zero_letter_o: bool,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            threshold: 80.0,
            fold_zero_letter_o: true,
        }
    }
}

/// Registry database settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Database file, defaults to the data directory
    pub database: Option<PathBuf>,
    /// Regex registered plates must match
    pub plate_pattern: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            database: None,
            plate_pattern: DEFAULT_PLATE_PATTERN.to_string(),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        let threshold = self.verification.threshold;
        if !(0.0..=100.0).contains(&threshold) {
            return invalid(format!("verification.threshold {} is outside 0..=100", threshold));
        }

        let detection = &self.detection;
        let band_ok = detection.min_aspect_ratio >= 0.0
            && detection.min_aspect_ratio < detection.max_aspect_ratio;
        if !band_ok {
            return invalid(format!(
                "detection aspect band {}..{} is empty",
                detection.min_aspect_ratio, detection.max_aspect_ratio
            ));
        }
        if detection.intensity_low > detection.intensity_high {
            return invalid(format!(
                "detection intensity band {}..={} is empty",
                detection.intensity_low, detection.intensity_high
            ));
        }
        if detection.crop_margin.saturating_mul(2) > detection.min_height {
            return invalid(format!(
                "detection.crop_margin {} leaves nothing of a {} pixel high region",
                detection.crop_margin, detection.min_height
            ));
        }

        if self.capture.display_interval_ms == 0 {
            return invalid("capture.display_interval_ms must be positive".to_string());
        }
        if self.ocr.upscale == 0 {
            return invalid("ocr.upscale must be at least 1".to_string());
        }

        PlateFormat::new(&self.registry.plate_pattern)
            .map_err(|e| ConfigError::Invalid(format!("registry.plate_pattern: {}", e)))?;

        Ok(())
    }
}

/// Default location of the configuration file
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(crate::storage::get_config_dir()?.join("config.toml"))
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Load configuration from file, or defaults if the file does not exist
pub fn load_or_default(path: &Path) -> Result<AppConfig, ConfigError> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(AppConfig::default())
    }
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        // Check capture defaults
        assert_eq!(config.capture.display_interval_ms, 40);
        assert_eq!(config.capture.read_retry_backoff_ms, 1000);

        // Check detection defaults
        assert!((config.detection.min_aspect_ratio - 2.0).abs() < 0.01);
        assert!((config.detection.max_aspect_ratio - 5.0).abs() < 0.01);
        assert_eq!(config.detection.min_width, 50);
        assert_eq!(config.detection.min_height, 10);
        assert_eq!(config.detection.candidate_policy, CandidatePolicy::Concatenate);

        // Check OCR and verification defaults
        assert_eq!(config.ocr.language, "rus");
        assert_eq!(config.ocr.page_segmentation, 7);
        assert!((config.verification.threshold - 80.0).abs() < 0.01);
        assert!(config.verification.fold_zero_letter_o);
        assert!(config.registry.database.is_none());

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AppConfig::default();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [verification]
            threshold = 75.0

            [detection]
            candidate_policy = "best_confidence"
            "#,
        )
        .unwrap();

        assert!((parsed.verification.threshold - 75.0).abs() < 0.01);
        assert!(parsed.verification.fold_zero_letter_o);
        assert_eq!(parsed.detection.candidate_policy, CandidatePolicy::BestConfidence);
        assert_eq!(parsed.detection.min_width, 50);
        assert_eq!(parsed.capture, CaptureSettings::default());
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = AppConfig::default();
        config.capture.source = "rtsp://camera.local/stream".to_string();
        config.registry.database = Some(PathBuf::from("/var/lib/plates.db"));

        let temp_file = NamedTempFile::new().unwrap();
        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
        let fallback = load_or_default(Path::new("/nonexistent/path/config.toml")).unwrap();
        assert_eq!(fallback, AppConfig::default());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = AppConfig::default();
        config.verification.threshold = 101.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.detection.min_aspect_ratio = 5.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.capture.display_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.registry.plate_pattern = "(unclosed".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_settings_convert_to_runtime_config() {
        let config = AppConfig::default();
        assert_eq!(config.detection.proposer(), ProposerConfig::default());
        assert_eq!(config.ocr.preprocessing(), OcrPreprocessing::default());
        assert_eq!(
            config.capture.scheduler().display_interval,
            Duration::from_millis(40)
        );
    }
}
