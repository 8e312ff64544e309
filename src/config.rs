use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

/// Tunables for one analysis run. Distance thresholds are in bits out of
/// the 256-bit fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub near_duplicate_threshold: u32,
    pub identical_threshold: u32,
    pub parallel_workers: usize,
    pub supported_formats: Vec<String>,
    pub allow_metadata_fallback: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            near_duplicate_threshold: 12,
            identical_threshold: 5,
            parallel_workers: num_cpus::get(),
            supported_formats: vec![
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
                "gif".to_string(),
                "bmp".to_string(),
                "tiff".to_string(),
                "tif".to_string(),
                "webp".to_string(),
            ],
            allow_metadata_fallback: true,
        }
    }
}

impl AnalysisConfig {
    pub const KEYS: [&'static str; 5] = [
        "near_duplicate_threshold",
        "identical_threshold",
        "parallel_workers",
        "supported_formats",
        "allow_metadata_fallback",
    ];

    /// Set one field from its stored string form.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "near_duplicate_threshold" => {
                self.near_duplicate_threshold = value.trim().parse().map_err(|_| invalid())?;
            }
            "identical_threshold" => {
                self.identical_threshold = value.trim().parse().map_err(|_| invalid())?;
            }
            "parallel_workers" => {
                let workers: usize = value.trim().parse().map_err(|_| invalid())?;
                if workers == 0 {
                    return Err(invalid());
                }
                self.parallel_workers = workers;
            }
            "supported_formats" => {
                let formats: Vec<String> = if value.trim_start().starts_with('[') {
                    serde_json::from_str(value).map_err(|_| invalid())?
                } else {
                    value.split(',').map(|s| s.trim().to_string()).collect()
                };
                self.supported_formats = formats
                    .into_iter()
                    .map(|f| f.trim_start_matches('.').to_lowercase())
                    .filter(|f| !f.is_empty())
                    .collect();
            }
            "allow_metadata_fallback" => {
                self.allow_metadata_fallback = value.trim().parse().map_err(|_| invalid())?;
            }
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }

        Ok(())
    }

    /// Stored string form of every field, in `KEYS` order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            (
                "near_duplicate_threshold",
                self.near_duplicate_threshold.to_string(),
            ),
            ("identical_threshold", self.identical_threshold.to_string()),
            ("parallel_workers", self.parallel_workers.to_string()),
            (
                "supported_formats",
                serde_json::to_string(&self.supported_formats).unwrap_or_else(|_| "[]".into()),
            ),
            (
                "allow_metadata_fallback",
                self.allow_metadata_fallback.to_string(),
            ),
        ]
    }

    pub fn is_supported_extension(&self, extension: &str) -> bool {
        let ext = extension.to_lowercase();
        self.supported_formats.iter().any(|f| *f == ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.near_duplicate_threshold, 12);
        assert_eq!(config.identical_threshold, 5);
        assert!(config.parallel_workers >= 1);
        assert!(config.is_supported_extension("JPG"));
        assert!(!config.is_supported_extension("txt"));
    }

    #[test]
    fn test_apply_round_trips_entries() {
        let mut config = AnalysisConfig::default();
        config.apply("near_duplicate_threshold", "15").unwrap();
        config.apply("supported_formats", ".PNG, jpg").unwrap();
        config.apply("allow_metadata_fallback", "false").unwrap();

        let mut restored = AnalysisConfig::default();
        for (key, value) in config.entries() {
            restored.apply(key, &value).unwrap();
        }
        assert_eq!(restored, config);
        assert_eq!(restored.supported_formats, vec!["png", "jpg"]);
    }

    #[test]
    fn test_apply_rejects_bad_input() {
        let mut config = AnalysisConfig::default();
        assert!(matches!(
            config.apply("colour", "blue"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            config.apply("parallel_workers", "0"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config.apply("identical_threshold", "five"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
