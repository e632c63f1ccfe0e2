//! Typed TOML configuration for the monitor.
//!
//! Configuration is loaded from a TOML file, merged with `OM_`-prefixed
//! environment variables (environment takes precedence), and validated
//! before any worker or collector task starts. A raw lookup API,
//! [`MonitorParams::get_param`], is also exposed for call sites that want a
//! single parameter without constructing a whole `Config`; it distinguishes
//! the three failure kinds the monitor's error taxonomy requires: the group
//! is missing, the parameter is missing, or the parameter has the wrong
//! type.

use std::collections::HashSet;
use std::path::Path;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration load error: {0}")]
    LoadError(#[from] figment::Error),

    #[error("configuration validation error: {0}")]
    ValidationError(String),

    #[error("configuration group '{0}' is missing")]
    GroupMissing(String),

    #[error("parameter '{param}' is missing from group '{group}'")]
    ParameterMissing { group: String, param: String },

    #[error("parameter '{param}' in group '{group}' has the wrong type, expected {expected}")]
    WrongType {
        group: String,
        param: String,
        expected: &'static str,
    },
}

impl From<ConfigError> for common::OmError {
    fn from(e: ConfigError) -> Self {
        common::OmError::Configuration(e.to_string())
    }
}

/// `[General]`
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub speed_report_interval: u64,
    #[serde(default)]
    pub num_frames_in_event_to_process: Option<usize>,
    #[serde(default)]
    pub frame_indexes_to_skip: Vec<i64>,
    #[serde(default)]
    pub hit_frame_sending_interval: Option<u64>,
    #[serde(default)]
    pub non_hit_frame_sending_interval: Option<u64>,
    #[serde(default)]
    pub broadcast_ip: Option<String>,
    #[serde(default = "default_broadcast_port")]
    pub broadcast_port: u16,
}

fn default_broadcast_port() -> u16 {
    12321
}

/// `[Onda]`
#[derive(Debug, Clone, Deserialize)]
pub struct OndaConfig {
    pub data_retrieval_layer: String,
    #[serde(default)]
    pub required_data: Vec<String>,
    pub processing_layer: String,
}

/// `[Correction]`
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CorrectionConfig {
    #[serde(default)]
    pub dark_filename: Option<String>,
    #[serde(default)]
    pub dark_hdf5_path: Option<String>,
    #[serde(default)]
    pub mask_filename: Option<String>,
    #[serde(default)]
    pub mask_hdf5_path: Option<String>,
    #[serde(default)]
    pub gain_filename: Option<String>,
    #[serde(default)]
    pub gain_hdf5_path: Option<String>,
}

impl CorrectionConfig {
    fn validate_pair(
        &self,
        filename: &Option<String>,
        hdf5_path: &Option<String>,
        label: &str,
    ) -> Result<(), ConfigError> {
        if filename.is_some() != hdf5_path.is_some() {
            return Err(ConfigError::ValidationError(format!(
                "Correction.{label}_filename and {label}_hdf5_path must both be present or both absent"
            )));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_pair(&self.dark_filename, &self.dark_hdf5_path, "dark")?;
        self.validate_pair(&self.mask_filename, &self.mask_hdf5_path, "mask")?;
        self.validate_pair(&self.gain_filename, &self.gain_hdf5_path, "gain")?;
        Ok(())
    }
}

/// `[Peakfinder8PeakDetection]`
#[derive(Debug, Clone, Deserialize)]
pub struct Peakfinder8Config {
    pub max_num_peaks: usize,
    pub asic_nx: usize,
    pub asic_ny: usize,
    pub nasics_x: usize,
    pub nasics_y: usize,
    pub adc_threshold: f32,
    pub minimum_snr: f32,
    pub min_pixel_count: usize,
    pub max_pixel_count: usize,
    pub local_bg_radius: i64,
    pub min_res: i64,
    pub max_res: i64,
    pub bad_pixel_map_filename: String,
    pub bad_pixel_map_hdf5_path: String,
}

impl Peakfinder8Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_pixel_count > self.max_pixel_count {
            return Err(ConfigError::ValidationError(
                "Peakfinder8PeakDetection.min_pixel_count must be <= max_pixel_count".into(),
            ));
        }
        if self.min_res > self.max_res {
            return Err(ConfigError::ValidationError(
                "Peakfinder8PeakDetection.min_res must be <= max_res".into(),
            ));
        }
        if self.max_num_peaks == 0 {
            return Err(ConfigError::ValidationError(
                "Peakfinder8PeakDetection.max_num_peaks must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// `[Crystallography]`
#[derive(Debug, Clone, Deserialize)]
pub struct CrystallographyConfig {
    pub geometry_file: String,
    pub max_saturated_peaks: usize,
    pub min_num_peaks_for_hit: usize,
    pub max_num_peaks_for_hit: usize,
    pub saturation_value: f32,
    pub geometry_is_optimized: bool,
    pub running_average_window_size: usize,
}

impl CrystallographyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_num_peaks_for_hit >= self.max_num_peaks_for_hit {
            return Err(ConfigError::ValidationError(
                "Crystallography.min_num_peaks_for_hit must be < max_num_peaks_for_hit".into(),
            ));
        }
        if self.running_average_window_size == 0 {
            return Err(ConfigError::ValidationError(
                "Crystallography.running_average_window_size must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// `[DataAccumulator]`
#[derive(Debug, Clone, Deserialize)]
pub struct DataAccumulatorConfig {
    pub num_events_to_accumulate: usize,
}

impl DataAccumulatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_events_to_accumulate == 0 {
            return Err(ConfigError::ValidationError(
                "DataAccumulator.num_events_to_accumulate must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Top-level monitor configuration: the typed view of `monitor.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    pub onda: OndaConfig,
    #[serde(default)]
    pub correction: CorrectionConfig,
    pub peakfinder8_peak_detection: Peakfinder8Config,
    pub crystallography: CrystallographyConfig,
    pub data_accumulator: DataAccumulatorConfig,
}

impl Config {
    /// Load configuration from `path`, merged with `OM_`-prefixed
    /// environment variables, and validate it.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("OM_").split("_"))
            .extract()
            .map_err(ConfigError::LoadError)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.correction.validate()?;
        self.peakfinder8_peak_detection.validate()?;
        self.crystallography.validate()?;
        self.data_accumulator.validate()?;

        if self.general.hit_frame_sending_interval == Some(0) {
            return Err(ConfigError::ValidationError(
                "General.hit_frame_sending_interval must be a positive integer or absent".into(),
            ));
        }
        if self.general.non_hit_frame_sending_interval == Some(0) {
            return Err(ConfigError::ValidationError(
                "General.non_hit_frame_sending_interval must be a positive integer or absent"
                    .into(),
            ));
        }

        let skip: HashSet<&i64> = self.general.frame_indexes_to_skip.iter().collect();
        if skip.len() != self.general.frame_indexes_to_skip.len() {
            return Err(ConfigError::ValidationError(
                "General.frame_indexes_to_skip contains duplicate entries".into(),
            ));
        }

        Ok(())
    }
}

/// Raw document lookup distinguishing group-missing / parameter-missing /
/// wrong-type failures, mirroring the monitor's named-parameter lookup
/// service.
pub struct MonitorParams {
    document: toml::Value,
}

impl MonitorParams {
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::ValidationError(format!("could not read configuration file: {e}"))
        })?;
        let document: toml::Value = toml::from_str(&text).map_err(|e| {
            ConfigError::ValidationError(format!("could not parse configuration file: {e}"))
        })?;
        Ok(Self { document })
    }

    fn group(&self, group: &str) -> Result<&toml::value::Table, ConfigError> {
        self.document
            .get(group)
            .and_then(toml::Value::as_table)
            .ok_or_else(|| ConfigError::GroupMissing(group.to_string()))
    }

    /// Fetch `group.param` as a string. Returns `GroupMissing`,
    /// `ParameterMissing`, or `WrongType` as appropriate.
    pub fn get_string(&self, group: &str, param: &str) -> Result<String, ConfigError> {
        let table = self.group(group)?;
        let value = table
            .get(param)
            .ok_or_else(|| ConfigError::ParameterMissing {
                group: group.to_string(),
                param: param.to_string(),
            })?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or(ConfigError::WrongType {
                group: group.to_string(),
                param: param.to_string(),
                expected: "string",
            })
    }

    /// Fetch `group.param` as an integer.
    pub fn get_int(&self, group: &str, param: &str) -> Result<i64, ConfigError> {
        let table = self.group(group)?;
        let value = table
            .get(param)
            .ok_or_else(|| ConfigError::ParameterMissing {
                group: group.to_string(),
                param: param.to_string(),
            })?;
        value.as_integer().ok_or(ConfigError::WrongType {
            group: group.to_string(),
            param: param.to_string(),
            expected: "integer",
        })
    }

    /// Fetch `group.param` as a float.
    pub fn get_float(&self, group: &str, param: &str) -> Result<f64, ConfigError> {
        let table = self.group(group)?;
        let value = table
            .get(param)
            .ok_or_else(|| ConfigError::ParameterMissing {
                group: group.to_string(),
                param: param.to_string(),
            })?;
        value.as_float().ok_or(ConfigError::WrongType {
            group: group.to_string(),
            param: param.to_string(),
            expected: "float",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            general: GeneralConfig {
                speed_report_interval: 100,
                num_frames_in_event_to_process: None,
                frame_indexes_to_skip: vec![],
                hit_frame_sending_interval: Some(10),
                non_hit_frame_sending_interval: None,
                broadcast_ip: None,
                broadcast_port: 12321,
            },
            onda: OndaConfig {
                data_retrieval_layer: "mock".into(),
                required_data: vec!["detector_data".into(), "timestamp".into()],
                processing_layer: "crystallography".into(),
            },
            correction: CorrectionConfig::default(),
            peakfinder8_peak_detection: Peakfinder8Config {
                max_num_peaks: 2048,
                asic_nx: 194,
                asic_ny: 185,
                nasics_x: 8,
                nasics_y: 8,
                adc_threshold: 200.0,
                minimum_snr: 4.0,
                min_pixel_count: 2,
                max_pixel_count: 50,
                local_bg_radius: 4,
                min_res: 0,
                max_res: 1200,
                bad_pixel_map_filename: "mask.h5".into(),
                bad_pixel_map_hdf5_path: "/data/mask".into(),
            },
            crystallography: CrystallographyConfig {
                geometry_file: "geom.geom".into(),
                max_saturated_peaks: 10,
                min_num_peaks_for_hit: 5,
                max_num_peaks_for_hit: 5000,
                saturation_value: 10000.0,
                geometry_is_optimized: true,
                running_average_window_size: 100,
            },
            data_accumulator: DataAccumulatorConfig {
                num_events_to_accumulate: 10,
            },
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_correction_pair_mismatch_rejected() {
        let mut config = valid_config();
        config.correction.dark_filename = Some("dark.h5".into());
        config.correction.dark_hdf5_path = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dark_filename"));
    }

    #[test]
    fn test_zero_hit_interval_rejected() {
        let mut config = valid_config();
        config.general.hit_frame_sending_interval = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_min_peaks_must_be_less_than_max() {
        let mut config = valid_config();
        config.crystallography.min_num_peaks_for_hit = 5000;
        config.crystallography.max_num_peaks_for_hit = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_monitor_params_distinguishes_error_kinds() {
        let params = MonitorParams {
            document: toml::from_str(
                r#"
                [General]
                speed_report_interval = 100
                broadcast_port = "not-a-number"
                "#,
            )
            .unwrap(),
        };

        assert!(matches!(
            params.get_int("Missing", "x"),
            Err(ConfigError::GroupMissing(_))
        ));
        assert!(matches!(
            params.get_int("General", "nope"),
            Err(ConfigError::ParameterMissing { .. })
        ));
        assert!(matches!(
            params.get_int("General", "broadcast_port"),
            Err(ConfigError::WrongType { .. })
        ));
        assert_eq!(
            params.get_int("General", "speed_report_interval").unwrap(),
            100
        );
    }
}
