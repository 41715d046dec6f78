use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::normalize::{BaselineParams, DEFAULT_EDGE_TRIM, DEFAULT_N_REMOVE};
use crate::sync::{BufferRate, SyncConfig};
use crate::trim::DEFAULT_SETTLE_SECONDS;
use crate::types::PhotometryError;

/// Every tunable of the session pipeline.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub stores: StoresConfig,
    pub decimation: DecimationConfig,
    pub trim: TrimConfig,
    pub normalization: NormalizationConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StoresConfig {
    /// Isosbestic reference stream
    pub channel_a: String,
    /// Calcium-dependent signal stream
    pub channel_b: String,
    /// Camera epoc store; `None` for sessions without video
    pub camera: Option<String>,
}

impl Default for StoresConfig {
    fn default() -> Self {
        StoresConfig {
            channel_a: "_405A".to_string(),
            channel_b: "_465A".to_string(),
            camera: Some("Cam1".to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DecimationConfig {
    pub enabled: bool,
    pub factor: usize,
}

impl Default for DecimationConfig {
    fn default() -> Self {
        DecimationConfig {
            enabled: true,
            factor: 10,
        }
    }
}

impl DecimationConfig {
    /// Factor actually applied; 1 when decimation is off.
    pub fn effective_factor(&self) -> usize {
        if self.enabled {
            self.factor
        } else {
            1
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TrimConfig {
    pub enabled: bool,
    /// Store whose onsets mark the LEDs switching on
    pub event_store: String,
    pub settle_seconds: f64,
}

impl Default for TrimConfig {
    fn default() -> Self {
        TrimConfig {
            enabled: false,
            event_store: "Fi1i".to_string(),
            settle_seconds: DEFAULT_SETTLE_SECONDS,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct NormalizationConfig {
    pub n_remove: usize,
    pub edge_trim: usize,
    pub lambda: f64,
    pub max_iterations: usize,
    pub lasso_alpha: f64,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        let baseline = BaselineParams::default();
        NormalizationConfig {
            n_remove: DEFAULT_N_REMOVE,
            edge_trim: DEFAULT_EDGE_TRIM,
            lambda: baseline.lambda,
            max_iterations: baseline.max_iterations,
            lasso_alpha: baseline.lasso_alpha,
        }
    }
}

impl NormalizationConfig {
    pub fn baseline_params(&self) -> BaselineParams {
        BaselineParams {
            lambda: self.lambda,
            max_iterations: self.max_iterations,
            lasso_alpha: self.lasso_alpha,
        }
    }
}

impl PipelineConfig {
    /// Rejects parameter values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), PhotometryError> {
        let invalid = |msg: String| Err(PhotometryError::Config(msg));

        if self.decimation.enabled && self.decimation.factor == 0 {
            return invalid("decimation factor must be at least 1".to_string());
        }
        if !(self.trim.settle_seconds.is_finite() && self.trim.settle_seconds >= 0.0) {
            return invalid(format!(
                "settle time must be non-negative, got {}",
                self.trim.settle_seconds
            ));
        }
        if !(self.normalization.lambda.is_finite() && self.normalization.lambda > 0.0) {
            return invalid(format!(
                "baseline lambda must be positive, got {}",
                self.normalization.lambda
            ));
        }
        if !(self.normalization.lasso_alpha.is_finite() && self.normalization.lasso_alpha >= 0.0) {
            return invalid(format!(
                "lasso alpha must be non-negative, got {}",
                self.normalization.lasso_alpha
            ));
        }
        if !(self.sync.lookback_seconds.is_finite() && self.sync.lookback_seconds >= 0.0) {
            return invalid(format!(
                "look-back must be non-negative, got {}",
                self.sync.lookback_seconds
            ));
        }
        if let BufferRate::Assumed(rate) = self.sync.buffer_rate {
            if !(rate.is_finite() && rate > 0.0) {
                return invalid(format!("assumed buffer rate must be positive, got {}", rate));
            }
        }
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig, PhotometryError> {
    let config_str = fs::read_to_string(path)?;

    let config: PipelineConfig = serde_yaml::from_str(&config_str)
        .map_err(|e| PhotometryError::Config(format!("failed to parse config file: {}", e)))?;
    config.validate()?;
    Ok(config)
}

pub fn save_config<P: AsRef<Path>>(config: &PipelineConfig, path: P) -> Result<(), PhotometryError> {
    let yaml = serde_yaml::to_string(config)
        .map_err(|e| PhotometryError::Config(format!("failed to serialize config: {}", e)))?;

    fs::write(path, yaml)?;
    Ok(())
}
