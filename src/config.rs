//! Per-call extraction request: algorithm choice, its tuning, target size

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::strategy::{
    CentroidConfig, DensityConfig, MedianCutConfig, PaletteStrategy, WeightedConfig,
};
use crate::{PaletteError, Result};

/// Largest palette a request may ask for.
pub const MAX_TARGET_COLORS: usize = 64;
pub const DEFAULT_TARGET_COLORS: usize = 5;

/// Which strategy runs, carrying its tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Algorithm {
    Density(DensityConfig),
    MedianCut(MedianCutConfig),
    Weighted(WeightedConfig),
    Centroid(CentroidConfig),
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Density(DensityConfig::default())
    }
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        self.strategy().name()
    }

    pub fn strategy(&self) -> &dyn PaletteStrategy {
        match self {
            Algorithm::Density(config) => config,
            Algorithm::MedianCut(config) => config,
            Algorithm::Weighted(config) => config,
            Algorithm::Centroid(config) => config,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Algorithm::Density(config) => config.validate(),
            Algorithm::MedianCut(config) => config.validate(),
            Algorithm::Weighted(config) => config.validate(),
            Algorithm::Centroid(config) => config.validate(),
        }
    }
}

impl FromStr for Algorithm {
    type Err = PaletteError;

    /// Parse an algorithm name into its default configuration.
    fn from_str(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "density" | "dbscan" => Ok(Algorithm::Density(DensityConfig::default())),
            "median-cut" | "median_cut" | "mmcq" => {
                Ok(Algorithm::MedianCut(MedianCutConfig::default()))
            }
            "weighted" | "simple" => Ok(Algorithm::Weighted(WeightedConfig::default())),
            "centroid" | "kmeans" | "k-means" => Ok(Algorithm::Centroid(CentroidConfig::default())),
            _ => Err(PaletteError::invalid_parameter("algorithm", name)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaletteRequest {
    pub algorithm: Algorithm,
    pub target_colors: usize,
}

impl Default for PaletteRequest {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            target_colors: DEFAULT_TARGET_COLORS,
        }
    }
}

impl PaletteRequest {
    pub fn new(algorithm: Algorithm, target_colors: usize) -> Self {
        Self {
            algorithm,
            target_colors,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_colors == 0 || self.target_colors > MAX_TARGET_COLORS {
            return Err(PaletteError::invalid_parameter(
                "target_colors",
                self.target_colors,
            ));
        }
        self.algorithm.validate()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
