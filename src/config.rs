//! Flood mapping configuration
//!
//! A single explicit configuration threaded through every pipeline stage.
//! Defaults are the constants of the Sentinel-1 / Sentinel-2 change
//! detection flood workflow.

use crate::core::fusion::FusionExpr;
use crate::core::speckle_filter::SpeckleFilterType;
use crate::types::{FloodError, FloodResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the change raster is turned into a detection mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// Percentile of the change distribution over the region
    Percentile,
    /// Legacy fixed threshold (`diff_threshold_fixed`)
    Fixed,
}

/// Pixel adjacency used for connected-component labelling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Four,
    Eight,
}

/// Radiometric domain of the SAR input rasters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackscatterDomain {
    Db,
    Linear,
}

/// What `to_db` does with zero or negative linear samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbConversionPolicy {
    /// Emit no-data (`NaN`)
    NoData,
    /// Emit a fixed floor value in dB
    Clamp { floor_db: f32 },
}

impl Default for DbConversionPolicy {
    fn default() -> Self {
        DbConversionPolicy::NoData
    }
}

/// Band names of the optical scenes used for the water index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticalBands {
    pub green: String,
    pub nir: String,
}

impl Default for OpticalBands {
    fn default() -> Self {
        Self {
            green: "B3".to_string(),
            nir: "B8".to_string(),
        }
    }
}

/// Speckle filtering applied to SAR composites before change detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeckleConfig {
    pub enabled: bool,
    pub filter_type: SpeckleFilterType,
    /// Filter window size (odd, 3 to 7)
    pub window_size: usize,
    pub num_looks: f32,
}

impl Default for SpeckleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filter_type: SpeckleFilterType::RefinedLee,
            window_size: 7,
            num_looks: 1.0,
        }
    }
}

/// Independently switchable post-processing stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessingConfig {
    pub permanent_water: bool,
    pub slope: bool,
    pub connectivity: bool,
}

impl Default for PostProcessingConfig {
    fn default() -> Self {
        Self {
            permanent_water: true,
            slope: true,
            connectivity: true,
        }
    }
}

impl PostProcessingConfig {
    pub fn disabled() -> Self {
        Self {
            permanent_water: false,
            slope: false,
            connectivity: false,
        }
    }
}

/// Inclusive start, exclusive end
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Acquisition periods the before/after composites were built from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionWindows {
    pub before: DateRange,
    pub after: DateRange,
}

impl AcquisitionWindows {
    pub fn validate(&self) -> FloodResult<()> {
        for (label, range) in [("before", &self.before), ("after", &self.after)] {
            if range.start >= range.end {
                return Err(FloodError::InvalidInput(format!(
                    "{} window starts on {} but ends on {}",
                    label, range.start, range.end
                )));
            }
        }
        if self.before.end > self.after.start {
            return Err(FloodError::InvalidInput(format!(
                "before window ends {} after the after window starts {}",
                self.before.end, self.after.start
            )));
        }
        Ok(())
    }
}

/// Complete flood mapping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodConfig {
    pub threshold_mode: ThresholdMode,
    /// Percentile of the change distribution (0 to 100)
    pub percentile: f64,
    /// Fixed change threshold for `ThresholdMode::Fixed`
    pub diff_threshold_fixed: Option<f32>,
    pub slope_threshold_deg: f32,
    pub min_connected_pixels: usize,
    /// Upper bound on the connected pixel count (search window, pixels)
    pub connectivity_window: usize,
    pub connectivity: Connectivity,
    /// Occurrence (%) above which a pixel counts as permanent water
    pub permanent_water_occurrence_pct: f32,
    /// Analysis resolution in metres
    pub resolution_meters: f64,
    /// Divisor from square metres to the reported unit (10 000 = hectares)
    pub area_unit_divisor: f64,
    pub sar_band: String,
    pub input_domain: BackscatterDomain,
    pub optical_bands: OpticalBands,
    pub speckle: SpeckleConfig,
    pub db_policy: DbConversionPolicy,
    pub fusion: FusionExpr,
    pub post_processing: PostProcessingConfig,
    /// No-data fraction above which a composite is reported as degraded
    pub max_nodata_fraction: f64,
    pub acquisition: Option<AcquisitionWindows>,
    pub export_epsg: u32,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            threshold_mode: ThresholdMode::Percentile,
            percentile: 90.0,
            diff_threshold_fixed: None,
            slope_threshold_deg: 5.0,
            min_connected_pixels: 2,
            connectivity_window: 25,
            connectivity: Connectivity::Eight,
            permanent_water_occurrence_pct: 5.0,
            resolution_meters: 10.0,
            area_unit_divisor: 10_000.0,
            sar_band: "VH".to_string(),
            input_domain: BackscatterDomain::Db,
            optical_bands: OpticalBands::default(),
            speckle: SpeckleConfig::default(),
            db_policy: DbConversionPolicy::default(),
            fusion: FusionExpr::consensus(),
            post_processing: PostProcessingConfig::default(),
            max_nodata_fraction: 0.2,
            acquisition: None,
            export_epsg: 4326,
        }
    }
}

impl FloodConfig {
    pub fn from_json_str(json: &str) -> FloodResult<Self> {
        let config: FloodConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> FloodResult<Self> {
        log::info!("Loading flood configuration from: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn to_json_string(&self) -> FloodResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject parameter combinations no stage can honour
    pub fn validate(&self) -> FloodResult<()> {
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(FloodError::InvalidInput(format!(
                "Percentile must be within [0, 100], got {}",
                self.percentile
            )));
        }
        if self.threshold_mode == ThresholdMode::Fixed {
            match self.diff_threshold_fixed {
                Some(t) if t.is_finite() => {}
                Some(t) => {
                    return Err(FloodError::InvalidInput(format!(
                        "Fixed threshold must be finite, got {}",
                        t
                    )))
                }
                None => {
                    return Err(FloodError::InvalidInput(
                        "Fixed threshold mode requires diff_threshold_fixed".to_string(),
                    ))
                }
            }
        }
        if !self.slope_threshold_deg.is_finite() || self.slope_threshold_deg < 0.0 {
            return Err(FloodError::InvalidInput(format!(
                "Slope threshold must be a non-negative angle, got {}",
                self.slope_threshold_deg
            )));
        }
        if self.connectivity_window == 0 {
            return Err(FloodError::InvalidInput("Connectivity window must be positive".to_string()));
        }
        if self.min_connected_pixels > self.connectivity_window {
            return Err(FloodError::InvalidInput(format!(
                "min_connected_pixels ({}) exceeds connectivity_window ({})",
                self.min_connected_pixels, self.connectivity_window
            )));
        }
        if !self.permanent_water_occurrence_pct.is_finite() {
            return Err(FloodError::InvalidInput("Permanent water threshold must be finite".to_string()));
        }
        if !(self.resolution_meters > 0.0) {
            return Err(FloodError::InvalidInput(format!(
                "Analysis resolution must be positive, got {}",
                self.resolution_meters
            )));
        }
        if !(self.area_unit_divisor > 0.0) {
            return Err(FloodError::InvalidInput(format!(
                "Area unit divisor must be positive, got {}",
                self.area_unit_divisor
            )));
        }
        if !(0.0..=1.0).contains(&self.max_nodata_fraction) {
            return Err(FloodError::InvalidInput(format!(
                "max_nodata_fraction must be within [0, 1], got {}",
                self.max_nodata_fraction
            )));
        }
        if self.speckle.enabled {
            let w = self.speckle.window_size;
            if w % 2 == 0 || !(3..=7).contains(&w) {
                return Err(FloodError::InvalidInput(format!(
                    "Speckle window must be odd and within 3..=7, got {}",
                    w
                )));
            }
            if !(self.speckle.num_looks > 0.0) {
                return Err(FloodError::InvalidInput("Number of looks must be positive".to_string()));
            }
        }
        if let Some(windows) = &self.acquisition {
            windows.validate()?;
        }
        Ok(())
    }
}
