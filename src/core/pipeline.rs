//! End-to-end flood detection
//!
//! One pipeline driven by a single [`FloodConfig`]:
//! radiometric conversion, clip and multilook in linear intensity, quality
//! check, speckle filtering, change detection, thresholding, fusion, post-processing and
//! area reduction. Every intermediate mask is kept for diagnostics.

use crate::config::{BackscatterDomain, FloodConfig};
use crate::core::area::{flooded_area, FloodEstimate};
use crate::core::change_detection::{optical_water_change, sar_change};
use crate::core::fusion;
use crate::core::multilook::{MultilookParams, MultilookProcessor};
use crate::core::post_process::{PostProcessReport, PostProcessor, Terrain};
use crate::core::quality::QualityReport;
use crate::core::radiometric::to_linear;
use crate::core::speckle_filter::{SpeckleFilter, SpeckleFilterParams};
use crate::core::threshold::{threshold_mask, ThresholdSpec};
use crate::types::{BinaryMask, FloodReal, FloodResult, Raster, Region};
use std::time::Instant;

/// Everything a run consumes, already loaded in memory
#[derive(Debug, Clone)]
pub struct FloodInputs {
    /// Pre-event SAR composite containing the configured SAR band
    pub sar_before: Raster,
    /// Post-event SAR composite on the same grid
    pub sar_after: Raster,
    /// Pre-event optical scenes (green and NIR bands), oldest first
    pub optical_before: Vec<Raster>,
    pub optical_after: Vec<Raster>,
    pub terrain: Option<Terrain>,
    /// Surface-water occurrence in percent
    pub permanent_water: Option<Raster>,
    pub region: Region,
}

impl FloodInputs {
    pub fn new(sar_before: Raster, sar_after: Raster, region: Region) -> Self {
        Self {
            sar_before,
            sar_after,
            optical_before: Vec::new(),
            optical_after: Vec::new(),
            terrain: None,
            permanent_water: None,
            region,
        }
    }

    pub fn with_optical(mut self, before: Vec<Raster>, after: Vec<Raster>) -> Self {
        self.optical_before = before;
        self.optical_after = after;
        self
    }

    pub fn with_terrain(mut self, terrain: Terrain) -> Self {
        self.terrain = Some(terrain);
        self
    }

    pub fn with_permanent_water(mut self, occurrence: Raster) -> Self {
        self.permanent_water = Some(occurrence);
        self
    }

    pub fn has_optical(&self) -> bool {
        !self.optical_before.is_empty() || !self.optical_after.is_empty()
    }
}

/// Result of one run
#[derive(Debug, Clone)]
pub struct FloodDetection {
    /// Fused and post-processed flood mask
    pub final_mask: BinaryMask,
    /// Pre-event SAR band in linear intensity, clipped and on the analysis grid
    pub sar_before: Raster,
    pub sar_after: Raster,
    /// SAR change ratio `after / before` at the analysis resolution
    pub sar_change: Raster,
    pub sar_mask: BinaryMask,
    pub sar_threshold: FloodReal,
    /// NDWI change ratio, when optical scenes were supplied
    pub optical_change: Option<Raster>,
    pub optical_mask: Option<BinaryMask>,
    pub optical_threshold: Option<FloodReal>,
    pub intersection: Option<BinaryMask>,
    pub union: Option<BinaryMask>,
    /// Fused mask before post-processing
    pub fused_mask: BinaryMask,
    pub post_process: PostProcessReport,
    pub quality: QualityReport,
    pub estimate: FloodEstimate,
}

/// Grid preparation shared by every input: clip to the region, then
/// block-average to the analysis resolution
struct GridPreparation<'a> {
    region: &'a Region,
    multilook: MultilookProcessor,
}

impl GridPreparation<'_> {
    fn apply(&self, raster: &Raster) -> FloodResult<Raster> {
        self.multilook.apply_to_raster(&raster.clip(self.region))
    }

    /// Ancillary layers are resampled but not clipped
    fn resample(&self, raster: &Raster) -> FloodResult<Raster> {
        self.multilook.apply_to_raster(raster)
    }
}

pub struct FloodPipeline {
    config: FloodConfig,
}

impl FloodPipeline {
    pub fn new(config: FloodConfig) -> FloodResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FloodConfig {
        &self.config
    }

    pub fn run(&self, inputs: &FloodInputs) -> FloodResult<FloodDetection> {
        let start_time = Instant::now();
        let config = &self.config;
        log::info!("Starting flood detection (fusion: {})", config.fusion);

        inputs.sar_before.ensure_aligned(&inputs.sar_after)?;
        let sar_before = inputs.sar_before.select(&config.sar_band)?;
        let sar_after = inputs.sar_after.select(&config.sar_band)?;

        // Multilook averages linear intensity, never dB
        let (sar_before, sar_after) = match config.input_domain {
            BackscatterDomain::Db => (to_linear(&sar_before)?, to_linear(&sar_after)?),
            BackscatterDomain::Linear => (sar_before, sar_after),
        };

        let looks = MultilookParams::for_resolution(sar_after.pixel_spacing_m(), config.resolution_meters);
        log::debug!("Analysis grid: {}x{} looks", looks.row_looks, looks.col_looks);
        let grid = GridPreparation {
            region: &inputs.region,
            multilook: MultilookProcessor::new(looks),
        };
        let sar_before = grid.apply(&sar_before)?;
        let sar_after = grid.apply(&sar_after)?;

        let mut quality = QualityReport::new(config.max_nodata_fraction);
        quality.assess("sar_before", &sar_before, &inputs.region)?;
        quality.assess("sar_after", &sar_after, &inputs.region)?;

        // Step 1: SAR change
        let (filtered_before, filtered_after) = if config.speckle.enabled {
            let filter = SpeckleFilter::with_params(SpeckleFilterParams {
                window_size: config.speckle.window_size,
                num_looks: config.speckle.num_looks,
                ..SpeckleFilterParams::default()
            });
            let filter_type = config.speckle.filter_type;
            #[cfg(feature = "parallel")]
            let (before, after) = rayon::join(
                || filter.apply_to_raster(&sar_before, filter_type),
                || filter.apply_to_raster(&sar_after, filter_type),
            );
            #[cfg(not(feature = "parallel"))]
            let (before, after) = (
                filter.apply_to_raster(&sar_before, filter_type),
                filter.apply_to_raster(&sar_after, filter_type),
            );
            (before?, after?)
        } else {
            (sar_before.clone(), sar_after.clone())
        };
        let sar_change = sar_change(&filtered_before, &filtered_after, &config.sar_band)?;

        // Step 2: thresholds
        let spec = ThresholdSpec::from_config(config)?;
        let sar = threshold_mask(&sar_change, &inputs.region, spec)?;

        let optical = if inputs.has_optical() {
            let before = inputs
                .optical_before
                .iter()
                .map(|scene| grid.apply(scene))
                .collect::<FloodResult<Vec<_>>>()?;
            let after = inputs
                .optical_after
                .iter()
                .map(|scene| grid.apply(scene))
                .collect::<FloodResult<Vec<_>>>()?;
            let change = optical_water_change(&before, &after, &config.optical_bands)?;
            change.ensure_aligned(&sar_change)?;
            quality.assess("optical_change", &change, &inputs.region)?;
            let outcome = threshold_mask(&change, &inputs.region, spec)?;
            Some((change, outcome))
        } else {
            None
        };

        // Step 3: fusion
        let optical_mask = optical.as_ref().map(|(_, outcome)| &outcome.mask);
        let (intersection, union) = match optical_mask {
            Some(optical_mask) => (
                Some(fusion::intersection(&sar.mask, optical_mask)?),
                Some(fusion::union(&sar.mask, optical_mask)?),
            ),
            None => (None, None),
        };
        let fused_mask = config.fusion.evaluate(&sar.mask, optical_mask)?;

        // Step 4: post-processing
        let occurrence = inputs
            .permanent_water
            .as_ref()
            .map(|r| grid.resample(r))
            .transpose()?;
        let terrain = match &inputs.terrain {
            Some(Terrain::Elevation(dem)) => Some(Terrain::Elevation(grid.resample(dem)?)),
            Some(Terrain::SlopeDegrees(slope)) => Some(Terrain::SlopeDegrees(grid.resample(slope)?)),
            None => None,
        };
        let (final_mask, post_process) =
            PostProcessor::from_config(config).apply(&fused_mask, occurrence.as_ref(), terrain.as_ref())?;

        // Step 5: area
        let estimate = flooded_area(&final_mask, &inputs.region, config.area_unit_divisor)?;

        log::info!(
            "Flood detection completed in {:.2?}: {} pixels, area {:.4}",
            start_time.elapsed(),
            estimate.pixel_count,
            estimate.area
        );

        let (optical_change, optical_outcome) = match optical {
            Some((change, outcome)) => (Some(change), Some(outcome)),
            None => (None, None),
        };
        Ok(FloodDetection {
            final_mask,
            sar_before,
            sar_after,
            sar_change,
            sar_mask: sar.mask,
            sar_threshold: sar.threshold,
            optical_threshold: optical_outcome.as_ref().map(|o| o.threshold),
            optical_mask: optical_outcome.map(|o| o.mask),
            optical_change,
            intersection,
            union,
            fused_mask,
            post_process,
            quality,
            estimate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PostProcessingConfig;
    use crate::core::fusion::FusionExpr;
    use ndarray::Array2;

    fn linear_config() -> FloodConfig {
        let mut config = FloodConfig::default();
        config.input_domain = BackscatterDomain::Linear;
        config.speckle.enabled = false;
        config.fusion = FusionExpr::sar_only();
        config.post_processing = PostProcessingConfig::disabled();
        config
    }

    fn block_inputs() -> FloodInputs {
        let before = Raster::from_array("VH", Array2::ones((10, 10)), 10.0);
        let mut after = Array2::ones((10, 10));
        after.slice_mut(ndarray::s![3..6, 3..6]).fill(3.0);
        let after = before.with_data("VH", after);
        let region = Region::covering(&before).unwrap();
        FloodInputs::new(before, after, region)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = FloodConfig::default();
        config.percentile = 150.0;
        assert!(FloodPipeline::new(config).is_err());
    }

    #[test]
    fn test_sar_only_block() {
        let pipeline = FloodPipeline::new(linear_config()).unwrap();
        let detection = pipeline.run(&block_inputs()).unwrap();
        assert_eq!(detection.sar_threshold, 1.0);
        assert_eq!(detection.final_mask.detected_count(), 9);
        assert!(detection.optical_mask.is_none());
        assert!(detection.intersection.is_none());
        assert!(!detection.quality.degraded);
    }

    #[test]
    fn test_db_inputs_multilooked_as_intensity() {
        let mut config = linear_config();
        config.input_domain = BackscatterDomain::Db;
        let before = Raster::from_array("VH", ndarray::array![[0.0, 20.0], [0.0, 20.0]], 5.0);
        let after = before.with_data("VH", Array2::from_elem((2, 2), 10.0));
        let region = Region::covering(&before).unwrap();
        let detection = FloodPipeline::new(config)
            .unwrap()
            .run(&FloodInputs::new(before, after, region))
            .unwrap();
        assert_eq!(detection.sar_before.shape(), (1, 1));
        // mean of 1 and 100, not 10^(mean dB / 10)
        assert!((detection.sar_before.data()[[0, 0]] - 50.5).abs() < 1e-3);
        assert!((detection.sar_change.data()[[0, 0]] - 10.0 / 50.5).abs() < 1e-4);
    }

    #[test]
    fn test_optical_fusion_needs_scenes() {
        let mut config = linear_config();
        config.fusion = FusionExpr::consensus();
        let pipeline = FloodPipeline::new(config).unwrap();
        assert!(pipeline.run(&block_inputs()).is_err());
    }

    #[test]
    fn test_missing_sar_band_rejected() {
        let mut config = linear_config();
        config.sar_band = "VV".to_string();
        let pipeline = FloodPipeline::new(config).unwrap();
        assert!(pipeline.run(&block_inputs()).is_err());
    }
}
