//! Adaptive (percentile) and fixed thresholding of change rasters

use crate::config::{FloodConfig, ThresholdMode};
use crate::types::{
    BinaryMask, FloodError, FloodReal, FloodResult, Raster, Region, MASK_DETECTED, MASK_NODATA,
};
use ndarray::Zip;

/// Resolved threshold source for one change raster
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdSpec {
    /// p-th percentile over the region, p in [0, 100]
    Percentile(f64),
    Fixed(FloodReal),
}

impl ThresholdSpec {
    pub fn from_config(config: &FloodConfig) -> FloodResult<Self> {
        match config.threshold_mode {
            ThresholdMode::Percentile => Ok(ThresholdSpec::Percentile(config.percentile)),
            ThresholdMode::Fixed => config
                .diff_threshold_fixed
                .map(ThresholdSpec::Fixed)
                .ok_or_else(|| {
                    FloodError::InvalidInput(
                        "Fixed threshold mode requires diff_threshold_fixed".to_string(),
                    )
                }),
        }
    }
}

/// Detection mask and the threshold that produced it
#[derive(Debug, Clone)]
pub struct ThresholdOutcome {
    pub mask: BinaryMask,
    pub threshold: FloodReal,
}

/// Finite samples of the first band whose pixel centres lie in `region`
pub fn region_values(raster: &Raster, region: &Region) -> Vec<FloodReal> {
    let coverage = region.coverage(&raster.geo_transform, raster.shape());
    raster
        .data()
        .iter()
        .zip(coverage.iter())
        .filter(|&(v, &inside)| inside && v.is_finite())
        .map(|(&v, _)| v)
        .collect()
}

/// Linear interpolation between closest ranks of sorted values
fn percentile_of_sorted(sorted: &[FloodReal], percentile: f64) -> FloodReal {
    let rank = percentile / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    let (lo, hi) = (sorted[lower] as f64, sorted[upper] as f64);
    (lo + (hi - lo) * fraction) as FloodReal
}

fn check_percentile(percentile: f64) -> FloodResult<()> {
    if !(0.0..=100.0).contains(&percentile) {
        return Err(FloodError::InvalidInput(format!(
            "Percentile must be within [0, 100], got {}",
            percentile
        )));
    }
    Ok(())
}

/// p-th percentile of the valid pixels of `raster` within `region`
pub fn percentile_value(raster: &Raster, region: &Region, percentile: f64) -> FloodResult<FloodReal> {
    check_percentile(percentile)?;

    let mut values = region_values(raster, region);
    if values.is_empty() {
        return Err(FloodError::EmptyResult(
            "No valid pixels inside the region for percentile reduction".to_string(),
        ));
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let value = percentile_of_sorted(&values, percentile);
    log::debug!(
        "Percentile {} of {} valid pixels: {:.6}",
        percentile,
        values.len(),
        value
    );
    Ok(value)
}

/// Several percentiles from one sort; results follow the order of `percentiles`
pub fn percentile_values(
    raster: &Raster,
    region: &Region,
    percentiles: &[f64],
) -> FloodResult<Vec<FloodReal>> {
    for &p in percentiles {
        check_percentile(p)?;
    }
    let mut values = region_values(raster, region);
    if values.is_empty() {
        return Err(FloodError::EmptyResult(
            "No valid pixels inside the region for percentile reduction".to_string(),
        ));
    }
    values.sort_by(|a, b| a.total_cmp(b));
    Ok(percentiles.iter().map(|&p| percentile_of_sorted(&values, p)).collect())
}

/// Self-masking comparison: detected where `change > threshold` inside the
/// region, masked-out everywhere else
pub fn apply_threshold(change: &Raster, region: &Region, threshold: FloodReal) -> FloodResult<BinaryMask> {
    if !threshold.is_finite() {
        return Err(FloodError::InvalidInput(format!("Threshold must be finite, got {}", threshold)));
    }
    let coverage = region.coverage(&change.geo_transform, change.shape());
    let data = Zip::from(change.data()).and(&coverage).map_collect(|&v, &inside| {
        if inside && v.is_finite() && v > threshold {
            MASK_DETECTED
        } else {
            MASK_NODATA
        }
    });
    BinaryMask::from_raster(change, data)
}

/// Threshold a change raster, self-masked
pub fn threshold_mask(change: &Raster, region: &Region, spec: ThresholdSpec) -> FloodResult<ThresholdOutcome> {
    let threshold = match spec {
        ThresholdSpec::Percentile(p) => percentile_value(change, region, p)?,
        ThresholdSpec::Fixed(t) => t,
    };
    let mask = apply_threshold(change, region, threshold)?;
    log::info!(
        "Threshold {:?} -> {:.4}: {} pixels detected",
        spec,
        threshold,
        mask.detected_count()
    );
    Ok(ThresholdOutcome { mask, threshold })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn full_region(raster: &Raster) -> Region {
        Region::covering(raster).unwrap()
    }

    #[test]
    fn test_percentile_interpolates() {
        let raster = Raster::from_array("ratio", array![[1.0, 2.0, 3.0, 4.0, 5.0]], 10.0);
        let region = full_region(&raster);
        assert_eq!(percentile_value(&raster, &region, 0.0).unwrap(), 1.0);
        assert_eq!(percentile_value(&raster, &region, 50.0).unwrap(), 3.0);
        assert_eq!(percentile_value(&raster, &region, 100.0).unwrap(), 5.0);
        assert!((percentile_value(&raster, &region, 90.0).unwrap() - 4.6).abs() < 1e-6);
    }

    #[test]
    fn test_percentile_ignores_nodata_and_outside_pixels() {
        let raster = Raster::from_array("ratio", array![[f32::NAN, 2.0, 100.0]], 10.0);
        // only the first two columns
        let region = Region::from_bbox(0.0, 0.0, 20.0, 10.0).unwrap();
        assert_eq!(percentile_value(&raster, &region, 100.0).unwrap(), 2.0);
    }

    #[test]
    fn test_percentile_out_of_range() {
        let raster = Raster::from_array("ratio", Array2::ones((2, 2)), 10.0);
        let region = full_region(&raster);
        assert!(matches!(
            percentile_value(&raster, &region, 100.5),
            Err(FloodError::InvalidInput(_))
        ));
        assert!(matches!(
            percentile_value(&raster, &region, -1.0),
            Err(FloodError::InvalidInput(_))
        ));
        assert!(matches!(
            percentile_value(&raster, &region, f64::NAN),
            Err(FloodError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_region_without_valid_pixels_is_empty_result() {
        let raster = Raster::from_array("ratio", Array2::from_elem((2, 2), f32::NAN), 10.0);
        let region = full_region(&raster);
        assert!(matches!(
            percentile_value(&raster, &region, 90.0),
            Err(FloodError::EmptyResult(_))
        ));

        let valid = Raster::from_array("ratio", Array2::ones((2, 2)), 10.0);
        let elsewhere = Region::from_bbox(1000.0, 1000.0, 2000.0, 2000.0).unwrap();
        assert!(matches!(
            percentile_value(&valid, &elsewhere, 90.0),
            Err(FloodError::EmptyResult(_))
        ));
    }

    #[test]
    fn test_threshold_mask_is_self_masked() {
        let raster = Raster::from_array("ratio", array![[1.0, 1.0, 3.0, f32::NAN]], 10.0);
        let region = full_region(&raster);
        let outcome = threshold_mask(&raster, &region, ThresholdSpec::Fixed(2.0)).unwrap();
        assert_eq!(
            outcome.mask.data.as_slice().unwrap(),
            &[MASK_NODATA, MASK_NODATA, MASK_DETECTED, MASK_NODATA]
        );
        assert_eq!(outcome.threshold, 2.0);
    }

    #[test]
    fn test_percentile_values_batch() {
        let raster = Raster::from_array("ratio", array![[4.0, 1.0, 3.0, 2.0, 5.0]], 10.0);
        let region = full_region(&raster);
        let values = percentile_values(&raster, &region, &[10.0, 50.0, 90.0]).unwrap();
        assert_eq!(values[1], 3.0);
        assert!(values[0] <= values[1] && values[1] <= values[2]);
    }
}
