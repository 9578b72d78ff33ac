//! False-positive removal for detection masks
//!
//! Every stage only turns detected pixels into masked-out pixels; no stage
//! ever adds a detection. Ancillary no-data leaves a detection untouched.

use crate::config::{Connectivity, FloodConfig};
use crate::core::terrain::slope_degrees;
use crate::types::{BinaryMask, FloodError, FloodReal, FloodResult, Raster, MASK_DETECTED, MASK_NODATA};
use ndarray::Array2;
use serde::Serialize;
use std::collections::VecDeque;

/// Terrain input for the slope stage
#[derive(Debug, Clone)]
pub enum Terrain {
    /// Elevation model in metres, slope is derived
    Elevation(Raster),
    /// Precomputed slope in degrees
    SlopeDegrees(Raster),
}

impl Terrain {
    pub fn slope(&self) -> FloodResult<Raster> {
        match self {
            Terrain::Elevation(dem) => slope_degrees(dem),
            Terrain::SlopeDegrees(slope) => Ok(slope.clone()),
        }
    }
}

/// Pixels removed by each post-processing stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostProcessReport {
    pub input_pixels: usize,
    pub permanent_water_removed: usize,
    pub slope_removed: usize,
    pub connectivity_removed: usize,
    pub output_pixels: usize,
}

/// Parameters of the post-processing chain
#[derive(Debug, Clone)]
pub struct PostProcessParams {
    pub permanent_water_occurrence_pct: FloodReal,
    pub slope_threshold_deg: FloodReal,
    pub min_connected_pixels: usize,
    pub connectivity_window: usize,
    pub connectivity: Connectivity,
}

impl Default for PostProcessParams {
    fn default() -> Self {
        Self::from(&FloodConfig::default())
    }
}

impl From<&FloodConfig> for PostProcessParams {
    fn from(config: &FloodConfig) -> Self {
        Self {
            permanent_water_occurrence_pct: config.permanent_water_occurrence_pct,
            slope_threshold_deg: config.slope_threshold_deg,
            min_connected_pixels: config.min_connected_pixels,
            connectivity_window: config.connectivity_window,
            connectivity: config.connectivity,
        }
    }
}

/// Mask out detections where `exclude(ancillary)` holds
fn exclude_where<F>(mask: &BinaryMask, ancillary: &Raster, exclude: F) -> FloodResult<BinaryMask>
where
    F: Fn(FloodReal) -> bool,
{
    mask.ensure_aligned_with(ancillary)?;
    let mut data = mask.data.clone();
    ndarray::Zip::from(&mut data).and(ancillary.data()).for_each(|m, &v| {
        if *m == MASK_DETECTED && !v.is_nan() && exclude(v) {
            *m = MASK_NODATA;
        }
    });
    Ok(mask.with_data(data))
}

/// Remove detections over permanent water (occurrence above `occurrence_pct`)
pub fn exclude_permanent_water(
    mask: &BinaryMask,
    occurrence: &Raster,
    occurrence_pct: FloodReal,
) -> FloodResult<BinaryMask> {
    exclude_where(mask, occurrence, |v| v > occurrence_pct)
}

/// Remove detections on terrain steeper than `max_slope_deg`
pub fn exclude_steep_slopes(
    mask: &BinaryMask,
    slope: &Raster,
    max_slope_deg: FloodReal,
) -> FloodResult<BinaryMask> {
    exclude_where(mask, slope, |v| v > max_slope_deg)
}

fn neighbour_offsets(connectivity: Connectivity) -> &'static [(isize, isize)] {
    match connectivity {
        Connectivity::Four => &[(-1, 0), (1, 0), (0, -1), (0, 1)],
        Connectivity::Eight => &[
            (-1, -1),
            (-1, 0),
            (-1, 1),
            (0, -1),
            (0, 1),
            (1, -1),
            (1, 0),
            (1, 1),
        ],
    }
}

/// Label connected regions of detected pixels (0 = background, labels from 1)
/// and return the labels with each component's size indexed by label
pub fn label_components(mask: &BinaryMask, connectivity: Connectivity) -> (Array2<u32>, Vec<usize>) {
    let (rows, cols) = mask.shape();
    let offsets = neighbour_offsets(connectivity);
    let mut labels = Array2::<u32>::zeros((rows, cols));
    let mut sizes = vec![0usize];
    let mut queue = VecDeque::new();

    for start_row in 0..rows {
        for start_col in 0..cols {
            if !mask.is_detected(start_row, start_col) || labels[[start_row, start_col]] != 0 {
                continue;
            }
            let label = sizes.len() as u32;
            let mut size = 0usize;
            labels[[start_row, start_col]] = label;
            queue.push_back((start_row, start_col));

            while let Some((r, c)) = queue.pop_front() {
                size += 1;
                for &(dr, dc) in offsets {
                    let nr = r as isize + dr;
                    let nc = c as isize + dc;
                    if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                        continue;
                    }
                    let (nr, nc) = (nr as usize, nc as usize);
                    if mask.is_detected(nr, nc) && labels[[nr, nc]] == 0 {
                        labels[[nr, nc]] = label;
                        queue.push_back((nr, nc));
                    }
                }
            }
            sizes.push(size);
        }
    }

    (labels, sizes)
}

/// Remove detections whose connected pixel count, capped at `window`, is
/// below `min_pixels`
pub fn filter_connected_components(
    mask: &BinaryMask,
    min_pixels: usize,
    window: usize,
    connectivity: Connectivity,
) -> BinaryMask {
    let (labels, sizes) = label_components(mask, connectivity);
    log::debug!(
        "Connected components: {} components, keeping counts >= {} (window {})",
        sizes.len() - 1,
        min_pixels,
        window
    );
    let mut data = mask.data.clone();
    ndarray::Zip::from(&mut data).and(&labels).for_each(|m, &label| {
        if label != 0 && sizes[label as usize].min(window) < min_pixels {
            *m = MASK_NODATA;
        }
    });
    mask.with_data(data)
}

/// Runs the enabled stages, cheapest first
pub struct PostProcessor {
    params: PostProcessParams,
    permanent_water: bool,
    slope: bool,
    connectivity: bool,
}

impl PostProcessor {
    /// All stages enabled with the given parameters
    pub fn new(params: PostProcessParams) -> Self {
        Self {
            params,
            permanent_water: true,
            slope: true,
            connectivity: true,
        }
    }

    pub fn from_config(config: &FloodConfig) -> Self {
        Self {
            params: PostProcessParams::from(config),
            permanent_water: config.post_processing.permanent_water,
            slope: config.post_processing.slope,
            connectivity: config.post_processing.connectivity,
        }
    }

    pub fn with_stages(mut self, permanent_water: bool, slope: bool, connectivity: bool) -> Self {
        self.permanent_water = permanent_water;
        self.slope = slope;
        self.connectivity = connectivity;
        self
    }

    pub fn apply(
        &self,
        mask: &BinaryMask,
        occurrence: Option<&Raster>,
        terrain: Option<&Terrain>,
    ) -> FloodResult<(BinaryMask, PostProcessReport)> {
        let mut report = PostProcessReport {
            input_pixels: mask.detected_count(),
            ..Default::default()
        };
        let mut current = mask.self_mask();

        if self.permanent_water {
            let occurrence = occurrence.ok_or_else(|| {
                FloodError::InvalidInput(
                    "Permanent water exclusion enabled but no occurrence raster supplied".to_string(),
                )
            })?;
            let before = current.detected_count();
            current = exclude_permanent_water(&current, occurrence, self.params.permanent_water_occurrence_pct)?;
            report.permanent_water_removed = before - current.detected_count();
        }

        if self.slope {
            let terrain = terrain.ok_or_else(|| {
                FloodError::InvalidInput("Slope filter enabled but no terrain supplied".to_string())
            })?;
            let slope = terrain.slope()?;
            let before = current.detected_count();
            current = exclude_steep_slopes(&current, &slope, self.params.slope_threshold_deg)?;
            report.slope_removed = before - current.detected_count();
        }

        if self.connectivity {
            let before = current.detected_count();
            current = filter_connected_components(
                &current,
                self.params.min_connected_pixels,
                self.params.connectivity_window,
                self.params.connectivity,
            );
            report.connectivity_removed = before - current.detected_count();
        }

        report.output_pixels = current.detected_count();
        log::info!(
            "Post-processing: {} -> {} pixels (permanent water -{}, slope -{}, connectivity -{})",
            report.input_pixels,
            report.output_pixels,
            report.permanent_water_removed,
            report.slope_removed,
            report.connectivity_removed
        );
        Ok((current, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MASK_CLEAR;

    fn grid(rows: usize, cols: usize, detected: &[(usize, usize)]) -> (Raster, BinaryMask) {
        let raster = Raster::from_array("r", Array2::zeros((rows, cols)), 10.0);
        let mut data = Array2::from_elem((rows, cols), MASK_NODATA);
        for &p in detected {
            data[p] = MASK_DETECTED;
        }
        let mask = BinaryMask::from_raster(&raster, data).unwrap();
        (raster, mask)
    }

    #[test]
    fn test_permanent_water_excluded_above_threshold() {
        let (raster, mask) = grid(1, 3, &[(0, 0), (0, 1), (0, 2)]);
        let occurrence = raster.with_data("occurrence", ndarray::array![[0.0, 5.0, f32::NAN]]);
        let out = exclude_permanent_water(&mask, &occurrence, 5.0).unwrap();
        assert_eq!(out.detected_count(), 3);

        let occurrence = raster.with_data("occurrence", ndarray::array![[80.0, 5.1, f32::NAN]]);
        let out = exclude_permanent_water(&mask, &occurrence, 5.0).unwrap();
        assert!(!out.is_detected(0, 0) && !out.is_detected(0, 1));
        assert!(out.is_detected(0, 2));
    }

    #[test]
    fn test_steep_slopes_excluded() {
        let (raster, mask) = grid(1, 2, &[(0, 0), (0, 1)]);
        let slope = raster.with_data("slope", ndarray::array![[4.9, 12.0]]);
        let out = exclude_steep_slopes(&mask, &slope, 5.0).unwrap();
        assert!(out.is_detected(0, 0));
        assert!(!out.is_detected(0, 1));
    }

    #[test]
    fn test_labelling_four_vs_eight() {
        // diagonal pair plus an isolated pixel
        let (_, mask) = grid(3, 4, &[(0, 0), (1, 1), (2, 3)]);
        let (_, sizes4) = label_components(&mask, Connectivity::Four);
        let (_, sizes8) = label_components(&mask, Connectivity::Eight);
        assert_eq!(sizes4.len() - 1, 3);
        assert_eq!(sizes8.len() - 1, 2);
        assert_eq!(sizes8[1], 2);
    }

    #[test]
    fn test_isolated_pixels_removed() {
        let (_, mask) = grid(3, 4, &[(0, 0), (1, 1), (2, 3)]);
        let out = filter_connected_components(&mask, 2, 25, Connectivity::Eight);
        assert!(out.is_detected(0, 0) && out.is_detected(1, 1));
        assert!(!out.is_detected(2, 3));

        let out = filter_connected_components(&mask, 2, 25, Connectivity::Four);
        assert!(out.is_empty());
    }

    #[test]
    fn test_window_caps_component_size() {
        let detected: Vec<_> = (0..5).map(|c| (0, c)).collect();
        let (_, mask) = grid(1, 5, &detected);
        // a 5-pixel line counts as 3 with a window of 3
        assert!(filter_connected_components(&mask, 4, 3, Connectivity::Eight).is_empty());
        assert_eq!(filter_connected_components(&mask, 3, 3, Connectivity::Eight).detected_count(), 5);
    }

    #[test]
    fn test_enabled_stage_requires_ancillary() {
        let (_, mask) = grid(2, 2, &[(0, 0)]);
        let processor = PostProcessor::new(PostProcessParams::default());
        assert!(matches!(processor.apply(&mask, None, None), Err(FloodError::InvalidInput(_))));

        let connectivity_only = PostProcessor::new(PostProcessParams::default()).with_stages(false, false, true);
        let (out, report) = connectivity_only.apply(&mask, None, None).unwrap();
        assert!(out.is_empty());
        assert_eq!(report.connectivity_removed, 1);
    }

    #[test]
    fn test_chain_never_adds_detections() {
        let (raster, mask) = grid(3, 3, &[(0, 0), (0, 1), (1, 0), (2, 2)]);
        let mut clear = mask.data.clone();
        clear[[1, 1]] = MASK_CLEAR;
        let mask = mask.with_data(clear);
        let occurrence = raster.with_data("occurrence", Array2::zeros((3, 3)));
        let terrain = Terrain::SlopeDegrees(raster.with_data("slope", Array2::zeros((3, 3))));

        let (out, report) = PostProcessor::new(PostProcessParams::default())
            .apply(&mask, Some(&occurrence), Some(&terrain))
            .unwrap();
        for ((r, c), &v) in out.data.indexed_iter() {
            if v == MASK_DETECTED {
                assert!(mask.is_detected(r, c));
            }
        }
        assert_eq!(report.input_pixels, 4);
        assert_eq!(report.output_pixels, 3);
        assert!(!out.is_detected(1, 1));
    }
}
