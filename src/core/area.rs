//! Flooded-area reduction

use crate::types::{BinaryMask, FloodError, FloodResult, Region, MASK_DETECTED};
use serde::Serialize;

/// Flooded area of one mask over one region
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FloodEstimate {
    /// Area in units of `unit_divisor` square metres
    pub area: f64,
    pub pixel_count: usize,
    pub unit_divisor: f64,
}

impl FloodEstimate {
    pub fn area_m2(&self) -> f64 {
        self.area * self.unit_divisor
    }
}

/// Sum of the ground areas of detected pixels inside `region`, divided by
/// `unit_divisor` (10 000 gives hectares)
pub fn flooded_area(mask: &BinaryMask, region: &Region, unit_divisor: f64) -> FloodResult<FloodEstimate> {
    if !(unit_divisor > 0.0) || !unit_divisor.is_finite() {
        return Err(FloodError::InvalidInput(format!(
            "Area unit divisor must be positive, got {}",
            unit_divisor
        )));
    }

    let coverage = region.coverage(&mask.geo_transform, mask.shape());
    let mut area_m2 = 0.0f64;
    let mut pixel_count = 0usize;
    for (row, (mask_row, cover_row)) in mask.data.rows().into_iter().zip(coverage.rows()).enumerate() {
        let detected = mask_row
            .iter()
            .zip(cover_row.iter())
            .filter(|&(&m, &inside)| inside && m == MASK_DETECTED)
            .count();
        if detected > 0 {
            area_m2 += detected as f64 * mask.pixel_area_m2(row);
            pixel_count += detected;
        }
    }

    let estimate = FloodEstimate {
        area: area_m2 / unit_divisor,
        pixel_count,
        unit_divisor,
    };
    log::info!(
        "Flooded area: {:.4} ({} pixels, {:.1} m2)",
        estimate.area,
        pixel_count,
        area_m2
    );
    Ok(estimate)
}
