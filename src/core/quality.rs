//! Input quality checks
//!
//! Heavy cloud or coverage gaps leave large no-data holes in a composite.
//! These checks never fail the run; they flag the result as degraded.

use crate::types::{FloodError, FloodResult, Raster, Region};
use serde::Serialize;

/// Fraction of the region's pixels that are no-data in the first band
pub fn nodata_fraction(raster: &Raster, region: &Region) -> FloodResult<f64> {
    let coverage = region.coverage(&raster.geo_transform, raster.shape());
    let (total, missing) = raster
        .data()
        .iter()
        .zip(coverage.iter())
        .filter(|&(_, &inside)| inside)
        .fold((0usize, 0usize), |(total, missing), (v, _)| {
            (total + 1, missing + usize::from(!v.is_finite()))
        });
    if total == 0 {
        return Err(FloodError::EmptyResult(
            "Region covers no pixel of the raster".to_string(),
        ));
    }
    Ok(missing as f64 / total as f64)
}

/// No-data fraction of one named input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputQuality {
    pub name: String,
    pub nodata_fraction: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityReport {
    pub inputs: Vec<InputQuality>,
    pub max_nodata_fraction: f64,
    pub degraded: bool,
}

impl QualityReport {
    pub fn new(max_nodata_fraction: f64) -> Self {
        Self {
            inputs: Vec::new(),
            max_nodata_fraction,
            degraded: false,
        }
    }

    /// Record the no-data fraction of `raster` over `region`
    pub fn assess(&mut self, name: &str, raster: &Raster, region: &Region) -> FloodResult<()> {
        let fraction = nodata_fraction(raster, region)?;
        if fraction > self.max_nodata_fraction {
            log::warn!(
                "{} is {:.1}% no-data inside the region (limit {:.1}%), accuracy is degraded",
                name,
                fraction * 100.0,
                self.max_nodata_fraction * 100.0
            );
            self.degraded = true;
        } else {
            log::debug!("{} no-data fraction: {:.3}", name, fraction);
        }
        self.inputs.push(InputQuality {
            name: name.to_string(),
            nodata_fraction: fraction,
        });
        Ok(())
    }
}
