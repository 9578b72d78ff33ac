use crate::types::{Band, FloodError, FloodReal, FloodResult, Raster, RealImage};
use ndarray::Array2;

/// Multilooking parameters
#[derive(Debug, Clone)]
pub struct MultilookParams {
    /// Number of looks along rows
    pub row_looks: usize,
    /// Number of looks along columns
    pub col_looks: usize,
}

impl MultilookParams {
    /// Square block factor that brings `spacing_m` closest to `target_m`
    pub fn for_resolution(spacing_m: (f64, f64), target_m: f64) -> Self {
        let looks = |spacing: f64| {
            if spacing > 0.0 && target_m > spacing {
                (target_m / spacing).round().max(1.0) as usize
            } else {
                1
            }
        };
        Self {
            row_looks: looks(spacing_m.1),
            col_looks: looks(spacing_m.0),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.row_looks <= 1 && self.col_looks <= 1
    }
}

/// Multilook processor: block averaging onto a coarser grid
pub struct MultilookProcessor {
    params: MultilookParams,
}

impl MultilookProcessor {
    pub fn new(params: MultilookParams) -> Self {
        Self { params }
    }

    /// Average each `row_looks x col_looks` block, skipping no-data samples
    pub fn apply_multilook(&self, data: &RealImage) -> FloodResult<RealImage> {
        let (rows, cols) = data.dim();
        let (row_looks, col_looks) = (self.params.row_looks.max(1), self.params.col_looks.max(1));

        let out_rows = rows / row_looks;
        let out_cols = cols / col_looks;
        if out_rows == 0 || out_cols == 0 {
            return Err(FloodError::InvalidInput(format!(
                "Multilook {}x{} too large for {}x{} image",
                row_looks, col_looks, rows, cols
            )));
        }

        let output = Array2::from_shape_fn((out_rows, out_cols), |(out_row, out_col)| {
            let mut sum = 0.0f64; // f64 accumulation
            let mut count = 0usize;
            for in_row in out_row * row_looks..(out_row + 1) * row_looks {
                for in_col in out_col * col_looks..(out_col + 1) * col_looks {
                    let v = data[[in_row, in_col]];
                    if !v.is_nan() {
                        sum += v as f64;
                        count += 1;
                    }
                }
            }
            if count > 0 {
                (sum / count as f64) as FloodReal
            } else {
                FloodReal::NAN
            }
        });

        Ok(output)
    }

    /// Multilook every band and coarsen the georeference accordingly
    pub fn apply_to_raster(&self, raster: &Raster) -> FloodResult<Raster> {
        if self.params.is_identity() {
            return Ok(raster.clone());
        }
        log::info!(
            "Applying multilook: {}x{} looks to {}x{} raster",
            self.params.row_looks,
            self.params.col_looks,
            raster.rows(),
            raster.cols()
        );

        let mut bands = Vec::with_capacity(raster.bands().len());
        for band in raster.bands() {
            bands.push(Band::new(band.name.clone(), self.apply_multilook(&band.data)?));
        }
        let geo_transform = raster
            .geo_transform
            .scaled(self.params.row_looks.max(1), self.params.col_looks.max(1));
        Raster::new(bands, geo_transform, raster.coordinate_system)
    }
}
