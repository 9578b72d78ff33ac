use crate::types::{FloodError, FloodReal, FloodResult, Raster, RealImage};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// Speckle filtering parameters
#[derive(Debug, Clone)]
pub struct SpeckleFilterParams {
    /// Filter window size (must be odd)
    pub window_size: usize,
    /// Number of looks of the input intensity
    pub num_looks: f32,
    /// Coefficient of variation above which Enhanced Lee keeps the raw pixel
    pub cmax: f32,
}

impl Default for SpeckleFilterParams {
    fn default() -> Self {
        Self {
            window_size: 7,          // 7x7 window
            num_looks: 1.0,          // Single look
            cmax: 1.73,
        }
    }
}

/// Available speckle filter types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeckleFilterType {
    /// Lee filter (adaptive)
    Lee,
    /// Enhanced Lee filter
    EnhancedLee,
    /// Refined Lee filter (edge-aligned directional windows)
    RefinedLee,
}

/// Offset of a window sample relative to the centre pixel
type Offset = (isize, isize);

/// Signed distance of an offset from the edge line of each orientation:
/// horizontal, vertical, diagonal, anti-diagonal
fn edge_side(orientation: usize, (di, dj): Offset) -> isize {
    match orientation {
        0 => di,
        1 => dj,
        2 => di - dj,
        _ => di + dj,
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct LocalStats {
    sum: f64,
    sum_sq: f64,
    count: usize,
}

impl LocalStats {
    fn push(&mut self, v: FloodReal) {
        let v = v as f64;
        self.sum += v;
        self.sum_sq += v * v;
        self.count += 1;
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Sample variance (n - 1)
    fn variance(&self) -> Option<f64> {
        if self.count < 2 {
            return None;
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        Some(((self.sum_sq - n * mean * mean) / (n - 1.0)).max(0.0))
    }
}

#[inline]
fn is_valid(v: FloodReal) -> bool {
    v.is_finite() && v > 0.0
}

/// Speckle filter processor
pub struct SpeckleFilter {
    params: SpeckleFilterParams,
}

impl SpeckleFilter {
    /// Create a new speckle filter with default parameters
    pub fn new() -> Self {
        Self {
            params: SpeckleFilterParams::default(),
        }
    }

    /// Create a speckle filter with custom parameters
    pub fn with_params(params: SpeckleFilterParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SpeckleFilterParams {
        &self.params
    }

    /// Apply speckle filtering to a linear-domain intensity image
    pub fn apply_filter(
        &self,
        image: &RealImage,
        filter_type: SpeckleFilterType,
    ) -> FloodResult<RealImage> {
        log::info!("Applying {:?} speckle filter", filter_type);
        log::debug!("Filter parameters: {:?}", self.params);

        if self.params.window_size % 2 == 0 || self.params.window_size < 3 {
            return Err(FloodError::InvalidInput(format!(
                "Window size must be odd and at least 3, got {}",
                self.params.window_size
            )));
        }
        if !(self.params.num_looks > 0.0) {
            return Err(FloodError::InvalidInput(format!(
                "Number of looks must be positive, got {}",
                self.params.num_looks
            )));
        }

        let filter_pixel = |(i, j): (usize, usize), &center: &FloodReal| -> FloodReal {
            if !is_valid(center) {
                return center;
            }
            match filter_type {
                SpeckleFilterType::Lee => self.lee_pixel(image, i, j),
                SpeckleFilterType::EnhancedLee => self.enhanced_lee_pixel(image, i, j),
                SpeckleFilterType::RefinedLee => self.refined_lee_pixel(image, i, j),
            }
        };

        #[cfg(feature = "parallel")]
        let filtered = Zip::indexed(image).par_map_collect(filter_pixel);
        #[cfg(not(feature = "parallel"))]
        let filtered = Zip::indexed(image).map_collect(filter_pixel);

        log::info!("Speckle filtering completed successfully");
        Ok(filtered)
    }

    /// Filter every band of a linear-domain raster
    pub fn apply_to_raster(
        &self,
        raster: &Raster,
        filter_type: SpeckleFilterType,
    ) -> FloodResult<Raster> {
        let mut bands = Vec::with_capacity(raster.bands().len());
        for band in raster.bands() {
            bands.push(crate::types::Band::new(
                band.name.clone(),
                self.apply_filter(&band.data, filter_type)?,
            ));
        }
        Raster::new(bands, raster.geo_transform, raster.coordinate_system)
    }

    /// Theoretical speckle coefficient of variation
    fn cu(&self) -> f64 {
        1.0 / (self.params.num_looks as f64).sqrt()
    }

    /// Lee weight `(Cv² - Cu²) / (Cv² (1 + Cu²))`, clamped to [0, 1]
    fn lee_weight(&self, mean: f64, variance: f64) -> f64 {
        let cu2 = self.cu() * self.cu();
        let cv2 = variance / (mean * mean);
        if cv2 <= cu2 {
            0.0
        } else {
            ((cv2 - cu2) / (cv2 * (1.0 + cu2))).clamp(0.0, 1.0)
        }
    }

    /// Visit valid samples of the window around (i, j), shrunk at the raster edge
    fn for_each_in_window<F>(&self, image: &RealImage, i: usize, j: usize, mut f: F)
    where
        F: FnMut(Offset, FloodReal),
    {
        let (height, width) = image.dim();
        let half = self.params.window_size / 2;
        let i_start = i.saturating_sub(half);
        let i_end = (i + half + 1).min(height);
        let j_start = j.saturating_sub(half);
        let j_end = (j + half + 1).min(width);

        for ii in i_start..i_end {
            for jj in j_start..j_end {
                let v = image[[ii, jj]];
                if is_valid(v) {
                    f((ii as isize - i as isize, jj as isize - j as isize), v);
                }
            }
        }
    }

    fn window_stats(&self, image: &RealImage, i: usize, j: usize) -> LocalStats {
        let mut stats = LocalStats::default();
        self.for_each_in_window(image, i, j, |_, v| stats.push(v));
        stats
    }

    fn blend(&self, center: FloodReal, stats: &LocalStats) -> FloodReal {
        match (stats.mean(), stats.variance()) {
            (Some(mean), Some(variance)) if mean > 0.0 => {
                let weight = self.lee_weight(mean, variance);
                (mean + weight * (center as f64 - mean)) as FloodReal
            }
            _ => center,
        }
    }

    fn lee_pixel(&self, image: &RealImage, i: usize, j: usize) -> FloodReal {
        let stats = self.window_stats(image, i, j);
        self.blend(image[[i, j]], &stats)
    }

    fn enhanced_lee_pixel(&self, image: &RealImage, i: usize, j: usize) -> FloodReal {
        let center = image[[i, j]];
        let stats = self.window_stats(image, i, j);
        let (mean, variance) = match (stats.mean(), stats.variance()) {
            (Some(m), Some(v)) if m > 0.0 => (m, v),
            _ => return center,
        };

        let cu = self.cu();
        let cv = variance.sqrt() / mean;
        if cv <= cu {
            // Homogeneous area
            mean as FloodReal
        } else if cv < self.params.cmax as f64 {
            let weight = self.lee_weight(mean, variance);
            (mean + weight * (center as f64 - mean)) as FloodReal
        } else {
            // Point target or strong edge
            center
        }
    }

    /// Lee filtering over the half-window on the centre pixel's side of the
    /// strongest local edge
    fn refined_lee_pixel(&self, image: &RealImage, i: usize, j: usize) -> FloodReal {
        let center = image[[i, j]];

        // strict halves on each side of the four candidate edge lines
        let mut negative = [LocalStats::default(); 4];
        let mut positive = [LocalStats::default(); 4];
        let mut core = LocalStats::default();
        self.for_each_in_window(image, i, j, |offset, v| {
            for orientation in 0..4 {
                match edge_side(orientation, offset).signum() {
                    -1 => negative[orientation].push(v),
                    1 => positive[orientation].push(v),
                    _ => {}
                }
            }
            if offset.0.abs() <= 1 && offset.1.abs() <= 1 {
                core.push(v);
            }
        });

        let mut best: Option<(usize, f64)> = None;
        for orientation in 0..4 {
            if let (Some(a), Some(b)) = (negative[orientation].mean(), positive[orientation].mean()) {
                let gradient = (a - b).abs();
                if best.map_or(true, |(_, g)| gradient > g) {
                    best = Some((orientation, gradient));
                }
            }
        }

        let (orientation, reference) = match (best, core.mean()) {
            (Some((o, g)), Some(reference)) if g > 0.0 => (o, reference),
            _ => return self.lee_pixel(image, i, j),
        };

        let keep_negative = match (negative[orientation].mean(), positive[orientation].mean()) {
            (Some(a), Some(b)) => (a - reference).abs() <= (b - reference).abs(),
            _ => true,
        };

        let mut half = LocalStats::default();
        self.for_each_in_window(image, i, j, |offset, v| {
            let side = edge_side(orientation, offset);
            if (keep_negative && side <= 0) || (!keep_negative && side >= 0) {
                half.push(v);
            }
        });

        if half.count < 2 {
            return self.lee_pixel(image, i, j);
        }
        self.blend(center, &half)
    }

    /// Estimate number of looks from image statistics
    pub fn estimate_number_of_looks(image: &RealImage) -> FloodResult<f32> {
        log::debug!("Estimating number of looks from image statistics");

        let mut stats = LocalStats::default();
        image.iter().filter(|v| is_valid(**v)).for_each(|&v| stats.push(v));

        let (mean, variance) = match (stats.mean(), stats.variance()) {
            (Some(m), Some(v)) => (m, v),
            _ => return Err(FloodError::EmptyResult("No valid pixels found".to_string())),
        };

        // Number of looks = mean² / variance
        let num_looks = if variance > 0.0 { mean * mean / variance } else { f64::MAX };

        log::info!("Estimated number of looks: {:.2}", num_looks);
        Ok((num_looks.max(1.0)) as f32)
    }
}

impl Default for SpeckleFilter {
    fn default() -> Self {
        Self::new()
    }
}
