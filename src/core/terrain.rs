//! Terrain derivatives of an elevation model

use crate::types::{FloodReal, FloodResult, Raster, RealImage, FloodError};
use ndarray::Array2;

/// Neighbour indices and their distance in pixels along one axis:
/// central difference inside, one-sided at the edges
fn stencil(i: usize, n: usize) -> Option<(usize, usize, f64)> {
    match n {
        0 | 1 => None,
        _ if i == 0 => Some((0, 1, 1.0)),
        _ if i == n - 1 => Some((n - 2, n - 1, 1.0)),
        _ => Some((i - 1, i + 1, 2.0)),
    }
}

/// Elevation gradient (dz/dx, dz/dy) at every pixel; x grows with columns,
/// y grows northwards. `NaN` where the stencil touches no-data.
pub fn gradient(dem: &RealImage, pixel_spacing: (f64, f64)) -> (RealImage, RealImage) {
    let (rows, cols) = dem.dim();
    let (dx, dy) = pixel_spacing;

    let axis = |(i, j): (usize, usize), along_rows: bool| -> FloodReal {
        let (n, idx, spacing) = if along_rows { (rows, i, dy) } else { (cols, j, dx) };
        match stencil(idx, n) {
            None => 0.0,
            Some((lo, hi, span)) => {
                let (a, b) = if along_rows {
                    (dem[[lo, j]], dem[[hi, j]])
                } else {
                    (dem[[i, lo]], dem[[i, hi]])
                };
                if a.is_nan() || b.is_nan() || dem[[i, j]].is_nan() {
                    FloodReal::NAN
                } else {
                    ((b - a) as f64 / (span * spacing)) as FloodReal
                }
            }
        }
    };

    let dz_dx = Array2::from_shape_fn((rows, cols), |p| axis(p, false));
    // rows run southwards
    let dz_dy = Array2::from_shape_fn((rows, cols), |p| -axis(p, true));
    (dz_dx, dz_dy)
}

/// Slope in degrees from an elevation raster, using the ground pixel
/// spacing of its georeference
pub fn slope_degrees(elevation: &Raster) -> FloodResult<Raster> {
    let (dx, dy) = elevation.pixel_spacing_m();
    if !(dx > 0.0 && dy > 0.0) {
        return Err(FloodError::InvalidInput(format!(
            "Elevation raster has a degenerate pixel spacing ({}, {})",
            dx, dy
        )));
    }
    log::debug!("Calculating slope from {}x{} DEM at {:.2}x{:.2} m", elevation.rows(), elevation.cols(), dx, dy);

    let (dz_dx, dz_dy) = gradient(elevation.data(), (dx, dy));
    let slope = ndarray::Zip::from(&dz_dx)
        .and(&dz_dy)
        .map_collect(|&gx, &gy| gx.hypot(gy).atan().to_degrees());
    Ok(elevation.with_data("slope", slope))
}

/// Aspect in degrees clockwise from north, pointing downhill; `NaN` on flat
/// ground and no-data
pub fn aspect_degrees(elevation: &Raster) -> FloodResult<Raster> {
    let (dz_dx, dz_dy) = gradient(elevation.data(), elevation.pixel_spacing_m());
    let aspect = ndarray::Zip::from(&dz_dx).and(&dz_dy).map_collect(|&gx, &gy| {
        if gx == 0.0 && gy == 0.0 {
            FloodReal::NAN
        } else {
            let deg = (-gx).atan2(-gy).to_degrees();
            if deg < 0.0 {
                deg + 360.0
            } else {
                deg
            }
        }
    });
    Ok(elevation.with_data("aspect", aspect))
}
