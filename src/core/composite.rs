//! Temporal compositing of aligned scene stacks
//!
//! All compositors skip no-data (`NaN`) samples; a pixel with no valid
//! sample in any scene stays no-data.

use crate::types::{Band, FloodError, FloodReal, FloodResult, Raster, RealImage};
use ndarray::Zip;

/// How overlapping scenes are combined into one composite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeMethod {
    /// Last valid pixel wins (scenes ordered oldest to newest)
    Mosaic,
    /// Per-pixel maximum
    Max,
    /// Per-pixel mean
    Mean,
}

/// Composite a non-empty stack of aligned rasters band by band
pub fn composite(scenes: &[Raster], method: CompositeMethod) -> FloodResult<Raster> {
    let first = scenes
        .first()
        .ok_or_else(|| FloodError::InvalidInput("Cannot composite an empty scene stack".to_string()))?;
    for scene in &scenes[1..] {
        first.ensure_aligned(scene)?;
    }

    log::debug!("Building {:?} composite from {} scenes", method, scenes.len());

    let mut bands = Vec::with_capacity(first.bands().len());
    for name in first.band_names() {
        let stack = scenes
            .iter()
            .map(|s| s.band(name))
            .collect::<FloodResult<Vec<&RealImage>>>()?;
        bands.push(Band::new(name, composite_band(&stack, method)));
    }
    Raster::new(bands, first.geo_transform, first.coordinate_system)
}

fn composite_band(stack: &[&RealImage], method: CompositeMethod) -> RealImage {
    let mut out = RealImage::from_elem(stack[0].dim(), FloodReal::NAN);
    let mut counts = ndarray::Array2::<u32>::zeros(stack[0].dim());

    for layer in stack {
        Zip::from(&mut out)
            .and(&mut counts)
            .and(*layer)
            .for_each(|acc, n, &v| {
                if v.is_nan() {
                    return;
                }
                *acc = match (method, *n) {
                    (_, 0) => v,
                    (CompositeMethod::Mosaic, _) => v,
                    (CompositeMethod::Max, _) => acc.max(v),
                    (CompositeMethod::Mean, _) => *acc + v,
                };
                *n += 1;
            });
    }

    if method == CompositeMethod::Mean {
        Zip::from(&mut out).and(&counts).for_each(|acc, &n| {
            if n > 0 {
                *acc /= n as FloodReal;
            }
        });
    }
    out
}

/// Most-recent-valid-pixel mosaic
pub fn mosaic(scenes: &[Raster]) -> FloodResult<Raster> {
    composite(scenes, CompositeMethod::Mosaic)
}

pub fn max_composite(scenes: &[Raster]) -> FloodResult<Raster> {
    composite(scenes, CompositeMethod::Max)
}

pub fn mean_composite(scenes: &[Raster]) -> FloodResult<Raster> {
    composite(scenes, CompositeMethod::Mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn scene(data: RealImage) -> Raster {
        Raster::from_array("VH", data, 10.0)
    }

    #[test]
    fn test_mosaic_prefers_latest_valid() {
        let older = scene(array![[1.0, 2.0], [3.0, 4.0]]);
        let newer = scene(array![[f32::NAN, 20.0], [f32::NAN, f32::NAN]]);
        let result = mosaic(&[older, newer]).unwrap();
        assert_eq!(result.data()[[0, 0]], 1.0);
        assert_eq!(result.data()[[0, 1]], 20.0);
        assert_eq!(result.data()[[1, 1]], 4.0);
    }

    #[test]
    fn test_max_and_mean_skip_nodata() {
        let a = scene(array![[1.0, f32::NAN]]);
        let b = scene(array![[3.0, f32::NAN]]);
        let c = scene(array![[f32::NAN, f32::NAN]]);
        let max = max_composite(&[a.clone(), b.clone(), c.clone()]).unwrap();
        assert_eq!(max.data()[[0, 0]], 3.0);
        assert!(max.data()[[0, 1]].is_nan());

        let mean = mean_composite(&[a, b, c]).unwrap();
        assert_eq!(mean.data()[[0, 0]], 2.0);
    }

    #[test]
    fn test_empty_or_misaligned_stack_rejected() {
        assert!(mosaic(&[]).is_err());
        let a = scene(array![[1.0, 2.0]]);
        let b = scene(array![[1.0], [2.0]]);
        assert!(mosaic(&[a, b]).is_err());
    }
}
