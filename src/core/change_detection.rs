//! Bitemporal change detection
//!
//! Ratios and normalized differences never produce infinities: a zero or
//! near-zero denominator yields no-data (`NaN`) so it cannot contaminate
//! percentile statistics downstream. Infinite input samples are rejected.

use crate::config::OpticalBands;
use crate::core::composite::max_composite;
use crate::core::radiometric::ensure_no_infinities;
use crate::types::{FloodError, FloodReal, FloodResult, Raster, RealImage};
use ndarray::Zip;

/// Denominators smaller than this are treated as zero in ratios
pub const RATIO_EPSILON: FloodReal = 1e-6;

/// Band sums smaller than this are treated as zero in normalized differences
pub const NORMALIZED_DIFFERENCE_EPSILON: FloodReal = 1e-10;

fn ratio_array(after: &RealImage, before: &RealImage) -> FloodResult<RealImage> {
    ensure_no_infinities(after, "ratio numerator")?;
    ensure_no_infinities(before, "ratio denominator")?;
    #[cfg(feature = "parallel")]
    let ratio = Zip::from(after).and(before).par_map_collect(ratio_pixel);
    #[cfg(not(feature = "parallel"))]
    let ratio = Zip::from(after).and(before).map_collect(ratio_pixel);
    Ok(ratio)
}

fn ratio_pixel(&a: &FloodReal, &b: &FloodReal) -> FloodReal {
    if a.is_nan() || b.is_nan() || b.abs() < RATIO_EPSILON {
        FloodReal::NAN
    } else {
        a / b
    }
}

fn normalized_difference_array(a: &RealImage, b: &RealImage) -> FloodResult<RealImage> {
    ensure_no_infinities(a, "normalized difference")?;
    ensure_no_infinities(b, "normalized difference")?;
    Ok(Zip::from(a).and(b).map_collect(normalized_difference_pixel))
}

fn normalized_difference_pixel(&a: &FloodReal, &b: &FloodReal) -> FloodReal {
    let sum = a + b;
    if a.is_nan() || b.is_nan() || sum.abs() < NORMALIZED_DIFFERENCE_EPSILON {
        FloodReal::NAN
    } else {
        (a - b) / sum
    }
}

/// Pixel-wise `after / before` of two aligned single-band rasters
pub fn ratio(after: &Raster, before: &Raster) -> FloodResult<Raster> {
    after.ensure_aligned(before)?;
    let data = ratio_array(after.data(), before.data())?;
    Ok(after.with_data("ratio", data))
}

/// `(a - b) / (a + b)` of two aligned single-band rasters
pub fn normalized_difference(a: &Raster, b: &Raster) -> FloodResult<Raster> {
    a.ensure_aligned(b)?;
    let data = normalized_difference_array(a.data(), b.data())?;
    Ok(a.with_data("normalized_difference", data))
}

/// Normalized Difference Water Index `(green - nir) / (green + nir)` of one scene
pub fn water_index(scene: &Raster, bands: &OpticalBands) -> FloodResult<Raster> {
    let green = scene.band(&bands.green)?;
    let nir = scene.band(&bands.nir)?;
    let data = normalized_difference_array(green, nir)?;
    Ok(scene.with_data("NDWI", data))
}

/// SAR backscatter change `after / before` on one band of linear intensity
pub fn sar_change(before: &Raster, after: &Raster, band: &str) -> FloodResult<Raster> {
    log::info!("Computing SAR change ratio on band {}", band);
    let before = before.select(band)?;
    let after = after.select(band)?;
    let change = ratio(&after, &before)?;
    Ok(after.with_data(format!("{}_ratio", band), change.data().clone()))
}

/// Water-index change: NDWI per scene, temporal maximum per period, then
/// `after / before`
pub fn optical_water_change(
    before_scenes: &[Raster],
    after_scenes: &[Raster],
    bands: &OpticalBands,
) -> FloodResult<Raster> {
    if before_scenes.is_empty() || after_scenes.is_empty() {
        return Err(FloodError::InvalidInput(format!(
            "Optical change needs scenes in both periods (before: {}, after: {})",
            before_scenes.len(),
            after_scenes.len()
        )));
    }
    log::info!(
        "Computing NDWI change from {} before / {} after scenes",
        before_scenes.len(),
        after_scenes.len()
    );

    let index = |scenes: &[Raster]| -> FloodResult<Raster> {
        let indices = scenes
            .iter()
            .map(|s| water_index(s, bands))
            .collect::<FloodResult<Vec<_>>>()?;
        max_composite(&indices)
    };

    let before_index = index(before_scenes)?;
    let after_index = index(after_scenes)?;
    let change = ratio(&after_index, &before_index)?;
    Ok(after_index.with_data("NDWI_Ratio", change.data().clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Band, CoordinateSystem, GeoTransform};
    use ndarray::array;

    fn optical(green: RealImage, nir: RealImage) -> Raster {
        Raster::new(
            vec![Band::new("B3", green), Band::new("B8", nir)],
            GeoTransform::north_up(0.0, 10.0, 10.0),
            CoordinateSystem::Local,
        )
        .unwrap()
    }

    #[test]
    fn test_ratio_zero_denominator_is_nodata() {
        let before = Raster::from_array("VH", array![[1.0, 0.0, f32::NAN]], 10.0);
        let after = Raster::from_array("VH", array![[3.0, 2.0, 1.0]], 10.0);
        let r = ratio(&after, &before).unwrap();
        assert_eq!(r.data()[[0, 0]], 3.0);
        assert!(r.data()[[0, 1]].is_nan());
        assert!(r.data()[[0, 2]].is_nan());
        assert!(r.data().iter().all(|v| !v.is_infinite()));
    }

    #[test]
    fn test_ratio_rejects_infinite_samples() {
        let before = Raster::from_array("VH", array![[1.0, f32::INFINITY]], 10.0);
        let after = Raster::from_array("VH", array![[2.0, 1.0]], 10.0);
        assert!(matches!(ratio(&after, &before), Err(FloodError::InvalidInput(_))));
        assert!(matches!(
            ratio(&before, &after.with_data("VH", array![[1.0, 1.0]])),
            Err(FloodError::InvalidInput(_))
        ));

        let scene = optical(array![[0.3, f32::NEG_INFINITY]], array![[0.1, 0.1]]);
        assert!(matches!(
            water_index(&scene, &OpticalBands::default()),
            Err(FloodError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_normalized_difference() {
        let a = Raster::from_array("a", array![[3.0, 1.0, 0.0, f32::NAN]], 10.0);
        let b = Raster::from_array("b", array![[1.0, 1.0, 0.0, 1.0]], 10.0);
        let nd = normalized_difference(&a, &b).unwrap();
        assert!((nd.data()[[0, 0]] - 0.5).abs() < 1e-6);
        assert_eq!(nd.data()[[0, 1]], 0.0);
        assert!(nd.data()[[0, 2]].is_nan());
        assert!(nd.data()[[0, 3]].is_nan());

        let inf = Raster::from_array("b", array![[1.0, 1.0, f32::INFINITY, 1.0]], 10.0);
        assert!(matches!(normalized_difference(&a, &inf), Err(FloodError::InvalidInput(_))));
    }

    #[test]
    fn test_sar_change_selects_band() {
        let grid = GeoTransform::north_up(0.0, 10.0, 10.0);
        let scene = |vh: RealImage, vv: RealImage| {
            Raster::new(vec![Band::new("VV", vv), Band::new("VH", vh)], grid, CoordinateSystem::Local).unwrap()
        };
        let before = scene(array![[1.0, 2.0]], array![[5.0, 5.0]]);
        let after = scene(array![[3.0, 2.0]], array![[1.0, 1.0]]);
        let change = sar_change(&before, &after, "VH").unwrap();
        assert_eq!(change.band_names(), vec!["VH_ratio"]);
        assert_eq!(change.data()[[0, 0]], 3.0);
        assert_eq!(change.data()[[0, 1]], 1.0);
        assert!(sar_change(&before, &after, "HH").is_err());
    }

    #[test]
    fn test_ratio_misaligned_rejected() {
        let before = Raster::from_array("VH", array![[1.0, 1.0]], 10.0);
        let after = Raster::from_array("VH", array![[1.0], [1.0]], 10.0);
        assert!(matches!(ratio(&after, &before), Err(FloodError::InvalidInput(_))));
    }

    #[test]
    fn test_water_index() {
        let scene = optical(array![[0.3, 0.0]], array![[0.1, 0.0]]);
        let ndwi = water_index(&scene, &OpticalBands::default()).unwrap();
        assert!((ndwi.data()[[0, 0]] - 0.5).abs() < 1e-6);
        assert!(ndwi.data()[[0, 1]].is_nan());
    }

    #[test]
    fn test_optical_change_uses_temporal_maximum() {
        let bands = OpticalBands::default();
        // NDWI 0.2 and 0.5 before, 0.5 and 0.9 after (cloudy scene lower)
        let before = vec![
            optical(array![[0.6]], array![[0.4]]),
            optical(array![[0.3]], array![[0.1]]),
        ];
        let after = vec![
            optical(array![[0.3]], array![[0.1]]),
            optical(array![[0.95]], array![[0.05]]),
        ];
        let change = optical_water_change(&before, &after, &bands).unwrap();
        assert!((change.data()[[0, 0]] - 0.9 / 0.5).abs() < 1e-5);
        assert_eq!(change.band_names(), vec!["NDWI_Ratio"]);
    }

    #[test]
    fn test_optical_change_needs_both_periods() {
        let bands = OpticalBands::default();
        let scene = optical(array![[0.3]], array![[0.1]]);
        assert!(optical_water_change(&[scene], &[], &bands).is_err());
    }
}
