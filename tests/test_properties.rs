use floodmap::config::{Connectivity, DbConversionPolicy};
use floodmap::core::fusion::{intersection, union};
use floodmap::core::post_process::{
    exclude_permanent_water, exclude_steep_slopes, filter_connected_components,
};
use floodmap::core::radiometric::{to_db, to_linear};
use floodmap::core::speckle_filter::{SpeckleFilter, SpeckleFilterType};
use floodmap::core::threshold::{percentile_value, threshold_mask, ThresholdSpec};
use floodmap::core::area::flooded_area;
use floodmap::types::{BinaryMask, Raster, Region, MASK_CLEAR, MASK_DETECTED, MASK_NODATA};
use ndarray::Array2;

/// Deterministic pseudo-random field in [0, 1)
fn field(rows: usize, cols: usize, seed: u64) -> Array2<f32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    Array2::from_shape_fn((rows, cols), |_| {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((state >> 40) as f32) / (1u64 << 24) as f32
    })
}

fn random_mask(like: &Raster, seed: u64) -> BinaryMask {
    let values = field(like.rows(), like.cols(), seed).mapv(|v| {
        if v < 0.4 {
            MASK_DETECTED
        } else if v < 0.7 {
            MASK_CLEAR
        } else {
            MASK_NODATA
        }
    });
    BinaryMask::from_raster(like, values).expect("Failed to build mask")
}

fn detected(mask: &BinaryMask) -> Vec<bool> {
    mask.data.iter().map(|&v| v == MASK_DETECTED).collect()
}

#[test]
fn test_db_linear_round_trip() {
    let linear = Raster::from_array("VH", field(16, 16, 1).mapv(|v| v * 0.5 + 1e-4), 10.0);
    let db = to_db(&linear, DbConversionPolicy::NoData).expect("to_db failed");
    let back = to_linear(&db).expect("to_linear failed");
    for (a, b) in linear.data().iter().zip(back.data().iter()) {
        assert!(((a - b) / a).abs() < 1e-4, "{} vs {}", a, b);
    }
}

#[test]
fn test_threshold_monotonic_in_percentile() {
    let change = Raster::from_array("ratio", field(20, 20, 7).mapv(|v| v * 4.0), 10.0);
    let region = Region::covering(&change).expect("Failed to build region");

    let mut previous = f32::NEG_INFINITY;
    let mut previous_count = usize::MAX;
    for p in (0..=100).step_by(5) {
        let t = percentile_value(&change, &region, p as f64).expect("Percentile failed");
        assert!(t >= previous, "threshold decreased at p={}", p);
        previous = t;

        let outcome = threshold_mask(&change, &region, ThresholdSpec::Percentile(p as f64))
            .expect("Thresholding failed");
        assert!(outcome.mask.detected_count() <= previous_count);
        previous_count = outcome.mask.detected_count();
    }
}

#[test]
fn test_fusion_subset_and_superset() {
    let grid = Raster::from_array("grid", Array2::zeros((12, 12)), 10.0);
    for seed in 0..5 {
        let a = random_mask(&grid, seed * 2 + 1);
        let b = random_mask(&grid, seed * 2 + 2);
        let and = detected(&intersection(&a, &b).expect("Intersection failed"));
        let or = detected(&union(&a, &b).expect("Union failed"));
        let (da, db) = (detected(&a), detected(&b));
        for i in 0..and.len() {
            assert!(!and[i] || (da[i] && db[i]));
            assert!(or[i] == (da[i] || db[i]));
            assert!(!and[i] || or[i]);
        }
    }
}

#[test]
fn test_post_processing_only_narrows() {
    let grid = Raster::from_array("grid", Array2::zeros((15, 15)), 10.0);
    let occurrence = grid.with_data("occurrence", field(15, 15, 11).mapv(|v| v * 20.0));
    let slope = grid.with_data("slope", field(15, 15, 12).mapv(|v| v * 15.0));

    for seed in 0..5 {
        let mask = random_mask(&grid, 100 + seed);
        let input = detected(&mask);

        let steps = [
            exclude_permanent_water(&mask, &occurrence, 5.0).expect("Permanent water failed"),
            exclude_steep_slopes(&mask, &slope, 5.0).expect("Slope failed"),
            filter_connected_components(&mask, 2, 25, Connectivity::Eight),
            filter_connected_components(&mask, 5, 25, Connectivity::Four),
        ];
        for step in steps.iter() {
            let output = detected(step);
            for i in 0..input.len() {
                assert!(!output[i] || input[i], "post-processing added a detection");
            }
            assert!(step.detected_count() <= mask.detected_count());
        }
    }
}

#[test]
fn test_area_of_empty_mask_is_zero() {
    let grid = Raster::from_array("grid", Array2::zeros((8, 8)), 10.0);
    let region = Region::covering(&grid).expect("Failed to build region");
    for mask in [
        BinaryMask::empty_like(&grid),
        BinaryMask::from_raster(&grid, Array2::from_elem((8, 8), MASK_CLEAR)).expect("Mask failed"),
    ] {
        let estimate = flooded_area(&mask, &region, 10_000.0).expect("Area failed");
        assert_eq!(estimate.area, 0.0);
    }
}

#[test]
fn test_speckle_filter_really_filters() {
    let _ = env_logger::builder().is_test(true).try_init();

    // homogeneous area with exponential-like multiplicative noise
    let noisy = field(32, 32, 42).mapv(|u| -(1.0 - u).max(1e-6).ln());
    let filter = SpeckleFilter::new();

    let variance = |a: &Array2<f32>| {
        let mean = a.mean().unwrap_or(0.0);
        a.mapv(|v| (v - mean) * (v - mean)).mean().unwrap_or(0.0)
    };

    for filter_type in [SpeckleFilterType::Lee, SpeckleFilterType::EnhancedLee, SpeckleFilterType::RefinedLee] {
        let filtered = filter.apply_filter(&noisy, filter_type).expect("Speckle filter failed");
        assert_eq!(filtered.dim(), noisy.dim());
        assert_ne!(filtered, noisy, "{:?} left the image unchanged", filter_type);
        assert!(
            variance(&filtered) < variance(&noisy),
            "{:?} did not reduce variance",
            filter_type
        );
    }
}
