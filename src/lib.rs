//! floodmap: Bitemporal Flood Extent Mapping
//!
//! Detects flood extent by comparing pre-event and post-event SAR backscatter
//! and optical water-index composites over a region of interest. Change
//! rasters are thresholded at a percentile of their own distribution, the
//! per-sensor masks are fused, and false positives are removed with
//! permanent-water, slope and connectivity filters before the flooded area
//! is reduced.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types
pub use config::FloodConfig;
pub use crate::core::{FloodDetection, FloodEstimate, FloodInputs, FloodPipeline, FusionExpr, Terrain};
pub use types::{
    Band, BinaryMask, CoordinateSystem, FloodError, FloodResult, GeoTransform, Raster, Region,
    MASK_CLEAR, MASK_DETECTED, MASK_NODATA,
};

#[cfg(feature = "python")]
mod python {
    use crate::config::{DbConversionPolicy, FloodConfig};
    use crate::core::pipeline::{FloodInputs, FloodPipeline};
    use crate::core::post_process::Terrain;
    use crate::core::speckle_filter::{SpeckleFilter, SpeckleFilterParams, SpeckleFilterType};
    use crate::types::{Band, BinaryMask, CoordinateSystem, FloodError, GeoTransform, Raster, Region};
    use numpy::{PyReadonlyArray2, ToPyArray};
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;
    use pyo3::types::PyDict;

    impl From<FloodError> for PyErr {
        fn from(e: FloodError) -> Self {
            match e {
                FloodError::InvalidInput(_) | FloodError::EmptyResult(_) => PyValueError::new_err(e.to_string()),
                _ => PyRuntimeError::new_err(e.to_string()),
            }
        }
    }

    /// Convert PyReadonlyArray2 to ndarray Array2
    fn numpy_to_array2<T>(arr: PyReadonlyArray2<T>) -> ndarray::Array2<T>
    where
        T: Copy + numpy::Element,
    {
        arr.as_array().to_owned()
    }

    /// Single-band raster on a local grid of `pixel_size` metres
    fn local_raster(name: &str, arr: PyReadonlyArray2<f32>, pixel_size: f64) -> Raster {
        Raster::from_array(name, numpy_to_array2(arr), pixel_size)
    }

    fn optical_scene(green: PyReadonlyArray2<f32>, nir: PyReadonlyArray2<f32>, pixel_size: f64, bands: (&str, &str)) -> PyResult<Raster> {
        let green = numpy_to_array2(green);
        let gt = GeoTransform::north_up(0.0, green.nrows() as f64 * pixel_size, pixel_size);
        Ok(Raster::new(
            vec![Band::new(bands.0, green), Band::new(bands.1, numpy_to_array2(nir))],
            gt,
            CoordinateSystem::Local,
        )?)
    }

    fn parse_filter_type(filter_type: &str) -> PyResult<SpeckleFilterType> {
        match filter_type.to_lowercase().as_str() {
            "lee" => Ok(SpeckleFilterType::Lee),
            "enhanced_lee" => Ok(SpeckleFilterType::EnhancedLee),
            "refined_lee" => Ok(SpeckleFilterType::RefinedLee),
            _ => Err(PyValueError::new_err(format!("Unknown filter type: {}", filter_type))),
        }
    }

    /// Python wrapper for the flood pipeline
    #[pyclass(name = "FloodDetector")]
    struct PyFloodDetector {
        pipeline: FloodPipeline,
    }

    #[pymethods]
    impl PyFloodDetector {
        /// Create a detector from a JSON configuration (defaults when omitted)
        #[new]
        fn new(config_json: Option<&str>) -> PyResult<Self> {
            let config = match config_json {
                Some(json) => FloodConfig::from_json_str(json)?,
                None => FloodConfig::default(),
            };
            Ok(Self {
                pipeline: FloodPipeline::new(config)?,
            })
        }

        fn config_json(&self) -> PyResult<String> {
            Ok(self.pipeline.config().to_json_string()?)
        }

        /// Run detection on arrays sharing one grid of `pixel_size` metres.
        /// Optical periods are lists of (green, nir) arrays.
        #[pyo3(signature = (sar_before, sar_after, pixel_size, optical_before=None, optical_after=None, slope=None, occurrence=None))]
        #[allow(clippy::too_many_arguments)]
        fn detect(
            &self,
            py: Python,
            sar_before: PyReadonlyArray2<f32>,
            sar_after: PyReadonlyArray2<f32>,
            pixel_size: f64,
            optical_before: Option<Vec<(PyReadonlyArray2<f32>, PyReadonlyArray2<f32>)>>,
            optical_after: Option<Vec<(PyReadonlyArray2<f32>, PyReadonlyArray2<f32>)>>,
            slope: Option<PyReadonlyArray2<f32>>,
            occurrence: Option<PyReadonlyArray2<f32>>,
        ) -> PyResult<PyObject> {
            let config = self.pipeline.config();
            let band = config.sar_band.as_str();
            let before = local_raster(band, sar_before, pixel_size);
            let after = local_raster(band, sar_after, pixel_size);
            let region = Region::covering(&before)?;

            let bands = (config.optical_bands.green.as_str(), config.optical_bands.nir.as_str());
            let scenes = |list: Option<Vec<(PyReadonlyArray2<f32>, PyReadonlyArray2<f32>)>>| -> PyResult<Vec<Raster>> {
                list.unwrap_or_default()
                    .into_iter()
                    .map(|(green, nir)| optical_scene(green, nir, pixel_size, bands))
                    .collect()
            };

            let mut inputs = FloodInputs::new(before, after, region)
                .with_optical(scenes(optical_before)?, scenes(optical_after)?);
            if let Some(slope) = slope {
                inputs = inputs.with_terrain(Terrain::SlopeDegrees(local_raster("slope", slope, pixel_size)));
            }
            if let Some(occurrence) = occurrence {
                inputs = inputs.with_permanent_water(local_raster("occurrence", occurrence, pixel_size));
            }

            let detection = self.pipeline.run(&inputs)?;

            let result = PyDict::new(py);
            result.set_item("flood_mask", detection.final_mask.data.to_pyarray(py))?;
            result.set_item("sar_mask", detection.sar_mask.data.to_pyarray(py))?;
            if let Some(mask) = &detection.optical_mask {
                result.set_item("optical_mask", mask.data.to_pyarray(py))?;
            }
            result.set_item("sar_threshold", detection.sar_threshold)?;
            result.set_item("optical_threshold", detection.optical_threshold)?;
            result.set_item("area", detection.estimate.area)?;
            result.set_item("pixel_count", detection.estimate.pixel_count)?;
            result.set_item("degraded", detection.quality.degraded)?;
            Ok(result.into())
        }
    }

    /// Convert dB backscatter to linear intensity
    #[pyfunction]
    fn to_linear(py: Python, data: PyReadonlyArray2<f32>) -> PyResult<PyObject> {
        let linear = crate::core::radiometric::to_linear_array(&numpy_to_array2(data))?;
        Ok(linear.to_pyarray(py).into())
    }

    /// Convert linear intensity to dB; non-positive samples become NaN or `floor_db`
    #[pyfunction]
    #[pyo3(signature = (data, floor_db=None))]
    fn to_db(py: Python, data: PyReadonlyArray2<f32>, floor_db: Option<f32>) -> PyResult<PyObject> {
        let policy = match floor_db {
            Some(floor_db) => DbConversionPolicy::Clamp { floor_db },
            None => DbConversionPolicy::NoData,
        };
        let db = crate::core::radiometric::to_db_array(&numpy_to_array2(data), policy)?;
        Ok(db.to_pyarray(py).into())
    }

    /// Speckle filter a linear intensity image
    #[pyfunction]
    #[pyo3(signature = (image, filter_type="refined_lee", window_size=7, num_looks=1.0))]
    fn apply_speckle_filter(
        py: Python,
        image: PyReadonlyArray2<f32>,
        filter_type: &str,
        window_size: usize,
        num_looks: f32,
    ) -> PyResult<PyObject> {
        let filter = SpeckleFilter::with_params(SpeckleFilterParams {
            window_size,
            num_looks,
            ..SpeckleFilterParams::default()
        });
        let filtered = filter.apply_filter(&numpy_to_array2(image), parse_filter_type(filter_type)?)?;
        Ok(filtered.to_pyarray(py).into())
    }

    /// Percentile threshold and self-masked detection mask of a change array
    #[pyfunction]
    fn percentile_threshold(py: Python, change: PyReadonlyArray2<f32>, percentile: f64) -> PyResult<PyObject> {
        let change = local_raster("change", change, 1.0);
        let region = Region::covering(&change)?;
        let outcome = crate::core::threshold::threshold_mask(
            &change,
            &region,
            crate::core::threshold::ThresholdSpec::Percentile(percentile),
        )?;
        let result = PyDict::new(py);
        result.set_item("mask", outcome.mask.data.to_pyarray(py))?;
        result.set_item("threshold", outcome.threshold)?;
        Ok(result.into())
    }

    /// Slope in degrees of an elevation array
    #[pyfunction]
    fn slope_degrees(py: Python, dem: PyReadonlyArray2<f32>, pixel_size: f64) -> PyResult<PyObject> {
        let slope = crate::core::terrain::slope_degrees(&local_raster("elevation", dem, pixel_size))?;
        Ok(slope.data().to_pyarray(py).into())
    }

    /// Flooded area of a mask array
    #[pyfunction]
    #[pyo3(signature = (mask, pixel_size, unit_divisor=10_000.0))]
    fn flooded_area(mask: PyReadonlyArray2<u8>, pixel_size: f64, unit_divisor: f64) -> PyResult<f64> {
        let data = numpy_to_array2(mask);
        let grid = Raster::from_array("mask", ndarray::Array2::zeros(data.dim()), pixel_size);
        let mask = BinaryMask::from_raster(&grid, data)?;
        let region = Region::covering(&grid)?;
        Ok(crate::core::area::flooded_area(&mask, &region, unit_divisor)?.area)
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_class::<PyFloodDetector>()?;

        m.add_function(wrap_pyfunction!(to_linear, m)?)?;
        m.add_function(wrap_pyfunction!(to_db, m)?)?;
        m.add_function(wrap_pyfunction!(apply_speckle_filter, m)?)?;
        m.add_function(wrap_pyfunction!(percentile_threshold, m)?)?;
        m.add_function(wrap_pyfunction!(slope_degrees, m)?)?;
        m.add_function(wrap_pyfunction!(flooded_area, m)?)?;

        m.add("__version__", env!("CARGO_PKG_VERSION"))?;
        Ok(())
    }
}
