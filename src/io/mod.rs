//! Input/output: GeoTIFF rasters and JSON run reports

pub mod geotiff;
pub mod report;

pub use geotiff::{read_mask, read_raster, write_detection, write_mask, write_raster};
pub use report::{write_report, FloodReport};
