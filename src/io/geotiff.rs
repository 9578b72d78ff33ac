//! GeoTIFF read/write through GDAL
//!
//! Real rasters are written as `Float32` with `NaN` no-data, masks as `Byte`
//! with no-data 255. Band names travel in the `NAME` band metadata item.

use crate::config::FloodConfig;
use crate::core::pipeline::FloodDetection;
use crate::core::radiometric::to_db;
use crate::types::{
    Band, BinaryMask, CoordinateSystem, FloodError, FloodResult, GeoTransform, Raster, MASK_NODATA,
};
use gdal::raster::{Buffer, GdalType};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager, Metadata};
use ndarray::Array2;
use std::path::{Path, PathBuf};

const BAND_NAME_KEY: &str = "NAME";

fn coordinate_system_of(dataset: &Dataset) -> CoordinateSystem {
    match dataset.spatial_ref().and_then(|srs| srs.auth_code()) {
        Ok(code) if code > 0 => CoordinateSystem::from_epsg(code as u32),
        _ => CoordinateSystem::Local,
    }
}

/// Read every band of a GeoTIFF as `f32`, mapping the band no-data value to `NaN`
pub fn read_raster<P: AsRef<Path>>(path: P) -> FloodResult<Raster> {
    log::info!("Reading raster from: {}", path.as_ref().display());

    let dataset = Dataset::open(path.as_ref())?;
    let geo_transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let coordinate_system = coordinate_system_of(&dataset);
    let (width, height) = dataset.raster_size();
    log::debug!("Raster size: {}x{}, {:?}", width, height, coordinate_system);

    let mut bands = Vec::new();
    for index in 1..=dataset.raster_count() {
        let rasterband = dataset.rasterband(index)?;
        let buffer = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
        let mut data = Array2::from_shape_vec((height, width), buffer.data)
            .map_err(|e| FloodError::Processing(format!("Failed to reshape band {}: {}", index, e)))?;
        if let Some(nodata) = rasterband.no_data_value() {
            if !nodata.is_nan() {
                let nodata = nodata as f32;
                data.mapv_inplace(|v| if v == nodata { f32::NAN } else { v });
            }
        }
        let name = rasterband
            .metadata_item(BAND_NAME_KEY, "")
            .unwrap_or_else(|| format!("band_{}", index));
        bands.push(Band::new(name, data));
    }

    Raster::new(bands, geo_transform, coordinate_system)
}

/// Read a mask written by [`write_mask`]
pub fn read_mask<P: AsRef<Path>>(path: P) -> FloodResult<BinaryMask> {
    let dataset = Dataset::open(path.as_ref())?;
    let (width, height) = dataset.raster_size();
    let rasterband = dataset.rasterband(1)?;
    let buffer = rasterband.read_as::<u8>((0, 0), (width, height), (width, height), None)?;
    let data = Array2::from_shape_vec((height, width), buffer.data)
        .map_err(|e| FloodError::Processing(format!("Failed to reshape mask: {}", e)))?;
    Ok(BinaryMask {
        data,
        geo_transform: GeoTransform::from_gdal(dataset.geo_transform()?),
        coordinate_system: coordinate_system_of(&dataset),
    })
}

fn create_dataset<T: GdalType>(
    path: &Path,
    shape: (usize, usize),
    band_count: usize,
    geo_transform: &GeoTransform,
    epsg: Option<u32>,
) -> FloodResult<Dataset> {
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = shape;
    let mut dataset =
        driver.create_with_band_type::<T, _>(path, width as isize, height as isize, band_count as isize)?;

    dataset.set_geo_transform(&geo_transform.to_gdal())?;
    match epsg {
        Some(code) => dataset.set_spatial_ref(&SpatialRef::from_epsg(code)?)?,
        None => log::debug!("No EPSG code for {}, writing without spatial reference", path.display()),
    }
    Ok(dataset)
}

/// Write all bands of `raster`; `epsg` overrides the raster's own EPSG code
pub fn write_raster<P: AsRef<Path>>(raster: &Raster, path: P, epsg: Option<u32>) -> FloodResult<()> {
    log::info!("Saving raster as GeoTIFF: {}", path.as_ref().display());

    let epsg = epsg.or(raster.coordinate_system.epsg());
    let dataset = create_dataset::<f32>(
        path.as_ref(),
        raster.shape(),
        raster.bands().len(),
        &raster.geo_transform,
        epsg,
    )?;

    let (height, width) = raster.shape();
    for (index, band) in raster.bands().iter().enumerate() {
        let mut rasterband = dataset.rasterband(index as isize + 1)?;
        let flat_data: Vec<f32> = band.data.iter().cloned().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;
        rasterband.set_no_data_value(Some(f64::NAN))?;
        rasterband.set_metadata_item(BAND_NAME_KEY, &band.name, "")?;
    }
    Ok(())
}

/// Write a mask as a single `Byte` band with no-data 255
pub fn write_mask<P: AsRef<Path>>(mask: &BinaryMask, path: P, epsg: Option<u32>) -> FloodResult<()> {
    log::info!("Saving mask as GeoTIFF: {}", path.as_ref().display());

    let epsg = epsg.or(mask.coordinate_system.epsg());
    let dataset = create_dataset::<u8>(path.as_ref(), mask.shape(), 1, &mask.geo_transform, epsg)?;

    let (height, width) = mask.shape();
    let mut rasterband = dataset.rasterband(1)?;
    let flat_data: Vec<u8> = mask.data.iter().cloned().collect();
    let buffer = Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &buffer)?;
    rasterband.set_no_data_value(Some(MASK_NODATA as f64))?;
    Ok(())
}

fn export_epsg(cs: CoordinateSystem, fallback: u32) -> u32 {
    cs.epsg().unwrap_or(fallback)
}

/// Write the final mask, every intermediate mask, the SAR composites (in dB,
/// non-positive samples per `config.db_policy`) and the change rasters of one
/// run into `dir`. Grids without a registered reference system are tagged
/// with `config.export_epsg`.
pub fn write_detection<P: AsRef<Path>>(
    detection: &FloodDetection,
    dir: P,
    config: &FloodConfig,
) -> FloodResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let epsg = Some(export_epsg(detection.final_mask.coordinate_system, config.export_epsg));

    let mut masks: Vec<(&str, &BinaryMask)> = vec![
        ("flood_mask", &detection.final_mask),
        ("fused_mask", &detection.fused_mask),
        ("sar_mask", &detection.sar_mask),
    ];
    if let Some(mask) = &detection.optical_mask {
        masks.push(("optical_mask", mask));
    }
    if let Some(mask) = &detection.intersection {
        masks.push(("intersection_mask", mask));
    }
    if let Some(mask) = &detection.union {
        masks.push(("union_mask", mask));
    }

    let mut written = Vec::new();
    for (name, mask) in masks {
        let path = dir.join(format!("{}.tif", name));
        write_mask(mask, &path, epsg)?;
        written.push(path);
    }

    let sar_before = to_db(&detection.sar_before, config.db_policy)?;
    let sar_after = to_db(&detection.sar_after, config.db_policy)?;
    let mut rasters = vec![
        ("sar_before", &sar_before),
        ("sar_after", &sar_after),
        ("sar_change", &detection.sar_change),
    ];
    if let Some(change) = &detection.optical_change {
        rasters.push(("optical_change", change));
    }
    for (name, raster) in rasters {
        let path = dir.join(format!("{}.tif", name));
        write_raster(raster, &path, epsg)?;
        written.push(path);
    }

    log::info!("Exported {} GeoTIFFs to {}", written.len(), dir.display());
    Ok(written)
}
