use crate::config::DbConversionPolicy;
use crate::types::{Band, FloodError, FloodReal, FloodResult, Raster, RealImage};

/// Reject infinite samples; `NaN` is no-data and passes through
pub(crate) fn ensure_no_infinities(data: &RealImage, operation: &str) -> FloodResult<()> {
    if let Some(pos) = data.iter().position(|v| v.is_infinite()) {
        let cols = data.ncols();
        return Err(FloodError::InvalidInput(format!(
            "{}: infinite sample at pixel ({}, {})",
            operation,
            pos / cols,
            pos % cols
        )));
    }
    Ok(())
}

/// Convert backscatter from dB to linear intensity: `10^(x/10)`
pub fn to_linear_array(db: &RealImage) -> FloodResult<RealImage> {
    ensure_no_infinities(db, "dB to linear conversion")?;
    // NaN stays NaN through powf
    Ok(db.mapv(|x| (10.0 as FloodReal).powf(x / 10.0)))
}

/// Convert linear intensity to dB: `10·log10(x)`, non-positive samples per `policy`
pub fn to_db_array(linear: &RealImage, policy: DbConversionPolicy) -> FloodResult<RealImage> {
    ensure_no_infinities(linear, "linear to dB conversion")?;

    let mut out_of_domain = 0usize;
    let db = linear.mapv(|x| {
        if x.is_nan() {
            FloodReal::NAN
        } else if x > 0.0 {
            10.0 * x.log10()
        } else {
            out_of_domain += 1;
            match policy {
                DbConversionPolicy::NoData => FloodReal::NAN,
                DbConversionPolicy::Clamp { floor_db } => floor_db,
            }
        }
    });

    if out_of_domain > 0 {
        log::debug!(
            "{} non-positive samples outside the dB domain handled as {:?}",
            out_of_domain,
            policy
        );
    }
    Ok(db)
}

/// dB to linear for every band of `raster`
pub fn to_linear(raster: &Raster) -> FloodResult<Raster> {
    log::debug!("Converting {:?} from dB to linear units", raster.band_names());
    let mut converted = Vec::with_capacity(raster.bands().len());
    for band in raster.bands() {
        converted.push(Band::new(band.name.clone(), to_linear_array(&band.data)?));
    }
    Raster::new(converted, raster.geo_transform, raster.coordinate_system)
}

/// Linear to dB for every band of `raster`
pub fn to_db(raster: &Raster, policy: DbConversionPolicy) -> FloodResult<Raster> {
    log::debug!("Converting {:?} to dB scale", raster.band_names());
    let mut converted = Vec::with_capacity(raster.bands().len());
    for band in raster.bands() {
        converted.push(Band::new(band.name.clone(), to_db_array(&band.data, policy)?));
    }
    Raster::new(converted, raster.geo_transform, raster.coordinate_system)
}
