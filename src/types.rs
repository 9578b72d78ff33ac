use geo::{Area, BoundingRect, Contains, Coord, LineString, Point, Polygon};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Real-valued sample type used for every raster band
pub type FloodReal = f32;

/// 2D real raster data array (rows x cols), `NaN` marks no-data
pub type RealImage = Array2<FloodReal>;

/// 2D mask data array (rows x cols)
pub type MaskImage = Array2<u8>;

/// Mask value for a pixel that was evaluated and not detected
pub const MASK_CLEAR: u8 = 0;
/// Mask value for a detected (flooded) pixel
pub const MASK_DETECTED: u8 = 1;
/// Mask value for a masked-out pixel, excluded from every reduction
pub const MASK_NODATA: u8 = 255;

/// Coordinate system enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Geographic coordinates (longitude, latitude) on WGS84, EPSG:4326
    Geographic,
    /// Projected coordinates in metres (e.g., UTM)
    Projected { epsg: u32 },
    /// Planar metric grid without a registered reference system
    Local,
}

impl CoordinateSystem {
    /// EPSG code for export, if the system has one
    pub fn epsg(&self) -> Option<u32> {
        match self {
            CoordinateSystem::Geographic => Some(4326),
            CoordinateSystem::Projected { epsg } => Some(*epsg),
            CoordinateSystem::Local => None,
        }
    }

    pub fn from_epsg(epsg: u32) -> Self {
        if epsg == 4326 {
            CoordinateSystem::Geographic
        } else {
            CoordinateSystem::Projected { epsg }
        }
    }
}

/// Geospatial transformation parameters (GDAL affine coefficients)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up grid with square pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_size,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map coordinates of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }

    /// Coarsen the grid by integer block factors (rows, cols)
    pub fn scaled(&self, row_factor: usize, col_factor: usize) -> Self {
        Self {
            top_left_x: self.top_left_x,
            pixel_width: self.pixel_width * col_factor as f64,
            rotation_x: self.rotation_x * row_factor as f64,
            top_left_y: self.top_left_y,
            rotation_y: self.rotation_y * col_factor as f64,
            pixel_height: self.pixel_height * row_factor as f64,
        }
    }

    pub fn approx_eq(&self, other: &GeoTransform) -> bool {
        self.to_gdal()
            .iter()
            .zip(other.to_gdal().iter())
            .all(|(a, b)| approx::relative_eq!(*a, *b, epsilon = 1e-9, max_relative = 1e-9))
    }
}

/// Metres per degree of latitude and longitude at a WGS84 latitude
fn metres_per_degree(lat_deg: f64) -> (f64, f64) {
    let phi = lat_deg.to_radians();
    let lat_m = 111_132.92 - 559.82 * (2.0 * phi).cos() + 1.175 * (4.0 * phi).cos();
    let lon_m = 111_412.84 * phi.cos() - 93.5 * (3.0 * phi).cos();
    (lat_m, lon_m)
}

/// A named raster band
#[derive(Debug, Clone)]
pub struct Band {
    pub name: String,
    pub data: RealImage,
}

impl Band {
    pub fn new(name: impl Into<String>, data: RealImage) -> Self {
        Self { name: name.into(), data }
    }
}

/// Georeferenced multi-band raster. Operations return new rasters.
#[derive(Debug, Clone)]
pub struct Raster {
    bands: Vec<Band>,
    pub geo_transform: GeoTransform,
    pub coordinate_system: CoordinateSystem,
}

impl Raster {
    /// Build a raster from bands sharing one shape
    pub fn new(
        bands: Vec<Band>,
        geo_transform: GeoTransform,
        coordinate_system: CoordinateSystem,
    ) -> FloodResult<Self> {
        let first = bands
            .first()
            .ok_or_else(|| FloodError::InvalidInput("Raster needs at least one band".to_string()))?;
        let shape = first.data.dim();
        if shape.0 == 0 || shape.1 == 0 {
            return Err(FloodError::InvalidInput("Raster bands must not be empty".to_string()));
        }
        if let Some(bad) = bands.iter().find(|b| b.data.dim() != shape) {
            return Err(FloodError::InvalidInput(format!(
                "Band '{}' is {:?}, expected {:?}",
                bad.name,
                bad.data.dim(),
                shape
            )));
        }

        Ok(Self { bands, geo_transform, coordinate_system })
    }

    /// Single-band raster with an explicit georeference
    pub fn single_band(
        name: impl Into<String>,
        data: RealImage,
        geo_transform: GeoTransform,
        coordinate_system: CoordinateSystem,
    ) -> Self {
        Self {
            bands: vec![Band::new(name, data)],
            geo_transform,
            coordinate_system,
        }
    }

    /// Single-band raster on a local metric grid whose lower-left corner is the origin
    pub fn from_array(name: impl Into<String>, data: RealImage, resolution_m: f64) -> Self {
        let rows = data.nrows() as f64;
        let gt = GeoTransform::north_up(0.0, rows * resolution_m, resolution_m);
        Self::single_band(name, data, gt, CoordinateSystem::Local)
    }

    pub fn shape(&self) -> (usize, usize) {
        self.bands[0].data.dim()
    }

    pub fn rows(&self) -> usize {
        self.shape().0
    }

    pub fn cols(&self) -> usize {
        self.shape().1
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    /// Data of the first band
    pub fn data(&self) -> &RealImage {
        &self.bands[0].data
    }

    pub fn band(&self, name: &str) -> FloodResult<&RealImage> {
        self.bands
            .iter()
            .find(|b| b.name == name)
            .map(|b| &b.data)
            .ok_or_else(|| {
                FloodError::InvalidInput(format!(
                    "Band '{}' not found (available: {:?})",
                    name,
                    self.band_names()
                ))
            })
    }

    /// New single-band raster holding only `name`
    pub fn select(&self, name: &str) -> FloodResult<Raster> {
        let data = self.band(name)?.clone();
        Ok(self.with_data(name, data))
    }

    /// New single-band raster with this raster's georeference
    pub fn with_data(&self, name: impl Into<String>, data: RealImage) -> Raster {
        Raster::single_band(name, data, self.geo_transform, self.coordinate_system)
    }

    /// Apply `f` to every band, keeping names and georeference
    pub fn map_bands<F>(&self, f: F) -> Raster
    where
        F: Fn(&RealImage) -> RealImage,
    {
        Raster {
            bands: self
                .bands
                .iter()
                .map(|b| Band::new(b.name.clone(), f(&b.data)))
                .collect(),
            geo_transform: self.geo_transform,
            coordinate_system: self.coordinate_system,
        }
    }

    /// Band arithmetic requires the same grid on both sides
    pub fn ensure_aligned(&self, other: &Raster) -> FloodResult<()> {
        check_alignment(
            (self.shape(), &self.geo_transform, self.coordinate_system),
            (other.shape(), &other.geo_transform, other.coordinate_system),
        )
    }

    /// Set every pixel whose centre lies outside `region` to no-data
    pub fn clip(&self, region: &Region) -> Raster {
        let coverage = region.coverage(&self.geo_transform, self.shape());
        self.map_bands(|data| {
            let mut clipped = data.clone();
            ndarray::Zip::from(&mut clipped)
                .and(&coverage)
                .for_each(|v, &inside| {
                    if !inside {
                        *v = FloodReal::NAN;
                    }
                });
            clipped
        })
    }

    /// Ground pixel spacing (dx, dy) in metres at the raster centre
    pub fn pixel_spacing_m(&self) -> (f64, f64) {
        pixel_spacing_m(&self.geo_transform, self.coordinate_system, self.rows() / 2)
    }

    /// Ground area of one pixel in `row`, in square metres
    pub fn pixel_area_m2(&self, row: usize) -> f64 {
        pixel_area_m2(&self.geo_transform, self.coordinate_system, row)
    }

    /// (min_x, min_y, max_x, max_y) of the grid footprint
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        grid_extent(&self.geo_transform, self.shape())
    }
}

fn check_alignment(
    a: ((usize, usize), &GeoTransform, CoordinateSystem),
    b: ((usize, usize), &GeoTransform, CoordinateSystem),
) -> FloodResult<()> {
    if a.0 != b.0 {
        return Err(FloodError::InvalidInput(format!(
            "Raster shapes differ: {:?} vs {:?}",
            a.0, b.0
        )));
    }
    if a.2 != b.2 {
        return Err(FloodError::InvalidInput(format!(
            "Coordinate systems differ: {:?} vs {:?}",
            a.2, b.2
        )));
    }
    if !a.1.approx_eq(b.1) {
        return Err(FloodError::InvalidInput(format!(
            "Geotransforms differ: {:?} vs {:?}",
            a.1, b.1
        )));
    }
    Ok(())
}

fn pixel_spacing_m(gt: &GeoTransform, cs: CoordinateSystem, row: usize) -> (f64, f64) {
    let dx = gt.pixel_width.hypot(gt.rotation_y);
    let dy = gt.pixel_height.hypot(gt.rotation_x);
    match cs {
        CoordinateSystem::Geographic => {
            let (_, lat) = gt.pixel_center(row, 0);
            let (lat_m, lon_m) = metres_per_degree(lat);
            (dx * lon_m, dy * lat_m)
        }
        CoordinateSystem::Projected { .. } | CoordinateSystem::Local => (dx, dy),
    }
}

fn pixel_area_m2(gt: &GeoTransform, cs: CoordinateSystem, row: usize) -> f64 {
    let det = (gt.pixel_width * gt.pixel_height - gt.rotation_x * gt.rotation_y).abs();
    match cs {
        CoordinateSystem::Geographic => {
            let (_, lat) = gt.pixel_center(row, 0);
            let (lat_m, lon_m) = metres_per_degree(lat);
            det * lat_m * lon_m
        }
        CoordinateSystem::Projected { .. } | CoordinateSystem::Local => det,
    }
}

fn grid_extent(gt: &GeoTransform, shape: (usize, usize)) -> (f64, f64, f64, f64) {
    let (rows, cols) = (shape.0 as f64, shape.1 as f64);
    let corners = [(0.0, 0.0), (0.0, cols), (rows, 0.0), (rows, cols)];
    let mut extent = (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    for (r, c) in corners {
        let x = gt.top_left_x + c * gt.pixel_width + r * gt.rotation_x;
        let y = gt.top_left_y + c * gt.rotation_y + r * gt.pixel_height;
        extent.0 = extent.0.min(x);
        extent.1 = extent.1.min(y);
        extent.2 = extent.2.max(x);
        extent.3 = extent.3.max(y);
    }
    extent
}

/// Single-band detection mask: 1 detected, 0 clear, 255 masked-out
#[derive(Debug, Clone)]
pub struct BinaryMask {
    pub data: MaskImage,
    pub geo_transform: GeoTransform,
    pub coordinate_system: CoordinateSystem,
}

impl BinaryMask {
    /// Mask with the grid of `raster`
    pub fn from_raster(raster: &Raster, data: MaskImage) -> FloodResult<Self> {
        if data.dim() != raster.shape() {
            return Err(FloodError::InvalidInput(format!(
                "Mask shape {:?} does not match raster shape {:?}",
                data.dim(),
                raster.shape()
            )));
        }
        Ok(Self {
            data,
            geo_transform: raster.geo_transform,
            coordinate_system: raster.coordinate_system,
        })
    }

    /// Fully masked-out mask on the grid of `raster`
    pub fn empty_like(raster: &Raster) -> Self {
        Self {
            data: Array2::from_elem(raster.shape(), MASK_NODATA),
            geo_transform: raster.geo_transform,
            coordinate_system: raster.coordinate_system,
        }
    }

    /// Same grid, different values
    pub fn with_data(&self, data: MaskImage) -> Self {
        Self {
            data,
            geo_transform: self.geo_transform,
            coordinate_system: self.coordinate_system,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn is_detected(&self, row: usize, col: usize) -> bool {
        self.data[[row, col]] == MASK_DETECTED
    }

    pub fn detected_count(&self) -> usize {
        self.data.iter().filter(|&&v| v == MASK_DETECTED).count()
    }

    pub fn is_empty(&self) -> bool {
        self.detected_count() == 0
    }

    /// Turn clear pixels into masked-out pixels
    pub fn self_mask(&self) -> Self {
        self.with_data(self.data.mapv(|v| if v == MASK_DETECTED { MASK_DETECTED } else { MASK_NODATA }))
    }

    /// Replace masked-out pixels by `fill`
    pub fn unmask(&self, fill: u8) -> Self {
        self.with_data(self.data.mapv(|v| if v == MASK_NODATA { fill } else { v }))
    }

    pub fn ensure_aligned(&self, other: &BinaryMask) -> FloodResult<()> {
        check_alignment(
            (self.shape(), &self.geo_transform, self.coordinate_system),
            (other.shape(), &other.geo_transform, other.coordinate_system),
        )
    }

    pub fn ensure_aligned_with(&self, raster: &Raster) -> FloodResult<()> {
        check_alignment(
            (self.shape(), &self.geo_transform, self.coordinate_system),
            (raster.shape(), &raster.geo_transform, raster.coordinate_system),
        )
    }

    pub fn pixel_area_m2(&self, row: usize) -> f64 {
        pixel_area_m2(&self.geo_transform, self.coordinate_system, row)
    }
}

/// Region of interest polygon, in the coordinates of the rasters it is applied to
#[derive(Debug, Clone)]
pub struct Region {
    polygon: Polygon<f64>,
}

impl Region {
    pub fn new(polygon: Polygon<f64>) -> FloodResult<Self> {
        let mut distinct: Vec<Coord<f64>> = Vec::new();
        for c in polygon.exterior().coords() {
            if !c.x.is_finite() || !c.y.is_finite() {
                return Err(FloodError::InvalidInput("Region has non-finite vertices".to_string()));
            }
            if !distinct.contains(c) {
                distinct.push(*c);
            }
        }
        if distinct.len() < 3 || polygon.unsigned_area() <= 0.0 {
            return Err(FloodError::InvalidInput("Region is empty".to_string()));
        }
        Ok(Self { polygon })
    }

    pub fn from_coords(coords: &[(f64, f64)]) -> FloodResult<Self> {
        Self::new(Polygon::new(LineString::from(coords.to_vec()), vec![]))
    }

    pub fn from_bbox(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> FloodResult<Self> {
        Self::from_coords(&[
            (min_x, min_y),
            (max_x, min_y),
            (max_x, max_y),
            (min_x, max_y),
            (min_x, min_y),
        ])
    }

    /// Region spanning the whole footprint of `raster`
    pub fn covering(raster: &Raster) -> FloodResult<Self> {
        let (min_x, min_y, max_x, max_y) = raster.extent();
        Self::from_bbox(min_x, min_y, max_x, max_y)
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    pub fn area(&self) -> f64 {
        self.polygon.unsigned_area()
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        self.polygon.contains(&Point::new(x, y))
    }

    /// Pixels of a grid whose centres fall inside the region
    pub fn coverage(&self, geo_transform: &GeoTransform, shape: (usize, usize)) -> Array2<bool> {
        let bounds = self.polygon.bounding_rect();
        Array2::from_shape_fn(shape, |(row, col)| {
            let (x, y) = geo_transform.pixel_center(row, col);
            match bounds {
                Some(rect) if x < rect.min().x || x > rect.max().x || y < rect.min().y || y > rect.max().y => false,
                Some(_) => self.contains_point(x, y),
                None => false,
            }
        })
    }
}

/// Error types for flood mapping
#[derive(Debug, thiserror::Error)]
pub enum FloodError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Empty result: {0}")]
    EmptyResult(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for flood mapping operations
pub type FloodResult<T> = Result<T, FloodError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_rejects_degenerate_polygon() {
        assert!(matches!(
            Region::from_coords(&[(0.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
            Err(FloodError::InvalidInput(_))
        ));
        assert!(Region::from_bbox(0.0, 0.0, 0.0, 10.0).is_err());
    }

    #[test]
    fn test_region_coverage_on_local_grid() {
        let raster = Raster::from_array("VH", Array2::zeros((4, 4)), 10.0);
        // left half of the grid
        let region = Region::from_bbox(0.0, 0.0, 20.0, 40.0).unwrap();
        let coverage = region.coverage(&raster.geo_transform, raster.shape());
        assert_eq!(coverage.iter().filter(|&&c| c).count(), 8);
        assert!(coverage[[0, 0]] && coverage[[3, 1]]);
        assert!(!coverage[[0, 2]]);
    }

    #[test]
    fn test_clip_sets_outside_to_nodata() {
        let raster = Raster::from_array("VH", Array2::ones((4, 4)), 10.0);
        let region = Region::from_bbox(0.0, 0.0, 20.0, 40.0).unwrap();
        let clipped = raster.clip(&region);
        assert_eq!(clipped.data()[[1, 1]], 1.0);
        assert!(clipped.data()[[1, 3]].is_nan());
    }

    #[test]
    fn test_alignment_check() {
        let a = Raster::from_array("VH", Array2::zeros((4, 4)), 10.0);
        let b = Raster::from_array("VH", Array2::zeros((4, 5)), 10.0);
        let c = Raster::from_array("VH", Array2::zeros((4, 4)), 20.0);
        assert!(a.ensure_aligned(&a.clone()).is_ok());
        assert!(a.ensure_aligned(&b).is_err());
        assert!(a.ensure_aligned(&c).is_err());
    }

    #[test]
    fn test_pixel_area() {
        let local = Raster::from_array("VH", Array2::zeros((2, 2)), 10.0);
        assert!((local.pixel_area_m2(0) - 100.0).abs() < 1e-9);

        // ~10 m at the equator
        let deg = 10.0 / 111_320.0;
        let geo = Raster::single_band(
            "VH",
            Array2::zeros((2, 2)),
            GeoTransform::north_up(0.0, deg, deg),
            CoordinateSystem::Geographic,
        );
        let area = geo.pixel_area_m2(0);
        assert!((area - 100.0).abs() < 1.5, "area was {}", area);
    }

    #[test]
    fn test_mask_self_mask_and_unmask() {
        let raster = Raster::from_array("VH", Array2::zeros((1, 3)), 10.0);
        let mask = BinaryMask::from_raster(
            &raster,
            Array2::from_shape_vec((1, 3), vec![MASK_DETECTED, MASK_CLEAR, MASK_NODATA]).unwrap(),
        )
        .unwrap();
        let masked = mask.self_mask();
        assert_eq!(masked.data.as_slice().unwrap(), &[MASK_DETECTED, MASK_NODATA, MASK_NODATA]);
        let unmasked = masked.unmask(MASK_CLEAR);
        assert_eq!(unmasked.data.as_slice().unwrap(), &[MASK_DETECTED, MASK_CLEAR, MASK_CLEAR]);
    }

    #[test]
    fn test_multiband_select() {
        let raster = Raster::new(
            vec![
                Band::new("B3", Array2::from_elem((2, 2), 0.3)),
                Band::new("B8", Array2::from_elem((2, 2), 0.1)),
            ],
            GeoTransform::north_up(0.0, 20.0, 10.0),
            CoordinateSystem::Local,
        )
        .unwrap();
        assert_eq!(raster.band_names(), vec!["B3", "B8"]);
        let nir = raster.select("B8").unwrap();
        assert_eq!(nir.data()[[0, 0]], 0.1);
        assert!(raster.band("B4").is_err());
    }
}
