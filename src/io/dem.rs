use crate::types::{BoundingBox, GeoTransform, SarError, SarResult};
use ndarray::Array2;
use std::sync::Arc;

/// Digital elevation model queried by geographic position
///
/// Pixel coordinates follow the DEM raster: `x` is the column, `y` the row,
/// and integer coordinates are the DEM posts.
pub trait ElevationModel: Send + Sync {
    /// Height above the ellipsoid in meters, `None` for no-data
    fn elevation(&self, lat: f64, lon: f64) -> Option<f64>;

    /// Geographic position `(lat, lon)` of a DEM pixel coordinate
    fn pixel_to_geo(&self, x: f64, y: f64) -> (f64, f64);

    /// DEM pixel coordinate `(x, y)` of a geographic position
    fn geo_to_pixel(&self, lat: f64, lon: f64) -> (f64, f64);

    /// Post spacing in degrees as `(lat, lon)`
    fn sampling_interval(&self) -> (f64, f64) {
        let (lat0, lon0) = self.pixel_to_geo(0.0, 0.0);
        let (lat1, lon1) = self.pixel_to_geo(1.0, 1.0);
        ((lat1 - lat0).abs(), (lon1 - lon0).abs())
    }
}

/// Builds the run's elevation model on first use
pub type DemFactory = Box<dyn Fn() -> SarResult<Arc<dyn ElevationModel>> + Send + Sync>;

/// In-memory DEM on a regular lat/lon grid
#[derive(Debug, Clone)]
pub struct GridDem {
    data: Array2<f32>,
    transform: GeoTransform,
    no_data: f32,
}

impl GridDem {
    pub fn new(data: Array2<f32>, transform: GeoTransform, no_data: f32) -> SarResult<Self> {
        if data.nrows() < 2 || data.ncols() < 2 {
            return Err(SarError::InvalidFormat(format!(
                "DEM must have at least 2x2 posts, got {:?}",
                data.dim()
            )));
        }
        if transform.pixel_width == 0.0 || transform.pixel_height == 0.0 {
            return Err(SarError::InvalidFormat(
                "DEM geotransform has zero pixel size".to_string(),
            ));
        }
        if transform.rotation_x != 0.0 || transform.rotation_y != 0.0 {
            return Err(SarError::InvalidFormat(
                "Rotated DEM geotransforms are not supported".to_string(),
            ));
        }
        Ok(Self { data, transform, no_data })
    }

    /// Constant-height DEM covering `bbox` with posts every `spacing` degrees
    pub fn flat(bbox: &BoundingBox, spacing: f64, height: f32) -> SarResult<Self> {
        let cols = ((bbox.max_lon - bbox.min_lon) / spacing).ceil() as usize + 1;
        let rows = ((bbox.max_lat - bbox.min_lat) / spacing).ceil() as usize + 1;
        let transform = GeoTransform {
            top_left_x: bbox.min_lon,
            pixel_width: spacing,
            rotation_x: 0.0,
            top_left_y: bbox.max_lat,
            rotation_y: 0.0,
            pixel_height: -spacing,
        };
        Self::new(Array2::from_elem((rows, cols), height), transform, -32768.0)
    }

    pub fn no_data_value(&self) -> f32 {
        self.no_data
    }

    pub fn data_mut(&mut self) -> &mut Array2<f32> {
        &mut self.data
    }

    fn is_valid(&self, value: f32) -> bool {
        value != self.no_data && value.is_finite()
    }
}

impl ElevationModel for GridDem {
    /// Bilinear elevation, no-data if any contributing post is no-data
    fn elevation(&self, lat: f64, lon: f64) -> Option<f64> {
        let (dem_x, dem_y) = self.geo_to_pixel(lat, lon);
        let (dem_height, dem_width) = self.data.dim();

        if !(dem_x >= 0.0 && dem_y >= 0.0) {
            return None;
        }
        if dem_x > (dem_width - 1) as f64 || dem_y > (dem_height - 1) as f64 {
            return None;
        }

        let col = (dem_x.floor() as usize).min(dem_width - 2);
        let row = (dem_y.floor() as usize).min(dem_height - 2);
        let dx = dem_x - col as f64;
        let dy = dem_y - row as f64;

        let v11 = self.data[[row, col]];
        let v12 = self.data[[row + 1, col]];
        let v21 = self.data[[row, col + 1]];
        let v22 = self.data[[row + 1, col + 1]];

        if !(self.is_valid(v11) && self.is_valid(v12) && self.is_valid(v21) && self.is_valid(v22)) {
            return None;
        }

        let v1 = v11 as f64 * (1.0 - dx) + v21 as f64 * dx;
        let v2 = v12 as f64 * (1.0 - dx) + v22 as f64 * dx;
        Some(v1 * (1.0 - dy) + v2 * dy)
    }

    fn pixel_to_geo(&self, x: f64, y: f64) -> (f64, f64) {
        let lon = self.transform.top_left_x + x * self.transform.pixel_width;
        let lat = self.transform.top_left_y + y * self.transform.pixel_height;
        (lat, lon)
    }

    fn geo_to_pixel(&self, lat: f64, lon: f64) -> (f64, f64) {
        let x = (lon - self.transform.top_left_x) / self.transform.pixel_width;
        let y = (lat - self.transform.top_left_y) / self.transform.pixel_height;
        (x, y)
    }
}

/// Geoid undulation (height of the geoid above the ellipsoid)
pub trait GeoidModel: Send + Sync {
    fn undulation(&self, lat: f64, lon: f64) -> f64;
}

/// Geoid coincident with the ellipsoid
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroGeoid;

impl GeoidModel for ZeroGeoid {
    fn undulation(&self, _lat: f64, _lon: f64) -> f64 {
        0.0
    }
}

/// Global geoid grid, rows from `north_lat` southwards, columns eastwards from `west_lon`
#[derive(Debug, Clone)]
pub struct GridGeoid {
    undulation: Array2<f32>,
    north_lat: f64,
    west_lon: f64,
    spacing: f64,
}

impl GridGeoid {
    pub fn new(undulation: Array2<f32>, north_lat: f64, west_lon: f64, spacing: f64) -> SarResult<Self> {
        if undulation.nrows() < 2 || undulation.ncols() < 2 || spacing <= 0.0 {
            return Err(SarError::InvalidFormat(
                "Geoid grid needs at least 2x2 samples and a positive spacing".to_string(),
            ));
        }
        Ok(Self { undulation, north_lat, west_lon, spacing })
    }
}

impl GeoidModel for GridGeoid {
    fn undulation(&self, lat: f64, lon: f64) -> f64 {
        let (rows, cols) = self.undulation.dim();
        let y = ((self.north_lat - lat) / self.spacing).clamp(0.0, (rows - 1) as f64);
        let x = ((lon - self.west_lon).rem_euclid(360.0) / self.spacing).clamp(0.0, (cols - 1) as f64);

        let row = (y.floor() as usize).min(rows - 2);
        let col = (x.floor() as usize).min(cols - 2);
        let dy = y - row as f64;
        let dx = x - col as f64;

        let g = |r: usize, c: usize| self.undulation[[r, c]] as f64;
        let top = g(row, col) * (1.0 - dx) + g(row, col + 1) * dx;
        let bottom = g(row + 1, col) * (1.0 - dx) + g(row + 1, col + 1) * dx;
        top * (1.0 - dy) + bottom * dy
    }
}

/// Elevation source for back-geocoding
///
/// Where the DEM has no data the geoid height is substituted, unless areas
/// without elevation are masked out, in which case the point is rejected.
pub struct ElevationLookup {
    dem: Arc<dyn ElevationModel>,
    geoid: Arc<dyn GeoidModel>,
    mask_out_no_elevation: bool,
}

impl ElevationLookup {
    pub fn new(dem: Arc<dyn ElevationModel>, geoid: Arc<dyn GeoidModel>, mask_out_no_elevation: bool) -> Self {
        Self { dem, geoid, mask_out_no_elevation }
    }

    /// Height used for geolocation, `None` only when masking rejects the point
    pub fn elevation(&self, lat: f64, lon: f64) -> Option<f64> {
        match self.dem.elevation(lat, lon) {
            Some(height) => Some(height),
            None if self.mask_out_no_elevation => None,
            None => Some(self.geoid.undulation(lat, lon)),
        }
    }

    /// Raw DEM height without geoid substitution
    pub fn dem_elevation(&self, lat: f64, lon: f64) -> Option<f64> {
        self.dem.elevation(lat, lon)
    }

    pub fn masks_no_elevation(&self) -> bool {
        self.mask_out_no_elevation
    }

    pub fn dem(&self) -> &dyn ElevationModel {
        self.dem.as_ref()
    }
}
