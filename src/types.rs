use chrono::{DateTime, Utc};
use ndarray::Array2;
use num_complex::Complex;
use num_traits::Float;
use serde::{Deserialize, Serialize};

/// Complex-valued SAR data type (I + jQ)
pub type SarComplex = Complex<f32>;

/// Real-valued raster band data (I, Q, offsets, phase, elevation)
pub type SarReal = f32;

/// 2D real raster tile (azimuth x range)
pub type SarRealImage = Array2<SarReal>;

/// Earth-centred, earth-fixed position in meters
pub type EarthPoint = [f64; 3];

/// Speed of light in vacuum (m/s)
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl Polarization {
    pub fn parse(value: &str) -> SarResult<Self> {
        match value.to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            _ => Err(SarError::Metadata(format!("Invalid polarization: {}", value))),
        }
    }
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

/// Orbit state vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateVector {
    pub time: DateTime<Utc>,
    pub position: [f64; 3],  // [x, y, z] in meters
    pub velocity: [f64; 3],  // [vx, vy, vz] in m/s
}

/// Precise orbit information
///
/// All azimuth times handled by the engine are seconds relative to
/// `reference_time`, which keeps sub-microsecond resolution in `f64`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrbitData {
    pub state_vectors: Vec<StateVector>,
    pub reference_time: DateTime<Utc>,
}

impl OrbitData {
    /// Seconds elapsed between the orbit reference epoch and `time`
    pub fn seconds_since_reference(&self, time: DateTime<Utc>) -> f64 {
        let delta = time - self.reference_time;
        match delta.num_nanoseconds() {
            Some(ns) => ns as f64 * 1e-9,
            None => delta.num_milliseconds() as f64 * 1e-3,
        }
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Smallest box containing all `(lat, lon)` points; `None` when empty
    pub fn from_points(points: &[(f64, f64)]) -> Option<Self> {
        let (&(lat0, lon0), rest) = points.split_first()?;
        let mut bbox = BoundingBox {
            min_lon: lon0,
            max_lon: lon0,
            min_lat: lat0,
            max_lat: lat0,
        };
        for &(lat, lon) in rest {
            bbox.min_lat = bbox.min_lat.min(lat);
            bbox.max_lat = bbox.max_lat.max(lat);
            bbox.min_lon = bbox.min_lon.min(lon);
            bbox.max_lon = bbox.max_lon.max(lon);
        }
        Some(bbox)
    }

    pub fn expand(&self, delta_lat: f64, delta_lon: f64) -> Self {
        BoundingBox {
            min_lon: self.min_lon - delta_lon,
            max_lon: self.max_lon + delta_lon,
            min_lat: self.min_lat - delta_lat,
            max_lat: self.max_lat + delta_lat,
        }
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

/// Rectangle of raster pixels, `x`/`y` inclusive, `x + width`/`y + height` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl TileRect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle spanning the inclusive pixel bounds
    pub fn from_bounds(min_x: usize, min_y: usize, max_x: usize, max_y: usize) -> Self {
        Self {
            x: min_x,
            y: min_y,
            width: max_x + 1 - min_x,
            height: max_y + 1 - min_y,
        }
    }

    pub fn x_end(&self) -> usize {
        self.x + self.width
    }

    pub fn y_end(&self) -> usize {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Rows of this rectangle falling in `[line_start, line_end)`
    pub fn clip_lines(&self, line_start: usize, line_end: usize) -> Option<TileRect> {
        let y0 = self.y.max(line_start);
        let y1 = self.y_end().min(line_end);
        if y0 >= y1 || self.width == 0 {
            return None;
        }
        Some(TileRect::new(self.x, y0, self.width, y1 - y0))
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }
}

/// Evaluate `c0 + c1*x + c2*x^2 + ...` with Horner's scheme
pub fn polynomial_value<T: Float>(x: T, coefficients: &[T]) -> T {
    coefficients
        .iter()
        .rev()
        .fold(T::zero(), |acc, &c| acc * x + c)
}

/// Error types for coregistration processing
#[derive(Debug, thiserror::Error)]
pub enum SarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Processing cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for SAR operations
pub type SarResult<T> = Result<T, SarError>;
