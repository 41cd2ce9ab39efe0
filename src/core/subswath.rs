use crate::core::geolocation::{forward_geolocate, LookSide};
use crate::io::orbit::OrbitModel;
use crate::types::{polynomial_value, SarError, SarResult, SPEED_OF_LIGHT};
use ndarray::Array2;
use std::sync::Arc;

/// Slant-range to ground-range conversion polynomial valid from `azimuth_time`
///
/// `slant_range = sum(c_i * (ground_range - ground_range_origin)^i)`
#[derive(Debug, Clone, PartialEq)]
pub struct SrgrCoefficients {
    pub azimuth_time: f64,
    pub ground_range_origin: f64,
    pub coefficients: Vec<f64>,
}

impl SrgrCoefficients {
    pub fn slant_range(&self, ground_range: f64) -> f64 {
        polynomial_value(ground_range - self.ground_range_origin, &self.coefficients)
    }
}

/// Polynomial in two-way slant range time, annotated at one azimuth time
///
/// Used for the azimuth FM rate and Doppler centroid estimates:
/// `value = sum(c_i * (tau - t0)^i)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RangePolynomial {
    pub azimuth_time: f64,
    pub t0: f64,
    pub coefficients: Vec<f64>,
}

impl RangePolynomial {
    pub fn evaluate(&self, two_way_time: f64) -> f64 {
        polynomial_value(two_way_time - self.t0, &self.coefficients)
    }

    /// Estimate annotated closest to `azimuth_time`
    pub fn closest(list: &[RangePolynomial], azimuth_time: f64) -> Option<&RangePolynomial> {
        list.iter().min_by(|a, b| {
            let da = (a.azimuth_time - azimuth_time).abs();
            let db = (b.azimuth_time - azimuth_time).abs();
            da.total_cmp(&db)
        })
    }
}

/// Tie-point geolocation grid over azimuth time x one-way slant range time
#[derive(Debug, Clone)]
pub struct GeolocationGrid {
    azimuth_times: Vec<f64>,
    slant_range_times: Vec<f64>,
    latitude: Array2<f64>,
    longitude: Array2<f64>,
}

impl GeolocationGrid {
    pub fn new(
        azimuth_times: Vec<f64>,
        slant_range_times: Vec<f64>,
        latitude: Array2<f64>,
        longitude: Array2<f64>,
    ) -> SarResult<Self> {
        let shape = (azimuth_times.len(), slant_range_times.len());
        if shape.0 < 2 || shape.1 < 2 {
            return Err(SarError::Metadata(format!(
                "Geolocation grid needs at least 2x2 tie points, got {:?}",
                shape
            )));
        }
        if latitude.dim() != shape || longitude.dim() != shape {
            return Err(SarError::Metadata(format!(
                "Geolocation grid arrays {:?}/{:?} do not match tie point axes {:?}",
                latitude.dim(),
                longitude.dim(),
                shape
            )));
        }
        let increasing = |v: &[f64]| v.windows(2).all(|w| w[1] > w[0]);
        if !increasing(&azimuth_times) || !increasing(&slant_range_times) {
            return Err(SarError::Metadata(
                "Geolocation grid axes must be strictly increasing".to_string(),
            ));
        }
        Ok(Self { azimuth_times, slant_range_times, latitude, longitude })
    }

    /// Tie points computed by forward geolocation of each (azimuth, range) node
    ///
    /// With `bistatic` set, azimuth times are annotated times that include the
    /// one-way travel time, so the orbit is evaluated at `t - R / c`.
    pub fn from_orbit(
        orbit: &dyn OrbitModel,
        azimuth_times: Vec<f64>,
        slant_range_times: Vec<f64>,
        height: f64,
        look: LookSide,
        bistatic: bool,
    ) -> SarResult<Self> {
        let shape = (azimuth_times.len(), slant_range_times.len());
        let mut latitude = Array2::zeros(shape);
        let mut longitude = Array2::zeros(shape);

        for (i, &az_time) in azimuth_times.iter().enumerate() {
            for (j, &rg_time) in slant_range_times.iter().enumerate() {
                let slant_range = rg_time * SPEED_OF_LIGHT;
                let zero_doppler_time = if bistatic { az_time - rg_time } else { az_time };
                let (lat, lon) = forward_geolocate(orbit, zero_doppler_time, slant_range, height, look)
                    .ok_or_else(|| {
                        SarError::Processing(format!(
                            "Forward geolocation failed at azimuth time {:.6} s, slant range {:.1} m",
                            az_time, slant_range
                        ))
                    })?;
                latitude[[i, j]] = lat;
                longitude[[i, j]] = lon;
            }
        }

        Self::new(azimuth_times, slant_range_times, latitude, longitude)
    }

    pub fn dim(&self) -> (usize, usize) {
        self.latitude.dim()
    }

    /// Tie point `(lat, lon)` at grid node `(row, col)`
    pub fn tie_point(&self, row: usize, col: usize) -> (f64, f64) {
        (self.latitude[[row, col]], self.longitude[[row, col]])
    }

    /// Bilinear `(lat, lon)`, extrapolated linearly beyond the grid edges
    pub fn lat_lon_at(&self, azimuth_time: f64, slant_range_time: f64) -> (f64, f64) {
        let (i, fy) = Self::locate(&self.azimuth_times, azimuth_time);
        let (j, fx) = Self::locate(&self.slant_range_times, slant_range_time);

        let interp = |grid: &Array2<f64>| {
            let top = grid[[i, j]] * (1.0 - fx) + grid[[i, j + 1]] * fx;
            let bottom = grid[[i + 1, j]] * (1.0 - fx) + grid[[i + 1, j + 1]] * fx;
            top * (1.0 - fy) + bottom * fy
        };

        (interp(&self.latitude), interp(&self.longitude))
    }

    fn locate(axis: &[f64], value: f64) -> (usize, f64) {
        let idx = axis.partition_point(|&t| t <= value);
        let i = idx.saturating_sub(1).min(axis.len() - 2);
        let fraction = (value - axis[i]) / (axis[i + 1] - axis[i]);
        (i, fraction)
    }
}

/// Per-subswath burst geometry of one product
///
/// Burst `b` occupies image lines `[b * lines_per_burst, (b + 1) * lines_per_burst)`.
/// Times are seconds since the orbit reference epoch.
#[derive(Debug, Clone)]
pub struct SubSwathDescriptor {
    pub name: String,
    pub num_bursts: usize,
    pub lines_per_burst: usize,
    pub samples_per_burst: usize,
    pub burst_first_line_time: Vec<f64>,
    pub burst_last_line_time: Vec<f64>,
    pub azimuth_time_interval: f64,
    /// One-way slant range to the first pixel in meters
    pub slant_range_to_first_pixel: f64,
    pub range_pixel_spacing: f64,
    pub azimuth_pixel_spacing: f64,
    pub wavelength: f64,
    /// Azimuth antenna steering rate in degrees per second
    pub azimuth_steering_rate: f64,
    pub first_valid_pixel: usize,
    pub near_range_on_left: bool,
    /// Present for ground-range products only
    pub srgr: Option<Vec<SrgrCoefficients>>,
    pub azimuth_fm_rates: Vec<RangePolynomial>,
    pub doppler_centroids: Vec<RangePolynomial>,
    pub geolocation_grid: GeolocationGrid,
}

impl SubSwathDescriptor {
    /// Reject descriptors the engine cannot run on
    pub fn validate(&self) -> SarResult<()> {
        let fail = |msg: String| Err(SarError::Metadata(format!("{}: {}", self.name, msg)));

        if self.num_bursts == 0 || self.lines_per_burst == 0 || self.samples_per_burst == 0 {
            return fail(format!(
                "empty burst raster ({} bursts of {} x {})",
                self.num_bursts, self.lines_per_burst, self.samples_per_burst
            ));
        }
        if self.burst_first_line_time.len() != self.num_bursts
            || self.burst_last_line_time.len() != self.num_bursts
        {
            return fail("burst time tables do not match the burst count".to_string());
        }
        for b in 0..self.num_bursts {
            if !(self.burst_last_line_time[b] > self.burst_first_line_time[b]) {
                return fail(format!("burst {} has an empty time window", b));
            }
        }
        if !(self.azimuth_time_interval > 0.0)
            || !(self.range_pixel_spacing > 0.0)
            || !(self.azimuth_pixel_spacing > 0.0)
        {
            return fail("pixel spacings and azimuth time interval must be positive".to_string());
        }
        if !(self.wavelength > 0.0) || !(self.slant_range_to_first_pixel > 0.0) {
            return fail("missing radar wavelength or near range".to_string());
        }
        if self.first_valid_pixel >= self.samples_per_burst {
            return fail(format!("first valid pixel {} outside burst", self.first_valid_pixel));
        }
        if matches!(&self.srgr, Some(sets) if sets.is_empty()) {
            return fail("ground-range product without SRGR coefficients".to_string());
        }
        if self.azimuth_fm_rates.is_empty() || self.doppler_centroids.is_empty() {
            return fail("missing azimuth FM rate or Doppler centroid estimates".to_string());
        }
        Ok(())
    }

    pub fn total_lines(&self) -> usize {
        self.num_bursts * self.lines_per_burst
    }

    pub fn first_line_time(&self) -> f64 {
        self.burst_first_line_time[0]
    }

    pub fn last_line_time(&self) -> f64 {
        self.burst_last_line_time[self.num_bursts - 1]
    }

    /// First image line of burst `burst`
    pub fn burst_line_offset(&self, burst: usize) -> usize {
        burst * self.lines_per_burst
    }

    /// Azimuth time of a (fractional) line within burst `burst`
    pub fn line_azimuth_time(&self, burst: usize, local_line: f64) -> f64 {
        self.burst_first_line_time[burst] + local_line * self.azimuth_time_interval
    }

    /// Range sample counted from near range; its own inverse
    pub fn near_range_index(&self, pixel: f64) -> f64 {
        if self.near_range_on_left {
            pixel
        } else {
            (self.samples_per_burst - 1) as f64 - pixel
        }
    }

    /// One-way slant range time of a (fractional) image column at `azimuth_time`
    ///
    /// Columns are mirrored when near range is on the right; ground-range
    /// products go through the SRGR set in force at `azimuth_time`.
    pub fn slant_range_time(&self, pixel: f64, azimuth_time: f64) -> f64 {
        let distance = self.near_range_index(pixel) * self.range_pixel_spacing;
        let slant_range = match self.srgr_at(azimuth_time) {
            Some(srgr) => srgr.slant_range(distance),
            None => self.slant_range_to_first_pixel + distance,
        };
        slant_range / SPEED_OF_LIGHT
    }

    /// Last SRGR set annotated at or before `azimuth_time`, else the first
    pub fn srgr_at(&self, azimuth_time: f64) -> Option<&SrgrCoefficients> {
        let sets = self.srgr.as_ref()?;
        let idx = sets.partition_point(|s| s.azimuth_time <= azimuth_time);
        sets.get(idx.saturating_sub(1))
    }

    /// Range to azimuth pixel spacing ratio used to balance triangulation
    pub fn range_azimuth_ratio(&self) -> f64 {
        self.range_pixel_spacing / self.azimuth_pixel_spacing
    }

    pub fn lat_lon_at(&self, azimuth_time: f64, slant_range_time: f64) -> (f64, f64) {
        self.geolocation_grid.lat_lon_at(azimuth_time, slant_range_time)
    }
}

/// Geometry of one product: its subswath tables and orbit
#[derive(Clone)]
pub struct ProductGeometry {
    pub name: String,
    pub subswath: SubSwathDescriptor,
    pub orbit: Arc<dyn OrbitModel>,
}

impl ProductGeometry {
    pub fn new(name: &str, subswath: SubSwathDescriptor, orbit: Arc<dyn OrbitModel>) -> SarResult<Self> {
        let geometry = Self { name: name.to_string(), subswath, orbit };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Subswath tables are usable and the orbit spans every burst
    pub fn validate(&self) -> SarResult<()> {
        let subswath = &self.subswath;
        subswath.validate()?;
        if !self.orbit.covers(subswath.first_line_time(), subswath.last_line_time()) {
            let (first, last) = self.orbit.time_span();
            return Err(SarError::Metadata(format!(
                "{}: orbit covers [{:.3}, {:.3}] s but the subswath spans [{:.3}, {:.3}] s",
                self.name,
                first,
                last,
                subswath.first_line_time(),
                subswath.last_line_time()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProductGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductGeometry")
            .field("name", &self.name)
            .field("subswath", &self.subswath.name)
            .field("orbit_span", &self.orbit.time_span())
            .finish()
    }
}
