use crate::core::subswath::{ProductGeometry, SrgrCoefficients, SubSwathDescriptor};
use crate::io::orbit::{norm, OrbitModel, OrbitState};
use crate::types::{EarthPoint, SPEED_OF_LIGHT};
use serde::{Deserialize, Serialize};

/// WGS84 semi-major axis (m)
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// WGS84 first eccentricity squared
pub const WGS84_E2: f64 = WGS84_F * (2.0 - WGS84_F);

/// Geodetic latitude/longitude (degrees) and ellipsoid height to ECEF
pub fn geodetic_to_ecef(lat: f64, lon: f64, height: f64) -> EarthPoint {
    let lat_rad = lat.to_radians();
    let lon_rad = lon.to_radians();

    let n = WGS84_A / (1.0 - WGS84_E2 * lat_rad.sin().powi(2)).sqrt();

    let x = (n + height) * lat_rad.cos() * lon_rad.cos();
    let y = (n + height) * lat_rad.cos() * lon_rad.sin();
    let z = (n * (1.0 - WGS84_E2) + height) * lat_rad.sin();

    [x, y, z]
}

/// ECEF to geodetic `(lat, lon, height)`, iterating on latitude
pub fn ecef_to_geodetic(point: &EarthPoint) -> (f64, f64, f64) {
    let [x, y, z] = *point;
    let lon = y.atan2(x);
    let p = (x * x + y * y).sqrt();

    let mut lat = z.atan2(p * (1.0 - WGS84_E2));
    let mut height = 0.0;
    for _ in 0..10 {
        let sin_lat = lat.sin();
        let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
        height = if lat.cos().abs() > 1e-10 {
            p / lat.cos() - n
        } else {
            z.abs() / sin_lat.abs() - n * (1.0 - WGS84_E2)
        };
        let next = z.atan2(p * (1.0 - WGS84_E2 * n / (n + height)));
        if (next - lat).abs() < 1e-14 {
            lat = next;
            break;
        }
        lat = next;
    }

    (lat.to_degrees(), lon.to_degrees(), height)
}

/// Doppler frequency of `point` seen from `state`
pub fn doppler_frequency(point: &EarthPoint, state: &OrbitState, wavelength: f64) -> f64 {
    let range_vector = sub(point, &state.position);
    let range = norm(&range_vector);
    -2.0 * dot(&state.velocity, &range_vector) / (wavelength * range)
}

/// Zero-Doppler solve result
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZeroDopplerSolution {
    Converged(ZeroDoppler),
    NonConvergent,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZeroDoppler {
    pub time: f64,
    pub slant_range: f64,
    pub iterations: usize,
}

/// Radar coordinates of an earth point in one product
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadarCoordinates {
    /// Azimuth time, bistatically corrected when enabled
    pub azimuth_time: f64,
    pub slant_range: f64,
    /// Fractional range pixel within the burst raster
    pub range_pixel: f64,
}

/// Inverse geolocation on the orbit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocationSolver {
    pub max_iterations: usize,
    /// Convergence tolerance as a fraction of the line time interval
    pub time_tolerance: f64,
    /// Seconds added on both sides of the imaged window when bracketing
    pub search_padding: f64,
    /// Shift zero-Doppler time by the one-way travel time `R / c`
    pub bistatic_correction: bool,
}

impl Default for GeolocationSolver {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            time_tolerance: 1e-6,
            search_padding: 0.5,
            bistatic_correction: true,
        }
    }
}

impl GeolocationSolver {
    /// Find the zero-Doppler time of `point` inside `window`
    ///
    /// Newton steps with a central-difference derivative, safeguarded by
    /// bisection of the sign-change bracket.
    pub fn solve(
        &self,
        point: &EarthPoint,
        orbit: &dyn OrbitModel,
        wavelength: f64,
        line_time_interval: f64,
        window: (f64, f64),
    ) -> ZeroDopplerSolution {
        let doppler = |t: f64| doppler_frequency(point, &orbit.state_at(t), wavelength);
        let converged = |time: f64, iterations: usize| {
            let slant_range = norm(&sub(point, &orbit.state_at(time).position));
            ZeroDopplerSolution::Converged(ZeroDoppler { time, slant_range, iterations })
        };

        let (mut lo, mut hi) = window;
        let mut f_lo = doppler(lo);
        let f_hi = doppler(hi);
        if !f_lo.is_finite() || !f_hi.is_finite() {
            return ZeroDopplerSolution::NonConvergent;
        }
        if f_lo == 0.0 {
            return converged(lo, 0);
        }
        if f_hi == 0.0 {
            return converged(hi, 0);
        }
        if f_lo.signum() == f_hi.signum() {
            return ZeroDopplerSolution::NonConvergent;
        }

        let tolerance = self.time_tolerance * line_time_interval;
        let step = line_time_interval;
        let mut t = lo - f_lo * (hi - lo) / (f_hi - f_lo);

        for iteration in 1..=self.max_iterations {
            let f = doppler(t);
            if !f.is_finite() {
                return ZeroDopplerSolution::NonConvergent;
            }
            if f == 0.0 {
                return converged(t, iteration);
            }
            if f.signum() == f_lo.signum() {
                lo = t;
                f_lo = f;
            } else {
                hi = t;
            }

            let derivative = (doppler(t + step) - doppler(t - step)) / (2.0 * step);
            let mut next = t - f / derivative;
            if !next.is_finite() || next <= lo || next >= hi {
                next = 0.5 * (lo + hi);
            }
            if (next - t).abs() < tolerance {
                return converged(next, iteration);
            }
            t = next;
        }

        ZeroDopplerSolution::NonConvergent
    }

    /// Azimuth time, slant range and range pixel of `point` in `geometry`
    pub fn back_geocode(&self, point: &EarthPoint, geometry: &ProductGeometry) -> Option<RadarCoordinates> {
        let subswath = &geometry.subswath;
        let window = (
            subswath.first_line_time() - self.search_padding,
            subswath.last_line_time() + self.search_padding,
        );

        let solution = match self.solve(
            point,
            geometry.orbit.as_ref(),
            subswath.wavelength,
            subswath.azimuth_time_interval,
            window,
        ) {
            ZeroDopplerSolution::Converged(solution) => solution,
            ZeroDopplerSolution::NonConvergent => return None,
        };

        let azimuth_time = if self.bistatic_correction {
            solution.time + solution.slant_range / SPEED_OF_LIGHT
        } else {
            solution.time
        };
        let range_pixel = range_pixel_index(subswath, solution.time, solution.slant_range)?;

        Some(RadarCoordinates { azimuth_time, slant_range: solution.slant_range, range_pixel })
    }
}

/// Fractional range pixel of a slant range
///
/// Ground-range products go through the SRGR set applicable at
/// `azimuth_time` and yield `None` outside the imaged window or the
/// polynomial's ground range span.
pub fn range_pixel_index(subswath: &SubSwathDescriptor, azimuth_time: f64, slant_range: f64) -> Option<f64> {
    let index = if subswath.srgr.is_none() {
        (slant_range - subswath.slant_range_to_first_pixel) / subswath.range_pixel_spacing
    } else {
        if azimuth_time < subswath.first_line_time() || azimuth_time > subswath.last_line_time() {
            return None;
        }
        let srgr = subswath.srgr_at(azimuth_time)?;
        let max_ground_range = subswath.samples_per_burst as f64 * subswath.range_pixel_spacing;
        let ground_range = ground_range_from_slant(srgr, slant_range, max_ground_range)?;
        ground_range / subswath.range_pixel_spacing
    };

    Some(subswath.near_range_index(index))
}

/// Invert the SRGR polynomial by bisection over `[0, max_ground_range]`
fn ground_range_from_slant(srgr: &SrgrCoefficients, slant_range: f64, max_ground_range: f64) -> Option<f64> {
    let mut lo = 0.0;
    let mut hi = max_ground_range;
    let f_lo = srgr.slant_range(lo) - slant_range;
    let f_hi = srgr.slant_range(hi) - slant_range;
    if f_lo > 0.0 || f_hi < 0.0 {
        return None;
    }

    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        let f = srgr.slant_range(mid) - slant_range;
        if f.abs() < 1e-4 {
            return Some(mid);
        }
        if f < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Some(0.5 * (lo + hi))
}

/// Antenna pointing side relative to the flight direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookSide {
    Right,
    Left,
}

/// Ground position seen at `azimuth_time` and `slant_range` at ellipsoid `height`
///
/// Searches the zero-Doppler plane by bisection on the off-nadir angle.
/// Returns `None` when the slant range does not reach the surface.
pub fn forward_geolocate(
    orbit: &dyn OrbitModel,
    azimuth_time: f64,
    slant_range: f64,
    height: f64,
    look: LookSide,
) -> Option<(f64, f64)> {
    let state = orbit.state_at(azimuth_time);
    let speed = norm(&state.velocity);
    if speed == 0.0 {
        return None;
    }
    let along = scale(&state.velocity, 1.0 / speed);

    let down = scale(&state.position, -1.0);
    let nadir = sub(&down, &scale(&along, dot(&down, &along)));
    let nadir = scale(&nadir, 1.0 / norm(&nadir));
    let mut side = cross(&nadir, &along);
    if look == LookSide::Left {
        side = scale(&side, -1.0);
    }

    let point_at = |angle: f64| {
        let look_dir = add(&scale(&nadir, angle.cos()), &scale(&side, angle.sin()));
        add(&state.position, &scale(&look_dir, slant_range))
    };
    let height_error = |angle: f64| ecef_to_geodetic(&point_at(angle)).2 - height;

    let mut lo = 0.0;
    let mut hi = std::f64::consts::FRAC_PI_2;
    if height_error(lo) >= 0.0 || height_error(hi) <= 0.0 {
        return None;
    }
    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        if height_error(mid) < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-13 {
            break;
        }
    }

    let (lat, lon, _) = ecef_to_geodetic(&point_at(0.5 * (lo + hi)));
    Some((lat, lon))
}

fn sub(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn add(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn scale(a: &[f64; 3], s: f64) -> [f64; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
}

fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}
