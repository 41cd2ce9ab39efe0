//! Synthetic, self-consistent TOPS scene shared by the integration tests
//!
//! Circular polar orbit over a non-rotating earth, flat WGS84 terrain and
//! geolocation grids generated by forward geolocation, so every product
//! built here agrees exactly with the back-geocoding solver.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use ndarray::Array2;
use sarcoreg::core::{GeolocationGrid, LookSide, ProductGeometry, RangePolynomial, SubSwathDescriptor};
use sarcoreg::io::{DemFactory, ElevationModel, GridDem, LagrangeOrbit, OrbitModel, ZeroGeoid};
use sarcoreg::types::{BoundingBox, OrbitData, StateVector, SPEED_OF_LIGHT};
use sarcoreg::{CoregistrationInputs, MemoryRaster, Polarization, ProductInput, RunState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const LINES_PER_BURST: usize = 60;
pub const SAMPLES: usize = 80;
pub const AZIMUTH_TIME_INTERVAL: f64 = 2e-3;
pub const BURST_CYCLE: f64 = 0.1;
pub const NEAR_RANGE: f64 = 850_000.0;
pub const RANGE_SPACING: f64 = 2.33;
pub const WAVELENGTH: f64 = 0.0555;

const ORBIT_RADIUS: f64 = 7_070_000.0;
const ORBIT_PERIOD: f64 = 5940.0;
const DEM_SPACING: f64 = 0.0005;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Lagrange orbit over state vectors every 10 s from -60 s to +60 s
pub fn orbit() -> Arc<dyn OrbitModel> {
    orbit_between(-6, 6)
}

/// Lagrange orbit over state vectors every 10 s from `10 * first` to `10 * last` seconds
pub fn orbit_between(first: i64, last: i64) -> Arc<dyn OrbitModel> {
    let reference_time = Utc.with_ymd_and_hms(2020, 1, 3, 17, 8, 15).unwrap();
    let omega = 2.0 * std::f64::consts::PI / ORBIT_PERIOD;
    let state_vectors = (first..=last)
        .map(|k| {
            let t = k as f64 * 10.0;
            let angle = omega * t;
            StateVector {
                time: reference_time + chrono::Duration::milliseconds((t * 1000.0) as i64),
                position: [ORBIT_RADIUS * angle.cos(), 0.0, ORBIT_RADIUS * angle.sin()],
                velocity: [-ORBIT_RADIUS * omega * angle.sin(), 0.0, ORBIT_RADIUS * omega * angle.cos()],
            }
        })
        .collect();
    let data = OrbitData { state_vectors, reference_time };
    Arc::new(LagrangeOrbit::new(&data).unwrap().with_interpolation_points(8))
}

#[derive(Debug, Clone, Copy)]
pub struct SceneParams {
    pub num_bursts: usize,
    pub first_burst_time: f64,
    pub near_range: f64,
}

impl Default for SceneParams {
    fn default() -> Self {
        Self { num_bursts: 3, first_burst_time: 0.0, near_range: NEAR_RANGE }
    }
}

/// Product geometry on the shared orbit
pub fn product(name: &str, params: SceneParams, orbit: Arc<dyn OrbitModel>) -> ProductGeometry {
    let burst_first_line_time: Vec<f64> = (0..params.num_bursts)
        .map(|b| params.first_burst_time + b as f64 * BURST_CYCLE)
        .collect();
    let burst_last_line_time: Vec<f64> = burst_first_line_time
        .iter()
        .map(|t| t + (LINES_PER_BURST - 1) as f64 * AZIMUTH_TIME_INTERVAL)
        .collect();

    let first = burst_first_line_time[0];
    let last = burst_last_line_time[params.num_bursts - 1];
    let mid = 0.5 * (first + last);

    let azimuth_times: Vec<f64> = (0..8).map(|i| first - 0.05 + i as f64 * (last - first + 0.1) / 7.0).collect();
    let slant_range_times: Vec<f64> = (0..6)
        .map(|j| {
            let pixel = -40.0 + j as f64 * (SAMPLES as f64 + 80.0) / 5.0;
            (params.near_range + pixel * RANGE_SPACING) / SPEED_OF_LIGHT
        })
        .collect();
    let geolocation_grid =
        GeolocationGrid::from_orbit(orbit.as_ref(), azimuth_times, slant_range_times, 0.0, LookSide::Right, true)
            .unwrap();

    let t0 = 2.0 * NEAR_RANGE / SPEED_OF_LIGHT;
    let subswath = SubSwathDescriptor {
        name: "IW1".to_string(),
        num_bursts: params.num_bursts,
        lines_per_burst: LINES_PER_BURST,
        samples_per_burst: SAMPLES,
        burst_first_line_time,
        burst_last_line_time,
        azimuth_time_interval: AZIMUTH_TIME_INTERVAL,
        slant_range_to_first_pixel: params.near_range,
        range_pixel_spacing: RANGE_SPACING,
        azimuth_pixel_spacing: 14.0,
        wavelength: WAVELENGTH,
        azimuth_steering_rate: 1.59,
        first_valid_pixel: 0,
        near_range_on_left: true,
        srgr: None,
        azimuth_fm_rates: vec![RangePolynomial { azimuth_time: mid, t0, coefficients: vec![-2370.0, 1.2e6] }],
        doppler_centroids: vec![RangePolynomial { azimuth_time: mid, t0, coefficients: vec![12.0, -3000.0] }],
        geolocation_grid,
    };

    ProductGeometry::new(name, subswath, orbit).unwrap()
}

/// Flat DEM at height 0 covering every product's tie points with 0.05 deg to spare
pub fn flat_dem(products: &[&ProductGeometry]) -> GridDem {
    flat_dem_with_spacing(products, DEM_SPACING)
}

/// [`flat_dem`] with posts every `spacing` degrees
pub fn flat_dem_with_spacing(products: &[&ProductGeometry], spacing: f64) -> GridDem {
    let mut points = Vec::new();
    for geometry in products {
        let grid = &geometry.subswath.geolocation_grid;
        let (rows, cols) = grid.dim();
        for row in 0..rows {
            for col in 0..cols {
                points.push(grid.tie_point(row, col));
            }
        }
    }
    let bbox = BoundingBox::from_points(&points).unwrap().expand(0.05, 0.05);
    GridDem::flat(&bbox, spacing, 0.0).unwrap()
}

/// DEM wrapper counting elevation queries
pub struct CountingDem {
    pub inner: GridDem,
    pub queries: AtomicUsize,
}

impl CountingDem {
    pub fn new(inner: GridDem) -> Self {
        Self { inner, queries: AtomicUsize::new(0) }
    }

    pub fn count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl ElevationModel for CountingDem {
    fn elevation(&self, lat: f64, lon: f64) -> Option<f64> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.elevation(lat, lon)
    }

    fn pixel_to_geo(&self, x: f64, y: f64) -> (f64, f64) {
        self.inner.pixel_to_geo(x, y)
    }

    fn geo_to_pixel(&self, lat: f64, lon: f64) -> (f64, f64) {
        self.inner.geo_to_pixel(lat, lon)
    }
}

pub fn dem_factory(dem: Arc<dyn ElevationModel>) -> DemFactory {
    Box::new(move || Ok(Arc::clone(&dem)))
}

/// Run inputs with VV data in every product
pub fn inputs(reference: ProductGeometry, secondaries: Vec<ProductGeometry>, dem: Arc<dyn ElevationModel>) -> CoregistrationInputs {
    CoregistrationInputs {
        reference: ProductInput { geometry: reference, polarizations: vec![Polarization::VV] },
        secondaries: secondaries
            .into_iter()
            .map(|geometry| ProductInput { geometry, polarizations: vec![Polarization::VV] })
            .collect(),
        dem_factory: dem_factory(dem),
        geoid: Arc::new(ZeroGeoid),
    }
}

/// Pseudo-random I/Q samples in [-1, 1], never exactly zero
pub fn slc(lines: usize, samples: usize, seed: u64) -> (Array2<f32>, Array2<f32>) {
    let mut state = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
    let mut next = move || {
        state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
        let value = (2.0 * unit - 1.0) as f32;
        if value.abs() < 1e-3 {
            0.5
        } else {
            value
        }
    };
    let i = Array2::from_shape_fn((lines, samples), |_| next());
    let q = Array2::from_shape_fn((lines, samples), |_| next());
    (i, q)
}

/// Store the VV samples of secondary `index` in the raster
pub fn load_secondary(state: &RunState, raster: &MemoryRaster, index: usize, data: &(Array2<f32>, Array2<f32>)) {
    let bands = &state.secondaries()[index].polarizations[0];
    raster.insert(bands.source_i, data.0.clone()).unwrap();
    raster.insert(bands.source_q, data.1.clone()).unwrap();
}
