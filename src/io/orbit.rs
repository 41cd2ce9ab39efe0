use crate::types::{OrbitData, SarError, SarResult, StateVector};
use chrono::{DateTime, Utc};

/// Satellite position and velocity at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitState {
    pub position: [f64; 3],
    pub velocity: [f64; 3],
}

/// Orbit queried at arbitrary azimuth times (seconds since the orbit epoch)
pub trait OrbitModel: Send + Sync {
    fn state_at(&self, time: f64) -> OrbitState;

    /// First and last covered times
    fn time_span(&self) -> (f64, f64);

    fn covers(&self, start: f64, end: f64) -> bool {
        let (first, last) = self.time_span();
        start >= first && end <= last
    }
}

/// Lagrange interpolation over precise orbit state vectors
#[derive(Debug, Clone)]
pub struct LagrangeOrbit {
    times: Vec<f64>,
    positions: Vec<[f64; 3]>,
    velocities: Vec<[f64; 3]>,
    num_points: usize,
    reference_time: DateTime<Utc>,
}

impl LagrangeOrbit {
    /// Default number of state vectors used per interpolation
    pub const DEFAULT_POINTS: usize = 4;

    pub fn new(orbit: &OrbitData) -> SarResult<Self> {
        Self::validate_orbit_data(&orbit.state_vectors)?;

        let times: Vec<f64> = orbit
            .state_vectors
            .iter()
            .map(|sv| orbit.seconds_since_reference(sv.time))
            .collect();

        log::debug!(
            "Orbit model: {} state vectors spanning {:.1} s",
            times.len(),
            times[times.len() - 1] - times[0]
        );

        Ok(Self {
            times,
            positions: orbit.state_vectors.iter().map(|sv| sv.position).collect(),
            velocities: orbit.state_vectors.iter().map(|sv| sv.velocity).collect(),
            num_points: Self::DEFAULT_POINTS.min(orbit.state_vectors.len()),
            reference_time: orbit.reference_time,
        })
    }

    /// Use `points` state vectors per interpolation (clamped to what is available)
    pub fn with_interpolation_points(mut self, points: usize) -> Self {
        self.num_points = points.clamp(2, self.times.len());
        self
    }

    pub fn reference_time(&self) -> DateTime<Utc> {
        self.reference_time
    }

    /// Validate orbit data quality
    fn validate_orbit_data(state_vectors: &[StateVector]) -> SarResult<()> {
        if state_vectors.len() < 2 {
            return Err(SarError::Metadata(format!(
                "At least 2 orbit state vectors are required, found {}",
                state_vectors.len()
            )));
        }

        for pair in state_vectors.windows(2) {
            if pair[1].time <= pair[0].time {
                return Err(SarError::Metadata(format!(
                    "Orbit state vectors are not strictly increasing in time at {}",
                    pair[1].time.format("%Y-%m-%d %H:%M:%S%.6f")
                )));
            }
        }

        // Check for reasonable orbital velocities (should be ~7.5 km/s for LEO)
        for sv in state_vectors {
            let velocity_magnitude = norm(&sv.velocity);
            if !(6000.0..=9000.0).contains(&velocity_magnitude) {
                log::warn!(
                    "Unusual orbital velocity: {:.1} m/s at {}",
                    velocity_magnitude,
                    sv.time.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        Ok(())
    }

    /// Index of the first state vector of the interpolation window around `time`
    fn window_start(&self, time: f64) -> usize {
        let closest = self.binary_search_closest_time(time);
        let n = self.num_points;
        if closest >= n / 2 {
            (closest - n / 2).min(self.times.len() - n)
        } else {
            0
        }
    }

    /// Binary search to find the state vector closest in time to target
    fn binary_search_closest_time(&self, time: f64) -> usize {
        let idx = self.times.partition_point(|&t| t < time);
        if idx == 0 {
            return 0;
        }
        if idx >= self.times.len() {
            return self.times.len() - 1;
        }
        if (time - self.times[idx - 1]).abs() <= (self.times[idx] - time).abs() {
            idx - 1
        } else {
            idx
        }
    }

    fn lagrange_interpolate(&self, start: usize, time: f64, samples: &[[f64; 3]]) -> [f64; 3] {
        let end = start + self.num_points;
        let mut result = [0.0; 3];

        for i in start..end {
            let ti = self.times[i];
            let mut li = 1.0;
            for j in start..end {
                if i != j {
                    li *= (time - self.times[j]) / (ti - self.times[j]);
                }
            }
            for coord in 0..3 {
                result[coord] += li * samples[i][coord];
            }
        }

        result
    }
}

impl OrbitModel for LagrangeOrbit {
    fn state_at(&self, time: f64) -> OrbitState {
        let start = self.window_start(time);
        OrbitState {
            position: self.lagrange_interpolate(start, time, &self.positions),
            velocity: self.lagrange_interpolate(start, time, &self.velocities),
        }
    }

    fn time_span(&self) -> (f64, f64) {
        (self.times[0], self.times[self.times.len() - 1])
    }
}

pub(crate) fn norm(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}
