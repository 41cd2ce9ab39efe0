use crate::core::geolocation::{geodetic_to_ecef, GeolocationSolver};
use crate::core::init_once::InitOnce;
use crate::core::subswath::{ProductGeometry, SubSwathDescriptor};
use crate::io::dem::ElevationLookup;

/// Bursts whose time window contains an azimuth time
///
/// TOPS bursts overlap, so a time can fall in two consecutive bursts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstIndices {
    pub first: usize,
    pub second: Option<usize>,
    pub in_upper_part_of_first: bool,
    pub in_upper_part_of_second: bool,
}

/// Whether `azimuth_time` lies in the second half of burst `burst`
///
/// Decided against that burst's own midpoint only, so the answer does not
/// depend on which overlapping burst is looked at first.
pub fn is_in_upper_part(subswath: &SubSwathDescriptor, burst: usize, azimuth_time: f64) -> bool {
    let mid = 0.5 * (subswath.burst_first_line_time[burst] + subswath.burst_last_line_time[burst]);
    azimuth_time >= mid
}

/// Up to two bursts with `first_line_time <= t < last_line_time`
pub fn get_burst_indices(subswath: &SubSwathDescriptor, azimuth_time: f64) -> Option<BurstIndices> {
    let mut matches = (0..subswath.num_bursts).filter(|&b| {
        azimuth_time >= subswath.burst_first_line_time[b] && azimuth_time < subswath.burst_last_line_time[b]
    });

    let first = matches.next()?;
    let second = matches.next();
    Some(BurstIndices {
        first,
        second,
        in_upper_part_of_first: is_in_upper_part(subswath, first, azimuth_time),
        in_upper_part_of_second: second.map_or(false, |b| is_in_upper_part(subswath, b, azimuth_time)),
    })
}

/// Burst index offset (secondary minus reference) implied by one earth point
///
/// Tries same-half matches in order: first/first, reference first against
/// secondary second, reference second against secondary first, second/second.
pub fn match_burst_offset(reference: &BurstIndices, secondary: &BurstIndices) -> Option<i64> {
    let (r1, s1) = (reference.first as i64, secondary.first as i64);

    if reference.in_upper_part_of_first == secondary.in_upper_part_of_first {
        return Some(s1 - r1);
    }
    if let Some(s2) = secondary.second {
        if reference.in_upper_part_of_first == secondary.in_upper_part_of_second {
            return Some(s2 as i64 - r1);
        }
    }
    if let Some(r2) = reference.second {
        if reference.in_upper_part_of_second == secondary.in_upper_part_of_first {
            return Some(s1 - r2 as i64);
        }
        if let Some(s2) = secondary.second {
            if reference.in_upper_part_of_second == secondary.in_upper_part_of_second {
                return Some(s2 as i64 - r2 as i64);
            }
        }
    }
    None
}

/// Scan the reference tie points for the first one giving a consistent offset
///
/// Points without DEM data, without a zero-Doppler solution or outside all
/// bursts are skipped. Falls back to 0 when no point matches.
pub fn compute_burst_offset(
    reference: &ProductGeometry,
    secondary: &ProductGeometry,
    elevation: &ElevationLookup,
    solver: &GeolocationSolver,
) -> i64 {
    let grid = &reference.subswath.geolocation_grid;
    let (rows, cols) = grid.dim();

    for row in 0..rows {
        for col in 0..cols {
            let (lat, lon) = grid.tie_point(row, col);
            let Some(height) = elevation.dem_elevation(lat, lon) else {
                continue;
            };
            let point = geodetic_to_ecef(lat, lon, height);

            let Some(ref_coords) = solver.back_geocode(&point, reference) else {
                continue;
            };
            let Some(sec_coords) = solver.back_geocode(&point, secondary) else {
                continue;
            };
            let Some(ref_bursts) = get_burst_indices(&reference.subswath, ref_coords.azimuth_time) else {
                continue;
            };
            let Some(sec_bursts) = get_burst_indices(&secondary.subswath, sec_coords.azimuth_time) else {
                continue;
            };

            if let Some(offset) = match_burst_offset(&ref_bursts, &sec_bursts) {
                log::info!(
                    "Burst offset {} -> {}: {} (tie point {}, {})",
                    reference.name,
                    secondary.name,
                    offset,
                    row,
                    col
                );
                return offset;
            }
        }
    }

    log::warn!(
        "No tie point gave a consistent burst offset between {} and {}; using 0",
        reference.name,
        secondary.name
    );
    0
}

/// Burst offset of one secondary product, computed on first request
#[derive(Debug, Default)]
pub struct BurstOffsetCalibrator {
    offset: InitOnce<i64>,
}

impl BurstOffsetCalibrator {
    pub fn new() -> Self {
        Self { offset: InitOnce::new() }
    }

    /// Memoized offset; only the first caller scans the tie points
    pub fn offset(
        &self,
        reference: &ProductGeometry,
        secondary: &ProductGeometry,
        elevation: &ElevationLookup,
        solver: &GeolocationSolver,
    ) -> i64 {
        *self
            .offset
            .get_or_init(|| compute_burst_offset(reference, secondary, elevation, solver))
    }

    pub fn known_offset(&self) -> Option<i64> {
        self.offset.get().copied()
    }
}
