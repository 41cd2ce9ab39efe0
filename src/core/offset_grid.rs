use crate::core::geolocation::{geodetic_to_ecef, GeolocationSolver};
use crate::core::subswath::ProductGeometry;
use crate::core::triangulation::grid_linear;
use crate::io::dem::ElevationLookup;
use crate::types::{BoundingBox, TileRect};
use ndarray::Array2;

/// Extra lines and pixels processed around a tile to cover geometric shifts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtensionMargin {
    pub azimuth: usize,
    pub range: usize,
}

/// Reference burst and the secondary burst it is matched with
#[derive(Debug, Clone, Copy)]
pub struct BurstPair<'a> {
    pub reference: &'a ProductGeometry,
    pub secondary: &'a ProductGeometry,
    pub burst: usize,
    pub secondary_burst: usize,
}

/// Secondary position of one output pixel
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PixelCorrespondence {
    /// Fractional line and pixel inside the secondary burst raster
    Valid { azimuth: f64, range: f64 },
    Invalid,
}

impl PixelCorrespondence {
    pub fn is_valid(&self) -> bool {
        matches!(self, PixelCorrespondence::Valid { .. })
    }
}

/// Per-pixel correspondences of a tile section lying in one reference burst
///
/// `rect` is in subswath coordinates and lies within the burst lines.
#[derive(Debug, Clone)]
pub struct CorrespondenceGrid {
    pub rect: TileRect,
    pub burst: usize,
    pub secondary_burst: usize,
    pub pixels: Array2<PixelCorrespondence>,
    /// Interpolated terrain height, NaN where invalid
    pub elevation: Array2<f32>,
}

impl CorrespondenceGrid {
    pub fn valid_count(&self) -> usize {
        self.pixels.iter().filter(|p| p.is_valid()).count()
    }
}

/// Reference and secondary radar positions of one DEM post
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemSample {
    /// Reference line in subswath coordinates
    pub reference_azimuth: f64,
    pub reference_range: f64,
    /// Secondary line within the secondary burst
    pub secondary_azimuth: f64,
    pub secondary_range: f64,
    pub lat: f64,
    pub lon: f64,
    pub height: f64,
}

/// How far reference-geolocated positions stray from their nominal pixels
///
/// Samples the tile every `stride` pixels, back-geocodes the tie-grid ground
/// position and keeps the largest absolute azimuth and range departure.
pub fn estimate_margin(
    rect: &TileRect,
    geometry: &ProductGeometry,
    burst: usize,
    elevation: &ElevationLookup,
    solver: &GeolocationSolver,
    stride: usize,
) -> ExtensionMargin {
    let subswath = &geometry.subswath;
    let burst_start = subswath.burst_line_offset(burst) as f64;
    let stride = stride.max(1);

    let mut azimuth_extent: f64 = 0.0;
    let mut range_extent: f64 = 0.0;

    for y in (rect.y..rect.y_end()).step_by(stride) {
        let azimuth_time = subswath.line_azimuth_time(burst, y as f64 - burst_start);
        for x in (rect.x..rect.x_end()).step_by(stride) {
            let range_time = subswath.slant_range_time(x as f64, azimuth_time);
            let (lat, lon) = subswath.lat_lon_at(azimuth_time, range_time);
            let Some(height) = elevation.elevation(lat, lon) else {
                continue;
            };
            let point = geodetic_to_ecef(lat, lon, height);
            let Some(coords) = solver.back_geocode(&point, geometry) else {
                continue;
            };

            let azimuth_shift = (coords.azimuth_time - azimuth_time) / subswath.azimuth_time_interval;
            let range_shift = coords.range_pixel - x as f64;
            azimuth_extent = azimuth_extent.max(azimuth_shift.abs());
            range_extent = range_extent.max(range_shift.abs());
        }
    }

    ExtensionMargin {
        azimuth: azimuth_extent.ceil() as usize,
        range: range_extent.ceil() as usize,
    }
}

/// Geographic box of the tile extended by `margin`, padded by `extension_samples` DEM posts
pub fn tile_geo_bounds(
    rect: &TileRect,
    margin: ExtensionMargin,
    geometry: &ProductGeometry,
    burst: usize,
    elevation: &ElevationLookup,
    extension_samples: usize,
) -> Option<BoundingBox> {
    let subswath = &geometry.subswath;
    let burst_start = subswath.burst_line_offset(burst) as f64;

    let y_min = rect.y as f64 - margin.azimuth as f64 - burst_start;
    let y_max = (rect.y_end() - 1) as f64 + margin.azimuth as f64 - burst_start;
    let x_min = rect.x as f64 - margin.range as f64;
    let x_max = (rect.x_end() - 1) as f64 + margin.range as f64;

    let corners: Vec<(f64, f64)> = [(y_min, x_min), (y_min, x_max), (y_max, x_min), (y_max, x_max)]
        .iter()
        .map(|&(y, x)| {
            let azimuth_time = subswath.line_azimuth_time(burst, y);
            subswath.lat_lon_at(azimuth_time, subswath.slant_range_time(x, azimuth_time))
        })
        .collect();

    let (delta_lat, delta_lon) = elevation.dem().sampling_interval();
    let pad = extension_samples as f64;
    BoundingBox::from_points(&corners).map(|bbox| bbox.expand(delta_lat * pad, delta_lon * pad))
}

/// Back-geocode every DEM post inside the tile's geographic box
///
/// Posts without elevation (when masked) or without a zero-Doppler solution
/// in either product are dropped.
pub fn collect_dem_samples(
    rect: &TileRect,
    margin: ExtensionMargin,
    pair: &BurstPair<'_>,
    elevation: &ElevationLookup,
    solver: &GeolocationSolver,
    extension_samples: usize,
) -> Vec<DemSample> {
    let reference = &pair.reference.subswath;
    let secondary = &pair.secondary.subswath;

    let Some(bbox) = tile_geo_bounds(rect, margin, pair.reference, pair.burst, elevation, extension_samples)
    else {
        return Vec::new();
    };

    let dem = elevation.dem();
    let (x0, y0) = dem.geo_to_pixel(bbox.max_lat, bbox.min_lon);
    let (x1, y1) = dem.geo_to_pixel(bbox.min_lat, bbox.max_lon);
    let col_min = x0.min(x1).floor() as i64;
    let col_max = x0.max(x1).ceil() as i64;
    let row_min = y0.min(y1).floor() as i64;
    let row_max = y0.max(y1).ceil() as i64;

    let burst_start = reference.burst_line_offset(pair.burst) as f64;
    let reference_first_time = reference.burst_first_line_time[pair.burst];
    let secondary_first_time = secondary.burst_first_line_time[pair.secondary_burst];

    let mut samples = Vec::new();
    for row in row_min..=row_max {
        for col in col_min..=col_max {
            let (lat, lon) = dem.pixel_to_geo(col as f64, row as f64);
            let Some(height) = elevation.elevation(lat, lon) else {
                continue;
            };
            let point = geodetic_to_ecef(lat, lon, height);

            let Some(ref_coords) = solver.back_geocode(&point, pair.reference) else {
                continue;
            };
            let Some(sec_coords) = solver.back_geocode(&point, pair.secondary) else {
                continue;
            };

            samples.push(DemSample {
                reference_azimuth: burst_start
                    + (ref_coords.azimuth_time - reference_first_time) / reference.azimuth_time_interval,
                reference_range: ref_coords.range_pixel,
                secondary_azimuth: (sec_coords.azimuth_time - secondary_first_time)
                    / secondary.azimuth_time_interval,
                secondary_range: sec_coords.range_pixel,
                lat,
                lon,
                height,
            });
        }
    }

    samples
}

/// Correspondence grid of `rect` (tile section inside reference burst `pair.burst`)
///
/// Never fails: sparse or degenerate samples give an all-invalid grid.
pub fn build_correspondences(
    rect: &TileRect,
    margin: ExtensionMargin,
    pair: &BurstPair<'_>,
    elevation: &ElevationLookup,
    solver: &GeolocationSolver,
    extension_samples: usize,
) -> CorrespondenceGrid {
    let samples = collect_dem_samples(rect, margin, pair, elevation, solver, extension_samples);
    log::debug!(
        "Burst {} -> {}: {} DEM samples for tile {:?}",
        pair.burst,
        pair.secondary_burst,
        samples.len(),
        rect
    );
    correspondences_from_samples(rect, pair, &samples, elevation)
}

/// Grid DEM samples onto the pixels of `rect` and validate each pixel
pub fn correspondences_from_samples(
    rect: &TileRect,
    pair: &BurstPair<'_>,
    samples: &[DemSample],
    elevation: &ElevationLookup,
) -> CorrespondenceGrid {
    let secondary = &pair.secondary.subswath;
    let positions: Vec<[f64; 2]> = samples.iter().map(|s| [s.reference_range, s.reference_azimuth]).collect();
    let values: Vec<[f64; 5]> = samples
        .iter()
        .map(|s| [s.secondary_azimuth, s.secondary_range, s.lat, s.lon, s.height])
        .collect();

    let gridded = grid_linear(&positions, &values, rect, pair.reference.subswath.range_azimuth_ratio());

    let height_limit = secondary.lines_per_burst as f64;
    let width_limit = secondary.samples_per_burst as f64;
    let mut pixels = Array2::from_elem(rect.shape(), PixelCorrespondence::Invalid);
    let mut heights = Array2::from_elem(rect.shape(), f32::NAN);

    for ((row, col), value) in gridded.indexed_iter() {
        let Some([sec_az, sec_rg, lat, lon, height]) = *value else {
            continue;
        };
        if elevation.masks_no_elevation() && elevation.dem_elevation(lat, lon).is_none() {
            continue;
        }
        let (Some(azimuth), Some(range)) = (
            within_raster(sec_az, height_limit),
            within_raster(sec_rg, width_limit),
        ) else {
            continue;
        };
        pixels[[row, col]] = PixelCorrespondence::Valid { azimuth, range };
        heights[[row, col]] = height as f32;
    }

    CorrespondenceGrid {
        rect: *rect,
        burst: pair.burst,
        secondary_burst: pair.secondary_burst,
        pixels,
        elevation: heights,
    }
}

/// Coordinate with `0 <= floor(value) < size`, rounding tiny negatives up to 0
fn within_raster(value: f64, size: f64) -> Option<f64> {
    let value = if value < 0.0 && value > -1e-6 { 0.0 } else { value };
    (value >= 0.0 && value < size).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_raster_bounds() {
        assert_eq!(within_raster(-1e-9, 10.0), Some(0.0));
        assert_eq!(within_raster(-0.01, 10.0), None);
        assert_eq!(within_raster(9.999, 10.0), Some(9.999));
        assert_eq!(within_raster(10.0, 10.0), None);
        assert_eq!(within_raster(f64::NAN, 10.0), None);
    }

    #[test]
    fn test_correspondence_validity() {
        assert!(PixelCorrespondence::Valid { azimuth: 1.0, range: 2.0 }.is_valid());
        assert!(!PixelCorrespondence::Invalid.is_valid());
    }
}
