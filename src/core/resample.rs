use crate::core::deramp::reramp_remodulate;
use crate::core::offset_grid::{CorrespondenceGrid, PixelCorrespondence};
use crate::core::subswath::SubSwathDescriptor;
use crate::types::{SarError, SarResult, TileRect};
use ndarray::{Array2, Zip};
use std::f64::consts::PI;
use std::sync::Arc;

/// Separable 1-D interpolation kernel
pub trait ResamplingKernel: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Number of weights written by [`ResamplingKernel::weights`]
    fn taps(&self) -> usize;

    /// Fill `weights` for a sample at `floor + frac` and return the offset of
    /// the first tap relative to `floor`
    fn weights(&self, frac: f64, weights: &mut [f64]) -> isize;

    /// Source pixels needed on each side of the sample position
    fn support_radius(&self) -> usize;
}

#[derive(Debug, Clone, Copy)]
pub struct NearestNeighbour;

impl ResamplingKernel for NearestNeighbour {
    fn name(&self) -> &'static str {
        "nearest"
    }

    fn taps(&self) -> usize {
        1
    }

    fn weights(&self, frac: f64, weights: &mut [f64]) -> isize {
        weights[0] = 1.0;
        if frac < 0.5 {
            0
        } else {
            1
        }
    }

    fn support_radius(&self) -> usize {
        1
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Bilinear;

impl ResamplingKernel for Bilinear {
    fn name(&self) -> &'static str {
        "bilinear"
    }

    fn taps(&self) -> usize {
        2
    }

    fn weights(&self, frac: f64, weights: &mut [f64]) -> isize {
        weights[0] = 1.0 - frac;
        weights[1] = frac;
        0
    }

    fn support_radius(&self) -> usize {
        1
    }
}

/// Keys cubic convolution with `a = -0.5`
#[derive(Debug, Clone, Copy)]
pub struct Bicubic;

impl Bicubic {
    const A: f64 = -0.5;

    fn kernel(x: f64) -> f64 {
        let a = Self::A;
        let x = x.abs();
        if x <= 1.0 {
            (a + 2.0) * x * x * x - (a + 3.0) * x * x + 1.0
        } else if x < 2.0 {
            a * x * x * x - 5.0 * a * x * x + 8.0 * a * x - 4.0 * a
        } else {
            0.0
        }
    }
}

impl ResamplingKernel for Bicubic {
    fn name(&self) -> &'static str {
        "bicubic"
    }

    fn taps(&self) -> usize {
        4
    }

    fn weights(&self, frac: f64, weights: &mut [f64]) -> isize {
        weights[0] = Self::kernel(1.0 + frac);
        weights[1] = Self::kernel(frac);
        weights[2] = Self::kernel(1.0 - frac);
        weights[3] = Self::kernel(2.0 - frac);
        -1
    }

    fn support_radius(&self) -> usize {
        2
    }
}

/// Hann-windowed sinc over `points` taps centred on the nearest sample
#[derive(Debug, Clone, Copy)]
pub struct BiSinc {
    points: usize,
}

impl BiSinc {
    pub fn new(points: usize) -> Self {
        Self { points: points.max(3) | 1 }
    }

    fn sinc(x: f64) -> f64 {
        if x.abs() < 1e-12 {
            1.0
        } else {
            (PI * x).sin() / (PI * x)
        }
    }
}

impl ResamplingKernel for BiSinc {
    fn name(&self) -> &'static str {
        match self.points {
            5 => "bisinc-5-point",
            11 => "bisinc-11-point",
            21 => "bisinc-21-point",
            _ => "bisinc",
        }
    }

    fn taps(&self) -> usize {
        self.points
    }

    fn weights(&self, frac: f64, weights: &mut [f64]) -> isize {
        let half = (self.points / 2) as isize;
        let nearest = if frac < 0.5 { 0 } else { 1 };
        let first = nearest - half;
        let window = half as f64 + 1.0;

        let mut sum = 0.0;
        for (k, w) in weights.iter_mut().take(self.points).enumerate() {
            let d = (first + k as isize) as f64 - frac;
            *w = Self::sinc(d) * 0.5 * (1.0 + (PI * d / window).cos());
            sum += *w;
        }
        if sum != 0.0 {
            weights.iter_mut().take(self.points).for_each(|w| *w /= sum);
        }
        first
    }

    fn support_radius(&self) -> usize {
        self.points / 2 + 1
    }
}

/// Kernel registered under `name` (case-insensitive)
pub fn kernel_by_name(name: &str) -> SarResult<Arc<dyn ResamplingKernel>> {
    let key = name.trim().to_lowercase().replace('_', "-").replace(' ', "-");
    let kernel: Arc<dyn ResamplingKernel> = match key.as_str() {
        "nearest" | "nearest-neighbour" | "nearest-neighbor" => Arc::new(NearestNeighbour),
        "bilinear" | "bilinear-interpolation" => Arc::new(Bilinear),
        "bicubic" | "cubic-convolution" | "bicubic-interpolation" => Arc::new(Bicubic),
        "bisinc-5-point" | "bisinc-5-point-interpolation" => Arc::new(BiSinc::new(5)),
        "bisinc-11-point" | "bisinc-11-point-interpolation" => Arc::new(BiSinc::new(11)),
        "bisinc-21-point" | "bisinc-21-point-interpolation" => Arc::new(BiSinc::new(21)),
        _ => {
            return Err(SarError::Configuration(format!(
                "Unknown resampling kernel '{}'",
                name
            )))
        }
    };
    Ok(kernel)
}

/// Secondary subswath rectangle read for a correspondence grid
///
/// Bounding box of all valid secondary positions grown by the kernel
/// support and clamped to the secondary burst. `None` without valid pixels.
pub fn source_rectangle(
    grid: &CorrespondenceGrid,
    secondary: &SubSwathDescriptor,
    kernel: &dyn ResamplingKernel,
) -> Option<TileRect> {
    let burst_start = secondary.burst_line_offset(grid.secondary_burst) as f64;
    let mut bounds: Option<(f64, f64, f64, f64)> = None;
    for pixel in grid.pixels.iter() {
        if let PixelCorrespondence::Valid { azimuth, range } = *pixel {
            let y = (burst_start + azimuth).floor();
            let x = range.floor();
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
    }
    let (x0, y0, x1, y1) = bounds?;

    let radius = kernel.support_radius() as f64;
    let line_lo = burst_start;
    let line_hi = burst_start + (secondary.lines_per_burst - 1) as f64;
    let sample_hi = (secondary.samples_per_burst - 1) as f64;

    let min_x = (x0 - radius).max(0.0) as usize;
    let max_x = (x1 + radius).min(sample_hi) as usize;
    let min_y = (y0 - radius).max(line_lo) as usize;
    let max_y = (y1 + radius).min(line_hi) as usize;
    if min_x > max_x || min_y > max_y {
        return None;
    }
    Some(TileRect::from_bounds(min_x, min_y, max_x, max_y))
}

/// Deramped secondary samples over the source rectangle
#[derive(Debug, Clone, Copy)]
pub struct SourceWindow<'a> {
    /// Secondary subswath coordinates
    pub rect: TileRect,
    pub i: &'a Array2<f32>,
    pub q: &'a Array2<f32>,
    pub phase: &'a Array2<f64>,
}

/// Resampled secondary section on the reference grid
///
/// `i`/`q` hold the no-data value and `phase` NaN where nothing was resampled.
#[derive(Debug, Clone)]
pub struct ResampledTile {
    pub i: Array2<f32>,
    pub q: Array2<f32>,
    pub phase: Array2<f64>,
    no_data: f32,
}

impl ResampledTile {
    /// Restore the azimuth ramp with the interpolated phase
    pub fn reramp(&mut self) -> SarResult<()> {
        let (i, q) = reramp_remodulate(&self.i, &self.q, &self.phase)?;
        self.i = i;
        self.q = q;
        let no_data = self.no_data;
        Zip::from(&mut self.i)
            .and(&mut self.q)
            .and(&self.phase)
            .for_each(|vi, vq, &p| {
                if !p.is_finite() {
                    *vi = no_data;
                    *vq = no_data;
                }
            });
        Ok(())
    }
}

/// Kernel resampling of a secondary source window onto a correspondence grid
#[derive(Debug, Clone)]
pub struct TileResampler<'k> {
    kernel: &'k dyn ResamplingKernel,
    no_data: f32,
}

impl<'k> TileResampler<'k> {
    pub fn new(kernel: &'k dyn ResamplingKernel, no_data: f32) -> Self {
        Self { kernel, no_data }
    }

    pub fn resample(
        &self,
        source: &SourceWindow<'_>,
        grid: &CorrespondenceGrid,
        secondary: &SubSwathDescriptor,
    ) -> SarResult<ResampledTile> {
        let shape = source.rect.shape();
        if source.i.dim() != shape || source.q.dim() != shape || source.phase.dim() != shape {
            return Err(SarError::Processing(format!(
                "Source window {:?} does not match rectangle {:?}",
                source.i.dim(),
                source.rect
            )));
        }

        let burst_start = secondary.burst_line_offset(grid.secondary_burst) as f64;
        let taps = self.kernel.taps();
        let mut wy = vec![0.0; taps];
        let mut wx = vec![0.0; taps];

        let mut out_i = Array2::from_elem(grid.pixels.dim(), self.no_data);
        let mut out_q = Array2::from_elem(grid.pixels.dim(), self.no_data);
        let mut out_phase = Array2::from_elem(grid.pixels.dim(), f64::NAN);

        for ((row, col), pixel) in grid.pixels.indexed_iter() {
            let PixelCorrespondence::Valid { azimuth, range } = *pixel else {
                continue;
            };
            let sy = burst_start + azimuth;
            let sx = range;
            let (fy, fx) = (sy.floor(), sx.floor());
            if fy < source.rect.y as f64
                || fy >= source.rect.y_end() as f64
                || fx < source.rect.x as f64
                || fx >= source.rect.x_end() as f64
            {
                continue;
            }

            let off_y = self.kernel.weights(sy - fy, &mut wy);
            let off_x = self.kernel.weights(sx - fx, &mut wx);
            if let Some((vi, vq, vp)) = self.accumulate(source, fy as isize + off_y, fx as isize + off_x, &wy, &wx) {
                out_i[[row, col]] = vi as f32;
                out_q[[row, col]] = vq as f32;
                out_phase[[row, col]] = vp;
            }
        }

        Ok(ResampledTile { i: out_i, q: out_q, phase: out_phase, no_data: self.no_data })
    }

    /// Weighted sum over the kernel footprint; `None` if a contributing sample is NaN
    fn accumulate(
        &self,
        source: &SourceWindow<'_>,
        first_y: isize,
        first_x: isize,
        wy: &[f64],
        wx: &[f64],
    ) -> Option<(f64, f64, f64)> {
        let rect = source.rect;
        let clamp = |v: isize, lo: usize, end: usize| (v.max(lo as isize).min(end as isize - 1) as usize) - lo;

        let (mut si, mut sq, mut sp) = (0.0, 0.0, 0.0);
        for (ky, &weight_y) in wy.iter().enumerate() {
            if weight_y == 0.0 {
                continue;
            }
            let y = clamp(first_y + ky as isize, rect.y, rect.y_end());
            for (kx, &weight_x) in wx.iter().enumerate() {
                let w = weight_y * weight_x;
                if w == 0.0 {
                    continue;
                }
                let x = clamp(first_x + kx as isize, rect.x, rect.x_end());
                let (vi, vq, vp) = (source.i[[y, x]], source.q[[y, x]], source.phase[[y, x]]);
                if vi.is_nan() || vq.is_nan() || vp.is_nan() {
                    return None;
                }
                si += w * vi as f64;
                sq += w * vq as f64;
                sp += w * vp;
            }
        }
        Some((si, sq, sp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::subswath::{GeolocationGrid, RangePolynomial};
    use ndarray::s;

    const LINES: usize = 10;
    const SAMPLES: usize = 8;

    fn subswath() -> SubSwathDescriptor {
        let grid = GeolocationGrid::new(
            vec![0.0, 1.0],
            vec![0.0028, 0.0029],
            Array2::zeros((2, 2)),
            Array2::zeros((2, 2)),
        )
        .unwrap();
        SubSwathDescriptor {
            name: "IW2".to_string(),
            num_bursts: 2,
            lines_per_burst: LINES,
            samples_per_burst: SAMPLES,
            burst_first_line_time: vec![0.0, 0.5],
            burst_last_line_time: vec![0.018, 0.518],
            azimuth_time_interval: 2e-3,
            slant_range_to_first_pixel: 850_000.0,
            range_pixel_spacing: 2.33,
            azimuth_pixel_spacing: 14.0,
            wavelength: 0.0555,
            azimuth_steering_rate: 1.59,
            first_valid_pixel: 0,
            near_range_on_left: true,
            srgr: None,
            azimuth_fm_rates: vec![RangePolynomial { azimuth_time: 0.0, t0: 0.0, coefficients: vec![-2300.0] }],
            doppler_centroids: vec![RangePolynomial { azimuth_time: 0.0, t0: 0.0, coefficients: vec![0.0] }],
            geolocation_grid: grid,
        }
    }

    /// Grid over the second burst mapping pixel `(row, col)` to `f(row, col)`
    fn grid(f: impl Fn(usize, usize) -> PixelCorrespondence) -> CorrespondenceGrid {
        CorrespondenceGrid {
            rect: TileRect::new(0, LINES, SAMPLES, LINES),
            burst: 1,
            secondary_burst: 1,
            pixels: Array2::from_shape_fn((LINES, SAMPLES), |(row, col)| f(row, col)),
            elevation: Array2::zeros((LINES, SAMPLES)),
        }
    }

    fn source() -> (Array2<f32>, Array2<f32>, Array2<f64>) {
        let i = Array2::from_shape_fn((LINES, SAMPLES), |(r, c)| 0.37 * r as f32 - 0.11 * c as f32 + 0.013);
        let q = Array2::from_shape_fn((LINES, SAMPLES), |(r, c)| (r * SAMPLES + c) as f32 / 7.0 - 3.0);
        let phase = Array2::from_shape_fn((LINES, SAMPLES), |(r, c)| 0.01 * (r * r) as f64 - 0.2 * c as f64);
        (i, q, phase)
    }

    #[test]
    fn test_nearest_identity_reproduces_source() {
        let (i, q, phase) = source();
        let window = SourceWindow { rect: TileRect::new(0, LINES, SAMPLES, LINES), i: &i, q: &q, phase: &phase };
        let identity = grid(|row, col| PixelCorrespondence::Valid { azimuth: row as f64, range: col as f64 });

        let resampler = TileResampler::new(&NearestNeighbour, -1.0);
        let mut tile = resampler.resample(&window, &identity, &subswath()).unwrap();
        assert_eq!(tile.i, i);
        assert_eq!(tile.q, q);
        assert_eq!(tile.phase, phase);

        tile.reramp().unwrap();
        assert!(tile.i.iter().all(|v| v.is_finite() && *v != -1.0));
    }

    #[test]
    fn test_nan_source_samples_become_no_data() {
        let (mut i, q, phase) = source();
        i[[3, 4]] = f32::NAN;
        let window = SourceWindow { rect: TileRect::new(0, LINES, SAMPLES, LINES), i: &i, q: &q, phase: &phase };
        let no_data = -9999.0;

        let identity = grid(|row, col| PixelCorrespondence::Valid { azimuth: row as f64, range: col as f64 });
        let mut tile = TileResampler::new(&NearestNeighbour, no_data).resample(&window, &identity, &subswath()).unwrap();
        assert_eq!((tile.i[[3, 4]], tile.q[[3, 4]]), (no_data, no_data));
        assert!(tile.phase[[3, 4]].is_nan());
        assert_eq!(tile.i[[3, 5]], i[[3, 5]]);
        tile.reramp().unwrap();
        assert_eq!((tile.i[[3, 4]], tile.q[[3, 4]]), (no_data, no_data));
        assert!(tile.i.iter().all(|v| !v.is_nan()));

        // bilinear footprints touching the NaN sample
        let shifted = grid(|row, col| PixelCorrespondence::Valid { azimuth: row as f64 + 0.5, range: col as f64 + 0.5 });
        let tile = TileResampler::new(&Bilinear, no_data).resample(&window, &shifted, &subswath()).unwrap();
        for (row, col) in [(2, 3), (2, 4), (3, 3), (3, 4)] {
            assert_eq!(tile.i[[row, col]], no_data, "pixel ({}, {})", row, col);
        }
        assert_ne!(tile.i[[0, 0]], no_data);
        assert!(tile.i.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_invalid_and_uncovered_pixels_stay_no_data() {
        let (i, q, phase) = source();
        // source window covering lines and samples 2..6 of the burst
        let (wi, wq, wp) = (
            i.slice(s![2..6, 2..6]).to_owned(),
            q.slice(s![2..6, 2..6]).to_owned(),
            phase.slice(s![2..6, 2..6]).to_owned(),
        );
        let window = SourceWindow { rect: TileRect::new(2, LINES + 2, 4, 4), i: &wi, q: &wq, phase: &wp };
        let sparse = grid(|row, col| {
            if row == col {
                PixelCorrespondence::Valid { azimuth: row as f64, range: col as f64 }
            } else {
                PixelCorrespondence::Invalid
            }
        });

        let tile = TileResampler::new(&NearestNeighbour, 0.0).resample(&window, &sparse, &subswath()).unwrap();
        for ((row, col), &value) in tile.i.indexed_iter() {
            if row == col && (2..6).contains(&row) {
                assert_eq!(value, i[[row, col]]);
            } else {
                assert_eq!(value, 0.0);
                assert!(tile.phase[[row, col]].is_nan());
            }
        }
    }

    #[test]
    fn test_kernel_weights_sum_to_one() {
        let kernels: Vec<Arc<dyn ResamplingKernel>> = ["nearest", "bilinear", "bicubic", "bisinc-5-point", "BISINC_21_POINT"]
            .iter()
            .map(|name| kernel_by_name(name).unwrap())
            .collect();
        for kernel in &kernels {
            let mut weights = vec![0.0; kernel.taps()];
            for &frac in &[0.0, 0.25, 0.5, 0.9] {
                kernel.weights(frac, &mut weights);
                let sum: f64 = weights.iter().sum();
                assert!((sum - 1.0).abs() < 1e-9, "{} at {}: {}", kernel.name(), frac, sum);
            }
        }
    }

    #[test]
    fn test_kernels_are_exact_on_integer_positions() {
        let mut weights = vec![0.0; 4];
        assert_eq!(Bicubic.weights(0.0, &mut weights), -1);
        assert_eq!(weights, vec![0.0, 1.0, 0.0, 0.0]);

        let sinc = BiSinc::new(5);
        let mut weights = vec![0.0; 5];
        assert_eq!(sinc.weights(0.0, &mut weights), -2);
        assert!((weights[2] - 1.0).abs() < 1e-12);
        assert!(weights.iter().enumerate().all(|(k, w)| k == 2 || w.abs() < 1e-12));
    }

    #[test]
    fn test_unknown_kernel_is_configuration_error() {
        assert!(matches!(kernel_by_name("lanczos-7"), Err(SarError::Configuration(_))));
        assert_eq!(kernel_by_name("Cubic_Convolution").unwrap().name(), "bicubic");
    }
}
