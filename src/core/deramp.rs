use crate::core::subswath::{ProductGeometry, RangePolynomial};
use crate::io::orbit::norm;
use crate::types::{SarError, SarResult, TileRect};
use ndarray::{Array2, Zip};
use std::f64::consts::PI;

/// Range-dependent TOPS azimuth Doppler model of one burst
///
/// All vectors are indexed by range sample of the burst.
#[derive(Debug, Clone)]
pub struct BurstDopplerModel {
    /// Doppler rate `kt` combining the azimuth FM rate and the steering rate (Hz/s)
    pub doppler_rate: Vec<f64>,
    /// Azimuth time of zero deramp phase, relative to the burst's first line (s)
    pub reference_time: Vec<f64>,
    /// Doppler centroid frequency (Hz)
    pub doppler_centroid: Vec<f64>,
}

impl BurstDopplerModel {
    /// Evaluate the model for burst `burst`; `None` if it is not finite everywhere
    pub fn compute(geometry: &ProductGeometry, burst: usize) -> Option<Self> {
        let subswath = &geometry.subswath;
        let mid_time = 0.5 * (subswath.burst_first_line_time[burst] + subswath.burst_last_line_time[burst]);

        let speed = norm(&geometry.orbit.state_at(mid_time).velocity);
        let steering_rate = subswath.azimuth_steering_rate.to_radians();
        let krot = 2.0 * speed * steering_rate / subswath.wavelength;

        let fm_rate = RangePolynomial::closest(&subswath.azimuth_fm_rates, mid_time)?;
        let centroid = RangePolynomial::closest(&subswath.doppler_centroids, mid_time)?;

        let samples = subswath.samples_per_burst;
        let mut azimuth_fm_rate = Vec::with_capacity(samples);
        let mut doppler_rate = Vec::with_capacity(samples);
        let mut doppler_centroid = Vec::with_capacity(samples);
        for x in 0..samples {
            let two_way_time = 2.0 * subswath.slant_range_time(x as f64, mid_time);
            let ka = fm_rate.evaluate(two_way_time);
            azimuth_fm_rate.push(ka);
            doppler_rate.push(ka * krot / (ka - krot));
            doppler_centroid.push(centroid.evaluate(two_way_time));
        }

        let half_burst = subswath.lines_per_burst as f64 * subswath.azimuth_time_interval / 2.0;
        let fvp = subswath.first_valid_pixel;
        let anchor = half_burst + doppler_centroid.get(fvp)? / azimuth_fm_rate.get(fvp)?;
        let reference_time: Vec<f64> = (0..samples)
            .map(|x| anchor - doppler_centroid[x] / azimuth_fm_rate[x])
            .collect();

        let finite = |v: &[f64]| v.iter().all(|x| x.is_finite());
        if !(finite(&doppler_rate) && finite(&reference_time) && finite(&doppler_centroid)) {
            return None;
        }

        Some(Self { doppler_rate, reference_time, doppler_centroid })
    }
}

/// Doppler models of every burst of a product, computed once per run
pub fn compute_doppler_models(geometry: &ProductGeometry) -> Vec<Option<BurstDopplerModel>> {
    (0..geometry.subswath.num_bursts)
        .map(|burst| {
            let model = BurstDopplerModel::compute(geometry, burst);
            if model.is_none() {
                log::warn!(
                    "{}: Doppler model of burst {} cannot be evaluated, burst will not be deramped",
                    geometry.name,
                    burst
                );
            }
            model
        })
        .collect()
}

/// Deramp/demodulation phase over a rectangle of one burst
#[derive(Debug, Clone)]
pub struct DerampPhase {
    /// Subswath coordinates
    pub rect: TileRect,
    pub phase: Array2<f64>,
}

/// Phase `-pi kt (ta - tref)^2 - 2 pi fdc ta` over `rect`
///
/// `rect` is in subswath coordinates and must lie within burst `burst`;
/// otherwise, or without a model, the phase is unavailable.
pub fn compute_phase(
    geometry: &ProductGeometry,
    model: Option<&BurstDopplerModel>,
    burst: usize,
    rect: &TileRect,
) -> Option<DerampPhase> {
    let model = model?;
    let subswath = &geometry.subswath;
    let burst_start = subswath.burst_line_offset(burst);
    if rect.is_empty()
        || rect.y < burst_start
        || rect.y_end() > burst_start + subswath.lines_per_burst
        || rect.x_end() > subswath.samples_per_burst
    {
        return None;
    }

    let ati = subswath.azimuth_time_interval;
    let phase = Array2::from_shape_fn(rect.shape(), |(row, col)| {
        let ta = (rect.y + row - burst_start) as f64 * ati;
        let x = rect.x + col;
        let kt = model.doppler_rate[x];
        let dt = ta - model.reference_time[x];
        -PI * kt * dt * dt - 2.0 * PI * model.doppler_centroid[x] * ta
    });

    Some(DerampPhase { rect: *rect, phase })
}

/// Rotate I/Q by the phase: `I' = I cos - Q sin`, `Q' = I sin + Q cos`
pub fn deramp_demodulate(
    i: &Array2<f32>,
    q: &Array2<f32>,
    phase: &Array2<f64>,
) -> SarResult<(Array2<f32>, Array2<f32>)> {
    rotate(i, q, phase, 1.0)
}

/// Undo [`deramp_demodulate`] with the phase interpolated at the output pixel
pub fn reramp_remodulate(
    i: &Array2<f32>,
    q: &Array2<f32>,
    phase: &Array2<f64>,
) -> SarResult<(Array2<f32>, Array2<f32>)> {
    rotate(i, q, phase, -1.0)
}

fn rotate(
    i: &Array2<f32>,
    q: &Array2<f32>,
    phase: &Array2<f64>,
    direction: f64,
) -> SarResult<(Array2<f32>, Array2<f32>)> {
    if i.dim() != q.dim() || i.dim() != phase.dim() {
        return Err(SarError::Processing(format!(
            "I/Q/phase shape mismatch: {:?}, {:?}, {:?}",
            i.dim(),
            q.dim(),
            phase.dim()
        )));
    }

    let mut out_i = Array2::zeros(i.dim());
    let mut out_q = Array2::zeros(i.dim());
    Zip::from(&mut out_i)
        .and(&mut out_q)
        .and(i)
        .and(q)
        .and(phase)
        .for_each(|oi, oq, &vi, &vq, &p| {
            let (sin, cos) = (direction * p).sin_cos();
            let (vi, vq) = (vi as f64, vq as f64);
            *oi = (vi * cos - vq * sin) as f32;
            *oq = (vi * sin + vq * cos) as f32;
        });

    Ok((out_i, out_q))
}
