use crate::core::burst::BurstOffsetCalibrator;
use crate::core::deramp::{compute_doppler_models, compute_phase, deramp_demodulate, BurstDopplerModel};
use crate::core::geolocation::GeolocationSolver;
use crate::core::init_once::InitOnce;
use crate::core::offset_grid::{build_correspondences, estimate_margin, BurstPair, CorrespondenceGrid, PixelCorrespondence};
use crate::core::resample::{kernel_by_name, source_rectangle, ResamplingKernel, SourceWindow, TileResampler};
use crate::core::subswath::ProductGeometry;
use crate::io::dem::{DemFactory, ElevationLookup, GeoidModel};
use crate::io::raster::{BandId, BandInfo, BandKind, BandRegistry, BandRole, SourceRaster};
use crate::types::{Polarization, SarError, SarResult, TileRect};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Coregistration run parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoregistrationConfig {
    /// Resampling kernel name, e.g. "bicubic" or "bisinc-5-point"
    pub resampling_kernel: String,
    /// DEM posts added around each tile's geographic box
    pub dem_extension_samples: usize,
    /// Pixel stride of the edge margin estimate
    pub margin_sampling_stride: usize,
    pub solver: GeolocationSolver,
    /// Drop points without DEM data instead of using the geoid height
    pub mask_out_no_elevation: bool,
    /// Skip restoring the azimuth ramp after resampling
    pub disable_reramp: bool,
    pub output_range_azimuth_offset: bool,
    pub output_elevation: bool,
    pub output_deramp_phase: bool,
    /// Written to every band pixel that cannot be computed
    pub no_data_value: f32,
}

impl Default for CoregistrationConfig {
    fn default() -> Self {
        Self {
            resampling_kernel: "bisinc-5-point".to_string(),
            dem_extension_samples: 20,
            margin_sampling_stride: 20,
            solver: GeolocationSolver::default(),
            mask_out_no_elevation: true,
            disable_reramp: false,
            output_range_azimuth_offset: false,
            output_elevation: false,
            output_deramp_phase: false,
            no_data_value: 0.0,
        }
    }
}

impl CoregistrationConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SarResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> SarResult<()> {
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> SarResult<()> {
        kernel_by_name(&self.resampling_kernel)?;
        if self.margin_sampling_stride == 0 {
            return Err(SarError::Configuration("margin_sampling_stride must be positive".to_string()));
        }
        if self.solver.max_iterations == 0 {
            return Err(SarError::Configuration("solver.max_iterations must be positive".to_string()));
        }
        if !(self.solver.time_tolerance > 0.0) {
            return Err(SarError::Configuration("solver.time_tolerance must be positive".to_string()));
        }
        if !(self.solver.search_padding >= 0.0) {
            return Err(SarError::Configuration("solver.search_padding must not be negative".to_string()));
        }
        Ok(())
    }
}

/// One product and the polarizations it provides
#[derive(Debug, Clone)]
pub struct ProductInput {
    pub geometry: ProductGeometry,
    pub polarizations: Vec<Polarization>,
}

/// Everything a run consumes besides the source rasters
pub struct CoregistrationInputs {
    pub reference: ProductInput,
    pub secondaries: Vec<ProductInput>,
    /// Called once, on the first tile that needs elevations
    pub dem_factory: DemFactory,
    pub geoid: Arc<dyn GeoidModel>,
}

/// Cooperative cancellation flag shared with the tile driver
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn check(&self) -> SarResult<()> {
        if self.is_cancelled() {
            Err(SarError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Source and target bands of one secondary polarization
#[derive(Debug, Clone, Copy)]
pub struct PolarizationBands {
    pub polarization: Polarization,
    pub source_i: BandId,
    pub source_q: BandId,
    pub target_i: BandId,
    pub target_q: BandId,
}

/// Per-secondary run state
pub struct SecondaryState {
    pub geometry: ProductGeometry,
    doppler: Vec<Option<BurstDopplerModel>>,
    burst_offset: BurstOffsetCalibrator,
    pub polarizations: Vec<PolarizationBands>,
    pub azimuth_offset_band: Option<BandId>,
    pub range_offset_band: Option<BandId>,
    pub elevation_band: Option<BandId>,
    pub phase_band: Option<BandId>,
}

impl SecondaryState {
    /// Burst offset if a tile has already calibrated it
    pub fn calibrated_burst_offset(&self) -> Option<i64> {
        self.burst_offset.known_offset()
    }

    fn target_bands(&self) -> impl Iterator<Item = BandId> + '_ {
        self.polarizations
            .iter()
            .flat_map(|p| [p.target_i, p.target_q])
            .chain(self.azimuth_offset_band)
            .chain(self.range_offset_band)
            .chain(self.elevation_band)
            .chain(self.phase_band)
    }
}

/// Immutable run context shared by all tile workers
///
/// The elevation model and the burst offsets are created lazily by the first
/// tile needing them and never change afterwards.
pub struct RunState {
    config: CoregistrationConfig,
    kernel: Arc<dyn ResamplingKernel>,
    reference: ProductGeometry,
    reference_doppler: Vec<Option<BurstDopplerModel>>,
    reference_phase_band: Option<BandId>,
    secondaries: Vec<SecondaryState>,
    bands: BandRegistry,
    elevation: InitOnce<ElevationLookup>,
    dem_factory: DemFactory,
    geoid: Arc<dyn GeoidModel>,
    cancel: CancellationToken,
}

impl RunState {
    pub fn config(&self) -> &CoregistrationConfig {
        &self.config
    }

    pub fn bands(&self) -> &BandRegistry {
        &self.bands
    }

    pub fn reference(&self) -> &ProductGeometry {
        &self.reference
    }

    pub fn secondaries(&self) -> &[SecondaryState] {
        &self.secondaries
    }

    pub fn target_bands(&self) -> Vec<BandId> {
        self.bands.with_role(BandRole::Target)
    }

    /// Shape `(lines, samples)` of the reference subswath and of all target bands
    pub fn output_shape(&self) -> (usize, usize) {
        let subswath = &self.reference.subswath;
        (subswath.total_lines(), subswath.samples_per_burst)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Elevation lookup, loading the DEM on first use
    pub fn elevation(&self) -> SarResult<&ElevationLookup> {
        self.elevation.get_or_try_init(|| {
            log::info!("Loading DEM for {}", self.reference.name);
            let dem = (self.dem_factory)()?;
            Ok(ElevationLookup::new(dem, Arc::clone(&self.geoid), self.config.mask_out_no_elevation))
        })
    }

    /// Burst index offset of secondary `index`, calibrated once per run
    pub fn burst_offset(&self, index: usize) -> SarResult<i64> {
        let secondary = self.secondaries.get(index).ok_or_else(|| {
            SarError::Processing(format!("No secondary product with index {}", index))
        })?;
        let elevation = self.elevation()?;
        Ok(secondary
            .burst_offset
            .offset(&self.reference, &secondary.geometry, elevation, &self.config.solver))
    }

    fn band_no_data(&self, band: BandId) -> f32 {
        self.bands.get(band).map_or(self.config.no_data_value, |b| b.no_data)
    }
}

/// Output of one tile: the requested bands over `rect`
#[derive(Debug, Clone)]
pub struct TileResult {
    pub rect: TileRect,
    pub bands: Vec<(BandId, Array2<f32>)>,
}

impl TileResult {
    pub fn band(&self, id: BandId) -> Option<&Array2<f32>> {
        self.bands.iter().find(|(b, _)| *b == id).map(|(_, data)| data)
    }
}

/// Output buffers of one tile, indexed by band id
struct TileBuffers {
    rect: TileRect,
    slots: Vec<Option<Array2<f32>>>,
}

impl TileBuffers {
    fn wants(&self, band: Option<BandId>) -> bool {
        band.map_or(false, |b| self.slots.get(b.0).map_or(false, |s| s.is_some()))
    }

    /// Write `section` (subswath coordinates, inside the tile) of band `band`
    fn write(&mut self, band: BandId, section: &TileRect, data: &Array2<f32>) {
        let row0 = section.y - self.rect.y;
        let col0 = section.x - self.rect.x;
        if let Some(Some(buffer)) = self.slots.get_mut(band.0) {
            buffer
                .slice_mut(s![row0..row0 + section.height, col0..col0 + section.width])
                .assign(data);
        }
    }
}

/// Back-geocoding coregistration of TOPS bursts
pub struct Coregistrator;

impl Coregistrator {
    /// Validate inputs, resolve the kernel and register all bands
    pub fn initialize(config: CoregistrationConfig, inputs: CoregistrationInputs) -> SarResult<RunState> {
        config.validate()?;
        let kernel = kernel_by_name(&config.resampling_kernel)?;

        let CoregistrationInputs { reference, secondaries, dem_factory, geoid } = inputs;
        if secondaries.is_empty() {
            return Err(SarError::Configuration("At least one secondary product is required".to_string()));
        }
        reference.geometry.validate()?;

        let no_data = config.no_data_value;
        let mut bands = BandRegistry::new();
        let mut register = |name: String, role: BandRole, kind: BandKind, polarization: Option<Polarization>, product: usize| {
            bands.register(BandInfo { name, role, kind, polarization, product, no_data })
        };

        let reference_phase_band = config.output_deramp_phase.then(|| {
            register("derampPhase_ref".to_string(), BandRole::Target, BandKind::ReferenceDerampPhase, None, 0)
        });

        let mut secondary_states = Vec::with_capacity(secondaries.len());
        for (k, secondary) in secondaries.into_iter().enumerate() {
            let product = k + 1;
            let tag = format!("sec{}", product);
            secondary.geometry.validate()?;

            let mut polarizations = Vec::new();
            for &pol in &secondary.polarizations {
                if !reference.polarizations.contains(&pol) {
                    log::warn!("{}: polarization {} not in reference, skipped", secondary.geometry.name, pol);
                    continue;
                }
                polarizations.push(PolarizationBands {
                    polarization: pol,
                    source_i: register(format!("i_{}_{}", pol, tag), BandRole::Source, BandKind::I, Some(pol), product),
                    source_q: register(format!("q_{}_{}", pol, tag), BandRole::Source, BandKind::Q, Some(pol), product),
                    target_i: register(format!("i_{}_{}_coreg", pol, tag), BandRole::Target, BandKind::I, Some(pol), product),
                    target_q: register(format!("q_{}_{}_coreg", pol, tag), BandRole::Target, BandKind::Q, Some(pol), product),
                });
            }
            if polarizations.is_empty() {
                return Err(SarError::Configuration(format!(
                    "{} shares no polarization with the reference",
                    secondary.geometry.name
                )));
            }

            let (azimuth_offset_band, range_offset_band) = if config.output_range_azimuth_offset {
                (
                    Some(register(format!("azOffset_{}", tag), BandRole::Target, BandKind::AzimuthOffset, None, product)),
                    Some(register(format!("rgOffset_{}", tag), BandRole::Target, BandKind::RangeOffset, None, product)),
                )
            } else {
                (None, None)
            };
            let elevation_band = config
                .output_elevation
                .then(|| register(format!("elevation_{}", tag), BandRole::Target, BandKind::Elevation, None, product));
            let phase_band = config
                .output_deramp_phase
                .then(|| register(format!("derampPhase_{}", tag), BandRole::Target, BandKind::DerampPhase, None, product));

            secondary_states.push(SecondaryState {
                doppler: compute_doppler_models(&secondary.geometry),
                geometry: secondary.geometry,
                burst_offset: BurstOffsetCalibrator::new(),
                polarizations,
                azimuth_offset_band,
                range_offset_band,
                elevation_band,
                phase_band,
            });
        }

        log::info!(
            "Coregistration initialised: reference {} ({} bursts), {} secondaries, {} bands, kernel {}",
            reference.geometry.name,
            reference.geometry.subswath.num_bursts,
            secondary_states.len(),
            bands.len(),
            kernel.name()
        );

        Ok(RunState {
            reference_doppler: compute_doppler_models(&reference.geometry),
            reference: reference.geometry,
            reference_phase_band,
            secondaries: secondary_states,
            bands,
            kernel,
            elevation: InitOnce::new(),
            dem_factory,
            geoid,
            cancel: CancellationToken::new(),
            config,
        })
    }

    /// Compute the `requested` target bands over `rect` (reference subswath coordinates)
    pub fn compute_tile(
        state: &RunState,
        raster: &dyn SourceRaster,
        rect: &TileRect,
        requested: &[BandId],
    ) -> SarResult<TileResult> {
        state.cancel.check()?;

        let (lines, samples) = state.output_shape();
        if rect.is_empty() || rect.y_end() > lines || rect.x_end() > samples {
            return Err(SarError::Processing(format!(
                "Tile {:?} outside the {}x{} reference raster",
                rect, lines, samples
            )));
        }

        let mut buffers = TileBuffers { rect: *rect, slots: vec![None; state.bands.len()] };
        for &band in requested {
            match state.bands.get(band) {
                Some(info) if info.role == BandRole::Target => {
                    buffers.slots[band.0] = Some(Array2::from_elem(rect.shape(), info.no_data));
                }
                _ => {
                    return Err(SarError::Processing(format!("{:?} is not a target band", band)));
                }
            }
        }

        let reference = &state.reference.subswath;
        let lpb = reference.lines_per_burst;
        let first_burst = rect.y / lpb;
        let last_burst = ((rect.y_end() - 1) / lpb).min(reference.num_bursts - 1);

        for burst in first_burst..=last_burst {
            state.cancel.check()?;
            let Some(section) = rect.clip_lines(burst * lpb, (burst + 1) * lpb) else {
                continue;
            };

            if let Some(band) = state.reference_phase_band.filter(|&b| buffers.wants(Some(b))) {
                if let Some(phase) =
                    compute_phase(&state.reference, state.reference_doppler[burst].as_ref(), burst, &section)
                {
                    buffers.write(band, &section, &phase.phase.mapv(|p| p as f32));
                }
            }

            for (index, secondary) in state.secondaries.iter().enumerate() {
                if !secondary.target_bands().any(|b| buffers.wants(Some(b))) {
                    continue;
                }
                Self::process_secondary_burst(state, raster, &mut buffers, index, burst, &section)?;
            }
        }

        let bands = requested
            .iter()
            .filter_map(|&band| buffers.slots[band.0].take().map(|data| (band, data)))
            .collect();
        Ok(TileResult { rect: *rect, bands })
    }

    fn process_secondary_burst(
        state: &RunState,
        raster: &dyn SourceRaster,
        buffers: &mut TileBuffers,
        index: usize,
        burst: usize,
        section: &TileRect,
    ) -> SarResult<()> {
        let secondary = &state.secondaries[index];
        let config = &state.config;
        let elevation = state.elevation()?;

        let offset = state.burst_offset(index)?;
        let secondary_burst = burst as i64 + offset;
        if secondary_burst < 0 || secondary_burst >= secondary.geometry.subswath.num_bursts as i64 {
            log::debug!(
                "Reference burst {} has no counterpart in {} (offset {})",
                burst,
                secondary.geometry.name,
                offset
            );
            return Ok(());
        }
        let secondary_burst = secondary_burst as usize;

        let margin = estimate_margin(
            section,
            &state.reference,
            burst,
            elevation,
            &config.solver,
            config.margin_sampling_stride,
        );
        let pair = BurstPair {
            reference: &state.reference,
            secondary: &secondary.geometry,
            burst,
            secondary_burst,
        };
        let grid = build_correspondences(
            section,
            margin,
            &pair,
            elevation,
            &config.solver,
            config.dem_extension_samples,
        );
        state.cancel.check()?;

        Self::write_geometry_bands(state, secondary, buffers, &grid);

        if grid.valid_count() == 0 {
            log::debug!("Burst {} -> {}: no valid correspondences in {:?}", burst, secondary_burst, section);
            return Ok(());
        }

        let resample_pols: Vec<&PolarizationBands> = secondary
            .polarizations
            .iter()
            .filter(|p| buffers.wants(Some(p.target_i)) || buffers.wants(Some(p.target_q)))
            .collect();
        let wants_phase = buffers.wants(secondary.phase_band);
        if resample_pols.is_empty() && !wants_phase {
            return Ok(());
        }

        let Some(source_rect) = source_rectangle(&grid, &secondary.geometry.subswath, state.kernel.as_ref()) else {
            return Ok(());
        };
        let phase = compute_phase(
            &secondary.geometry,
            secondary.doppler[secondary_burst].as_ref(),
            secondary_burst,
            &source_rect,
        )
        .map(|p| p.phase)
        .unwrap_or_else(|| Array2::zeros(source_rect.shape()));

        let resampler = TileResampler::new(state.kernel.as_ref(), config.no_data_value);
        // the phase band needs one resampled window even when no I/Q band is requested
        let pols: Vec<&PolarizationBands> = if resample_pols.is_empty() {
            secondary.polarizations.iter().take(1).collect()
        } else {
            resample_pols
        };

        let mut phase_written = false;
        for bands in pols {
            let i = raster.source_tile(bands.source_i, &source_rect)?;
            let q = raster.source_tile(bands.source_q, &source_rect)?;
            let (di, dq) = deramp_demodulate(&i, &q, &phase)?;
            let window = SourceWindow { rect: source_rect, i: &di, q: &dq, phase: &phase };
            let mut tile = resampler.resample(&window, &grid, &secondary.geometry.subswath)?;

            if let Some(band) = secondary.phase_band.filter(|_| wants_phase && !phase_written) {
                let no_data = state.band_no_data(band);
                let values = tile.phase.mapv(|p| if p.is_finite() { p as f32 } else { no_data });
                buffers.write(band, section, &values);
                phase_written = true;
            }

            if !config.disable_reramp {
                tile.reramp()?;
            }
            buffers.write(bands.target_i, section, &tile.i);
            buffers.write(bands.target_q, section, &tile.q);
        }

        Ok(())
    }

    /// Offset and elevation bands straight from the correspondence grid
    fn write_geometry_bands(state: &RunState, secondary: &SecondaryState, buffers: &mut TileBuffers, grid: &CorrespondenceGrid) {
        let section = grid.rect;
        let secondary_start = secondary.geometry.subswath.burst_line_offset(grid.secondary_burst) as f64;

        if let Some(band) = secondary.azimuth_offset_band.filter(|&b| buffers.wants(Some(b))) {
            let no_data = state.band_no_data(band);
            let values = Array2::from_shape_fn(section.shape(), |(row, col)| match grid.pixels[[row, col]] {
                PixelCorrespondence::Valid { azimuth, .. } => {
                    (secondary_start + azimuth - (section.y + row) as f64) as f32
                }
                PixelCorrespondence::Invalid => no_data,
            });
            buffers.write(band, &section, &values);
        }
        if let Some(band) = secondary.range_offset_band.filter(|&b| buffers.wants(Some(b))) {
            let no_data = state.band_no_data(band);
            let values = Array2::from_shape_fn(section.shape(), |(row, col)| match grid.pixels[[row, col]] {
                PixelCorrespondence::Valid { range, .. } => (range - (section.x + col) as f64) as f32,
                PixelCorrespondence::Invalid => no_data,
            });
            buffers.write(band, &section, &values);
        }
        if let Some(band) = secondary.elevation_band.filter(|&b| buffers.wants(Some(b))) {
            let no_data = state.band_no_data(band);
            let values = grid.elevation.mapv(|h| if h.is_finite() { h } else { no_data });
            buffers.write(band, &section, &values);
        }
    }

    /// Compute `tiles` in parallel and hand each result to `sink`
    ///
    /// The first failing tile, including a panicking one, cancels the run and
    /// its error is returned. Returns the number of tiles delivered.
    pub fn process_tiles<F>(
        state: &RunState,
        raster: &dyn SourceRaster,
        tiles: &[TileRect],
        requested: &[BandId],
        sink: F,
    ) -> SarResult<usize>
    where
        F: Fn(TileResult) -> SarResult<()> + Sync,
    {
        let first_error: Mutex<Option<SarError>> = Mutex::new(None);

        let run_one = |rect: &TileRect| -> SarResult<()> {
            state.cancel.check()?;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                Self::compute_tile(state, raster, rect, requested).and_then(&sink)
            }))
            .unwrap_or_else(|payload| {
                Err(SarError::Internal(format!("tile {:?} panicked: {}", rect, panic_message(payload.as_ref()))))
            });

            if let Err(e) = outcome {
                if !matches!(e, SarError::Cancelled) {
                    log::error!("Tile {:?} failed: {}", rect, e);
                    state.cancel.cancel();
                    if let Ok(mut slot) = first_error.lock() {
                        slot.get_or_insert(e);
                    }
                }
                return Err(SarError::Cancelled);
            }
            Ok(())
        };

        #[cfg(feature = "parallel")]
        let result = {
            use rayon::prelude::*;
            tiles.par_iter().try_for_each(run_one)
        };
        #[cfg(not(feature = "parallel"))]
        let result = tiles.iter().try_for_each(run_one);

        if let Some(error) = first_error.into_inner().ok().flatten() {
            return Err(error);
        }
        result?;

        log::info!("Coregistered {} tiles", tiles.len());
        Ok(tiles.len())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Tiles of at most `tile x tile` pixels covering a `width x height` raster, row by row
pub fn tile_grid(width: usize, height: usize, tile: usize) -> Vec<TileRect> {
    let tile = tile.max(1);
    let mut tiles = Vec::new();
    for y in (0..height).step_by(tile) {
        for x in (0..width).step_by(tile) {
            tiles.push(TileRect::new(x, y, tile.min(width - x), tile.min(height - y)));
        }
    }
    tiles
}
