mod common;

use approx::assert_abs_diff_eq;
use common::*;
use ndarray::{s, Array2};
use sarcoreg::io::ElevationModel;
use sarcoreg::{
    tile_grid, BandId, CoregistrationConfig, Coregistrator, MemoryRaster, RunState, SarError, TileRect,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Run every tile and collect the requested bands into a raster
fn run_all(state: &RunState, sources: &MemoryRaster, requested: &[BandId], tile: usize) -> MemoryRaster {
    let output = MemoryRaster::new();
    let (lines, samples) = state.output_shape();
    let tiles = tile_grid(samples, lines, tile);
    let delivered = Coregistrator::process_tiles(state, sources, &tiles, requested, |result| {
        for (band, data) in &result.bands {
            let no_data = state.bands().get(*band).unwrap().no_data;
            output.write_tile(*band, &result.rect, data, (lines, samples), no_data)?;
        }
        Ok(())
    })
    .expect("Coregistration failed");
    assert_eq!(delivered, tiles.len());
    output
}

fn assert_close(actual: &Array2<f32>, expected: &Array2<f32>, epsilon: f32) {
    assert_eq!(actual.dim(), expected.dim());
    for ((idx, a), e) in actual.indexed_iter().zip(expected.iter()) {
        assert!((a - e).abs() <= epsilon, "pixel {:?}: {} vs {}", idx, a, e);
    }
}

#[test]
fn test_identity_coregistration_reproduces_secondary() {
    init_logging();
    let orbit = orbit();
    let reference = product("reference", SceneParams::default(), orbit.clone());
    let secondary = product("secondary", SceneParams::default(), orbit);
    let dem: Arc<dyn ElevationModel> = Arc::new(flat_dem(&[&reference]));

    let config = CoregistrationConfig {
        output_range_azimuth_offset: true,
        output_elevation: true,
        ..Default::default()
    };
    let state = Coregistrator::initialize(config, inputs(reference, vec![secondary], dem)).unwrap();

    let data = slc(3 * LINES_PER_BURST, SAMPLES, 7);
    let sources = MemoryRaster::new();
    load_secondary(&state, &sources, 0, &data);

    let targets = state.target_bands();
    let output = run_all(&state, &sources, &targets, 64);

    let sec = &state.secondaries()[0];
    let bands = sec.polarizations[0];
    assert_close(&output.band(bands.target_i).unwrap(), &data.0, 1e-3);
    assert_close(&output.band(bands.target_q).unwrap(), &data.1, 1e-3);

    let zeros = Array2::zeros(state.output_shape());
    assert_close(&output.band(sec.azimuth_offset_band.unwrap()).unwrap(), &zeros, 1e-3);
    assert_close(&output.band(sec.range_offset_band.unwrap()).unwrap(), &zeros, 1e-3);
    assert_close(&output.band(sec.elevation_band.unwrap()).unwrap(), &zeros, 1e-3);
    assert_eq!(state.burst_offset(0).unwrap(), 0);
}

#[test]
fn test_coarse_dem_leaves_no_holes() {
    init_logging();
    let orbit = orbit();
    let reference = product("reference", SceneParams::default(), orbit.clone());
    let secondary = product("secondary", SceneParams::default(), orbit);
    // posts several hundred meters apart, wider than the whole burst in range
    let dem: Arc<dyn ElevationModel> = Arc::new(flat_dem_with_spacing(&[&reference], 0.004));

    let no_data = -9999.0;
    let config = CoregistrationConfig {
        resampling_kernel: "nearest".to_string(),
        no_data_value: no_data,
        ..Default::default()
    };
    let state = Coregistrator::initialize(config, inputs(reference, vec![secondary], dem)).unwrap();
    let data = slc(3 * LINES_PER_BURST, SAMPLES, 31);
    let sources = MemoryRaster::new();
    load_secondary(&state, &sources, 0, &data);

    let output = run_all(&state, &sources, &state.target_bands(), 16);
    let bands = state.secondaries()[0].polarizations[0];
    let i = output.band(bands.target_i).unwrap();
    assert!(i.iter().all(|&v| v != no_data));
    assert_close(&i, &data.0, 1e-5);
    assert_close(&output.band(bands.target_q).unwrap(), &data.1, 1e-5);
}

#[test]
fn test_range_shift_beyond_last_column_is_no_data() {
    init_logging();
    let orbit = orbit();
    let reference = product("reference", SceneParams::default(), orbit.clone());
    // secondary pixel x + 1.5 sees the ground of reference pixel x
    let shifted = SceneParams { near_range: NEAR_RANGE - 1.5 * RANGE_SPACING, ..Default::default() };
    let secondary = product("secondary", shifted, orbit);
    let dem: Arc<dyn ElevationModel> = Arc::new(flat_dem(&[&reference]));

    let no_data = -9999.0;
    let config = CoregistrationConfig {
        output_range_azimuth_offset: true,
        resampling_kernel: "bilinear".to_string(),
        no_data_value: no_data,
        ..Default::default()
    };
    let state = Coregistrator::initialize(config, inputs(reference, vec![secondary], dem)).unwrap();
    let sources = MemoryRaster::new();
    load_secondary(&state, &sources, 0, &slc(3 * LINES_PER_BURST, SAMPLES, 11));

    let output = run_all(&state, &sources, &state.target_bands(), 80);
    let sec = &state.secondaries()[0];
    let i = output.band(sec.polarizations[0].target_i).unwrap();
    let range_offset = output.band(sec.range_offset_band.unwrap()).unwrap();

    for row in [0, 30, 59, 60, 100, 179] {
        assert_eq!(i[[row, SAMPLES - 1]], no_data, "row {}", row);
        assert_eq!(range_offset[[row, SAMPLES - 1]], no_data);
        assert_ne!(i[[row, SAMPLES - 2]], no_data, "row {}", row);
        assert_abs_diff_eq!(range_offset[[row, SAMPLES - 2]], 1.5, epsilon = 1e-3);
        assert_abs_diff_eq!(range_offset[[row, 0]], 1.5, epsilon = 1e-3);
    }
    assert!(i.iter().all(|v| v.is_finite()));
}

#[test]
fn test_secondary_burst_offset_maps_shifted_bursts() {
    init_logging();
    let orbit = orbit();
    let reference = product("reference", SceneParams::default(), orbit.clone());
    // one extra burst acquired before the reference start
    let early = SceneParams { num_bursts: 4, first_burst_time: -BURST_CYCLE, ..Default::default() };
    let secondary = product("secondary", early, orbit);
    let dem: Arc<dyn ElevationModel> = Arc::new(flat_dem(&[&reference, &secondary]));

    let config = CoregistrationConfig { output_range_azimuth_offset: true, ..Default::default() };
    let state = Coregistrator::initialize(config, inputs(reference, vec![secondary], dem)).unwrap();
    assert_eq!(state.burst_offset(0).unwrap(), 1);

    let expected = slc(3 * LINES_PER_BURST, SAMPLES, 23);
    let mut data = slc(4 * LINES_PER_BURST, SAMPLES, 5);
    data.0.slice_mut(s![LINES_PER_BURST.., ..]).assign(&expected.0);
    data.1.slice_mut(s![LINES_PER_BURST.., ..]).assign(&expected.1);
    let sources = MemoryRaster::new();
    load_secondary(&state, &sources, 0, &data);

    let output = run_all(&state, &sources, &state.target_bands(), 90);
    let sec = &state.secondaries()[0];
    assert_close(&output.band(sec.polarizations[0].target_i).unwrap(), &expected.0, 1e-3);
    assert_close(&output.band(sec.polarizations[0].target_q).unwrap(), &expected.1, 1e-3);

    let azimuth_offset = output.band(sec.azimuth_offset_band.unwrap()).unwrap();
    assert_close(&azimuth_offset, &Array2::from_elem(state.output_shape(), LINES_PER_BURST as f32), 1e-3);
}

#[test]
fn test_deramp_phase_bands_agree_without_shift() {
    init_logging();
    let orbit = orbit();
    let reference = product("reference", SceneParams::default(), orbit.clone());
    let secondary = product("secondary", SceneParams::default(), orbit);
    let dem: Arc<dyn ElevationModel> = Arc::new(flat_dem(&[&reference]));

    let config = CoregistrationConfig { output_deramp_phase: true, ..Default::default() };
    let state = Coregistrator::initialize(config, inputs(reference, vec![secondary], dem)).unwrap();
    let sources = MemoryRaster::new();
    load_secondary(&state, &sources, 0, &slc(3 * LINES_PER_BURST, SAMPLES, 3));

    let reference_phase = state.bands().by_name("derampPhase_ref").unwrap();
    let secondary_phase = state.bands().by_name("derampPhase_sec1").unwrap();
    let output = run_all(&state, &sources, &[reference_phase, secondary_phase], 60);

    let reference_phase = output.band(reference_phase).unwrap();
    assert!(reference_phase.iter().any(|p| p.abs() > 1.0));
    assert_close(&output.band(secondary_phase).unwrap(), &reference_phase, 1e-3);
}

#[test]
fn test_burst_offset_is_calibrated_once() {
    init_logging();
    let orbit = orbit();
    let reference = product("reference", SceneParams::default(), orbit.clone());
    let secondary = product("secondary", SceneParams::default(), orbit);
    let counting = Arc::new(CountingDem::new(flat_dem(&[&reference])));

    let loads = Arc::new(AtomicUsize::new(0));
    let mut run_inputs = inputs(reference, vec![secondary], counting.clone());
    let (dem, load_counter) = (counting.clone(), loads.clone());
    run_inputs.dem_factory = Box::new(move || {
        load_counter.fetch_add(1, Ordering::SeqCst);
        Ok(dem.clone() as Arc<dyn ElevationModel>)
    });

    let state = Coregistrator::initialize(CoregistrationConfig::default(), run_inputs).unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 0);
    assert_eq!(state.secondaries()[0].calibrated_burst_offset(), None);

    let first = state.burst_offset(0).unwrap();
    assert_eq!(state.secondaries()[0].calibrated_burst_offset(), Some(first));
    let queries = counting.count();
    assert!(queries > 0);
    let second = state.burst_offset(0).unwrap();
    assert_eq!(first, second);
    assert_eq!(counting.count(), queries);

    // tiles reuse the loaded DEM
    let sources = MemoryRaster::new();
    load_secondary(&state, &sources, 0, &slc(3 * LINES_PER_BURST, SAMPLES, 1));
    run_all(&state, &sources, &state.target_bands(), 64);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[test]
fn test_offset_bands_need_no_source_data() {
    init_logging();
    let orbit = orbit();
    let reference = product("reference", SceneParams::default(), orbit.clone());
    let secondary = product("secondary", SceneParams::default(), orbit);
    let dem: Arc<dyn ElevationModel> = Arc::new(flat_dem(&[&reference]));

    let config = CoregistrationConfig { output_range_azimuth_offset: true, ..Default::default() };
    let state = Coregistrator::initialize(config, inputs(reference, vec![secondary], dem)).unwrap();
    let band = state.secondaries()[0].azimuth_offset_band.unwrap();

    let empty = MemoryRaster::new();
    let rect = TileRect::new(10, 50, 30, 20);
    let result = Coregistrator::compute_tile(&state, &empty, &rect, &[band]).unwrap();
    assert_eq!(result.bands.len(), 1);
    let offsets = result.band(band).unwrap();
    assert_eq!(offsets.dim(), (20, 30));
    assert!(offsets.iter().all(|v| v.abs() < 1e-3));

    // resampled bands do read the sources
    let i = state.secondaries()[0].polarizations[0].target_i;
    assert!(Coregistrator::compute_tile(&state, &empty, &rect, &[i]).is_err());
}

#[test]
fn test_initialization_errors() {
    init_logging();
    let orbit = orbit();
    let reference = product("reference", SceneParams::default(), orbit.clone());
    let secondary = product("secondary", SceneParams::default(), orbit);
    let dem: Arc<dyn ElevationModel> = Arc::new(flat_dem(&[&reference]));

    let bad_kernel = CoregistrationConfig { resampling_kernel: "lanczos-3".to_string(), ..Default::default() };
    let result = Coregistrator::initialize(bad_kernel, inputs(reference.clone(), vec![secondary.clone()], dem.clone()));
    assert!(matches!(result, Err(SarError::Configuration(_))));

    let result = Coregistrator::initialize(CoregistrationConfig::default(), inputs(reference.clone(), vec![], dem.clone()));
    assert!(matches!(result, Err(SarError::Configuration(_))));

    let mut run_inputs = inputs(reference.clone(), vec![secondary.clone()], dem.clone());
    run_inputs.secondaries[0].polarizations = vec![sarcoreg::Polarization::VH];
    let result = Coregistrator::initialize(CoregistrationConfig::default(), run_inputs);
    assert!(matches!(result, Err(SarError::Configuration(_))));

    // orbit swapped after construction no longer spans the bursts
    let mut stale = secondary;
    stale.orbit = orbit_between(10, 16);
    let result = Coregistrator::initialize(CoregistrationConfig::default(), inputs(reference, vec![stale], dem));
    assert!(matches!(result, Err(SarError::Metadata(_))));
}

#[test]
fn test_compute_tile_rejects_bad_requests() {
    init_logging();
    let orbit = orbit();
    let reference = product("reference", SceneParams::default(), orbit.clone());
    let secondary = product("secondary", SceneParams::default(), orbit);
    let dem: Arc<dyn ElevationModel> = Arc::new(flat_dem(&[&reference]));
    let state = Coregistrator::initialize(CoregistrationConfig::default(), inputs(reference, vec![secondary], dem)).unwrap();
    let sources = MemoryRaster::new();

    let source_band = state.secondaries()[0].polarizations[0].source_i;
    let target_band = state.secondaries()[0].polarizations[0].target_i;
    assert!(Coregistrator::compute_tile(&state, &sources, &TileRect::new(0, 0, 8, 8), &[source_band]).is_err());
    assert!(Coregistrator::compute_tile(&state, &sources, &TileRect::new(0, 170, 8, 20), &[target_band]).is_err());
    assert!(Coregistrator::compute_tile(&state, &sources, &TileRect::new(0, 0, 0, 8), &[target_band]).is_err());
}

#[test]
fn test_tile_failures_abort_the_run() {
    init_logging();
    let orbit = orbit();
    let reference = product("reference", SceneParams::default(), orbit.clone());
    let secondary = product("secondary", SceneParams::default(), orbit);
    let dem: Arc<dyn ElevationModel> = Arc::new(flat_dem(&[&reference]));
    let config = CoregistrationConfig { output_range_azimuth_offset: true, ..Default::default() };
    let state = Coregistrator::initialize(config, inputs(reference, vec![secondary], dem)).unwrap();
    let band = state.secondaries()[0].range_offset_band.unwrap();
    let sources = MemoryRaster::new();
    let tiles = tile_grid(SAMPLES, 3 * LINES_PER_BURST, 40);

    let result = Coregistrator::process_tiles(&state, &sources, &tiles, &[band], |_| {
        Err(SarError::Processing("sink full".to_string()))
    });
    assert!(matches!(result, Err(SarError::Processing(ref msg)) if msg == "sink full"));
    assert!(state.cancellation_token().is_cancelled());
    assert!(matches!(
        Coregistrator::compute_tile(&state, &sources, &tiles[0], &[band]),
        Err(SarError::Cancelled)
    ));
}

#[test]
fn test_panicking_tile_becomes_internal_error() {
    init_logging();
    let orbit = orbit();
    let reference = product("reference", SceneParams::default(), orbit.clone());
    let secondary = product("secondary", SceneParams::default(), orbit);
    let dem: Arc<dyn ElevationModel> = Arc::new(flat_dem(&[&reference]));
    let config = CoregistrationConfig { output_range_azimuth_offset: true, ..Default::default() };
    let state = Coregistrator::initialize(config, inputs(reference, vec![secondary], dem)).unwrap();
    let band = state.secondaries()[0].range_offset_band.unwrap();
    let sources = MemoryRaster::new();
    let tiles = tile_grid(SAMPLES, 3 * LINES_PER_BURST, 90);

    let result = Coregistrator::process_tiles(&state, &sources, &tiles, &[band], |result| {
        if result.rect.y > 0 {
            panic!("sink exploded");
        }
        Ok(())
    });
    assert!(matches!(result, Err(SarError::Internal(ref msg)) if msg.contains("sink exploded")));
}

#[test]
fn test_cancelled_run_emits_nothing() {
    init_logging();
    let orbit = orbit();
    let reference = product("reference", SceneParams::default(), orbit.clone());
    let secondary = product("secondary", SceneParams::default(), orbit);
    let dem: Arc<dyn ElevationModel> = Arc::new(flat_dem(&[&reference]));
    let state = Coregistrator::initialize(CoregistrationConfig::default(), inputs(reference, vec![secondary], dem)).unwrap();

    state.cancellation_token().cancel();
    let emitted = AtomicUsize::new(0);
    let tiles = tile_grid(SAMPLES, 3 * LINES_PER_BURST, 64);
    let result = Coregistrator::process_tiles(&state, &MemoryRaster::new(), &tiles, &state.target_bands(), |_| {
        emitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    assert!(matches!(result, Err(SarError::Cancelled)));
    assert_eq!(emitted.load(Ordering::SeqCst), 0);
}
