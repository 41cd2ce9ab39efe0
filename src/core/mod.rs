//! Core coregistration modules

pub mod subswath;
pub mod geolocation;
pub mod init_once;
pub mod burst;
pub mod triangulation;
pub mod offset_grid;
pub mod deramp;
pub mod resample;
pub mod coregistration;

// Re-export main types
pub use subswath::{GeolocationGrid, ProductGeometry, RangePolynomial, SrgrCoefficients, SubSwathDescriptor};
pub use geolocation::{
    forward_geolocate, GeolocationSolver, LookSide, RadarCoordinates, ZeroDoppler, ZeroDopplerSolution,
};
pub use init_once::InitOnce;
pub use burst::{compute_burst_offset, get_burst_indices, BurstIndices, BurstOffsetCalibrator};
pub use triangulation::{grid_linear, Delaunay};
pub use offset_grid::{BurstPair, CorrespondenceGrid, DemSample, ExtensionMargin, PixelCorrespondence};
pub use deramp::{deramp_demodulate, reramp_remodulate, BurstDopplerModel, DerampPhase};
pub use resample::{kernel_by_name, ResamplingKernel, TileResampler};
pub use coregistration::{
    tile_grid, CancellationToken, CoregistrationConfig, CoregistrationInputs, Coregistrator, PolarizationBands,
    ProductInput, RunState, SecondaryState, TileResult,
};
