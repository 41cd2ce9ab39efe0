//! sarcoreg: DEM-assisted back-geocoding coregistration of Sentinel-1 TOPS bursts
//!
//! Secondary SLC bursts are resampled onto the reference burst geometry. Each
//! DEM post is projected into both acquisitions through the orbits, the
//! resulting offsets are triangulated onto the reference pixel grid, and the
//! deramped secondary samples are interpolated at those positions.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{BoundingBox, GeoTransform, OrbitData, Polarization, SarError, SarResult, StateVector, TileRect};

pub use io::{
    BandId, BandKind, BandRegistry, BandRole, DemFactory, ElevationModel, GeoidModel, GridDem, LagrangeOrbit,
    MemoryRaster, OrbitModel, SourceRaster,
};

pub use crate::core::{
    tile_grid, CancellationToken, CoregistrationConfig, CoregistrationInputs, Coregistrator, GeolocationSolver,
    ProductGeometry, ProductInput, RunState, SubSwathDescriptor, TileResult,
};
