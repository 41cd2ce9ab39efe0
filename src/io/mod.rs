pub mod dem;
pub mod orbit;
pub mod raster;

pub use dem::{DemFactory, ElevationLookup, ElevationModel, GeoidModel, GridDem, GridGeoid, ZeroGeoid};
pub use orbit::{LagrangeOrbit, OrbitModel, OrbitState};
pub use raster::{BandId, BandInfo, BandKind, BandRegistry, BandRole, MemoryRaster, SourceRaster};
