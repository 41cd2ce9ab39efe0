use crate::types::{Polarization, SarComplex, SarError, SarResult, SarRealImage, TileRect};
use ndarray::{s, Array2};
use std::sync::RwLock;

/// Stable index of a band within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BandId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BandKind {
    I,
    Q,
    AzimuthOffset,
    RangeOffset,
    Elevation,
    /// Interpolated secondary deramp phase
    DerampPhase,
    ReferenceDerampPhase,
}

/// Whether the engine reads or produces a band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BandRole {
    Source,
    Target,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BandInfo {
    pub name: String,
    pub role: BandRole,
    pub kind: BandKind,
    pub polarization: Option<Polarization>,
    /// 0 for the reference product, `k + 1` for secondary `k`
    pub product: usize,
    pub no_data: f32,
}

/// Flat arena of band metadata, indexed by [`BandId`]
#[derive(Debug, Clone, Default)]
pub struct BandRegistry {
    bands: Vec<BandInfo>,
}

impl BandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, info: BandInfo) -> BandId {
        self.bands.push(info);
        BandId(self.bands.len() - 1)
    }

    pub fn get(&self, id: BandId) -> Option<&BandInfo> {
        self.bands.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BandId, &BandInfo)> {
        self.bands.iter().enumerate().map(|(i, info)| (BandId(i), info))
    }

    /// First band matching role, product, kind and polarization
    pub fn find(
        &self,
        role: BandRole,
        product: usize,
        kind: BandKind,
        polarization: Option<Polarization>,
    ) -> Option<BandId> {
        self.iter()
            .find(|(_, b)| {
                b.role == role && b.product == product && b.kind == kind && b.polarization == polarization
            })
            .map(|(id, _)| id)
    }

    pub fn with_role(&self, role: BandRole) -> Vec<BandId> {
        self.iter().filter(|(_, b)| b.role == role).map(|(id, _)| id).collect()
    }

    pub fn by_name(&self, name: &str) -> Option<BandId> {
        self.iter().find(|(_, b)| b.name == name).map(|(id, _)| id)
    }
}

/// Tiled access to source bands
///
/// Implementations may compute or fetch data concurrently; the engine calls
/// this from several tile workers at once.
pub trait SourceRaster: Send + Sync {
    /// Samples of `band` over `rect` in subswath coordinates, shape `(height, width)`
    fn source_tile(&self, band: BandId, rect: &TileRect) -> SarResult<SarRealImage>;
}

/// Whole bands held in memory
#[derive(Debug, Default)]
pub struct MemoryRaster {
    bands: RwLock<Vec<Option<Array2<f32>>>>,
}

impl MemoryRaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, band: BandId, data: Array2<f32>) -> SarResult<()> {
        let mut bands = self
            .bands
            .write()
            .map_err(|_| SarError::Internal("band store lock poisoned".to_string()))?;
        if bands.len() <= band.0 {
            bands.resize(band.0 + 1, None);
        }
        bands[band.0] = Some(data);
        Ok(())
    }

    /// Split complex SLC samples into the `i` and `q` bands
    pub fn insert_complex(&self, i: BandId, q: BandId, data: &Array2<SarComplex>) -> SarResult<()> {
        self.insert(i, data.mapv(|c| c.re))?;
        self.insert(q, data.mapv(|c| c.im))
    }

    /// Copy `tile` into `band` at `rect`, creating a `shape` band filled with `fill` first if absent
    pub fn write_tile(
        &self,
        band: BandId,
        rect: &TileRect,
        tile: &Array2<f32>,
        shape: (usize, usize),
        fill: f32,
    ) -> SarResult<()> {
        let mut bands = self
            .bands
            .write()
            .map_err(|_| SarError::Internal("band store lock poisoned".to_string()))?;
        if bands.len() <= band.0 {
            bands.resize(band.0 + 1, None);
        }
        let data = bands[band.0].get_or_insert_with(|| Array2::from_elem(shape, fill));
        let (rows, cols) = data.dim();
        if rect.y_end() > rows || rect.x_end() > cols || tile.dim() != rect.shape() {
            return Err(SarError::Processing(format!(
                "Tile {:?} of shape {:?} does not fit band {:?} of shape {:?}",
                rect,
                tile.dim(),
                band,
                (rows, cols)
            )));
        }
        data.slice_mut(s![rect.y..rect.y_end(), rect.x..rect.x_end()]).assign(tile);
        Ok(())
    }

    /// Copy of a whole band
    pub fn band(&self, band: BandId) -> Option<Array2<f32>> {
        let bands = self.bands.read().ok()?;
        bands.get(band.0).and_then(|b| b.clone())
    }
}

impl SourceRaster for MemoryRaster {
    fn source_tile(&self, band: BandId, rect: &TileRect) -> SarResult<SarRealImage> {
        let bands = self
            .bands
            .read()
            .map_err(|_| SarError::Internal("band store lock poisoned".to_string()))?;
        let data = bands
            .get(band.0)
            .and_then(|b| b.as_ref())
            .ok_or_else(|| SarError::Processing(format!("Band {:?} has no data", band)))?;

        let (rows, cols) = data.dim();
        if rect.y_end() > rows || rect.x_end() > cols {
            return Err(SarError::Processing(format!(
                "Requested {:?} outside band {:?} of shape {:?}",
                rect,
                band,
                (rows, cols)
            )));
        }
        Ok(data.slice(s![rect.y..rect.y_end(), rect.x..rect.x_end()]).to_owned())
    }
}
