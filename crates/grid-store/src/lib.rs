//! Chunked array store adapter for gridded daily climate data.
//!
//! This crate gives the indices engine lazy, tile-at-a-time access to Zarr V3
//! stores on the local filesystem:
//!
//! - **Discovery**: find `temperature`, `precipitation` and `humidity` stores
//!   under a data root across the supported directory layouts
//! - **Lazy access**: open metadata and coordinates only, narrow by time, and
//!   read data solely through explicit force points
//! - **Units**: every variable carries its units; forced values are
//!   normalized to degC and mm/day
//! - **Atomic writes**: archives are staged next to their destination and
//!   renamed into place on commit
//!
//! # Architecture
//!
//! ```text
//! StoreLocator::resolve(groups)
//!      │
//!      ▼
//! LazyDataset::open(path)          metadata + lat/lon/time only
//!      │
//!      ├─► select_time(start, end) index arithmetic, still lazy
//!      │
//!      └─► canonical()             tmax→tasmax, ppt→pr, derived tas
//!               │
//!               ▼
//!          DeferredGrid::force_tile(tile)   the only read path
//!               │
//!               ▼
//!          TileSeries [time][lat][lon], normalized units
//! ```
//!
//! # Example
//!
//! ```ignore
//! use grid_store::{StoreGroup, StoreLocator};
//!
//! let stores = StoreLocator::new("/data").open(&[StoreGroup::Temperature])?;
//! let temperature = stores[&StoreGroup::Temperature].select_time(start, end)?;
//! let grids = temperature.canonical()?;
//! let tile = grids["tasmax"].force_tile(temperature.coords().full_tile())?;
//! ```

pub mod config;
pub mod error;
pub mod interpolation;
pub mod store;
pub mod testdata;
pub mod time;
pub mod types;
pub mod units;
pub mod writer;

// Re-export commonly used types at crate root
pub use config::{StoreConfig, ZarrCompression};
pub use error::{Result, StoreError};
pub use interpolation::{bilinear_interpolate, interpolate, nearest_interpolate, InterpolationMethod};
pub use store::{
    canonical_name, ArchiveReader, DeferredGrid, LazyDataset, StoreGroup, StoreLayout,
    StoreLocator,
};
pub use types::{GridCoordinates, TileSeries, TileWindow};
pub use units::{Units, KELVIN_OFFSET};
pub use writer::{DatasetDraft, DatasetWriter, VariableSpec, WriteResult};
