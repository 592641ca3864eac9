//! Store discovery and lazy access.
//!
//! A store is a Zarr V3 group on the local filesystem holding `time`, `lat`
//! and `lon` coordinate arrays plus one or more `(time, lat, lon)` data
//! variables.

mod lazy;

pub use lazy::{canonical_name, ArchiveReader, DeferredGrid, LazyDataset};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, StoreError};

/// Logical group of input variables, one store per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreGroup {
    Temperature,
    Precipitation,
    Humidity,
}

impl StoreGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreGroup::Temperature => "temperature",
            StoreGroup::Precipitation => "precipitation",
            StoreGroup::Humidity => "humidity",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "temperature" => Some(StoreGroup::Temperature),
            "precipitation" => Some(StoreGroup::Precipitation),
            "humidity" => Some(StoreGroup::Humidity),
            _ => None,
        }
    }

    /// The group a canonical variable is read from.
    pub fn for_variable(canonical: &str) -> Option<Self> {
        match canonical {
            "tasmax" | "tasmin" | "tas" => Some(StoreGroup::Temperature),
            "pr" => Some(StoreGroup::Precipitation),
            "hurs" => Some(StoreGroup::Humidity),
            _ => None,
        }
    }
}

impl std::fmt::Display for StoreGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Directory layouts searched for stores, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreLayout {
    /// `{root}/{group}.zarr`
    Flat,
    /// `{root}/{group}/{group}.zarr`
    Nested,
    /// `{root}/zarr/{group}.zarr`
    ZarrDir,
    /// `{root}/{group}`
    Bare,
}

impl StoreLayout {
    pub const ALL: [StoreLayout; 4] = [
        StoreLayout::Flat,
        StoreLayout::Nested,
        StoreLayout::ZarrDir,
        StoreLayout::Bare,
    ];

    /// Candidate path for a group under this layout.
    pub fn path(&self, root: &Path, group: StoreGroup) -> PathBuf {
        let name = group.as_str();
        match self {
            StoreLayout::Flat => root.join(format!("{name}.zarr")),
            StoreLayout::Nested => root.join(name).join(format!("{name}.zarr")),
            StoreLayout::ZarrDir => root.join("zarr").join(format!("{name}.zarr")),
            StoreLayout::Bare => root.join(name),
        }
    }
}

/// True when `path` holds Zarr group metadata.
pub fn is_store(path: &Path) -> bool {
    path.join("zarr.json").is_file()
}

/// Finds input stores under a data root.
#[derive(Debug, Clone)]
pub struct StoreLocator {
    root: PathBuf,
}

impl StoreLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path for every requested group.
    ///
    /// The first layout containing any requested store wins, and every
    /// requested group must then exist under that layout.
    pub fn resolve(&self, groups: &[StoreGroup]) -> Result<BTreeMap<StoreGroup, PathBuf>> {
        let mut tried = Vec::new();

        for layout in StoreLayout::ALL {
            let candidates: Vec<(StoreGroup, PathBuf)> = groups
                .iter()
                .map(|g| (*g, layout.path(&self.root, *g)))
                .collect();
            tried.extend(candidates.iter().map(|(_, p)| p.clone()));

            if !candidates.iter().any(|(_, p)| is_store(p)) {
                continue;
            }

            debug!(root = %self.root.display(), ?layout, "Store layout matched");

            let mut resolved = BTreeMap::new();
            for (group, path) in candidates {
                if !is_store(&path) {
                    return Err(StoreError::NotFound {
                        group: group.to_string(),
                        tried: all_candidates(&self.root, group),
                    });
                }
                resolved.insert(group, path);
            }

            info!(
                root = %self.root.display(),
                stores = resolved.len(),
                "Resolved input stores"
            );
            return Ok(resolved);
        }

        Err(StoreError::NotFound {
            group: groups
                .iter()
                .map(|g| g.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            tried,
        })
    }

    /// Resolve and lazily open every requested group.
    pub fn open(&self, groups: &[StoreGroup]) -> Result<BTreeMap<StoreGroup, LazyDataset>> {
        self.resolve(groups)?
            .into_iter()
            .map(|(group, path)| Ok((group, LazyDataset::open(&path)?)))
            .collect()
    }
}

fn all_candidates(root: &Path, group: StoreGroup) -> Vec<PathBuf> {
    StoreLayout::ALL
        .iter()
        .map(|layout| layout.path(root, group))
        .collect()
}
