//! Catalog accessor: resolves dataset names into source handles.
//!
//! The protocol only ever talks to the [`Catalog`] trait. [`StaticCatalog`] is
//! the implementation shipped with the server: a fixed set of named entries,
//! loaded from a JSON catalog file or taken from [`StaticCatalog::builtin`].
//!
//! ## Catalog file format
//!
//! ```json
//! {
//!   "sources": {
//!     "numbers": {
//!       "description": "The numbers 0 through 999",
//!       "driver": "range",
//!       "args": { "stop": 1000, "chunk_len": 100 }
//!     }
//!   }
//! }
//! ```
//!
//! Open parameters sent by a client override the entry's `args` key by key.

use crate::{
    ContainerKind, DataSource, Error, Parameters, Result,
    sources::{RangeSource, RecordsSource},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Resolves dataset names into live source handles.
pub trait Catalog: Send + Sync + 'static {
    /// Names of every dataset this catalog can open, in a stable order.
    fn list_names(&self) -> Vec<String>;

    /// Describes one entry without opening it.
    fn describe(&self, name: &str) -> Result<EntryDescription>;

    /// Creates an undiscovered handle for `name`.
    ///
    /// # Errors
    ///
    /// [`Error::DatasetNotFound`] for unknown names and
    /// [`Error::InvalidParameters`] when `params` are rejected.
    fn instantiate(&self, name: &str, params: &Parameters) -> Result<Box<dyn DataSource>>;
}

/// Public description of a catalog entry, as listed by `info`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntryDescription {
    pub description: Option<String>,
    pub driver: Driver,
    pub container: ContainerKind,
    /// Argument names a client may override when opening.
    pub user_parameters: Vec<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Built-in source drivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Range,
    Records,
}

impl Driver {
    pub const fn container(self) -> ContainerKind {
        match self {
            Self::Range => ContainerKind::NdArray,
            Self::Records => ContainerKind::DataFrame,
        }
    }
}

/// One entry of a catalog file.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntrySpec {
    #[serde(default)]
    pub description: Option<String>,
    pub driver: Driver,
    #[serde(default)]
    pub args: Parameters,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    sources: BTreeMap<String, EntrySpec>,
}

/// Failure to load a catalog file.
#[derive(Debug, thiserror::Error)]
pub enum CatalogLoadError {
    #[error("Failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A fixed, read-only set of catalog entries.
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    entries: BTreeMap<String, EntrySpec>,
}

impl StaticCatalog {
    pub const fn new(entries: BTreeMap<String, EntrySpec>) -> Self {
        Self { entries }
    }

    /// The catalog served when no catalog file is configured.
    ///
    /// Contains a single `numbers` entry: 1000 `float64` values, 100 per
    /// chunk.
    pub fn builtin() -> Self {
        let mut args = Parameters::new();
        args.insert("stop".into(), 1000.into());
        args.insert("chunk_len".into(), 100.into());

        let mut entries = BTreeMap::new();
        entries.insert(
            "numbers".to_owned(),
            EntrySpec {
                description: Some("The numbers 0 through 999 as float64".to_owned()),
                driver: Driver::Range,
                args,
                metadata: serde_json::Map::new(),
            },
        );
        Self { entries }
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogLoadError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Ok(Self::new(file.sources))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogLoadError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, name: &str) -> Result<&EntrySpec> {
        self.entries.get(name).ok_or_else(|| Error::DatasetNotFound {
            name: name.to_owned(),
        })
    }
}

impl Catalog for StaticCatalog {
    fn list_names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn describe(&self, name: &str) -> Result<EntryDescription> {
        let entry = self.entry(name)?;
        Ok(EntryDescription {
            description: entry.description.clone(),
            driver: entry.driver,
            container: entry.driver.container(),
            user_parameters: entry.args.keys().cloned().collect(),
            metadata: entry.metadata.clone(),
        })
    }

    fn instantiate(&self, name: &str, params: &Parameters) -> Result<Box<dyn DataSource>> {
        let entry = self.entry(name)?;
        let metadata = entry.metadata.clone();
        Ok(match entry.driver {
            Driver::Range => {
                Box::new(RangeSource::from_params(&entry.args, params)?.with_metadata(metadata))
            }
            Driver::Records => Box::new(
                RecordsSource::from_params(name, &entry.args, params)?.with_metadata(metadata),
            ),
        })
    }
}
