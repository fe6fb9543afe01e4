//! Dataset references and the workspace handle they resolve against.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// The kind of artifact a dataset reference denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// Point feature class (incident locations, aggregated counts).
    #[default]
    PointFeatures,
    /// Generic feature class (polygons, regression outputs).
    Features,
    /// A derived raster surface.
    Raster,
    /// A non-spatial table (covariates, coefficients, diagnostics).
    Table,
    /// A report emitted by the engine; never persisted in the catalog.
    Report,
}

impl DatasetKind {
    /// Returns true if datasets of this kind live in the workspace catalog.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        !matches!(self, Self::Report)
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PointFeatures => write!(f, "point_features"),
            Self::Features => write!(f, "features"),
            Self::Raster => write!(f, "raster"),
            Self::Table => write!(f, "table"),
            Self::Report => write!(f, "report"),
        }
    }
}

/// A named dataset in the workspace catalog.
///
/// References carry no workspace of their own: they are resolved by the
/// [`FeatureStore`](crate::store::FeatureStore) they are handed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetRef {
    /// Logical catalog name.
    pub name: String,
    /// The artifact kind.
    #[serde(default)]
    pub kind: DatasetKind,
}

impl DatasetRef {
    /// Creates a new dataset reference.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: DatasetKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Creates a point feature class reference.
    #[must_use]
    pub fn points(name: impl Into<String>) -> Self {
        Self::new(name, DatasetKind::PointFeatures)
    }

    /// Creates a feature class reference.
    #[must_use]
    pub fn features(name: impl Into<String>) -> Self {
        Self::new(name, DatasetKind::Features)
    }

    /// Creates a raster reference.
    #[must_use]
    pub fn raster(name: impl Into<String>) -> Self {
        Self::new(name, DatasetKind::Raster)
    }

    /// Creates a table reference.
    #[must_use]
    pub fn table(name: impl Into<String>) -> Self {
        Self::new(name, DatasetKind::Table)
    }

    /// Creates a report reference.
    #[must_use]
    pub fn report(name: impl Into<String>) -> Self {
        Self::new(name, DatasetKind::Report)
    }

    /// Returns true if this reference names something stored in the catalog.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.kind.is_persisted()
    }

    /// Returns true if the name is a legal catalog identifier.
    ///
    /// Table names may carry a file extension (`olsCoefTab.dbf`).
    #[must_use]
    pub fn has_valid_name(&self) -> bool {
        is_valid_identifier(&self.name)
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}

/// Returns true if `name` is usable as a catalog or field identifier.
#[must_use]
pub fn is_valid_identifier(name: &str) -> bool {
    static PATTERN: OnceLock<Option<regex::Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z0-9_]+)?$").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(name))
}

/// Handle to the catalog the engine resolves dataset names against.
///
/// Passed explicitly to the feature store; there is no process-wide
/// "current workspace".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Workspace {
    location: PathBuf,
}

impl Workspace {
    /// Creates a workspace handle for a catalog location.
    #[must_use]
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
        }
    }

    /// Returns the catalog location.
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }
}

impl fmt::Display for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.location.display())
    }
}
