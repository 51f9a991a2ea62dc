//! Error types for the data access layer.

use thiserror::Error;

/// Errors surfaced to callers of the data provider and bulk loader.
///
/// Tier failures keep the collaborator's own error as the source, tagged with
/// the tier that produced it.
#[derive(Debug, Error)]
pub enum DataError {
    /// The cache key for an entity could not be built.
    #[error("can't build cache key for entity `{entity}`")]
    KeyDerivationFailed {
        entity: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A cache grid operation failed.
    #[error("cache grid operation failed: {0}")]
    Grid(#[source] anyhow::Error),

    /// A persistent store operation failed.
    #[error("store operation failed: {0}")]
    Store(#[source] anyhow::Error),

    /// The operation was dropped before it produced a result.
    #[error("operation was abandoned before completing")]
    Abandoned,
}

impl DataError {
    pub fn is_grid(&self) -> bool {
        matches!(self, Self::Grid(_))
    }

    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
