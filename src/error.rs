//! Error types for the quadtree compiler.

use thiserror::Error;

/// Errors produced while building, encoding, or decoding a lookup table.
#[derive(Error, Debug)]
pub enum AtlasError {
    /// Non-finite latitude or longitude handed to the builder.
    #[error("invalid coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The oracle failed; the build is aborted so no wrong artifact is emitted.
    #[error("oracle failure: {0}")]
    Oracle(String),

    /// Blob malformed, truncated, or carrying an unsupported version.
    #[error("decode error: {0}")]
    Decode(String),

    /// The build was cancelled from outside; no partial tree is returned.
    #[error("build cancelled")]
    Cancelled,

    /// GeoJSON input that does not describe country polygons.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// IO error reading oracle data or writing the artifact.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for atlas operations.
pub type Result<T> = std::result::Result<T, AtlasError>;
