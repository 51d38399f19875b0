//! Error types for geodex.

use thiserror::Error;

/// Result type alias using [`GeodexError`].
pub type Result<T> = std::result::Result<T, GeodexError>;

/// Errors produced while indexing or querying spatial fragments.
///
/// Extraction-time errors (`UnrecognizedGeometry`, `MalformedRing`) and
/// transform-time errors (`UnknownSrs`) are contained at the fragment
/// boundary during indexing: the fragment is skipped and the document
/// operation continues. `StoreUnavailable` always aborts the current call.
#[derive(Error, Debug)]
pub enum GeodexError {
    /// The fragment's event sequence does not form a supported shape.
    #[error("unrecognized geometry: {0}")]
    UnrecognizedGeometry(String),

    /// A polygon ring is not closed (first coordinate != last) or too short.
    #[error("malformed ring: {0}")]
    MalformedRing(String),

    /// A spatial reference identifier could not be resolved by the authority.
    #[error("unknown spatial reference system: {0}")]
    UnknownSrs(String),

    /// The backing store connection could not be obtained or a read/write failed.
    #[error("spatial store unavailable: {0}")]
    StoreUnavailable(String),

    /// Invalid caller-supplied input (bad envelope bounds, bad buffer distance, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Geometry encoding or decoding failed (WKB/WKT).
    #[error("geometry codec error: {0}")]
    Codec(String),
}

impl From<rusqlite::Error> for GeodexError {
    fn from(err: rusqlite::Error) -> Self {
        GeodexError::StoreUnavailable(err.to_string())
    }
}

impl From<geozero::error::GeozeroError> for GeodexError {
    fn from(err: geozero::error::GeozeroError) -> Self {
        GeodexError::Codec(err.to_string())
    }
}
