//! Error types for the detection pipeline.

use thiserror::Error;

/// Errors surfaced by ingestion, auxiliary loading, and the pipeline stages.
#[derive(Error, Debug)]
pub enum FmaskError {
    /// Missing or malformed metadata, missing band files, unsupported sensor.
    /// Fatal at ingest.
    #[error("input error: {0}")]
    Input(String),

    /// Auxiliary data could not be produced. The pipeline treats the source
    /// as absent and degrades gracefully.
    #[error("auxiliary data error: {0}")]
    Aux(String),

    /// A statistic was requested over an empty or degenerate selection that
    /// the stage guards should have excluded.
    #[error("numeric error: {0}")]
    Numeric(String),

    /// Underlying I/O failure, surfaced unchanged.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// GeoTIFF encode/decode failure.
    #[error("tiff error: {0}")]
    Tiff(#[from] tiff::TiffError),
}

pub type Result<T> = std::result::Result<T, FmaskError>;
