//! Error taxonomy shared by every component in this crate.

use crate::endpoint::Endpoint;
use thiserror::Error;

/// The one error type surfaced across the continuum, skip list, bloom filter
/// and property loader. Each variant carries just enough payload to act on it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("malformed config line {line_no}: {raw:?}")]
    MalformedConfigLine { line_no: usize, raw: String },

    #[error("missing required key: {0}")]
    MissingRequiredKey(&'static str),

    #[error("too many shards: got {got}, declared max {max}")]
    TooManyShards { got: usize, max: usize },

    #[error("duplicate endpoint: {0}")]
    Duplicate(Endpoint),

    #[error("endpoint not found: {0}")]
    NotFound(Endpoint),

    #[error("ring has no points")]
    EmptyRing,

    #[error("out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
