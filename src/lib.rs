//! A sharded in-memory key/value cache's dispatch core: a consistent-hashing
//! ring over capacity-weighted shards, an ordered skip-list index, and a
//! Bloom-filter pre-filter, composed in the request path as
//! `resolve -> might_contain -> find`.

pub mod bloom;
pub mod continuum;
pub mod endpoint;
pub mod error;
pub mod glue;
pub mod hash;
pub mod logging;
pub mod rand;
pub mod skiplist;

pub use bloom::{AllocStrategy, BloomFilter};
pub use continuum::{Continuum, ContinuumConfig, RingPoint, ShardRecord};
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use glue::build_continuum_from_files;
pub use skiplist::{InsertOutcome, RemoveOutcome, SkipList};

#[cfg(test)]
#[path = "tests/cases_continuum_test.rs"]
mod cases_continuum_test;
#[cfg(test)]
#[path = "tests/cases_skiplist_test.rs"]
mod cases_skiplist_test;
#[cfg(test)]
#[path = "tests/cases_bloom_test.rs"]
mod cases_bloom_test;
#[cfg(test)]
#[path = "tests/cases_glue_test.rs"]
mod cases_glue_test;
