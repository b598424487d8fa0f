//! Block-level tools for manipulating Avro Object Container Files across
//! local, S3, GCS, and HTTP storage.
//!
//! This crate owns everything that sits between raw OCF bytes and stable
//! storage: block-granularity concatenation, corruption-tolerant repair,
//! fast record counting, size-targeted partitioning, external-merge
//! sorting, schema-evolution validation, and asynchronous write/read
//! staging. It does not implement the underlying Avro value codec itself
//! -- that is provided by [`apache_avro`] and consumed as a black box.

pub mod concat;
pub mod count;
pub mod error;
pub mod io;
pub mod ocf;
pub mod partition;
pub mod repair;
pub mod schema;
pub mod sort;
pub mod stage;
pub mod stats;
pub mod url;

pub use error::{Error, Result};
