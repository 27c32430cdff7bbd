//! Bit-packed per-sample secondary index of variant calls.
//!
//! Rows are keyed by sample, chromosome and batch of `schema::BATCH_SIZE`
//! positions.  The write path runs through `builder`, the read path compiles
//! queries with `query::parser` and evaluates them with `filter` and
//! `adaptor`.

pub mod adaptor;
pub mod annotation;
pub mod builder;
pub mod cli;
pub mod codec;
pub mod conf;
pub mod entry;
pub mod family;
pub mod file_index;
pub mod filter;
pub mod metadata;
pub mod query;
pub mod schema;
pub mod store;
