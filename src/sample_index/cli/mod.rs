//! Command line sub commands for building and querying the index.

pub mod build;
pub mod query;
