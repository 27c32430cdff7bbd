//! Implementation of `query` sub command.

use std::io::Write;

use thousands::Separable;

use crate::common;
use crate::sample_index::adaptor::SampleIndexDbAdaptor;
use crate::sample_index::codec::variant::Variant;
use crate::sample_index::query::parser::SampleIndexQueryParser;
use crate::sample_index::query::VariantQuery;
use crate::sample_index::store::{RocksDbStore, SampleIndexStore};

/// Command line arguments for `query` sub command.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "query sample index", long_about = None)]
pub struct Args {
    /// Path to the RocksDB directory.
    #[clap(long)]
    pub path_db: String,
    /// The query as JSON, or `@` followed by the path to a JSON file.
    #[clap(long)]
    pub query: String,
    /// Path to output JSONL file, may be gzip-ed.
    #[clap(long)]
    pub path_out: String,
    /// Only write the number of variants.
    #[clap(long, default_value_t = false)]
    pub count: bool,
}

/// Load the query from its command line value.
pub fn load_query(value: &str) -> Result<VariantQuery, anyhow::Error> {
    match value.strip_prefix('@') {
        Some(path) => serde_json::from_reader(common::io::open_read_maybe_gz(path)?)
            .map_err(|e| anyhow::anyhow!("could not read query from {}: {}", path, e)),
        None => serde_json::from_str(value).map_err(|e| anyhow::anyhow!("invalid query: {}", e)),
    }
}

/// Result of running a query on the index.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    /// Clauses that the index does not answer exactly.
    pub residual: VariantQuery,
    /// The variants, empty when counting.
    pub variants: Vec<Variant>,
    pub count: usize,
}

/// Compile `query` against the stored study and run it.
pub fn execute(
    store: &dyn SampleIndexStore,
    query: VariantQuery,
    count_only: bool,
) -> Result<QueryOutcome, anyhow::Error> {
    let metadata = store
        .study_metadata()?
        .ok_or_else(|| anyhow::anyhow!("database has no study metadata"))?;
    let parser = SampleIndexQueryParser::new(&metadata);
    if !parser.valid_sample_index_query(&query) {
        anyhow::bail!("query cannot be answered from the sample index: {:?}", &query);
    }
    let (index_query, residual) = parser.parse(query)?;
    tracing::debug!("index query = {:#?}", &index_query);

    let adaptor = SampleIndexDbAdaptor::new(store);
    let (variants, count) = if count_only {
        (Vec::new(), adaptor.count(&index_query)?)
    } else {
        let variants = adaptor.query(&index_query)?;
        let count = variants.len();
        (variants, count)
    };
    Ok(QueryOutcome {
        residual,
        variants,
        count,
    })
}

/// Main entry point for `query` sub command.
pub fn run(args_common: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = std::time::Instant::now();
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    let query = load_query(&args.query)?;
    tracing::info!("Opening sample index database");
    let store = RocksDbStore::open_read_only(&args.path_db)
        .map_err(|e| anyhow::anyhow!("could not open database {}: {}", &args.path_db, e))?;

    let before_query = std::time::Instant::now();
    let outcome = execute(&store, query, args.count)?;
    tracing::info!(
        "... found {} variants in {:?}",
        outcome.count.separate_with_commas(),
        before_query.elapsed()
    );
    if !outcome.residual.is_empty() {
        tracing::info!(
            "remaining clauses to check on the variant store: {}",
            serde_json::to_string(&outcome.residual)?
        );
    }

    let mut writer = common::io::open_write_maybe_gz(&args.path_out)?;
    if args.count {
        writeln!(writer, "{}", serde_json::json!({ "count": outcome.count }))?;
    } else {
        for variant in &outcome.variants {
            writeln!(writer, "{}", serde_json::to_string(variant)?)?;
        }
    }
    writer.flush()?;

    tracing::info!(
        "All of `query` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}
