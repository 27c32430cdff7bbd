//! Readers and writers for the CLI's input and output files.
//!
//! Paths ending in `.gz` are (de)compressed on the fly.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::{bufread::MultiGzDecoder, write::GzEncoder, Compression};

fn is_gzip(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("gz")
}

/// Open `path` for buffered reading, e.g., calls, configuration or a query.
pub fn open_read_maybe_gz<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>, anyhow::Error> {
    let path = path.as_ref();
    let file = File::open(path)
        .map(BufReader::new)
        .map_err(|e| anyhow::anyhow!("could not open {} for reading: {}", path.display(), e))?;
    if is_gzip(path) {
        tracing::trace!("reading {:?} through gzip decoder", path);
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        tracing::trace!("reading {:?}", path);
        Ok(Box::new(file))
    }
}

/// Create `path` for buffered writing, e.g., the query output.
///
/// Gzip output is only complete once the writer is dropped.
pub fn open_write_maybe_gz<P: AsRef<Path>>(path: P) -> Result<Box<dyn Write>, anyhow::Error> {
    let path = path.as_ref();
    let file = File::create(path)
        .map(BufWriter::new)
        .map_err(|e| anyhow::anyhow!("could not create {}: {}", path.display(), e))?;
    if is_gzip(path) {
        tracing::trace!("writing {:?} through gzip encoder", path);
        Ok(Box::new(GzEncoder::new(file, Compression::default())))
    } else {
        tracing::trace!("writing {:?}", path);
        Ok(Box::new(file))
    }
}
