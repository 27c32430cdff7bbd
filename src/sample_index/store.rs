//! Persistence of sample index rows in a key-value store.
//!
//! A row is addressed by `(sample_id, chrom, batch_start)` and holds one value
//! per column.  In the key-value store, each column becomes its own entry with
//! the key `version | row key | column name`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use byteorder::{BigEndian, ByteOrder};

use super::metadata::StudyMetadata;
use super::schema::columns::{self, ColumnKind};

/// Name of the column family with the index rows.
pub const CF_SAMPLE_INDEX: &str = "sample_index";
/// Name of the column family with meta information.
pub const CF_META: &str = "meta";
/// Key of the study metadata in the meta column family.
pub const META_STUDY: &str = "study-metadata";
/// Key of the writing application's version in the meta column family.
pub const META_APP_VERSION: &str = "app-version";

/// Supporting code for the stores.
pub mod error {
    /// Error type for the sample index stores.
    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("problem accessing RocksDB: {0}")]
        RocksDb(#[from] rocksdb::Error),
        #[error("column family {0:?} not found")]
        MissingColumnFamily(String),
        #[error("invalid key in sample index: {0}")]
        InvalidKey(String),
        #[error("version {0} does not fit into 16 bits")]
        VersionTooLarge(u32),
        #[error("problem with stored metadata: {0}")]
        Metadata(#[from] serde_json::Error),
        #[error("store lock is poisoned")]
        Poisoned,
    }
}

pub use error::Error;

/// Key of one sample index row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    /// Numeric identifier of the sample.
    pub sample_id: u32,
    /// Chromosome name, must not contain NUL bytes.
    pub chrom: String,
    /// First position of the batch.
    pub batch_start: u32,
}

impl RowKey {
    pub fn new(sample_id: u32, chrom: &str, batch_start: u32) -> Self {
        Self {
            sample_id,
            chrom: chrom.to_string(),
            batch_start,
        }
    }

    /// Prefix of all rows of a sample's chromosome.
    fn chrom_prefix(sample_id: u32, chrom: &str) -> Vec<u8> {
        let mut buf = sample_prefix(sample_id);
        buf.extend_from_slice(chrom.as_bytes());
        buf.push(0);
        buf
    }

    /// Serialize to `sample_id | chrom | 0x00 | batch_start`.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = Self::chrom_prefix(self.sample_id, &self.chrom);
        let mut tmp = [0u8; 4];
        BigEndian::write_u32(&mut tmp, self.batch_start);
        buf.extend_from_slice(&tmp);
        buf
    }

    /// Parse key from the start of `buf`, returning the key and the
    /// remaining bytes.
    pub fn from_slice(buf: &[u8]) -> Result<(Self, &[u8]), Error> {
        let invalid = || Error::InvalidKey(base16ct::lower::encode_string(buf));
        if buf.len() < 4 {
            return Err(invalid());
        }
        let sample_id = BigEndian::read_u32(&buf[0..4]);
        let nul = buf[4..].iter().position(|b| *b == 0).ok_or_else(invalid)? + 4;
        let chrom = std::str::from_utf8(&buf[4..nul]).map_err(|_| invalid())?;
        if buf.len() < nul + 5 {
            return Err(invalid());
        }
        let batch_start = BigEndian::read_u32(&buf[nul + 1..nul + 5]);
        Ok((
            Self {
                sample_id,
                chrom: chrom.to_string(),
                batch_start,
            },
            &buf[nul + 5..],
        ))
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.sample_id, self.chrom, self.batch_start)
    }
}

fn sample_prefix(sample_id: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 4];
    BigEndian::write_u32(&mut buf, sample_id);
    buf
}

fn version_prefix(version: u32) -> Result<Vec<u8>, Error> {
    let version = u16::try_from(version).map_err(|_| Error::VersionTooLarge(version))?;
    let mut buf = vec![0u8; 2];
    BigEndian::write_u16(&mut buf, version);
    Ok(buf)
}

/// One sample index row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: RowKey,
    /// Column values by column name.
    pub columns: BTreeMap<String, Vec<u8>>,
}

impl Row {
    pub fn new(key: RowKey) -> Self {
        Self {
            key,
            columns: BTreeMap::new(),
        }
    }

    /// Set column `name` to `value`.
    pub fn put(&mut self, name: String, value: Vec<u8>) {
        self.columns.insert(name, value);
    }

    /// Add all columns of `other`.
    pub fn merge(&mut self, other: Row) {
        self.columns.extend(other.columns);
    }

    /// Value of column `name`.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.columns.get(name).map(|v| v.as_slice())
    }
}

/// Access to the stored sample index.
///
/// Implementors provide raw access to the two key spaces, the row layout is
/// handled by the provided methods.
pub trait SampleIndexStore {
    /// Write one raw entry of the index.
    fn put_raw(&self, key: &[u8], value: &[u8]) -> Result<(), Error>;

    /// Remove one raw entry of the index.
    fn delete_raw(&self, key: &[u8]) -> Result<(), Error>;

    /// All raw index entries whose key starts with `prefix`, in key order.
    fn scan_raw(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>;

    /// Write one meta entry.
    fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), Error>;

    /// Read one meta entry.
    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    /// Write all columns of `row` for configuration `version`.
    fn put(&self, version: u32, row: &Row) -> Result<(), Error> {
        let mut prefix = version_prefix(version)?;
        prefix.extend_from_slice(&row.key.to_vec());
        for (name, value) in &row.columns {
            let mut key = prefix.clone();
            key.extend_from_slice(name.as_bytes());
            self.put_raw(&key, value)?;
        }
        tracing::trace!(
            "wrote {} columns of row {} (version {})",
            row.columns.len(),
            &row.key,
            version
        );
        Ok(())
    }

    /// Read the row with `key`.
    ///
    /// With `count_only`, only the count columns are returned.
    fn get(&self, version: u32, key: &RowKey, count_only: bool) -> Result<Option<Row>, Error> {
        let mut prefix = version_prefix(version)?;
        prefix.extend_from_slice(&key.to_vec());
        let rows = rows_from_raw(self.scan_raw(&prefix)?, count_only)?;
        Ok(rows.into_iter().next())
    }

    /// Remove all columns of the row with `key`.
    fn delete(&self, version: u32, key: &RowKey) -> Result<(), Error> {
        let mut prefix = version_prefix(version)?;
        prefix.extend_from_slice(&key.to_vec());
        let entries = self.scan_raw(&prefix)?;
        for (raw_key, _) in &entries {
            self.delete_raw(raw_key)?;
        }
        tracing::trace!(
            "deleted {} columns of row {} (version {})",
            entries.len(),
            key,
            version
        );
        Ok(())
    }

    /// Read all rows of a sample, optionally restricted to one chromosome.
    fn scan(
        &self,
        version: u32,
        sample_id: u32,
        chrom: Option<&str>,
        count_only: bool,
    ) -> Result<Vec<Row>, Error> {
        let mut prefix = version_prefix(version)?;
        match chrom {
            Some(chrom) => prefix.extend_from_slice(&RowKey::chrom_prefix(sample_id, chrom)),
            None => prefix.extend_from_slice(&sample_prefix(sample_id)),
        }
        rows_from_raw(self.scan_raw(&prefix)?, count_only)
    }

    /// Persist the study metadata.
    fn put_study_metadata(&self, metadata: &StudyMetadata) -> Result<(), Error> {
        self.put_meta(META_STUDY, &serde_json::to_vec(metadata)?)
    }

    /// Load the study metadata, if any was written.
    fn study_metadata(&self) -> Result<Option<StudyMetadata>, Error> {
        self.get_meta(META_STUDY)?
            .map(|buf| serde_json::from_slice(&buf))
            .transpose()
            .map_err(Error::from)
    }
}

/// Group raw entries, which are sorted by key, into rows.
fn rows_from_raw(entries: Vec<(Vec<u8>, Vec<u8>)>, count_only: bool) -> Result<Vec<Row>, Error> {
    let mut result: Vec<Row> = Vec::new();
    for (key, value) in entries {
        if key.len() < 2 {
            return Err(Error::InvalidKey(base16ct::lower::encode_string(&key)));
        }
        let (row_key, column) = RowKey::from_slice(&key[2..])?;
        let column = std::str::from_utf8(column)
            .map_err(|_| Error::InvalidKey(base16ct::lower::encode_string(&key)))?
            .to_string();
        if count_only && columns::parse(&column).0 != ColumnKind::Count {
            continue;
        }
        match result.last_mut() {
            Some(row) if row.key == row_key => row.put(column, value),
            _ => {
                let mut row = Row::new(row_key);
                row.put(column, value);
                result.push(row);
            }
        }
    }
    Ok(result)
}

/// Sample index store backed by RocksDB.
pub struct RocksDbStore {
    db: rocksdb::DBWithThreadMode<rocksdb::MultiThreaded>,
}

impl RocksDbStore {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        tracing::debug!("opening RocksDB at {:?}", path.as_ref());
        let mut options = rocksdb::Options::default();
        options.create_if_missing(true);
        options.create_missing_column_families(true);
        let db = rocksdb::DB::open_cf(&options, path, [CF_META, CF_SAMPLE_INDEX])?;
        let store = Self { db };
        store.put_meta(META_APP_VERSION, crate::common::VERSION.as_bytes())?;
        Ok(store)
    }

    /// Open the database at `path` for reading only.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        tracing::debug!("opening RocksDB at {:?} (read-only)", path.as_ref());
        let db = rocksdb::DB::open_cf_for_read_only(
            &rocksdb::Options::default(),
            path,
            [CF_META, CF_SAMPLE_INDEX],
            false,
        )?;
        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<std::sync::Arc<rocksdb::BoundColumnFamily<'_>>, Error> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::MissingColumnFamily(name.to_string()))
    }
}

impl SampleIndexStore for RocksDbStore {
    fn put_raw(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        let cf = self.cf(CF_SAMPLE_INDEX)?;
        self.db.put_cf(&cf, key, value)?;
        Ok(())
    }

    fn delete_raw(&self, key: &[u8]) -> Result<(), Error> {
        let cf = self.cf(CF_SAMPLE_INDEX)?;
        self.db.delete_cf(&cf, key)?;
        Ok(())
    }

    fn scan_raw(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let cf = self.cf(CF_SAMPLE_INDEX)?;
        let mut result = Vec::new();
        let iter = self.db.iterator_cf(
            &cf,
            rocksdb::IteratorMode::From(prefix, rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            result.push((key.to_vec(), value.to_vec()));
        }
        Ok(result)
    }

    fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), Error> {
        let cf = self.cf(CF_META)?;
        self.db.put_cf(&cf, key, value)?;
        Ok(())
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let cf = self.cf(CF_META)?;
        Ok(self.db.get_cf(&cf, key)?)
    }
}

/// Sample index store kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    index: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    meta: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl SampleIndexStore for InMemoryStore {
    fn put_raw(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.index
            .write()
            .map_err(|_| Error::Poisoned)?
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete_raw(&self, key: &[u8]) -> Result<(), Error> {
        self.index
            .write()
            .map_err(|_| Error::Poisoned)?
            .remove(key);
        Ok(())
    }

    fn scan_raw(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let index = self.index.read().map_err(|_| Error::Poisoned)?;
        Ok(index
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), Error> {
        self.meta
            .write()
            .map_err(|_| Error::Poisoned)?
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self
            .meta
            .read()
            .map_err(|_| Error::Poisoned)?
            .get(key)
            .cloned())
    }
}
