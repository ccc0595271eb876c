use anyhow::{Context, Result};
use log::{debug, info};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::fs;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::types::Network;

/// Outcome of a cache lookup. A miss is an expected result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }
}

/// File name of a cached result set, relative to a [`Cache`] root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn file(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// `{network}-{name}`
    pub fn network(network: Network, name: &str) -> Self {
        Self(format!("{}-{}", network, name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute-once CSV memoizer.
///
/// Every expensive fetch in the pipeline goes through here: when a file for the
/// key exists its rows are returned as-is, otherwise the compute function runs
/// and its rows are persisted with a header row named after the record fields.
/// Entries are never invalidated; deleting the file is the only way to refetch.
///
/// ## Format
///
/// - Header row matches the serde field names of the record type
/// - Columns are matched by header name on load, so reordering is safe
/// - An empty result is stored as an empty file and is still a hit
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.name())
    }

    pub fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Lookup<Vec<T>>> {
        let path = self.path(key);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("file at {} not found", path.display());
                return Ok(Lookup::NotFound);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("opening {}", path.display()));
            }
        };

        let mut reader = csv::Reader::from_reader(file);
        let mut rows = Vec::new();
        for record in reader.deserialize() {
            let row: T = record.with_context(|| format!("parsing {}", path.display()))?;
            rows.push(row);
        }
        debug!("loaded {} records from {}", rows.len(), path.display());
        Ok(Lookup::Found(rows))
    }

    pub fn store<T: Serialize>(&self, key: &CacheKey, rows: &[T]) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating {}", self.root.display()))?;
        let path = self.path(key);
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("creating {}", path.display()))?;
        for row in rows {
            writer
                .serialize(row)
                .with_context(|| format!("writing {}", path.display()))?;
        }
        writer.flush()?;
        info!("dumped {} results to {}", rows.len(), path.display());
        Ok(())
    }

    /// Returns the cached rows for `key`, or runs `compute` and persists its rows.
    pub async fn get_or_compute<T, F, Fut>(&self, key: &CacheKey, compute: F) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        if let Lookup::Found(rows) = self.lookup(key)? {
            return Ok(rows);
        }
        let rows = compute().await?;
        self.store(key, &rows)?;
        Ok(rows)
    }

    /// Like [`Cache::get_or_compute`] for values whose persisted rows differ
    /// from their in-memory shape (indexed maps, account sets).
    pub async fn get_or_compute_with<R, V, L, F, Fut, D>(
        &self,
        key: &CacheKey,
        load: L,
        compute: F,
        dump: D,
    ) -> Result<V>
    where
        R: Serialize + DeserializeOwned,
        L: FnOnce(Vec<R>) -> Result<V>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
        D: FnOnce(&V) -> Vec<R>,
    {
        if let Lookup::Found(rows) = self.lookup(key)? {
            return load(rows);
        }
        let value = compute().await?;
        self.store(key, &dump(&value))?;
        Ok(value)
    }
}
