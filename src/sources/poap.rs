//! Curated POAP catalogue: which proof-of-attendance tokens count and what
//! each is worth, plus the holder list of every token.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::Account;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PoapToken {
    pub token_id: u64,
    pub factor: u64,
    pub event: String,
}

/// Reads `token-categories.csv` and `token-{id}.csv` files under one directory.
#[derive(Debug, Clone)]
pub struct PoapCatalogue {
    dir: PathBuf,
}

impl PoapCatalogue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn tokens(&self) -> Result<Vec<PoapToken>> {
        let path = self.dir.join("token-categories.csv");
        let mut reader = csv::Reader::from_path(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        reader
            .deserialize()
            .map(|record| record.with_context(|| format!("parsing {}", path.display())))
            .collect()
    }

    /// Holders of `token_id` in file order, one address per line, no header.
    pub fn holders(&self, token_id: u64) -> Result<Vec<Account>> {
        let path = self.dir.join(format!("token-{}.csv", token_id));
        let contents =
            fs::read_to_string(&path).with_context(|| format!("opening {}", path.display()))?;
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(Account::new)
            .collect())
    }
}
