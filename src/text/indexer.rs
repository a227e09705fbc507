//! Codepoint → token id lookup from `unicode_indexer.json`.

use std::path::Path;

use crate::{Error, Result};

/// Dense table indexed by Unicode scalar value. Negative entries and
/// codepoints past the end of the table are unsupported.
#[derive(Debug, Clone)]
pub struct UnicodeIndexer {
    table: Vec<i64>,
}

impl UnicodeIndexer {
    pub fn from_table(table: Vec<i64>) -> Self {
        Self { table }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| Error::AssetLoad(format!("cannot read {}: {e}", path.display())))?;
        let table: Vec<i64> = serde_json::from_slice(&bytes)
            .map_err(|e| Error::AssetLoad(format!("malformed {}: {e}", path.display())))?;
        let indexer = Self::from_table(table);
        if indexer.is_empty() {
            return Err(Error::AssetLoad(format!("{} is empty", path.display())));
        }
        Ok(indexer)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn lookup(&self, c: char) -> Option<i64> {
        self.table
            .get(c as usize)
            .copied()
            .filter(|&id| id >= 0)
    }

    /// Map every character of `text` to its id.
    ///
    /// On failure returns the distinct unsupported characters in order of
    /// first appearance.
    pub fn encode(&self, text: &str) -> std::result::Result<Vec<i64>, Vec<char>> {
        let mut ids = Vec::with_capacity(text.len());
        let mut unsupported = Vec::new();
        for c in text.chars() {
            match self.lookup(c) {
                Some(id) => ids.push(id),
                None if !unsupported.contains(&c) => unsupported.push(c),
                None => {}
            }
        }
        if unsupported.is_empty() {
            Ok(ids)
        } else {
            Err(unsupported)
        }
    }
}
