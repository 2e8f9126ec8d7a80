//! Flat-document persistence for ledger state.
//!
//! Each domain lives in a single JSON document loaded whole and flushed
//! whole. Flushing writes a temp file then renames it over the document so a
//! crash mid-write never leaves a truncated store. A missing document is an
//! empty store; an unparsable one is a corruption error, never silently
//! treated as empty.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// A single JSON document holding one domain's records.
pub struct DocumentStore<T> {
    path: PathBuf,
    _marker: PhantomData<T>,
}

impl<T> DocumentStore<T>
where
    T: Default + Serialize + DeserializeOwned,
{
    /// Creates a store backed by the document at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    /// Returns the document path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the document, or the empty value if it does not exist yet.
    pub fn load(&self) -> Result<T> {
        if !self.path.exists() {
            return Ok(T::default());
        }

        let contents = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&contents).map_err(|e| Error::StoreCorruption {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Flushes the document atomically (write temp, then rename).
    pub fn save(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(value).map_err(|e| Error::StoreCorruption {
            path: self.path.clone(),
            reason: format!("serialize: {}", e),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Loads the document, applies `mutate`, and flushes the result.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        let mut value = self.load()?;
        let result = mutate(&mut value)?;
        self.save(&value)?;
        Ok(result)
    }
}
