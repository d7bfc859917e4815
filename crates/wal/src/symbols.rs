//! Symbol column support: base-table snapshots and the per-writer overlay.
//!
//! At writer-open time the table's symbol files are hard-linked into the
//! writer directory as a read-only snapshot. Values already interned by the
//! table resolve through the snapshot; everything else gets a provisional
//! key from the overlay, assigned strictly beyond the seeded count so keys
//! never collide with the base. The overlay delta travels in every data
//! event record so replay can resolve provisional keys long after the
//! writer is gone.

use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tessera_core::{Error, Result};

/// File extension of a symbol value file (`<column>.sym`)
pub const SYMBOL_FILE_EXT: &str = "sym";

/// Path of a column's symbol file under a table or writer directory.
pub fn symbol_file_path(dir: &Path, column_name: &str) -> PathBuf {
    dir.join(format!("{}.{}", column_name, SYMBOL_FILE_EXT))
}

/// The overlay delta of one symbol column, as recorded in data events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolDelta {
    /// Column index within the segment's metadata snapshot
    pub column_index: u32,
    /// Key of the first overlay entry (the seeded base count)
    pub base_key: u32,
    /// Overlay values in key order: `values[i]` has key `base_key + i`
    pub values: Vec<String>,
}

/// Read-only view of a table's interned symbols at writer-open time.
#[derive(Debug, Default)]
pub struct SymbolSnapshot {
    values: Vec<String>,
    keys: FxHashMap<String, u32>,
}

impl SymbolSnapshot {
    /// Empty snapshot for a column with no interned symbols yet.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a snapshot from a symbol file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;

        let mut values = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            if pos + 4 > bytes.len() {
                return Err(Error::Corruption(format!(
                    "truncated symbol file {}",
                    path.display()
                )));
            }
            let len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            if pos + len > bytes.len() {
                return Err(Error::Corruption(format!(
                    "truncated symbol file {}",
                    path.display()
                )));
            }
            let value = String::from_utf8(bytes[pos..pos + len].to_vec()).map_err(|_| {
                Error::Corruption(format!("invalid UTF-8 in symbol file {}", path.display()))
            })?;
            pos += len;
            values.push(value);
        }

        let keys = values
            .iter()
            .enumerate()
            .map(|(k, v)| (v.clone(), k as u32))
            .collect();
        Ok(SymbolSnapshot { values, keys })
    }

    /// Write a symbol file with the given values in key order. Used by the
    /// table side and by test fixtures.
    pub fn write(path: &Path, values: &[String]) -> Result<()> {
        let mut file = File::create(path)?;
        for value in values {
            file.write_all(&(value.len() as u32).to_le_bytes())?;
            file.write_all(value.as_bytes())?;
        }
        file.sync_data()?;
        Ok(())
    }

    /// Number of interned symbols.
    pub fn count(&self) -> u32 {
        self.values.len() as u32
    }

    /// Key of an already-interned value.
    pub fn key_of(&self, value: &str) -> Option<u32> {
        self.keys.get(value).copied()
    }

    /// Value of a key within the snapshot.
    pub fn value_of(&self, key: u32) -> Option<&str> {
        self.values.get(key as usize).map(String::as_str)
    }
}

/// Per-writer delta of not-yet-interned symbol values.
///
/// Provisional keys start at the seeded base count and are assigned exactly
/// once per distinct value for the writer's lifetime. Null values never
/// enter the overlay.
#[derive(Debug)]
pub struct SymbolOverlay {
    base_count: u32,
    keys: FxHashMap<String, u32>,
    values: Vec<String>,
}

impl SymbolOverlay {
    /// Overlay seeded from a snapshot of `base_count` interned symbols.
    pub fn new(base_count: u32) -> Self {
        SymbolOverlay {
            base_count,
            keys: FxHashMap::default(),
            values: Vec::new(),
        }
    }

    /// Resolve a value to a key, consulting the base snapshot first and
    /// interning into the overlay on a miss.
    pub fn resolve(&mut self, value: &str, base: &SymbolSnapshot) -> u32 {
        if let Some(key) = base.key_of(value) {
            return key;
        }
        if let Some(key) = self.keys.get(value) {
            return *key;
        }
        let key = self.base_count + self.values.len() as u32;
        self.keys.insert(value.to_string(), key);
        self.values.push(value.to_string());
        key
    }

    /// The seeded base count; the first provisional key.
    pub fn base_count(&self) -> u32 {
        self.base_count
    }

    /// Number of provisional entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no value has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The full delta for a data event record.
    pub fn delta(&self, column_index: u32) -> SymbolDelta {
        SymbolDelta {
            column_index,
            base_key: self.base_count,
            values: self.values.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempdir().unwrap();
        let path = symbol_file_path(dir.path(), "sym");
        let values = vec!["BTC-USD".to_string(), "ETH-USD".to_string()];
        SymbolSnapshot::write(&path, &values).unwrap();

        let snapshot = SymbolSnapshot::load(&path).unwrap();
        assert_eq!(snapshot.count(), 2);
        assert_eq!(snapshot.key_of("ETH-USD"), Some(1));
        assert_eq!(snapshot.value_of(0), Some("BTC-USD"));
        assert_eq!(snapshot.key_of("SOL-USD"), None);
    }

    #[test]
    fn test_overlay_assigns_beyond_base_exactly_once() {
        let dir = tempdir().unwrap();
        let path = symbol_file_path(dir.path(), "sym");
        SymbolSnapshot::write(&path, &["a".to_string(), "b".to_string()]).unwrap();
        let base = SymbolSnapshot::load(&path).unwrap();

        let mut overlay = SymbolOverlay::new(base.count());
        assert_eq!(overlay.resolve("a", &base), 0);
        assert_eq!(overlay.resolve("c", &base), 2);
        assert_eq!(overlay.resolve("d", &base), 3);
        // resolving again returns the same keys, no re-interning
        assert_eq!(overlay.resolve("c", &base), 2);
        assert_eq!(overlay.len(), 2);

        let delta = overlay.delta(4);
        assert_eq!(delta.base_key, 2);
        assert_eq!(delta.values, vec!["c".to_string(), "d".to_string()]);
    }
}
