//! The drive database: per-model attribute names and conversion rules.
//!
//! SMART attribute ids are only loosely standardized; what attribute 9
//! means, and how its vendor bytes are packed, differs per drive family.
//! The database maps a model string to a family label and a preset table
//! keyed by attribute id. It is loaded once at startup; a model that is
//! not listed gets an empty entry, which emits normalized values only.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use serde::Deserialize;
use tracing::info;

/// Display name and conversion rule for one attribute id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AttrPreset {
    pub name: String,
    pub conv: String,
}

/// Everything the database knows about one drive model.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DriveEntry {
    #[serde(default)]
    pub family: String,
    /// Keyed by decimal attribute id string, e.g. `"194"`.
    #[serde(default)]
    pub presets: HashMap<String, AttrPreset>,
}

#[derive(Deserialize)]
struct DbDrive {
    model: String,
    #[serde(flatten)]
    entry: DriveEntry,
}

#[derive(Deserialize)]
struct DbFile {
    drives: Vec<DbDrive>,
}

/// The loaded database. Lookup never fails; load can.
#[derive(Debug, Default)]
pub struct DriveDb {
    entries: HashMap<String, DriveEntry>,
}

impl DriveDb {
    /// Loads the database from a JSON file.
    ///
    /// There is no meaningful default mapping to run with, so a load
    /// failure at startup is surfaced to `main` as fatal.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .wrap_err_with(|| format!("failed to open drive database {}", path.display()))?;
        let parsed: DbFile = serde_json::from_reader(BufReader::new(file))
            .wrap_err_with(|| format!("failed to parse drive database {}", path.display()))?;

        let entries: HashMap<_, _> = parsed
            .drives
            .into_iter()
            .map(|d| (d.model.trim().to_owned(), d.entry))
            .collect();
        info!(models = entries.len(), "drive database loaded");

        Ok(Self { entries })
    }

    #[cfg(test)]
    pub fn from_entries(entries: HashMap<String, DriveEntry>) -> Self {
        Self { entries }
    }

    /// Looks up a drive by its trimmed model string.
    ///
    /// An unknown model is a valid, common case and yields the default
    /// entry: no family, no presets.
    pub fn lookup(&self, model: &str) -> DriveEntry {
        self.entries.get(model.trim()).cloned().unwrap_or_default()
    }
}
