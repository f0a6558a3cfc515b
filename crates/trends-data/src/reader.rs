//! CSV discovery and loading for the Aadhaar data root.
//!
//! Every immediate sub-directory of the data root is one category
//! (`api_data_aadhar_enrolment/` → `enrolment`).  All CSV files below a
//! category directory are concatenated into a single [`RawTable`], then
//! normalised into the immutable [`Dataset`] the engine queries.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use trends_core::error::{Result, TrendsError};
use trends_core::models::{Dataset, RawTable};
use trends_core::settings::EngineConfig;

use crate::normalizer::{canonical_column_name, normalize};

/// Directory-name prefix used by the published Aadhaar exports.
const CATEGORY_PREFIX: &str = "api_data_aadhar_";

/// Category used for CSV files placed directly in the data root.
pub const COMBINED_CATEGORY: &str = "combined";

// ── Public API ────────────────────────────────────────────────────────────────

/// Find all `.csv` files recursively under `dir`, sorted by path.
pub fn find_csv_files(dir: &Path) -> Vec<PathBuf> {
    collect_csv_files(dir, usize::MAX)
}

/// Category name for a directory name: prefix stripped, lower-cased.
pub fn category_name(dir_name: &str) -> String {
    let lowered = dir_name.trim().to_lowercase();
    lowered
        .strip_prefix(CATEGORY_PREFIX)
        .map(str::to_string)
        .unwrap_or(lowered)
}

/// Read one CSV file into a [`RawTable`].
///
/// Header names are canonicalised so files of one category line up even
/// when their headers differ in case or spacing.  Short rows are allowed.
pub fn read_csv_file(path: &Path) -> Result<RawTable> {
    let file = File::open(path).map_err(|source| TrendsError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(BufReader::new(file));

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(canonical_column_name)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(RawTable::new(headers, rows))
}

/// Concatenate `files` into one table with the union of their headers.
///
/// Unreadable or malformed files are skipped with a warning.  Returns
/// `None` when no file contributed a header.
pub fn load_category(files: &[PathBuf]) -> Option<RawTable> {
    let mut table = RawTable::default();

    for path in files {
        match read_csv_file(path) {
            Ok(raw) => {
                debug!("File {}: {} rows", path.display(), raw.row_count());
                table.append(raw);
            }
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }

    if table.headers.is_empty() {
        None
    } else {
        Some(table)
    }
}

/// Load every category under `root` as raw tables, keyed by category name.
///
/// Sub-directories whose names collapse to the same category are merged.
/// When no sub-directory holds CSV files, CSV files directly in `root` load
/// as the [`COMBINED_CATEGORY`].
pub fn load_raw_categories(root: &Path) -> Result<BTreeMap<String, RawTable>> {
    if !root.is_dir() {
        warn!("Data path does not exist: {}", root.display());
        return Err(TrendsError::DataPathNotFound(root.to_path_buf()));
    }

    let mut categories: BTreeMap<String, RawTable> = BTreeMap::new();

    for dir in category_dirs(root) {
        let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(category_name) else {
            continue;
        };
        let files = find_csv_files(&dir);
        if files.is_empty() {
            debug!("No CSV files in {}", dir.display());
            continue;
        }
        if let Some(raw) = load_category(&files) {
            match categories.get_mut(&name) {
                Some(existing) => existing.append(raw),
                None => {
                    categories.insert(name, raw);
                }
            }
        }
    }

    if categories.is_empty() {
        let loose = collect_csv_files(root, 1);
        if let Some(raw) = load_category(&loose) {
            debug!(
                "Loaded {} loose CSV files as '{}'",
                loose.len(),
                COMBINED_CATEGORY
            );
            categories.insert(COMBINED_CATEGORY.to_string(), raw);
        }
    }

    if categories.is_empty() {
        return Err(TrendsError::NoDataFiles(root.to_path_buf()));
    }
    Ok(categories)
}

/// Load and normalise every category under `root`.
pub fn load_dataset(root: &Path, config: &EngineConfig) -> Result<Dataset> {
    let raw = load_raw_categories(root)?;

    let dataset: Dataset = raw
        .into_iter()
        .map(|(name, table)| {
            let normalized = normalize(&table, config);
            info!(
                "Loaded category '{}': {} rows, {} columns",
                name,
                normalized.row_count(),
                normalized.columns().len()
            );
            (name, normalized)
        })
        .collect();

    Ok(dataset)
}

// ── Internal helpers ──────────────────────────────────────────────────────────

fn collect_csv_files(dir: &Path, max_depth: usize) -> Vec<PathBuf> {
    if !dir.exists() {
        warn!("Data path does not exist: {}", dir.display());
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .max_depth(max_depth)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();

    files.sort();
    files
}

/// Immediate sub-directories of `root`, sorted by path.
fn category_dirs(root: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect();

    dirs.sort();
    dirs
}

// ── Tests ─────────────────────────────────────────────────────────────────────
