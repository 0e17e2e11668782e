//! Test data loading from a `test_data/` directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("test data file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read test data: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),
}

fn resolve_path(dir: &Path, name: &str) -> Result<PathBuf, DataError> {
    let path = dir.join(name);
    if !path.exists() {
        return Err(DataError::NotFound(path));
    }
    Ok(path)
}

pub fn load_json(dir: &Path, name: &str) -> Result<serde_json::Value, DataError> {
    let path = resolve_path(dir, name)?;
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn load_yaml(dir: &Path, name: &str) -> Result<serde_yaml::Value, DataError> {
    let path = resolve_path(dir, name)?;
    let content = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Each row keyed by the header line.
pub fn load_csv(dir: &Path, name: &str) -> Result<Vec<HashMap<String, String>>, DataError> {
    let path = resolve_path(dir, name)?;
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record?);
    }
    Ok(rows)
}
