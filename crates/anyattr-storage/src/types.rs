//! Backend selection and listing types.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use anyattr_core::{Any, AnyKey, AnyTypeKind};

/// Backend name: `relational` (default, alias `sqlite`) or `graph`.
pub const STORAGE_ENV: &str = "ANYATTR_STORAGE";
/// SQLite file or graph snapshot path.
pub const DB_PATH_ENV: &str = "ANYATTR_DB_PATH";
pub const DEFAULT_DB_PATH: &str = "anyattr.db";

/// Which backend persists attributes. Resolved once when a store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Relational,
    Graph,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::Relational => "relational",
            StorageKind::Graph => "graph",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relational" | "sqlite" => Ok(StorageKind::Relational),
            "graph" => Ok(StorageKind::Graph),
            other => Err(format!("unknown storage kind '{}' (expected relational or graph)", other)),
        }
    }
}

/// Where and how to open a store. `path: None` means in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub kind: StorageKind,
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn in_memory(kind: StorageKind) -> Self {
        StorageConfig { kind, path: None }
    }

    /// File-backed store; the file is created on first open.
    pub fn at(kind: StorageKind, path: impl Into<PathBuf>) -> Self {
        StorageConfig {
            kind,
            path: Some(path.into()),
        }
    }

    /// Reads `ANYATTR_STORAGE` and `ANYATTR_DB_PATH`.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with an injectable variable source,
    /// so tests never touch the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let kind = match lookup(STORAGE_ENV) {
            Some(v) if !v.trim().is_empty() => v.parse()?,
            _ => StorageKind::default(),
        };
        let path = lookup(DB_PATH_ENV)
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        Ok(StorageConfig::at(kind, path))
    }
}

/// Summary of a stored owner, for listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnySummary {
    pub key: AnyKey,
    pub kind: AnyTypeKind,
    pub any_type: String,
    pub name: String,
    pub realm: String,
}

impl From<&Any> for AnySummary {
    fn from(any: &Any) -> Self {
        AnySummary {
            key: any.key(),
            kind: any.kind(),
            any_type: any.any_type().to_string(),
            name: any.name().to_string(),
            realm: any.realm().to_string(),
        }
    }
}
