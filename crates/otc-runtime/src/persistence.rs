//! Two YAML blob files hold the live strategy config and holding snapshots.
//! Writes are read-modify-write: load the file, merge in the current
//! strategies, write back, so entries for strategies not currently loaded
//! survive. A file that does not exist yet is created empty rather than
//! treated as an error, matching first-run startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use serde_yaml::Value;

use otc_types::PersistenceError;

const SCHEMA_VERSION: &str = "portfolio_v1";

#[derive(Debug, Clone)]
pub struct PersistenceStore {
    directory: PathBuf,
}

impl PersistenceStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    pub fn strategy_setting_path(&self) -> PathBuf {
        self.directory.join("strategy_setting.yaml")
    }

    pub fn strategy_data_path(&self) -> PathBuf {
        self.directory.join("strategy_data.yaml")
    }

    /// Load only the `data` map of a file, creating it empty if missing.
    pub fn load_data<T: DeserializeOwned>(&self, path: &Path) -> Result<HashMap<String, T>, PersistenceError> {
        if !path.exists() {
            self.save_data::<Value>(path, &HashMap::new())?;
            return Ok(HashMap::new());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let envelope: Envelope<T> = serde_yaml::from_str(&contents)?;
        Ok(envelope.data)
    }

    /// Read-modify-write a single strategy's entry into `path`'s `data` map,
    /// preserving every other strategy's entry already on disk.
    pub fn upsert<T>(&self, path: &Path, strategy_name: &str, value: &T) -> Result<(), PersistenceError>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let mut data = self.load_data::<T>(path)?;
        data.insert(strategy_name.to_string(), value.clone());
        self.save_data(path, &data)
    }

    pub fn remove(&self, path: &Path, strategy_name: &str) -> Result<(), PersistenceError> {
        let mut data = self.load_data::<Value>(path)?;
        data.remove(strategy_name);
        self.save_data(path, &data)
    }

    fn save_data<T: Serialize>(&self, path: &Path, data: &HashMap<String, T>) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let envelope = EnvelopeRef {
            metadata: Metadata {
                version: "1.0".to_string(),
                created_at: Utc::now().to_rfc3339(),
                schema_version: SCHEMA_VERSION.to_string(),
                description: "Portfolio strategy data".to_string(),
            },
            data,
        };
        let serialized = serde_yaml::to_string(&envelope)?;
        std::fs::write(path, serialized).map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

#[derive(Debug, Serialize, serde::Deserialize)]
struct Metadata {
    version: String,
    created_at: String,
    schema_version: String,
    description: String,
}

/// Shape used on the read path, where the data map must be owned.
#[derive(Debug, serde::Deserialize)]
struct Envelope<T> {
    data: HashMap<String, T>,
}

/// Shape used on the write path, borrowing the caller's map to avoid a
/// clone on every read-modify-write.
#[derive(Debug, Serialize)]
struct EnvelopeRef<'a, T> {
    metadata: Metadata,
    data: &'a HashMap<String, T>,
}
