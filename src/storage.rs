//! Durable local storage: one JSON or text entry per key under a root directory.
//!
//! Writes go through a temp file in the same directory and are renamed into
//! place, so a crash never leaves a half-written entry behind.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const PROJECTS_KEY: &str = "projects.json";
pub const THEME_KEY: &str = "theme.json";

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub async fn read_text(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_text(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent).await?;

        let data = value.as_bytes().to_vec();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
            tmp.write_all(&data)?;
            tmp.flush()?;
            tmp.persist(&path).map_err(|e| StorageError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }

    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.read_text(key).await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub async fn write_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let text = serde_json::to_string_pretty(value)?;
        self.write_text(key, &text).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ThemeEntry {
    name: String,
}

/// Selected visual theme name, if one was stored.
pub async fn load_theme(store: &LocalStore) -> Option<String> {
    match store.read_json::<ThemeEntry>(THEME_KEY).await {
        Ok(entry) => entry.map(|e| e.name),
        Err(e) => {
            tracing::warn!("failed to read theme: {e}");
            None
        }
    }
}

pub async fn save_theme(store: &LocalStore, name: &str) {
    let entry = ThemeEntry {
        name: name.to_string(),
    };
    if let Err(e) = store.write_json(THEME_KEY, &entry).await {
        tracing::warn!("failed to save theme: {e}");
    }
}
