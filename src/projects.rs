//! Named project snapshots kept in local storage, newest first.
//!
//! Storage problems never reach the caller: reads degrade to an empty list and
//! failed writes are logged. Only `import` and `export` report errors, since
//! they work on a file the user picked.

use crate::collection::SceneCollection;
use crate::error::StorageError;
use crate::scene::{ContentMode, Scene};
use crate::storage::{LocalStore, PROJECTS_KEY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

pub const MAX_PROJECTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    /// Unix milliseconds of the save that produced this record.
    #[serde(alias = "timestamp")]
    pub created_at: i64,
    #[serde(default)]
    pub topic: String,
    #[serde(alias = "newsStyle")]
    pub content_mode: ContentMode,
    #[serde(default, alias = "newsItems")]
    pub scenes: Vec<Scene>,
}

/// Everything a save needs except the id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDraft {
    pub name: String,
    pub topic: String,
    pub content_mode: ContentMode,
    pub scenes: Vec<Scene>,
}

impl ProjectDraft {
    /// Snapshot of the active history.
    pub fn from_collection(
        name: impl Into<String>,
        topic: impl Into<String>,
        collection: &SceneCollection,
    ) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            content_mode: collection.active_mode(),
            scenes: collection.active().to_vec(),
        }
    }
}

pub struct ProjectStore {
    store: LocalStore,
    active: Option<String>,
    last_id: i64,
}

impl ProjectStore {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            active: None,
            last_id: 0,
        }
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Forgets the active id so the next save creates a new record.
    pub fn new_project(&mut self) {
        self.active = None;
    }

    pub async fn list(&self) -> Vec<ProjectRecord> {
        match self.store.read_json::<Vec<ProjectRecord>>(PROJECTS_KEY).await {
            Ok(records) => records.unwrap_or_default(),
            Err(e) => {
                warn!("failed to read saved projects: {e}");
                Vec::new()
            }
        }
    }

    async fn persist(&self, records: &[ProjectRecord]) -> bool {
        match self.store.write_json(PROJECTS_KEY, records).await {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to write saved projects: {e}");
                false
            }
        }
    }

    fn fresh_id(&mut self, taken: &[ProjectRecord]) -> String {
        let mut id = chrono::Utc::now().timestamp_millis().max(self.last_id + 1);
        while taken.iter().any(|r| r.id == id.to_string()) {
            id += 1;
        }
        self.last_id = id;
        id.to_string()
    }

    /// Saves under the active id, or a fresh one. The saved record moves to
    /// the front and the list is capped at [`MAX_PROJECTS`].
    pub async fn save(&mut self, draft: ProjectDraft) -> Option<String> {
        let mut records = self.list().await;
        let id = match self.active.clone() {
            Some(id) => id,
            None => self.fresh_id(&records),
        };

        records.retain(|r| r.id != id);
        records.insert(
            0,
            ProjectRecord {
                id: id.clone(),
                name: draft.name,
                created_at: chrono::Utc::now().timestamp_millis(),
                topic: draft.topic,
                content_mode: draft.content_mode,
                scenes: draft.scenes,
            },
        );
        records.truncate(MAX_PROJECTS);

        if !self.persist(&records).await {
            return None;
        }
        debug!("saved project {id} ({} stored)", records.len());
        self.active = Some(id.clone());
        Some(id)
    }

    pub async fn load(&mut self, id: &str) -> Option<ProjectRecord> {
        let record = self.list().await.into_iter().find(|r| r.id == id)?;
        self.active = Some(record.id.clone());
        Some(record)
    }

    pub async fn delete(&mut self, id: &str) {
        let mut records = self.list().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() != before {
            self.persist(&records).await;
        }
        if self.active.as_deref() == Some(id) {
            self.active = None;
        }
    }

    /// Writes `record` as `{name}_{id}.json` inside `dir`.
    pub async fn export(
        &self,
        record: &ProjectRecord,
        dir: impl AsRef<Path>,
    ) -> Result<PathBuf, StorageError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        let safe_name: String = record
            .name
            .chars()
            .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
            .collect();
        let path = dir.join(format!("{safe_name}_{}.json", record.id));
        fs::write(&path, serde_json::to_string_pretty(record)?).await?;
        info!("exported project to {}", path.display());
        Ok(path)
    }

    /// Reads a previously exported record and stores it as a new project.
    pub async fn import(&mut self, path: impl AsRef<Path>) -> Result<ProjectRecord, StorageError> {
        let text = fs::read_to_string(path.as_ref()).await?;
        let mut record: ProjectRecord = serde_json::from_str(&text)?;

        let mut records = self.list().await;
        record.id = self.fresh_id(&records);
        record.created_at = chrono::Utc::now().timestamp_millis();
        records.insert(0, record.clone());
        records.truncate(MAX_PROJECTS);
        self.store.write_json(PROJECTS_KEY, &records).await?;

        info!("imported project {:?} as {}", record.name, record.id);
        Ok(record)
    }
}
