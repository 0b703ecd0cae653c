//! Debounced auto-save of the active history.
//!
//! Every applied scene edit re-arms the timer; a save happens only after the
//! collection has been quiet for the whole debounce window.

use crate::collection::SceneStore;
use crate::projects::{ProjectDraft, ProjectStore};
use crate::validation::default_project_name;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(3);

struct Shared {
    enabled: AtomicBool,
    name: String,
    topic: String,
    saves: AtomicUsize,
}

pub struct AutoSaver {
    shared: Arc<Shared>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AutoSaver {
    /// Saves under `name`, or the topic-derived default name when `None`.
    pub fn spawn(
        scenes: SceneStore,
        projects: Arc<Mutex<ProjectStore>>,
        name: Option<String>,
        topic: impl Into<String>,
        debounce: Duration,
    ) -> Self {
        let topic = topic.into();
        let shared = Arc::new(Shared {
            enabled: AtomicBool::new(true),
            name: name.unwrap_or_else(|| default_project_name(&topic)),
            topic,
            saves: AtomicUsize::new(0),
        });
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(run(scenes, projects, Arc::clone(&shared), debounce, rx));
        Self {
            shared,
            shutdown: Some(tx),
            task: Some(task),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    pub fn save_count(&self) -> usize {
        self.shared.saves.load(Ordering::SeqCst)
    }

    /// Stops the task, saving first if a change is still pending.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("auto-save task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for AutoSaver {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    scenes: SceneStore,
    projects: Arc<Mutex<ProjectStore>>,
    shared: Arc<Shared>,
    debounce: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut changes = scenes.subscribe();
    let mut pending = false;

    loop {
        if pending {
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        save(&scenes, &projects, &shared).await;
                        break;
                    }
                }
                _ = tokio::time::sleep(debounce) => {
                    save(&scenes, &projects, &shared).await;
                    pending = false;
                }
                _ = &mut shutdown => {
                    save(&scenes, &projects, &shared).await;
                    break;
                }
            }
        } else {
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    pending = true;
                }
                _ = &mut shutdown => break,
            }
        }
    }
    debug!("auto-save stopped");
}

async fn save(scenes: &SceneStore, projects: &Mutex<ProjectStore>, shared: &Shared) {
    if !shared.enabled.load(Ordering::SeqCst) {
        return;
    }
    let collection = scenes.snapshot().await;
    if collection.active().is_empty() {
        return;
    }

    let draft = ProjectDraft::from_collection(&shared.name, &shared.topic, &collection);
    if let Some(id) = projects.lock().await.save(draft).await {
        shared.saves.fetch_add(1, Ordering::SeqCst);
        debug!("auto-saved project {id}");
    }
}
