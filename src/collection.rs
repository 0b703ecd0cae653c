//! Scene collection with one history per content mode, and the store that
//! serializes every mutation of it.

use crate::error::CollectionError;
use crate::scene::{AspectRatio, ContentMode, GeneratedImage, Scene};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneCollection {
    histories: BTreeMap<ContentMode, Vec<Scene>>,
    active: ContentMode,
    aspect_ratio: AspectRatio,
}

impl Default for SceneCollection {
    fn default() -> Self {
        Self::new(ContentMode::Fake, AspectRatio::default())
    }
}

impl SceneCollection {
    pub fn new(active: ContentMode, aspect_ratio: AspectRatio) -> Self {
        let mut histories = BTreeMap::new();
        histories.insert(ContentMode::Real, Vec::new());
        histories.insert(ContentMode::Fake, Vec::new());
        Self {
            histories,
            active,
            aspect_ratio,
        }
    }

    pub fn active_mode(&self) -> ContentMode {
        self.active
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }

    pub fn history(&self, mode: ContentMode) -> &[Scene] {
        self.histories.get(&mode).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn active(&self) -> &[Scene] {
        self.history(self.active)
    }

    pub fn scene(&self, index: usize) -> Option<&Scene> {
        self.active().get(index)
    }

    fn active_mut(&mut self) -> &mut Vec<Scene> {
        self.histories.entry(self.active).or_default()
    }

    fn scene_mut(&mut self, index: usize) -> Result<&mut Scene, CollectionError> {
        let scenes = self.active_mut();
        let len = scenes.len();
        scenes
            .get_mut(index)
            .ok_or(CollectionError::OutOfRange { index, len })
    }

    /// Applies one edit. Structural edits are the caller's to gate on busy.
    fn apply(&mut self, edit: SceneEdit) -> Result<(), CollectionError> {
        match edit {
            SceneEdit::SwitchMode(mode) => self.active = mode,
            SceneEdit::SetAspectRatio(ratio) => self.aspect_ratio = ratio,
            SceneEdit::ReplaceActive(scenes) => *self.active_mut() = scenes,
            SceneEdit::ClearAll => {
                for scenes in self.histories.values_mut() {
                    scenes.clear();
                }
            }
            SceneEdit::LoadProject { mode, scenes } => {
                for history in self.histories.values_mut() {
                    history.clear();
                }
                self.active = mode;
                *self.active_mut() = scenes;
            }
            SceneEdit::UpdatePrompt { index, prompt } => {
                self.scene_mut(index)?.image_prompt = prompt;
            }
            SceneEdit::UpdateNarration { index, text } => {
                self.scene_mut(index)?.narration_text = text;
            }
            SceneEdit::SelectVoice { index, voice_id } => {
                self.scene_mut(index)?.select_voice(voice_id);
            }
            SceneEdit::StoreImage {
                index,
                image,
                prompt,
            } => {
                let scene = self.scene_mut(index)?;
                scene.generated_image = Some(image);
                if let Some(prompt) = prompt {
                    scene.image_prompt = prompt;
                }
            }
            SceneEdit::StoreAudio {
                index,
                uri,
                voice_id,
                narration,
            } => {
                let scene = self.scene_mut(index)?;
                if scene.selected_voice_id() != Some(voice_id.as_str()) {
                    return Err(CollectionError::VoiceChanged(index));
                }
                scene.generated_audio = Some(uri);
                if let Some(text) = narration {
                    scene.narration_text = text;
                }
            }
        }
        Ok(())
    }
}

/// Every way the collection can change.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneEdit {
    SwitchMode(ContentMode),
    SetAspectRatio(AspectRatio),
    /// Replaces the whole active history; regeneration never appends.
    ReplaceActive(Vec<Scene>),
    ClearAll,
    LoadProject { mode: ContentMode, scenes: Vec<Scene> },
    UpdatePrompt { index: usize, prompt: String },
    UpdateNarration { index: usize, text: String },
    SelectVoice { index: usize, voice_id: Option<String> },
    StoreImage { index: usize, image: GeneratedImage, prompt: Option<String> },
    /// Audio made with `voice_id`; dropped if the scene's voice has changed
    /// since. `narration` replaces the text only when given.
    StoreAudio { index: usize, uri: String, voice_id: String, narration: Option<String> },
}

impl SceneEdit {
    /// Edits that invalidate scene indices or the active history.
    fn is_structural(&self) -> bool {
        matches!(
            self,
            SceneEdit::SwitchMode(_)
                | SceneEdit::SetAspectRatio(_)
                | SceneEdit::ReplaceActive(_)
                | SceneEdit::ClearAll
                | SceneEdit::LoadProject { .. }
        )
    }
}

/// Owner of the scene collection. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SceneStore {
    inner: Arc<Mutex<SceneCollection>>,
    busy: Arc<AtomicBool>,
    loading: Arc<std::sync::Mutex<BTreeSet<usize>>>,
    revision: Arc<watch::Sender<u64>>,
}

impl SceneStore {
    pub fn new(collection: SceneCollection) -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(collection)),
            busy: Arc::new(AtomicBool::new(false)),
            loading: Arc::new(std::sync::Mutex::new(BTreeSet::new())),
            revision: Arc::new(tx),
        }
    }

    /// Single mutation entry point. Structural edits are rejected while a
    /// bulk pass holds the collection or any scene is generating.
    pub async fn apply(&self, edit: SceneEdit) -> Result<(), CollectionError> {
        if edit.is_structural() && (self.is_busy() || self.any_loading()) {
            return Err(CollectionError::Busy);
        }
        let mut guard = self.inner.lock().await;
        guard.apply(edit)?;
        drop(guard);
        self.revision.send_modify(|rev| *rev += 1);
        Ok(())
    }

    /// Applies an edit on behalf of the pass that holds the collection.
    /// Structural edits still wait for in-flight single-scene calls.
    pub async fn apply_in_pass(
        &self,
        _pass: &PassGuard,
        edit: SceneEdit,
    ) -> Result<(), CollectionError> {
        if edit.is_structural() && self.any_loading() {
            return Err(CollectionError::Busy);
        }
        let mut guard = self.inner.lock().await;
        guard.apply(edit)?;
        drop(guard);
        self.revision.send_modify(|rev| *rev += 1);
        Ok(())
    }

    pub async fn snapshot(&self) -> SceneCollection {
        self.inner.lock().await.clone()
    }

    pub async fn read<R>(&self, f: impl FnOnce(&SceneCollection) -> R) -> R {
        let guard = self.inner.lock().await;
        f(&guard)
    }

    /// Revision counter bumped after every applied edit.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Claims the collection for one bulk pass.
    pub fn try_begin_pass(&self) -> Result<PassGuard, CollectionError> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| CollectionError::Busy)?;
        Ok(PassGuard {
            busy: Arc::clone(&self.busy),
        })
    }

    /// Marks one scene as loading until the guard drops.
    pub fn try_mark_loading(&self, index: usize) -> Result<LoadingGuard, CollectionError> {
        let mut set = self.loading.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(index) {
            return Err(CollectionError::SceneLoading(index));
        }
        Ok(LoadingGuard {
            index,
            loading: Arc::clone(&self.loading),
        })
    }

    fn any_loading(&self) -> bool {
        let set = self.loading.lock().unwrap_or_else(|e| e.into_inner());
        !set.is_empty()
    }

    pub fn loading_indices(&self) -> Vec<usize> {
        let set = self.loading.lock().unwrap_or_else(|e| e.into_inner());
        set.iter().copied().collect()
    }
}

pub struct PassGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

pub struct LoadingGuard {
    index: usize,
    loading: Arc<std::sync::Mutex<BTreeSet<usize>>>,
}

impl LoadingGuard {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        let mut set = self.loading.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.index);
    }
}
