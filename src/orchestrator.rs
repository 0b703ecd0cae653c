//! Bulk generation over the scene collection.
//!
//! Every pass claims the collection, walks scene indices in ascending order and
//! awaits one provider call at a time. Single-scene calls only claim their own
//! scene, so calls on different scenes may overlap. Auth and quota failures
//! end the pass (images and audio alike) and raise a credential prompt;
//! anything else is reported and the pass moves on to the next scene.

use crate::api::{ImageProvider, ScriptProvider, SpeechProvider};
use crate::collection::{LoadingGuard, PassGuard, SceneEdit, SceneStore};
use crate::credentials::CredentialSet;
use crate::error::{CollectionError, ProviderError};
use crate::notify::{MediaKind, Notification, Notifier};
use crate::scene::{AspectRatio, GeneratedImage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Cancellation signal checked at every scene boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Generated,
    Skipped,
    Failed(ProviderError),
    /// Failure that ends the surrounding pass.
    Aborted(ProviderError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub attempted: usize,
    pub generated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub aborted: bool,
    pub cancelled: bool,
}

impl PassReport {
    fn record(&mut self, outcome: &StepOutcome) {
        match outcome {
            StepOutcome::Generated => {
                self.attempted += 1;
                self.generated += 1;
            }
            StepOutcome::Failed(_) => {
                self.attempted += 1;
                self.failed += 1;
            }
            StepOutcome::Aborted(_) => {
                self.attempted += 1;
                self.failed += 1;
                self.aborted = true;
            }
            StepOutcome::Skipped => self.skipped += 1,
        }
    }
}

pub struct Orchestrator {
    store: SceneStore,
    image: Arc<dyn ImageProvider>,
    speech: Arc<dyn SpeechProvider>,
    notifier: Arc<dyn Notifier>,
}

impl Orchestrator {
    pub fn new(
        store: SceneStore,
        image: Arc<dyn ImageProvider>,
        speech: Arc<dyn SpeechProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            image,
            speech,
            notifier,
        }
    }

    pub fn store(&self) -> &SceneStore {
        &self.store
    }

    /// Replaces the active history with a freshly generated script.
    pub async fn generate_script(
        &self,
        script: &dyn ScriptProvider,
        topic: &str,
        credentials: &CredentialSet,
        max_chars: usize,
    ) -> Result<StepOutcome, CollectionError> {
        let pass = self.store.try_begin_pass()?;
        let mode = self.store.read(|c| c.active_mode()).await;
        self.store
            .apply_in_pass(&pass, SceneEdit::ReplaceActive(Vec::new()))
            .await?;

        info!("generating {mode} script for topic {topic:?} via {}", script.provider());
        let result = script
            .generate_script(topic, mode, credentials, max_chars)
            .await;
        self.finish_script(&pass, result).await
    }

    /// Replaces the active history with scenes parsed from a user script.
    pub async fn parse_script(
        &self,
        script: &dyn ScriptProvider,
        text: &str,
        scene_count: usize,
        credentials: &CredentialSet,
    ) -> Result<StepOutcome, CollectionError> {
        let pass = self.store.try_begin_pass()?;
        let mode = self.store.read(|c| c.active_mode()).await;
        self.store
            .apply_in_pass(&pass, SceneEdit::ReplaceActive(Vec::new()))
            .await?;

        info!("splitting script into {scene_count} scenes via {}", script.provider());
        let result = script
            .parse_script(text, scene_count, mode, credentials)
            .await;
        self.finish_script(&pass, result).await
    }

    async fn finish_script(
        &self,
        pass: &PassGuard,
        result: Result<Vec<crate::scene::Scene>, ProviderError>,
    ) -> Result<StepOutcome, CollectionError> {
        match result {
            Ok(scenes) => {
                let count = scenes.len();
                self.store
                    .apply_in_pass(pass, SceneEdit::ReplaceActive(scenes))
                    .await?;
                self.notifier
                    .notify(Notification::Success(format!("{count} scenes generated")));
                Ok(StepOutcome::Generated)
            }
            Err(e) => Ok(self.report_failure(None, e, "script")),
        }
    }

    /// Generates images for scenes `0..count` whose image is missing or was
    /// made for a different aspect ratio.
    pub async fn generate_images_for_range(
        &self,
        count: usize,
        credentials: &CredentialSet,
        cancel: &CancelFlag,
    ) -> Result<PassReport, CollectionError> {
        let _pass = self.store.try_begin_pass()?;
        let mut report = PassReport::default();

        if !credentials.has(self.image.provider()) {
            self.notifier
                .notify(Notification::CredentialPrompt(self.image.provider()));
            report.aborted = true;
            return Ok(report);
        }

        let (len, ratio) = self
            .store
            .read(|c| (c.active().len(), c.aspect_ratio()))
            .await;
        let limit = count.min(len);
        info!("bulk image pass over {limit}/{len} scenes at {ratio}");

        for index in 0..limit {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let prompt = self
                .store
                .read(|c| {
                    c.scene(index)
                        .filter(|s| !s.has_current_image(ratio))
                        .map(|s| s.effective_image_prompt())
                })
                .await;
            let outcome = match (prompt, self.store.try_mark_loading(index)) {
                (Some(prompt), Ok(loading)) => {
                    self.image_step(loading, prompt, None, ratio, credentials)
                        .await
                }
                _ => StepOutcome::Skipped,
            };

            report.record(&outcome);
            if matches!(outcome, StepOutcome::Aborted(_)) {
                break;
            }
        }

        debug!("image pass finished: {report:?}");
        Ok(report)
    }

    /// Generates narration for every scene that has a voice but no audio.
    pub async fn generate_audio_for_range(
        &self,
        credentials: &CredentialSet,
        cancel: &CancelFlag,
    ) -> Result<PassReport, CollectionError> {
        let _pass = self.store.try_begin_pass()?;
        let mut report = PassReport::default();

        if !credentials.has(self.speech.provider()) {
            self.notifier
                .notify(Notification::CredentialPrompt(self.speech.provider()));
            report.aborted = true;
            return Ok(report);
        }

        let len = self.store.read(|c| c.active().len()).await;
        info!("bulk audio pass over {len} scenes");

        for index in 0..len {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let job = self
                .store
                .read(|c| {
                    c.scene(index).filter(|s| s.needs_audio()).and_then(|s| {
                        s.selected_voice_id()
                            .map(|v| (v.to_string(), s.narration_text.clone()))
                    })
                })
                .await;
            let outcome = match (job, self.store.try_mark_loading(index)) {
                (Some((voice, text)), Ok(loading)) => {
                    self.audio_step(loading, voice, text, None, credentials)
                        .await
                }
                _ => StepOutcome::Skipped,
            };

            report.record(&outcome);
            if matches!(outcome, StepOutcome::Aborted(_)) {
                break;
            }
        }

        debug!("audio pass finished: {report:?}");
        Ok(report)
    }

    /// Claims one scene for a single-scene call. Fails while a bulk pass runs
    /// or when that scene is already generating; other scenes stay free.
    fn claim_scene(&self, index: usize) -> Result<LoadingGuard, CollectionError> {
        if self.store.is_busy() {
            return Err(CollectionError::Busy);
        }
        self.store.try_mark_loading(index)
    }

    /// Generates one scene's image. A prompt override also replaces the
    /// scene's stored prompt on success.
    pub async fn generate_image(
        &self,
        index: usize,
        prompt_override: Option<String>,
        credentials: &CredentialSet,
    ) -> Result<StepOutcome, CollectionError> {
        let loading = self.claim_scene(index)?;
        let (prompt, ratio) = self
            .store
            .read(|c| {
                let len = c.active().len();
                c.scene(index)
                    .map(|s| (s.effective_image_prompt(), c.aspect_ratio()))
                    .ok_or(CollectionError::OutOfRange { index, len })
            })
            .await?;
        if !credentials.has(self.image.provider()) {
            self.notifier
                .notify(Notification::CredentialPrompt(self.image.provider()));
            return Ok(StepOutcome::Aborted(ProviderError::MissingCredential(
                self.image.provider(),
            )));
        }

        let prompt = prompt_override.clone().unwrap_or(prompt);
        Ok(self
            .image_step(loading, prompt, prompt_override, ratio, credentials)
            .await)
    }

    /// Narrates one scene with its selected voice. `text` replaces the
    /// scene's narration on success; scenes without a voice are skipped.
    pub async fn generate_audio(
        &self,
        index: usize,
        text: Option<String>,
        credentials: &CredentialSet,
    ) -> Result<StepOutcome, CollectionError> {
        let loading = self.claim_scene(index)?;
        let job = self
            .store
            .read(|c| {
                let len = c.active().len();
                c.scene(index)
                    .map(|s| {
                        s.selected_voice_id()
                            .map(|v| (v.to_string(), s.narration_text.clone()))
                    })
                    .ok_or(CollectionError::OutOfRange { index, len })
            })
            .await?;

        let Some((voice, narration)) = job else {
            return Ok(StepOutcome::Skipped);
        };
        if !credentials.has(self.speech.provider()) {
            self.notifier
                .notify(Notification::CredentialPrompt(self.speech.provider()));
            return Ok(StepOutcome::Aborted(ProviderError::MissingCredential(
                self.speech.provider(),
            )));
        }

        let spoken = text.clone().unwrap_or(narration);
        Ok(self
            .audio_step(loading, voice, spoken, text, credentials)
            .await)
    }

    /// Asks the script provider for a richer image prompt for one scene and
    /// stores it. The scene's current image is kept.
    pub async fn regenerate_image_prompt(
        &self,
        script: &dyn ScriptProvider,
        index: usize,
        credentials: &CredentialSet,
    ) -> Result<StepOutcome, CollectionError> {
        let _loading = self.claim_scene(index)?;
        let (current, context) = self
            .store
            .read(|c| {
                let len = c.active().len();
                c.scene(index)
                    .map(|s| {
                        (
                            s.image_prompt.clone(),
                            format!("{}. {}", s.headline, s.narration_text),
                        )
                    })
                    .ok_or(CollectionError::OutOfRange { index, len })
            })
            .await?;

        info!("regenerating image prompt for scene {} via {}", index + 1, script.provider());
        match script
            .regenerate_image_prompt(&current, &context, credentials)
            .await
        {
            Ok(prompt) => {
                self.store
                    .apply(SceneEdit::UpdatePrompt { index, prompt })
                    .await?;
                Ok(StepOutcome::Generated)
            }
            Err(e) => Ok(self.report_failure(Some(index), e, "prompt")),
        }
    }

    async fn image_step(
        &self,
        loading: LoadingGuard,
        prompt: String,
        prompt_override: Option<String>,
        ratio: AspectRatio,
        credentials: &CredentialSet,
    ) -> StepOutcome {
        let index = loading.index();
        self.notifier.notify(Notification::LoadingStarted {
            kind: MediaKind::Image,
            index,
        });

        let outcome = match self.image.generate_image(&prompt, credentials, ratio).await {
            Ok(data_uri) => {
                let edit = SceneEdit::StoreImage {
                    index,
                    image: GeneratedImage {
                        data_uri,
                        aspect_ratio: ratio,
                    },
                    prompt: prompt_override,
                };
                match self.store.apply(edit).await {
                    Ok(()) => StepOutcome::Generated,
                    Err(e) => {
                        self.notifier.notify(Notification::Error(e.to_string()));
                        StepOutcome::Skipped
                    }
                }
            }
            Err(e) => self.report_failure(Some(index), e, "image"),
        };

        self.notifier.notify(Notification::LoadingFinished {
            kind: MediaKind::Image,
            index,
            ok: outcome == StepOutcome::Generated,
        });
        outcome
    }

    /// Speaks `text` with `voice`. `narration` is written back only when the
    /// caller supplied replacement text.
    async fn audio_step(
        &self,
        loading: LoadingGuard,
        voice: String,
        text: String,
        narration: Option<String>,
        credentials: &CredentialSet,
    ) -> StepOutcome {
        let index = loading.index();
        self.notifier.notify(Notification::LoadingStarted {
            kind: MediaKind::Audio,
            index,
        });

        let outcome = match self.speech.generate_speech(&text, &voice, credentials).await {
            Ok(uri) => {
                let edit = SceneEdit::StoreAudio {
                    index,
                    uri,
                    voice_id: voice,
                    narration,
                };
                match self.store.apply(edit).await {
                    Ok(()) => StepOutcome::Generated,
                    Err(CollectionError::VoiceChanged(_)) => {
                        self.notifier.notify(Notification::Info(format!(
                            "Scene {} changed voice; narration discarded",
                            index + 1
                        )));
                        StepOutcome::Skipped
                    }
                    Err(e) => {
                        self.notifier.notify(Notification::Error(e.to_string()));
                        StepOutcome::Skipped
                    }
                }
            }
            Err(e) => self.report_failure(Some(index), e, "audio"),
        };

        self.notifier.notify(Notification::LoadingFinished {
            kind: MediaKind::Audio,
            index,
            ok: outcome == StepOutcome::Generated,
        });
        outcome
    }

    fn report_failure(
        &self,
        index: Option<usize>,
        err: ProviderError,
        what: &str,
    ) -> StepOutcome {
        let place = index.map(|i| format!(" for scene {}", i + 1)).unwrap_or_default();
        self.notifier
            .notify(Notification::Error(format!("{what} generation failed{place}: {err}")));
        debug!("{what} failure classified as abort={}", err.aborts_pass());

        if err.aborts_pass() {
            self.notifier
                .notify(Notification::CredentialPrompt(err.provider()));
            StepOutcome::Aborted(err)
        } else {
            StepOutcome::Failed(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Voice;
    use crate::collection::SceneCollection;
    use crate::credentials::Provider;
    use crate::notify::RecordingNotifier;
    use crate::scene::{ContentMode, Scene};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct MockImage {
        failures: HashMap<String, ProviderError>,
        calls: Mutex<Vec<(String, Instant, Instant)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        cancel_after_first: Option<CancelFlag>,
    }

    impl MockImage {
        fn failing(mut self, prompt: &str, err: ProviderError) -> Self {
            self.failures.insert(prompt.to_string(), err);
            self
        }

        fn prompts(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|c| c.0.clone()).collect()
        }
    }

    #[async_trait]
    impl ImageProvider for MockImage {
        fn provider(&self) -> Provider {
            Provider::Reve
        }

        async fn generate_image(
            &self,
            prompt: &str,
            _credentials: &CredentialSet,
            aspect_ratio: AspectRatio,
        ) -> Result<String, ProviderError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let start = Instant::now();
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls
                .lock()
                .unwrap()
                .push((prompt.to_string(), start, Instant::now()));
            if let Some(flag) = &self.cancel_after_first {
                flag.cancel();
            }
            match self.failures.get(prompt) {
                Some(err) => Err(err.clone()),
                None => Ok(format!("data:image/png;base64,{prompt}-{aspect_ratio}")),
            }
        }
    }

    #[derive(Default)]
    struct MockSpeech {
        failures: HashMap<String, ProviderError>,
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SpeechProvider for MockSpeech {
        fn provider(&self) -> Provider {
            Provider::Ai33
        }

        async fn list_voices(&self, _credentials: &CredentialSet) -> Result<Vec<Voice>, ProviderError> {
            Ok(Vec::new())
        }

        async fn generate_speech(
            &self,
            text: &str,
            voice_id: &str,
            _credentials: &CredentialSet,
        ) -> Result<String, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push((text.to_string(), voice_id.to_string()));
            match self.failures.get(text) {
                Some(err) => Err(err.clone()),
                None => Ok(format!("https://cdn/{voice_id}.mp3")),
            }
        }
    }

    struct MockScript {
        result: Result<Vec<Scene>, ProviderError>,
    }

    #[async_trait]
    impl ScriptProvider for MockScript {
        fn provider(&self) -> Provider {
            Provider::Gemini
        }

        async fn generate_script(
            &self,
            topic: &str,
            mode: ContentMode,
            _credentials: &CredentialSet,
            _max_chars: usize,
        ) -> Result<Vec<Scene>, ProviderError> {
            self.result.clone().map(|scenes| {
                scenes
                    .into_iter()
                    .map(|s| Scene::new(format!("{topic}: {}", s.headline), s.narration_text, s.image_prompt, mode))
                    .collect()
            })
        }

        async fn parse_script(
            &self,
            _script: &str,
            scene_count: usize,
            mode: ContentMode,
            _credentials: &CredentialSet,
        ) -> Result<Vec<Scene>, ProviderError> {
            Ok(three_scenes(mode).into_iter().take(scene_count).collect())
        }

        async fn regenerate_image_prompt(
            &self,
            current_prompt: &str,
            context: &str,
            _credentials: &CredentialSet,
        ) -> Result<String, ProviderError> {
            match &self.result {
                Ok(_) => Ok(format!("{current_prompt}, cinematic ({context})")),
                Err(e) => Err(e.clone()),
            }
        }
    }

    /// Applies `edit` to the store while the narration request is in flight.
    struct RacingSpeech {
        store: SceneStore,
        edit: SceneEdit,
    }

    #[async_trait]
    impl SpeechProvider for RacingSpeech {
        fn provider(&self) -> Provider {
            Provider::Ai33
        }

        async fn list_voices(&self, _credentials: &CredentialSet) -> Result<Vec<Voice>, ProviderError> {
            Ok(Vec::new())
        }

        async fn generate_speech(
            &self,
            _text: &str,
            voice_id: &str,
            _credentials: &CredentialSet,
        ) -> Result<String, ProviderError> {
            self.store.apply(self.edit.clone()).await.unwrap();
            Ok(format!("audio-{voice_id}"))
        }
    }

    fn three_scenes(mode: ContentMode) -> Vec<Scene> {
        (0..3)
            .map(|i| Scene::new(format!("h{i}"), format!("n{i}"), format!("p{i}"), mode))
            .collect()
    }

    fn creds() -> CredentialSet {
        CredentialSet::default()
            .with(Provider::Reve, "reve-key")
            .with(Provider::Ai33, "ai33-key")
            .with(Provider::Gemini, "gemini-key")
    }

    fn auth_error() -> ProviderError {
        ProviderError::classify(Provider::Reve, 401, "unauthorized")
    }

    async fn setup(
        image: MockImage,
        speech: MockSpeech,
    ) -> (Orchestrator, Arc<MockImage>, Arc<MockSpeech>, Arc<RecordingNotifier>) {
        let store = SceneStore::new(SceneCollection::new(ContentMode::Fake, AspectRatio::Landscape));
        store
            .apply(SceneEdit::ReplaceActive(three_scenes(ContentMode::Fake)))
            .await
            .unwrap();
        let image = Arc::new(image);
        let speech = Arc::new(speech);
        let notifier = Arc::new(RecordingNotifier::default());
        let orch = Orchestrator::new(store, image.clone(), speech.clone(), notifier.clone());
        (orch, image, speech, notifier)
    }

    #[tokio::test]
    async fn volcano_count_two_touches_first_two_scenes() {
        let (orch, image, _, _) = setup(MockImage::default(), MockSpeech::default()).await;
        let script = MockScript {
            result: Ok(three_scenes(ContentMode::Fake)),
        };
        let outcome = orch
            .generate_script(&script, "volcano", &creds(), 500)
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Generated);

        let report = orch
            .generate_images_for_range(2, &creds(), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.generated, 2);
        assert_eq!(image.prompts(), vec!["p0", "p1"]);

        let snap = orch.store().snapshot().await;
        assert!(snap.active()[0].generated_image.is_some());
        assert!(snap.active()[1].generated_image.is_some());
        assert!(snap.active()[2].generated_image.is_none());
        assert!(snap.active()[0].headline.starts_with("volcano"));
    }

    #[tokio::test]
    async fn auth_failure_stops_pass_and_prompts() {
        let image = MockImage::default().failing("p1", auth_error());
        let (orch, image, _, notifier) = setup(image, MockSpeech::default()).await;

        let report = orch
            .generate_images_for_range(3, &creds(), &CancelFlag::new())
            .await
            .unwrap();
        assert!(report.aborted);
        assert_eq!(image.prompts(), vec!["p0", "p1"]);

        let snap = orch.store().snapshot().await;
        assert!(snap.active()[0].generated_image.is_some());
        assert!(snap.active()[1].generated_image.is_none());
        assert!(snap.active()[2].generated_image.is_none());
        assert_eq!(notifier.credential_prompts(), vec![Provider::Reve]);
    }

    #[tokio::test]
    async fn quota_failure_also_stops() {
        let quota = ProviderError::from_message(Provider::Reve, "budget exceeded");
        let image = MockImage::default().failing("p0", quota);
        let (orch, image, _, _) = setup(image, MockSpeech::default()).await;

        let report = orch
            .generate_images_for_range(3, &creds(), &CancelFlag::new())
            .await
            .unwrap();
        assert!(report.aborted);
        assert_eq!(image.prompts(), vec!["p0"]);
    }

    #[tokio::test]
    async fn transient_failure_continues() {
        let image = MockImage::default().failing(
            "p1",
            ProviderError::ContentPolicy {
                provider: Provider::Reve,
                message: "blocked".into(),
            },
        );
        let (orch, image, _, notifier) = setup(image, MockSpeech::default()).await;

        let report = orch
            .generate_images_for_range(3, &creds(), &CancelFlag::new())
            .await
            .unwrap();
        assert!(!report.aborted);
        assert_eq!(report.generated, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(image.prompts(), vec!["p0", "p1", "p2"]);
        assert_eq!(notifier.errors().len(), 1);
        assert!(notifier.credential_prompts().is_empty());
    }

    #[tokio::test]
    async fn current_images_are_not_regenerated() {
        let (orch, image, _, _) = setup(MockImage::default(), MockSpeech::default()).await;
        orch.generate_images_for_range(3, &creds(), &CancelFlag::new())
            .await
            .unwrap();
        let again = orch
            .generate_images_for_range(3, &creds(), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(again.skipped, 3);
        assert_eq!(image.prompts().len(), 3);

        orch.store()
            .apply(SceneEdit::SetAspectRatio(AspectRatio::Portrait))
            .await
            .unwrap();
        orch.generate_images_for_range(1, &creds(), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(image.prompts().len(), 4);
        let snap = orch.store().snapshot().await;
        assert!(snap.active()[0].has_current_image(AspectRatio::Portrait));
        assert!(!snap.active()[1].has_current_image(AspectRatio::Portrait));
    }

    #[tokio::test]
    async fn calls_are_sequential_and_ordered() {
        let (orch, image, _, _) = setup(MockImage::default(), MockSpeech::default()).await;
        orch.generate_images_for_range(10, &creds(), &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(image.max_in_flight.load(Ordering::SeqCst), 1);
        let calls = image.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            assert!(pair[0].2 <= pair[1].1);
        }
    }

    #[tokio::test]
    async fn loading_flags_released_and_paired() {
        let image = MockImage::default().failing("p1", auth_error());
        let (orch, _, _, notifier) = setup(image, MockSpeech::default()).await;
        orch.generate_images_for_range(3, &creds(), &CancelFlag::new())
            .await
            .unwrap();

        assert!(orch.store().loading_indices().is_empty());
        let events = notifier.events();
        let started = events
            .iter()
            .filter(|e| matches!(e, Notification::LoadingStarted { .. }))
            .count();
        let finished: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Notification::LoadingFinished { index, ok, .. } => Some((*index, *ok)),
                _ => None,
            })
            .collect();
        assert_eq!(started, 2);
        assert_eq!(finished, vec![(0, true), (1, false)]);
    }

    #[tokio::test]
    async fn missing_credential_makes_no_calls() {
        let (orch, image, _, notifier) = setup(MockImage::default(), MockSpeech::default()).await;
        let report = orch
            .generate_images_for_range(3, &CredentialSet::default(), &CancelFlag::new())
            .await
            .unwrap();
        assert!(report.aborted);
        assert!(image.prompts().is_empty());
        assert_eq!(notifier.credential_prompts(), vec![Provider::Reve]);
    }

    #[tokio::test]
    async fn overlapping_pass_is_rejected() {
        let (orch, _, _, _) = setup(MockImage::default(), MockSpeech::default()).await;
        let _held = orch.store().try_begin_pass().unwrap();
        let res = orch
            .generate_images_for_range(3, &creds(), &CancelFlag::new())
            .await;
        assert_eq!(res, Err(CollectionError::Busy));
        let res = orch.generate_audio_for_range(&creds(), &CancelFlag::new()).await;
        assert_eq!(res, Err(CollectionError::Busy));
    }

    #[tokio::test]
    async fn cancellation_honored_at_scene_boundary() {
        let cancel = CancelFlag::new();
        let image = MockImage {
            cancel_after_first: Some(cancel.clone()),
            ..Default::default()
        };
        let (orch, image, _, _) = setup(image, MockSpeech::default()).await;
        let report = orch
            .generate_images_for_range(3, &creds(), &cancel)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(image.prompts(), vec!["p0"]);
    }

    #[tokio::test]
    async fn audio_pass_only_touches_voiced_scenes_without_audio() {
        let (orch, _, speech, _) = setup(MockImage::default(), MockSpeech::default()).await;
        let store = orch.store();
        store
            .apply(SceneEdit::SelectVoice { index: 0, voice_id: Some("v0".into()) })
            .await
            .unwrap();
        store
            .apply(SceneEdit::SelectVoice { index: 2, voice_id: Some("v2".into()) })
            .await
            .unwrap();
        store
            .apply(SceneEdit::StoreAudio {
                index: 2,
                uri: "old.mp3".into(),
                voice_id: "v2".into(),
                narration: None,
            })
            .await
            .unwrap();

        let report = orch
            .generate_audio_for_range(&creds(), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.generated, 1);
        assert_eq!(
            speech.calls.lock().unwrap().clone(),
            vec![("n0".to_string(), "v0".to_string())]
        );
        let snap = store.snapshot().await;
        assert_eq!(snap.active()[0].generated_audio.as_deref(), Some("https://cdn/v0.mp3"));
        assert_eq!(snap.active()[2].generated_audio.as_deref(), Some("old.mp3"));
    }

    #[tokio::test]
    async fn audio_pass_aborts_on_quota_like_images() {
        let mut speech = MockSpeech::default();
        speech.failures.insert(
            "n0".into(),
            ProviderError::classify(Provider::Ai33, 429, "rate limited"),
        );
        let (orch, _, speech, notifier) = setup(MockImage::default(), speech).await;
        for i in 0..3 {
            orch.store()
                .apply(SceneEdit::SelectVoice { index: i, voice_id: Some("v".into()) })
                .await
                .unwrap();
        }

        let report = orch
            .generate_audio_for_range(&creds(), &CancelFlag::new())
            .await
            .unwrap();
        assert!(report.aborted);
        assert_eq!(speech.calls.lock().unwrap().len(), 1);
        assert_eq!(notifier.credential_prompts(), vec![Provider::Ai33]);
    }

    #[tokio::test]
    async fn audio_network_failure_continues() {
        let mut speech = MockSpeech::default();
        speech.failures.insert(
            "n1".into(),
            ProviderError::Timeout { provider: Provider::Ai33, attempts: 120 },
        );
        let (orch, _, speech, _) = setup(MockImage::default(), speech).await;
        for i in 0..3 {
            orch.store()
                .apply(SceneEdit::SelectVoice { index: i, voice_id: Some("v".into()) })
                .await
                .unwrap();
        }

        let report = orch
            .generate_audio_for_range(&creds(), &CancelFlag::new())
            .await
            .unwrap();
        assert!(!report.aborted);
        assert_eq!(report.generated, 2);
        assert_eq!(speech.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn single_image_override_updates_prompt() {
        let (orch, image, _, _) = setup(MockImage::default(), MockSpeech::default()).await;
        let outcome = orch
            .generate_image(2, Some("custom".into()), &creds())
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Generated);
        assert_eq!(image.prompts(), vec!["custom"]);
        let scene = orch.store().read(|c| c.scene(2).cloned()).await.unwrap();
        assert_eq!(scene.image_prompt, "custom");
        assert!(scene.generated_image.is_some());

        assert_eq!(
            orch.generate_image(9, None, &creds()).await,
            Err(CollectionError::OutOfRange { index: 9, len: 3 })
        );
    }

    #[tokio::test]
    async fn single_audio_requires_voice_and_writes_text() {
        let (orch, _, speech, _) = setup(MockImage::default(), MockSpeech::default()).await;
        assert_eq!(
            orch.generate_audio(0, None, &creds()).await.unwrap(),
            StepOutcome::Skipped
        );
        orch.store()
            .apply(SceneEdit::SelectVoice { index: 0, voice_id: Some("v".into()) })
            .await
            .unwrap();
        let outcome = orch
            .generate_audio(0, Some("edited narration".into()), &creds())
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Generated);
        assert_eq!(speech.calls.lock().unwrap()[0].0, "edited narration");
        let scene = orch.store().read(|c| c.scene(0).cloned()).await.unwrap();
        assert_eq!(scene.narration_text, "edited narration");
    }

    #[tokio::test]
    async fn failed_script_leaves_active_history_empty() {
        let (orch, _, _, notifier) = setup(MockImage::default(), MockSpeech::default()).await;
        let script = MockScript {
            result: Err(ProviderError::parse(Provider::Gemini, "not json")),
        };
        let outcome = orch
            .generate_script(&script, "volcano", &creds(), 500)
            .await
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Failed(ProviderError::Parse { .. })));
        assert!(orch.store().read(|c| c.active().is_empty()).await);
        assert_eq!(notifier.errors().len(), 1);
    }

    #[tokio::test]
    async fn parsed_script_replaces_active_history() {
        let (orch, _, _, _) = setup(MockImage::default(), MockSpeech::default()).await;
        let script = MockScript {
            result: Ok(Vec::new()),
        };
        orch.parse_script(&script, "long text", 2, &creds())
            .await
            .unwrap();
        assert_eq!(orch.store().read(|c| c.active().len()).await, 2);
    }

    async fn racing_setup(edit: SceneEdit) -> (Orchestrator, Arc<RecordingNotifier>) {
        let store = SceneStore::new(SceneCollection::new(ContentMode::Fake, AspectRatio::Landscape));
        store
            .apply(SceneEdit::ReplaceActive(three_scenes(ContentMode::Fake)))
            .await
            .unwrap();
        store
            .apply(SceneEdit::SelectVoice { index: 0, voice_id: Some("v1".into()) })
            .await
            .unwrap();
        let speech = Arc::new(RacingSpeech {
            store: store.clone(),
            edit,
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let orch = Orchestrator::new(store, Arc::new(MockImage::default()), speech, notifier.clone());
        (orch, notifier)
    }

    #[tokio::test]
    async fn voice_change_mid_call_discards_old_audio() {
        let (orch, notifier) =
            racing_setup(SceneEdit::SelectVoice { index: 0, voice_id: Some("v2".into()) }).await;
        let report = orch
            .generate_audio_for_range(&creds(), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.generated, 0);
        assert_eq!(report.skipped, 3);

        let scene = orch.store().read(|c| c.scene(0).cloned()).await.unwrap();
        assert_eq!(scene.selected_voice_id(), Some("v2"));
        assert!(scene.generated_audio.is_none());
        assert!(notifier.errors().is_empty());
        assert!(orch.store().loading_indices().is_empty());
    }

    #[tokio::test]
    async fn narration_edit_mid_call_is_kept() {
        let (orch, _) =
            racing_setup(SceneEdit::UpdateNarration { index: 0, text: "typed meanwhile".into() })
                .await;
        let outcome = orch.generate_audio(0, None, &creds()).await.unwrap();
        assert_eq!(outcome, StepOutcome::Generated);

        let scene = orch.store().read(|c| c.scene(0).cloned()).await.unwrap();
        assert_eq!(scene.generated_audio.as_deref(), Some("audio-v1"));
        assert_eq!(scene.narration_text, "typed meanwhile");
    }

    #[tokio::test]
    async fn single_scene_calls_on_different_scenes_overlap() {
        let (orch, image, _, _) = setup(MockImage::default(), MockSpeech::default()).await;
        let (creds_a, creds_b) = (creds(), creds());
        let (a, b) = tokio::join!(
            orch.generate_image(0, None, &creds_a),
            orch.generate_image(1, None, &creds_b)
        );
        assert_eq!(a.unwrap(), StepOutcome::Generated);
        assert_eq!(b.unwrap(), StepOutcome::Generated);
        assert_eq!(image.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn single_scene_call_respects_loading_and_passes() {
        let (orch, image, _, _) = setup(MockImage::default(), MockSpeech::default()).await;
        let loading = orch.store().try_mark_loading(1).unwrap();
        assert_eq!(
            orch.generate_image(1, None, &creds()).await,
            Err(CollectionError::SceneLoading(1))
        );
        assert_eq!(
            orch.generate_image(0, None, &creds()).await.unwrap(),
            StepOutcome::Generated
        );
        drop(loading);

        let pass = orch.store().try_begin_pass().unwrap();
        assert_eq!(
            orch.generate_image(2, None, &creds()).await,
            Err(CollectionError::Busy)
        );
        drop(pass);
        assert_eq!(image.prompts(), vec!["p0"]);
    }

    #[tokio::test]
    async fn bulk_pass_skips_scene_busy_with_single_call() {
        let (orch, image, _, _) = setup(MockImage::default(), MockSpeech::default()).await;
        let _loading = orch.store().try_mark_loading(1).unwrap();
        let report = orch
            .generate_images_for_range(3, &creds(), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.generated, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(image.prompts(), vec!["p0", "p2"]);
    }

    #[tokio::test]
    async fn regenerated_prompt_replaces_stored_prompt() {
        let (orch, _, _, _) = setup(MockImage::default(), MockSpeech::default()).await;
        orch.generate_image(0, None, &creds()).await.unwrap();
        let script = MockScript {
            result: Ok(Vec::new()),
        };
        let outcome = orch
            .regenerate_image_prompt(&script, 0, &creds())
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Generated);

        let scene = orch.store().read(|c| c.scene(0).cloned()).await.unwrap();
        assert_eq!(scene.image_prompt, "p0, cinematic (h0. n0)");
        assert!(scene.generated_image.is_some());
        assert_eq!(
            orch.regenerate_image_prompt(&script, 7, &creds()).await,
            Err(CollectionError::OutOfRange { index: 7, len: 3 })
        );
    }

    #[tokio::test]
    async fn rejected_key_on_prompt_rewrite_prompts_for_credential() {
        let (orch, _, _, notifier) = setup(MockImage::default(), MockSpeech::default()).await;
        let script = MockScript {
            result: Err(ProviderError::classify(Provider::Gemini, 401, "bad key")),
        };
        let outcome = orch
            .regenerate_image_prompt(&script, 1, &creds())
            .await
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Aborted(ProviderError::Auth { .. })));
        assert_eq!(notifier.credential_prompts(), vec![Provider::Gemini]);
        assert_eq!(orch.store().read(|c| c.scene(1).cloned()).await.unwrap().image_prompt, "p1");
    }
}
