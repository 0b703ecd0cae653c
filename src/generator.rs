use crate::api::ai33::Ai33Speech;
use crate::api::anthropic::AnthropicScript;
use crate::api::elevenlabs::ElevenLabsSpeech;
use crate::api::gemini::GeminiScript;
use crate::api::openai::OpenAiScript;
use crate::api::reve::ReveImage;
use crate::api::{ImageProvider, ScriptProvider, SpeechProvider, Voice};
use crate::archive::{self, ExportOptions};
use crate::autosave::AutoSaver;
use crate::collection::{SceneCollection, SceneEdit, SceneStore};
use crate::config::{Config, ScriptBackend, SpeechBackend};
use crate::credentials::CredentialSet;
use crate::notify::Notifier;
use crate::orchestrator::{CancelFlag, Orchestrator, PassReport, StepOutcome};
use crate::projects::{ProjectDraft, ProjectRecord, ProjectStore};
use crate::scene::{AspectRatio, ContentMode};
use crate::storage::LocalStore;
use crate::validation::{default_project_name, sanitize_input, validate_project_name};
use crate::{logi, logok, logw};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;

const EXPORT_TOPIC_CHARS: usize = 30;

/// A user-written script to split into scenes instead of generating one.
#[derive(Debug, Clone)]
pub struct ScriptInput {
    pub text: String,
    pub scene_count: usize,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub topic: String,
    pub mode: ContentMode,
    pub project_name: Option<String>,
    pub script: Option<ScriptInput>,
    pub images: usize,
    pub audio: bool,
    pub voice_id: Option<String>,
    pub export_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationSummary {
    pub project_id: Option<String>,
    pub scenes: usize,
    pub images: PassReport,
    pub audio: Option<PassReport>,
    pub archive: Option<PathBuf>,
}

pub struct Providers {
    pub script: Arc<dyn ScriptProvider>,
    pub image: Arc<dyn ImageProvider>,
    pub speech: Arc<dyn SpeechProvider>,
}

impl Providers {
    pub fn from_config(cfg: &Config, client: &reqwest::Client) -> Self {
        let script: Arc<dyn ScriptProvider> = match cfg.script_backend {
            ScriptBackend::Openai => Arc::new(OpenAiScript::new(client.clone(), &cfg.openai_model)),
            ScriptBackend::Gemini => Arc::new(GeminiScript::new(client.clone(), &cfg.gemini_model)),
            ScriptBackend::Anthropic => {
                Arc::new(AnthropicScript::new(client.clone(), &cfg.anthropic_model))
            }
        };
        let speech: Arc<dyn SpeechProvider> = match cfg.speech_backend {
            SpeechBackend::Elevenlabs => {
                Arc::new(ElevenLabsSpeech::new(client.clone(), &cfg.eleven_model_id))
            }
            SpeechBackend::Ai33 => Arc::new(Ai33Speech::new(client.clone())),
        };
        Self {
            script,
            image: Arc::new(ReveImage::new(client.clone())),
            speech,
        }
    }
}

pub fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .cookie_store(true)
        .gzip(true)
        .build()
        .context("Failed to build HTTP client")
}

async fn ensure_dir(path: &Path) -> Result<()> {
    if fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Ok(());
    }
    fs::create_dir_all(path)
        .await
        .with_context(|| format!("create dir: {}", path.display()))
}

fn archive_name(topic: &str) -> String {
    let safe: String = archive::slug(topic).chars().take(EXPORT_TOPIC_CHARS).collect();
    format!("newsreel_{}_{}.zip", safe, chrono::Utc::now().timestamp_millis())
}

/// Cancels the pass on Ctrl-C; the current scene still finishes.
fn cancel_on_ctrl_c(cancel: &CancelFlag) -> tokio::task::JoinHandle<()> {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            logw("Interrupted; stopping after the current scene.");
            cancel.cancel();
        }
    })
}

pub async fn run_generation(
    cfg: &Config,
    request: GenerationRequest,
    credentials: &CredentialSet,
    notifier: Arc<dyn Notifier>,
) -> Result<GenerationSummary> {
    let client = build_client()?;
    let providers = Providers::from_config(cfg, &client);
    let cancel = CancelFlag::new();
    let watcher = cancel_on_ctrl_c(&cancel);
    let result = run_pipeline(cfg, request, providers, &client, credentials, notifier, &cancel).await;
    watcher.abort();
    result
}

/// Script, images, audio, save, export. Provider failures are reported through
/// `notifier`; only an empty script or local IO problems end the run early.
pub async fn run_pipeline(
    cfg: &Config,
    request: GenerationRequest,
    providers: Providers,
    client: &reqwest::Client,
    credentials: &CredentialSet,
    notifier: Arc<dyn Notifier>,
    cancel: &CancelFlag,
) -> Result<GenerationSummary> {
    let topic = sanitize_input(&request.topic);
    let name = request
        .project_name
        .clone()
        .unwrap_or_else(|| default_project_name(&topic));
    validate_project_name(&name).with_context(|| format!("invalid project name {name:?}"))?;

    ensure_dir(&cfg.storage_dir).await?;
    let local = LocalStore::new(&cfg.storage_dir);
    let projects = Arc::new(Mutex::new(ProjectStore::new(local)));
    let store = SceneStore::new(SceneCollection::new(request.mode, cfg.aspect_ratio));
    let saver = cfg.autosave.then(|| {
        AutoSaver::spawn(
            store.clone(),
            Arc::clone(&projects),
            Some(name.clone()),
            topic.clone(),
            Duration::from_millis(cfg.autosave_debounce_ms),
        )
    });

    let orchestrator = Orchestrator::new(
        store.clone(),
        providers.image,
        providers.speech,
        notifier,
    );

    logi(format!("=== {} storyboard: {} ===", request.mode, topic));
    let outcome = match &request.script {
        Some(script) => {
            orchestrator
                .parse_script(providers.script.as_ref(), &script.text, script.scene_count, credentials)
                .await?
        }
        None => {
            orchestrator
                .generate_script(providers.script.as_ref(), &topic, credentials, cfg.max_chars)
                .await?
        }
    };
    let scenes = store.read(|c| c.active().len()).await;
    if outcome != StepOutcome::Generated || scenes == 0 {
        if let Some(saver) = saver {
            saver.shutdown().await;
        }
        bail!("script generation produced no scenes");
    }
    logok(format!("Script ready: {scenes} scenes"));

    let mut summary = GenerationSummary {
        scenes,
        ..Default::default()
    };

    if let Some(voice) = &request.voice_id {
        for index in 0..scenes {
            store
                .apply(SceneEdit::SelectVoice {
                    index,
                    voice_id: Some(voice.clone()),
                })
                .await?;
        }
    }

    summary.images = orchestrator
        .generate_images_for_range(request.images, credentials, cancel)
        .await?;
    logi(format!(
        "Images: {} generated, {} failed, {} skipped",
        summary.images.generated, summary.images.failed, summary.images.skipped
    ));

    if request.audio && !cancel.is_cancelled() {
        if request.voice_id.is_none() {
            logw("Audio requested without --voice; no scene has a voice to narrate with.");
        }
        let report = orchestrator
            .generate_audio_for_range(credentials, cancel)
            .await?;
        logi(format!(
            "Audio: {} generated, {} failed",
            report.generated, report.failed
        ));
        summary.audio = Some(report);
    }

    // The saver's pending flush must land before the final snapshot.
    if let Some(saver) = saver {
        saver.shutdown().await;
    }
    let snapshot = store.snapshot().await;
    summary.project_id = projects
        .lock()
        .await
        .save(ProjectDraft::from_collection(&name, &topic, &snapshot))
        .await;
    match &summary.project_id {
        Some(id) => logok(format!("Project saved as {id}")),
        None => logw("Project could not be saved (see log)."),
    }

    if let Some(dir) = &request.export_dir {
        let options = ExportOptions {
            include_audio: request.audio,
            include_metadata: true,
            project_name: name.clone(),
            topic: topic.clone(),
            content_mode: snapshot.active_mode(),
        };
        let path = dir.join(archive_name(&topic));
        match archive::export_archive(client, snapshot.active(), &options, &path).await {
            Ok(export) => {
                logok(format!(
                    "Archive: {} ({} images, {} audio)",
                    export.path.display(),
                    export.images,
                    export.audio
                ));
                summary.archive = Some(export.path);
            }
            Err(e) => logw(format!("Export skipped: {e:#}")),
        }
    }

    Ok(summary)
}

/// Voices offered by the configured speech backend.
pub async fn list_voices(cfg: &Config, credentials: &CredentialSet) -> Result<Vec<Voice>> {
    let client = build_client()?;
    let speech = Providers::from_config(cfg, &client).speech;
    speech
        .list_voices(credentials)
        .await
        .with_context(|| format!("list {} voices", speech.provider()))
}

/// Rewrites the image prompt of scene `index` in a saved project and saves
/// the project again. Returns the new prompt.
pub async fn refine_saved_prompt(
    cfg: &Config,
    project_id: &str,
    index: usize,
    credentials: &CredentialSet,
    notifier: Arc<dyn Notifier>,
) -> Result<String> {
    let client = build_client()?;
    let providers = Providers::from_config(cfg, &client);
    let mut projects = ProjectStore::new(LocalStore::new(&cfg.storage_dir));
    let record = projects
        .load(project_id)
        .await
        .with_context(|| format!("no saved project with id {project_id}"))?;
    refine_prompt_in(
        &mut projects,
        record,
        cfg.aspect_ratio,
        providers,
        index,
        credentials,
        notifier,
    )
    .await
}

async fn refine_prompt_in(
    projects: &mut ProjectStore,
    record: ProjectRecord,
    aspect_ratio: AspectRatio,
    providers: Providers,
    index: usize,
    credentials: &CredentialSet,
    notifier: Arc<dyn Notifier>,
) -> Result<String> {
    let store = SceneStore::new(SceneCollection::new(record.content_mode, aspect_ratio));
    store
        .apply(SceneEdit::LoadProject {
            mode: record.content_mode,
            scenes: record.scenes,
        })
        .await?;

    let orchestrator = Orchestrator::new(store.clone(), providers.image, providers.speech, notifier);
    match orchestrator
        .regenerate_image_prompt(providers.script.as_ref(), index, credentials)
        .await?
    {
        StepOutcome::Generated => {}
        StepOutcome::Failed(e) | StepOutcome::Aborted(e) => bail!("prompt rewrite failed: {e}"),
        StepOutcome::Skipped => bail!("prompt rewrite skipped"),
    }

    let snapshot = store.snapshot().await;
    let prompt = snapshot
        .scene(index)
        .map(|s| s.image_prompt.clone())
        .unwrap_or_default();
    projects
        .save(ProjectDraft::from_collection(&record.name, &record.topic, &snapshot))
        .await
        .context("project could not be saved")?;
    logok(format!("Scene {} prompt updated", index + 1));
    Ok(prompt)
}
