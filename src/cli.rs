use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use newsreel::config::Config;
use newsreel::credentials::{redact, CredentialStore, Provider};
use newsreel::generator::{
    list_voices, refine_saved_prompt, run_generation, GenerationRequest, ScriptInput,
};
use newsreel::notify::LogNotifier;
use newsreel::projects::ProjectStore;
use newsreel::scene::{AspectRatio, ContentMode};
use newsreel::storage::{load_theme, save_theme, LocalStore};
use newsreel::validation::looks_like_api_key;
use newsreel::{set_log_hook, GeneratorLogHook};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "newsreel-cli")]
#[command(about = "Generate news-style video storyboards: script, images, narration, zip")]
struct Cli {
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    /// Also append every pipeline log line to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the full pipeline for a topic.
    Generate {
        #[arg(long)]
        topic: String,
        #[arg(long, default_value = "FAKE")]
        mode: ContentMode,
        #[arg(long)]
        name: Option<String>,
        /// Split this script file into scenes instead of writing a new one.
        #[arg(long)]
        script: Option<PathBuf>,
        #[arg(long, default_value_t = 10)]
        scenes: usize,
        /// Scenes to illustrate (defaults to `bulk_images` from config).
        #[arg(long)]
        images: Option<usize>,
        #[arg(long)]
        aspect: Option<AspectRatio>,
        #[arg(long)]
        audio: bool,
        #[arg(long)]
        voice: Option<String>,
        #[arg(long)]
        export: Option<PathBuf>,
    },
    Projects {
        #[command(subcommand)]
        action: ProjectAction,
    },
    Keys {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// List the narration voices of the configured speech backend.
    Voices,
    Theme {
        #[command(subcommand)]
        action: ThemeAction,
    },
}

#[derive(Debug, Subcommand)]
enum ProjectAction {
    List,
    Delete { id: String },
    Export { id: String, dir: PathBuf },
    Import { path: PathBuf },
    /// Rewrite one scene's image prompt with the script backend (scenes count from 1).
    RefinePrompt { id: String, scene: usize },
}

#[derive(Debug, Subcommand)]
enum KeyAction {
    Set { provider: Provider, value: String },
    Clear { provider: Provider },
    Show,
}

#[derive(Debug, Subcommand)]
enum ThemeAction {
    Get,
    Set { name: String },
}

fn install_file_log(path: &PathBuf) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file: {}", path.display()))?;
    let file = Mutex::new(file);
    let hook: GeneratorLogHook = Arc::new(Mutex::new(move |line: &str| {
        let mut f = file.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(f, "{line}");
    }));
    set_log_hook(Some(hook));
    Ok(())
}

fn format_millis(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

async fn projects_command(cfg: &Config, store: LocalStore, action: ProjectAction) -> Result<()> {
    let mut projects = ProjectStore::new(store.clone());
    match action {
        ProjectAction::List => {
            let list = projects.list().await;
            if list.is_empty() {
                println!("No saved projects.");
            }
            for r in list {
                println!(
                    "{}  {}  {:<4}  {:>2} scenes  {}",
                    r.id,
                    format_millis(r.created_at),
                    r.content_mode,
                    r.scenes.len(),
                    r.name
                );
            }
        }
        ProjectAction::Delete { id } => {
            projects.delete(&id).await;
            println!("Deleted {id} (if it existed).");
        }
        ProjectAction::Export { id, dir } => {
            let record = projects
                .load(&id)
                .await
                .with_context(|| format!("no saved project with id {id}"))?;
            let path = projects.export(&record, &dir).await?;
            println!("{}", path.display());
        }
        ProjectAction::Import { path } => {
            let record = projects
                .import(&path)
                .await
                .with_context(|| format!("import {}", path.display()))?;
            println!("Imported {:?} as {}", record.name, record.id);
        }
        ProjectAction::RefinePrompt { id, scene } => {
            if scene == 0 {
                anyhow::bail!("scenes are numbered from 1");
            }
            let creds = CredentialStore::load(store).await;
            let prompt =
                refine_saved_prompt(cfg, &id, scene - 1, creds.credentials(), Arc::new(LogNotifier))
                    .await?;
            println!("{prompt}");
        }
    }
    Ok(())
}

async fn voices_command(cfg: &Config, store: LocalStore) -> Result<()> {
    let creds = CredentialStore::load(store).await;
    let voices = list_voices(cfg, creds.credentials()).await?;
    if voices.is_empty() {
        println!("No voices available.");
    }
    for voice in voices {
        let tags = voice.tag_list.join(", ");
        println!("{:<28} {:<24} {}", voice.voice_id, voice.voice_name, tags);
    }
    Ok(())
}

async fn keys_command(store: LocalStore, action: KeyAction) -> Result<()> {
    let mut creds = CredentialStore::load(store).await;
    match action {
        KeyAction::Set { provider, value } => {
            if !looks_like_api_key(provider, &value) {
                eprintln!("[WARN] that does not look like a {provider} key; storing it anyway");
            }
            creds.set(provider, &value).await;
            println!("{provider} key stored.");
        }
        KeyAction::Clear { provider } => {
            creds.clear(provider).await;
            println!("{provider} key cleared.");
        }
        KeyAction::Show => {
            for provider in Provider::ALL {
                let shown = creds
                    .credentials()
                    .get(provider)
                    .map(redact)
                    .unwrap_or_else(|| "(not set)".to_string());
                println!("{:<11} {}", provider.key_name(), shown);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Some(path) = &cli.log_file {
        install_file_log(path)?;
    }

    let mut cfg = Config::load_or_default(&cli.config).await?;
    let store = LocalStore::new(&cfg.storage_dir);

    match cli.command {
        Commands::Generate {
            topic,
            mode,
            name,
            script,
            scenes,
            images,
            aspect,
            audio,
            voice,
            export,
        } => {
            if let Some(aspect) = aspect {
                cfg.aspect_ratio = aspect;
            }
            let script = match script {
                Some(path) => Some(ScriptInput {
                    text: tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("read script: {}", path.display()))?,
                    scene_count: scenes,
                }),
                None => None,
            };
            let creds = CredentialStore::load(store).await;
            let request = GenerationRequest {
                topic,
                mode,
                project_name: name,
                script,
                images: images.unwrap_or(cfg.bulk_images),
                audio,
                voice_id: voice,
                export_dir: export,
            };

            let summary =
                run_generation(&cfg, request, creds.credentials(), Arc::new(LogNotifier)).await?;
            println!(
                "scenes: {}  images: {}/{}  audio: {}  project: {}",
                summary.scenes,
                summary.images.generated,
                summary.images.attempted,
                summary
                    .audio
                    .map(|a| a.generated.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                summary.project_id.as_deref().unwrap_or("(not saved)")
            );
            if let Some(path) = summary.archive {
                println!("archive: {}", path.display());
            }
        }
        Commands::Projects { action } => projects_command(&cfg, store, action).await?,
        Commands::Keys { action } => keys_command(store, action).await?,
        Commands::Voices => voices_command(&cfg, store).await?,
        Commands::Theme { action } => match action {
            ThemeAction::Get => {
                println!("{}", load_theme(&store).await.unwrap_or_else(|| "default".to_string()));
            }
            ThemeAction::Set { name } => save_theme(&store, &name).await,
        },
    }

    Ok(())
}
