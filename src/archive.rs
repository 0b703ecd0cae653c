//! Zip export of a storyboard: images, narration audio and a metadata folder.

use crate::scene::{ContentMode, Scene};
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde_json::{json, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const SLUG_MAX_CHARS: usize = 50;
const METADATA_DIR: &str = "00_metadata";
const IMAGES_DIR: &str = "01_images";
const AUDIO_DIR: &str = "02_audio";

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub include_audio: bool,
    pub include_metadata: bool,
    pub project_name: String,
    pub topic: String,
    pub content_mode: ContentMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub images: usize,
    pub audio: usize,
    pub skipped: usize,
}

/// Headline reduced to ASCII alphanumerics and underscores.
pub fn slug(headline: &str) -> String {
    headline
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(SLUG_MAX_CHARS)
        .collect()
}

pub fn image_file_name(index: usize, headline: &str) -> String {
    format!("scene_{:02}_{}.png", index + 1, slug(headline))
}

pub fn audio_file_name(index: usize, headline: &str) -> String {
    format!("narration_{:02}_{}.mp3", index + 1, slug(headline))
}

/// Payload of a base64 `data:` URI.
pub fn decode_data_uri(uri: &str) -> Option<Vec<u8>> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    if !header.ends_with(";base64") {
        return None;
    }
    BASE64.decode(payload.trim()).ok()
}

async fn load_audio(client: &Client, uri: &str) -> Result<Vec<u8>> {
    if uri.starts_with("data:") {
        return decode_data_uri(uri).context("malformed audio data URI");
    }
    if uri.starts_with("http://") || uri.starts_with("https://") {
        let resp = client
            .get(uri)
            .send()
            .await
            .with_context(|| format!("fetch audio {uri}"))?
            .error_for_status()
            .with_context(|| format!("fetch audio {uri}"))?;
        return Ok(resp.bytes().await?.to_vec());
    }
    let path = uri.strip_prefix("file://").unwrap_or(uri);
    tokio::fs::read(path)
        .await
        .with_context(|| format!("read audio file {path}"))
}

fn metadata_json(scenes: &[Scene], options: &ExportOptions, exported_at: &str) -> Value {
    let entries: Vec<Value> = scenes
        .iter()
        .enumerate()
        .map(|(i, s)| {
            json!({
                "number": i + 1,
                "headline": s.headline,
                "narration": s.narration_text,
                "image_prompt": s.image_prompt,
                "category": s.category,
                "impact_level": s.impact_level,
                "hashtag": s.hashtag,
                "has_image": s.generated_image.is_some(),
                "has_audio": s.generated_audio.is_some(),
                "voice_id": s.selected_voice_id(),
                "aspect_ratio": s.generated_image.as_ref().map(|img| img.aspect_ratio),
            })
        })
        .collect();

    json!({
        "project": options.project_name,
        "topic": options.topic,
        "mode": options.content_mode,
        "exported_at": exported_at,
        "total_scenes": scenes.len(),
        "scenes_with_image": scenes.iter().filter(|s| s.generated_image.is_some()).count(),
        "scenes_with_audio": scenes.iter().filter(|s| s.generated_audio.is_some()).count(),
        "scenes": entries,
    })
}

fn readme(scenes: &[Scene], options: &ExportOptions, images: usize, audio: usize, date: &str) -> String {
    let style = match options.content_mode {
        ContentMode::Real => "Documentary",
        ContentMode::Fake => "Conspiracy / viral",
    };
    let mut out = format!(
        "# {}\n\n## Project\n- **Topic:** {}\n- **Style:** {}\n- **Exported:** {}\n- **Scenes:** {}\n\n\
         ## Layout\n- `{METADATA_DIR}/` project metadata as JSON\n- `{IMAGES_DIR}/` generated images ({} files)\n\
         - `{AUDIO_DIR}/` narration ({} files)\n\n## Scenes\n\n",
        options.project_name,
        options.topic,
        style,
        date,
        scenes.len(),
        images,
        audio,
    );
    for (i, s) in scenes.iter().enumerate() {
        out.push_str(&format!(
            "### Scene {}: {}\n**Narration:** {}\n**Category:** {}\n**Impact:** {:?}\n**Hashtag:** {}\n\n",
            i + 1,
            s.headline,
            s.narration_text,
            s.category,
            s.impact_level,
            s.hashtag,
        ));
    }
    out
}

/// Writes the archive to `out_path`. Entries that cannot be decoded or
/// fetched are skipped with a warning.
pub async fn export_archive(
    client: &Client,
    scenes: &[Scene],
    options: &ExportOptions,
    out_path: &Path,
) -> Result<ExportSummary> {
    let only_images = !options.include_audio && !options.include_metadata;
    let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
    let mut skipped = 0;

    let mut images = 0;
    for (i, scene) in scenes.iter().enumerate() {
        let Some(img) = &scene.generated_image else {
            continue;
        };
        let Some(bytes) = decode_data_uri(&img.data_uri) else {
            warn!("scene {} image is not a base64 data URI; skipped", i + 1);
            skipped += 1;
            continue;
        };
        let name = image_file_name(i, &scene.headline);
        let name = if only_images {
            name
        } else {
            format!("{IMAGES_DIR}/{name}")
        };
        entries.push((name, bytes));
        images += 1;
    }

    let mut audio = 0;
    if options.include_audio {
        for (i, scene) in scenes.iter().enumerate() {
            let Some(uri) = &scene.generated_audio else {
                continue;
            };
            match load_audio(client, uri).await {
                Ok(bytes) => {
                    entries.push((format!("{AUDIO_DIR}/{}", audio_file_name(i, &scene.headline)), bytes));
                    audio += 1;
                }
                Err(e) => {
                    warn!("scene {} audio skipped: {e:#}", i + 1);
                    skipped += 1;
                }
            }
        }
    }

    if options.include_metadata {
        let now = chrono::Utc::now();
        let meta = metadata_json(scenes, options, &now.to_rfc3339());
        entries.push((
            format!("{METADATA_DIR}/proyecto.json"),
            serde_json::to_vec_pretty(&meta)?,
        ));
        let text = readme(scenes, options, images, audio, &now.format("%Y-%m-%d").to_string());
        entries.push((format!("{METADATA_DIR}/README.md"), text.into_bytes()));
    }

    if entries.is_empty() {
        bail!("nothing to export: no generated images");
    }

    let path = out_path.to_path_buf();
    let count = entries.len();
    tokio::task::spawn_blocking(move || -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir: {}", parent.display()))?;
        }
        let file = std::fs::File::create(&path)
            .with_context(|| format!("create zip: {}", path.display()))?;
        let mut zip = ZipWriter::new(file);
        let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, bytes) in entries {
            debug!("zip entry {name} ({} bytes)", bytes.len());
            zip.start_file(name, opts).context("start zip entry")?;
            zip.write_all(&bytes).context("write zip entry")?;
        }
        zip.finish().context("finish zip")?;
        Ok(())
    })
    .await??;

    info!("archive written: {} ({count} entries)", out_path.display());
    Ok(ExportSummary {
        path: out_path.to_path_buf(),
        images,
        audio,
        skipped,
    })
}
