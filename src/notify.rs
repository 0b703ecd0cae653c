use crate::credentials::Provider;
use crate::{logi, logok, logw};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// User-visible events raised by generation and persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Info(String),
    Success(String),
    /// Dismissable, non-blocking failure.
    Error(String),
    /// Ask the user to enter or fix a credential.
    CredentialPrompt(Provider),
    LoadingStarted { kind: MediaKind, index: usize },
    LoadingFinished { kind: MediaKind, index: usize, ok: bool },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: Notification);
}

/// Routes notifications into the log stream and the log hook.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: Notification) {
        match event {
            Notification::Info(msg) => logi(msg),
            Notification::Success(msg) => logok(msg),
            Notification::Error(msg) => logw(msg),
            Notification::CredentialPrompt(provider) => logw(format!(
                "{provider} credential missing or rejected; set it with `keys set {provider} <KEY>`"
            )),
            Notification::LoadingStarted { kind, index } => {
                tracing::debug!("{kind} {} loading", index + 1)
            }
            Notification::LoadingFinished { kind, index, ok } => {
                tracing::debug!("{kind} {} finished ok={ok}", index + 1)
            }
        }
    }
}

/// Keeps every event in memory; handy for embedding and tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn credential_prompts(&self) -> Vec<Provider> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Notification::CredentialPrompt(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Notification::Error(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: Notification) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
