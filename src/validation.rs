use crate::credentials::Provider;
use thiserror::Error;

pub const MAX_PROJECT_NAME_CHARS: usize = 50;
pub const MAX_INPUT_CHARS: usize = 500;
pub const UNTITLED_PROJECT: &str = "Untitled project";

const FORBIDDEN_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("project name cannot be empty")]
    Empty,
    #[error("project name is too long (max {MAX_PROJECT_NAME_CHARS} characters)")]
    TooLong,
    #[error("project name contains a forbidden character: {0:?}")]
    Forbidden(char),
}

/// Project names end up in file names, so path and shell metacharacters are refused.
pub fn validate_project_name(name: &str) -> Result<(), NameError> {
    if name.trim().is_empty() {
        return Err(NameError::Empty);
    }
    if name.chars().count() > MAX_PROJECT_NAME_CHARS {
        return Err(NameError::TooLong);
    }
    match name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
        Some(c) => Err(NameError::Forbidden(c)),
        None => Ok(()),
    }
}

/// Name used when the user gives none: the topic with forbidden characters
/// dropped, capped to the name limit.
pub fn default_project_name(topic: &str) -> String {
    let name: String = topic
        .trim()
        .chars()
        .filter(|c| !FORBIDDEN_NAME_CHARS.contains(c))
        .take(MAX_PROJECT_NAME_CHARS)
        .collect();
    let name = name.trim();
    if name.is_empty() {
        UNTITLED_PROJECT.to_string()
    } else {
        name.to_string()
    }
}

/// Trims, strips angle brackets and caps free-text input such as topics.
pub fn sanitize_input(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| *c != '<' && *c != '>')
        .take(MAX_INPUT_CHARS)
        .collect()
}

/// Cheap shape check for a pasted key. Only used to warn, never to reject.
pub fn looks_like_api_key(provider: Provider, key: &str) -> bool {
    let key = key.trim();
    match provider {
        Provider::Gemini => key.starts_with("AI") && key.len() > 20,
        _ => key.len() > 10,
    }
}
