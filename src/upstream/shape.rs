use once_cell::sync::Lazy;

use crate::error::RelayError;
use crate::models::chat::{
    ChatRequest,
    GenerateContentRequest,
    Part,
    Role,
    SafetySetting,
    UpstreamContent,
};

/// The fixed safety filter attached to every upstream call. Not
/// user-configurable.
pub static SAFETY_SETTINGS: Lazy<Vec<SafetySetting>> = Lazy::new(|| {
    [
        "HARM_CATEGORY_DANGEROUS_CONTENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    ]
        .iter()
        .map(|category| SafetySetting {
            category: category.to_string(),
            threshold: "BLOCK_MEDIUM_AND_ABOVE".to_string(),
        })
        .collect()
});

/// Whether the relay forwards the whole transcript upstream or only the
/// latest user message. Latest-only loses in-session context; the choice is
/// a deliberate configuration flag, not an accident.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryMode {
    LatestOnly,
    FullHistory,
}

/// Pure transformation of a client request into the upstream payload.
pub fn shape(request: &ChatRequest, mode: HistoryMode) -> Result<GenerateContentRequest, RelayError> {
    let last = request.contents.last().ok_or_else(|| {
        RelayError::Validation("contents must not be empty".to_string())
    })?;

    if last.role != Role::User {
        return Err(RelayError::Validation("final turn must come from the user".to_string()));
    }

    let latest_text = last
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            RelayError::Validation("final turn must include a non-empty text part".to_string())
        })?;

    let contents = match mode {
        HistoryMode::LatestOnly =>
            vec![UpstreamContent {
                role: None,
                parts: vec![Part::Text { text: latest_text.to_string() }],
            }],
        HistoryMode::FullHistory => request.contents
            .iter()
            .map(|turn| UpstreamContent {
                role: Some(turn.role),
                parts: turn.parts.clone(),
            })
            .collect(),
    };

    Ok(GenerateContentRequest {
        contents,
        safety_settings: SAFETY_SETTINGS.clone(),
    })
}
