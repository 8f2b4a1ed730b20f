//! Extract class meetings from a photo or screenshot of a schedule using an
//! OpenAI-compatible vision model.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::AiConfig;
use crate::error::{AppError, AppResult};
use crate::services::http::{send_with_backoff, truncate, RetryPolicy};

/// Decoded images above this size are refused.
pub const MAX_IMAGE_BYTES: usize = 8 * 1024 * 1024;

const SYSTEM_PROMPT: &str = "You read class schedules from images. Answer with a JSON array only. \
Each element is an object with keys: title (course name), day (full English weekday), \
start (24h HH:MM), end (24h HH:MM), location (string or null). \
Emit one element per weekly meeting. If nothing is readable, answer [].";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedEvent {
    pub title: String,
    pub day: String,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Split an optional `data:<mime>;base64,` prefix off and check the payload.
fn image_payload<'a>(image: &'a str, mime_type: &str) -> AppResult<(String, &'a str)> {
    let (mime, data) = match image.strip_prefix("data:") {
        Some(rest) => {
            let (header, data) = rest
                .split_once(',')
                .ok_or_else(|| AppError::Validation("Malformed data URL".to_string()))?;
            let mime = header.trim_end_matches(";base64").to_string();
            (mime, data)
        }
        None => (mime_type.trim().to_string(), image.trim()),
    };

    if !mime.starts_with("image/") {
        return Err(AppError::Validation(format!(
            "Unsupported image type: {}",
            mime
        )));
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|_| AppError::Validation("Image is not valid base64".to_string()))?;
    if decoded.is_empty() {
        return Err(AppError::Validation("Image is empty".to_string()));
    }
    if decoded.len() > MAX_IMAGE_BYTES {
        return Err(AppError::Validation("Image is too large".to_string()));
    }

    Ok((mime, data))
}

/// Pull the JSON array out of a model reply that may be wrapped in prose or
/// a fenced code block.
pub fn parse_model_reply(content: &str) -> AppResult<Vec<ScannedEvent>> {
    let start = content.find('[');
    let end = content.rfind(']');
    let slice = match (start, end) {
        (Some(s), Some(e)) if s < e => &content[s..=e],
        _ => {
            return Err(AppError::Upstream(format!(
                "Model reply has no JSON array: {}",
                truncate(content, 200)
            )))
        }
    };

    let events: Vec<ScannedEvent> = serde_json::from_str(slice)
        .map_err(|e| AppError::Upstream(format!("Model reply is not a schedule: {}", e)))?;

    Ok(events
        .into_iter()
        .filter(|e| !e.title.trim().is_empty())
        .map(|mut e| {
            e.title = e.title.trim().to_string();
            e.location = e.location.filter(|l| !l.trim().is_empty());
            e
        })
        .collect())
}

pub struct ScheduleScanner<'a> {
    http: &'a reqwest::Client,
    config: &'a AiConfig,
}

impl<'a> ScheduleScanner<'a> {
    pub fn new(http: &'a reqwest::Client, config: &'a AiConfig) -> Self {
        Self { http, config }
    }

    pub async fn scan(&self, image: &str, mime_type: &str) -> AppResult<Vec<ScannedEvent>> {
        let api_key = self.config.api_key.as_deref().ok_or_else(|| {
            AppError::ServiceUnavailable("Schedule scanning is not configured".to_string())
        })?;
        let (mime, data) = image_payload(image, mime_type)?;
        let data_url = format!("data:{};base64,{}", mime, data);

        let body = json!({
            "model": self.config.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": "Extract every class meeting from this schedule." },
                        { "type": "image_url", "image_url": { "url": data_url } }
                    ]
                }
            ]
        });

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let resp = send_with_backoff(RetryPolicy::default(), "vision model", || {
            self.http.post(&url).bearer_auth(api_key).json(&body)
        })
        .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "Vision model answered {}: {}",
                status,
                truncate(&text, 200)
            )));
        }

        let reply: ChatResponse = resp.json().await?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let events = parse_model_reply(&content)?;
        tracing::info!("Schedule scan found {} meeting(s)", events.len());
        Ok(events)
    }
}
