use futures_util::{stream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::lines::{decode_lines, LineOutcome};
use super::{status_error, CompletionClient, CompletionRequest, FragmentStream};
use crate::error::StreamError;
use crate::state::{Message, Role};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct ClaudeMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ClaudeMessage<'a>>,
    temperature: f32,
    top_p: f32,
    stream: bool,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeEvent {
    ContentBlockDelta { delta: ClaudeDelta },
    MessageStop,
    Error { error: ClaudeError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ClaudeDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ClaudeError {
    message: String,
}

#[derive(Clone)]
pub struct ClaudeClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ClaudeClient {
    pub const BASE_URL: &'static str = "https://api.anthropic.com";

    pub fn new(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn open(&self, request: CompletionRequest) -> Result<FragmentStream, StreamError> {
        // The messages API takes system text as a top-level field
        let (system, turns): (Vec<&Message>, Vec<&Message>) = request
            .messages
            .iter()
            .partition(|m| m.role == Role::System);

        let system = (!system.is_empty()).then(|| {
            system
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        });

        let body = ClaudeRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            system,
            messages: turns
                .into_iter()
                .map(|m| ClaudeMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: request.temperature,
            top_p: request.top_p,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        Ok(decode_lines(response.bytes_stream(), parse_event_line))
    }

    pub fn list_models() -> Vec<String> {
        vec![
            "claude-sonnet-4-20250514".to_string(),
            "claude-3-5-sonnet-20241022".to_string(),
            "claude-3-5-haiku-20241022".to_string(),
            "claude-3-opus-20240229".to_string(),
        ]
    }
}

impl CompletionClient for ClaudeClient {
    fn stream_completion(&self, request: CompletionRequest) -> FragmentStream {
        let this = self.clone();
        stream::once(async move { this.open(request).await })
            .try_flatten()
            .boxed()
    }
}

/// The `event:` lines are redundant with the `type` field of each `data:` payload
fn parse_event_line(line: &str) -> Result<LineOutcome, StreamError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(LineOutcome::Skip);
    };

    let event: ClaudeEvent = serde_json::from_str(data.trim())
        .map_err(|e| StreamError::Malformed(format!("bad message event: {}", e)))?;

    match event {
        ClaudeEvent::ContentBlockDelta { delta } => {
            Ok(LineOutcome::Fragment(delta.text.unwrap_or_default()))
        }
        ClaudeEvent::MessageStop => Ok(LineOutcome::Done),
        ClaudeEvent::Error { error } => Err(StreamError::Api(error.message)),
        ClaudeEvent::Other => Ok(LineOutcome::Skip),
    }
}
