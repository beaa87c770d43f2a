use futures_util::{stream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::lines::{decode_lines, LineOutcome};
use super::{status_error, CompletionClient, CompletionRequest, FragmentStream};
use crate::error::StreamError;
use crate::state::Message;

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAIChunk {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    error: Option<OpenAIError>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    #[serde(default)]
    delta: OpenAIDelta,
}

#[derive(Deserialize, Default)]
struct OpenAIDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIError {
    message: String,
}

/// Client for OpenAI-compatible chat completion endpoints (OpenAI, Groq)
#[derive(Clone)]
pub struct OpenAIClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAIClient {
    pub const OPENAI_BASE_URL: &'static str = "https://api.openai.com/v1";
    pub const GROQ_BASE_URL: &'static str = "https://api.groq.com/openai/v1";

    pub fn new(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn open(&self, request: CompletionRequest) -> Result<FragmentStream, StreamError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = OpenAIRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
            stream: true,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        Ok(decode_lines(response.bytes_stream(), parse_event_line))
    }

    pub fn openai_models() -> Vec<String> {
        vec![
            "gpt-4o".to_string(),
            "gpt-4o-mini".to_string(),
            "gpt-4-turbo".to_string(),
            "gpt-3.5-turbo".to_string(),
        ]
    }

    pub fn groq_models() -> Vec<String> {
        vec![
            "llama-3.3-70b-versatile".to_string(),
            "llama-3.1-8b-instant".to_string(),
            "gemma2-9b-it".to_string(),
            "mixtral-8x7b-32768".to_string(),
        ]
    }
}

impl CompletionClient for OpenAIClient {
    fn stream_completion(&self, request: CompletionRequest) -> FragmentStream {
        let this = self.clone();
        stream::once(async move { this.open(request).await })
            .try_flatten()
            .boxed()
    }
}

/// One server-sent event line. Only `data:` lines carry anything.
fn parse_event_line(line: &str) -> Result<LineOutcome, StreamError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(LineOutcome::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(LineOutcome::Done);
    }

    let chunk: OpenAIChunk = serde_json::from_str(data)
        .map_err(|e| StreamError::Malformed(format!("bad completion chunk: {}", e)))?;

    if let Some(error) = chunk.error {
        return Err(StreamError::Api(error.message));
    }

    Ok(LineOutcome::Fragment(
        chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .unwrap_or_default(),
    ))
}
