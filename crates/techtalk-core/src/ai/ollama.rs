use anyhow::anyhow;
use futures_util::{stream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::lines::{decode_lines, LineOutcome};
use super::{status_error, CompletionClient, CompletionRequest, FragmentStream};
use crate::error::StreamError;
use crate::state::Message;

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaChatChunk {
    #[serde(default)]
    message: Option<OllamaChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn open(&self, request: CompletionRequest) -> Result<FragmentStream, StreamError> {
        let url = format!("{}/api/chat", self.base_url);

        let body = OllamaChatRequest {
            model: &request.model,
            messages: &request.messages,
            stream: true,
            options: OllamaOptions {
                temperature: request.temperature,
                top_p: request.top_p,
                num_predict: request.max_tokens,
            },
        };

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        Ok(decode_lines(response.bytes_stream(), parse_chunk_line))
    }

    pub async fn list_models(&self) -> anyhow::Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Failed to list models: {}. Make sure Ollama is running with: ollama serve",
                response.status()
            ));
        }

        let models_response: OllamaModelsResponse = response.json().await?;
        let model_names: Vec<String> = models_response
            .models
            .into_iter()
            .map(|model| model.name)
            .collect();

        Ok(model_names)
    }

    pub async fn has_model(&self, name: &str) -> anyhow::Result<bool> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| m == name))
    }
}

impl CompletionClient for OllamaClient {
    fn stream_completion(&self, request: CompletionRequest) -> FragmentStream {
        let this = self.clone();
        stream::once(async move { this.open(request).await })
            .try_flatten()
            .boxed()
    }
}

/// One line of Ollama's newline-delimited JSON stream
fn parse_chunk_line(line: &str) -> Result<LineOutcome, StreamError> {
    if line.trim().is_empty() {
        return Ok(LineOutcome::Skip);
    }

    let chunk: OllamaChatChunk = serde_json::from_str(line)
        .map_err(|e| StreamError::Malformed(format!("bad chat chunk: {}", e)))?;

    if let Some(error) = chunk.error {
        return Err(StreamError::Api(error));
    }
    if chunk.done {
        return Ok(LineOutcome::Done);
    }

    Ok(LineOutcome::Fragment(
        chunk.message.map(|m| m.content).unwrap_or_default(),
    ))
}
