pub mod claude;
pub(crate) mod lines;
pub mod ollama;
pub mod openai;

pub use claude::ClaudeClient;
pub use ollama::OllamaClient;
pub use openai::OpenAIClient;

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::BoxStream;
use reqwest::{Client, Response};

use crate::config::Config;
use crate::error::StreamError;
use crate::prompts::SYSTEM_PROMPT;
use crate::provider::Provider;
use crate::state::Message;

// Generation parameters are fixed; they are not exposed in the config
pub const TEMPERATURE: f32 = 1.0;
pub const MAX_TOKENS: u32 = 8192;
pub const TOP_P: f32 = 1.0;

/// Text fragments of one completion, in generation order.
///
/// Ends after the last fragment on success, or with a single `Err`.
pub type FragmentStream = BoxStream<'static, Result<String, StreamError>>;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl CompletionRequest {
    /// Build a request for `history` with the system prompt in front
    pub fn new(model: &str, history: &[Message]) -> Self {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(SYSTEM_PROMPT));
        messages.extend_from_slice(history);

        Self {
            model: model.to_string(),
            messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            top_p: TOP_P,
        }
    }
}

/// A remote model that streams its answer back.
///
/// Implementations issue the request lazily, when the returned stream is first
/// polled, and report every failure through the stream itself.
pub trait CompletionClient: Send + Sync {
    fn stream_completion(&self, request: CompletionRequest) -> FragmentStream;
}

pub fn http_client(connect_timeout: Duration) -> Result<Client, StreamError> {
    Ok(Client::builder().connect_timeout(connect_timeout).build()?)
}

/// Client for the provider selected in `config`
pub fn client_for(config: &Config) -> Result<Arc<dyn CompletionClient>, StreamError> {
    let http = http_client(config.connect_timeout())?;
    let provider = config.provider();
    let api_key = || {
        config
            .api_key(provider)
            .ok_or(StreamError::MissingCredential(provider.display_name()))
    };

    let client: Arc<dyn CompletionClient> = match provider {
        Provider::Groq => Arc::new(OpenAIClient::new(http, OpenAIClient::GROQ_BASE_URL, &api_key()?)),
        Provider::OpenAI => Arc::new(OpenAIClient::new(http, OpenAIClient::OPENAI_BASE_URL, &api_key()?)),
        Provider::Claude => Arc::new(ClaudeClient::new(http, ClaudeClient::BASE_URL, &api_key()?)),
        Provider::Ollama => Arc::new(OllamaClient::with_client(http, &config.ollama_url())),
    };

    tracing::debug!(provider = provider.as_str(), "completion client ready");
    Ok(client)
}

/// Turn a non-2xx response into an error carrying the body for diagnostics
pub(crate) async fn status_error(response: Response) -> StreamError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StreamError::Status { status, body }
}
