pub mod aggregator;
pub mod ai;
pub mod cache;
pub mod config;
pub mod detector;
pub mod error;
pub mod language;
pub mod markdown;
pub mod prompts;
pub mod provider;
pub mod session;
pub mod state;
pub mod store;
pub mod stream;

// Re-export main types for convenience
pub use ai::{ClaudeClient, CompletionClient, CompletionRequest, FragmentStream, OllamaClient, OpenAIClient};
pub use config::Config;
pub use error::{Rejected, StoreError, StreamError};
pub use provider::Provider;
pub use session::{ChatSession, SessionOptions, TurnEvent, Update};
pub use state::{Chat, ChatId, CodeBlock, Group, GroupId, Message, Role, TurnId};
pub use store::Store;
pub use stream::{StreamEvent, TurnStream};
