use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::{theme::ColorfulTheme, Input, Password, Select};
use tracing_subscriber::EnvFilter;

mod chat;

use techtalk_core::ai::{client_for, ClaudeClient, OllamaClient, OpenAIClient};
use techtalk_core::{ChatSession, Config, Provider, SessionOptions, Store};

#[derive(Parser)]
#[command(name = "techtalk")]
#[command(about = "Chat with hosted LLMs from the terminal, with live code block extraction")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat
    Chat {
        /// Folder to chat in (created if missing)
        #[arg(short, long)]
        group: Option<String>,
        /// Chat to resume (created if missing)
        #[arg(short, long)]
        chat: Option<String>,
    },
    /// Ask a single question and print the answer
    Ask {
        /// Your question
        question: String,
    },
    /// List saved folders and chats
    History,
    /// List models for the active provider
    Models {
        /// Make this model the default
        #[arg(long)]
        set: Option<String>,
    },
    /// Choose a provider and store its API key
    Setup,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    init_tracing(&config);

    match cli.command {
        Commands::Chat { group, chat } => {
            chat::run(&config, group.as_deref(), chat.as_deref()).await?
        }
        Commands::Ask { question } => ask(&config, &question).await?,
        Commands::History => show_history(&config)?,
        Commands::Models { set } => list_models(&config, set.as_deref()).await?,
        Commands::Setup => setup(config)?,
    }

    Ok(())
}

/// Logs go to stderr so they never mix with streamed replies
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_env("TECHTALK_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub(crate) fn open_session(config: &Config) -> Result<ChatSession> {
    let client = client_for(config)?;
    let store = Store::open(&config.database_path()?)?;
    Ok(ChatSession::with_store(
        client,
        SessionOptions::from_config(config),
        store,
    )?)
}

async fn ask(config: &Config, question: &str) -> Result<()> {
    // Scratch conversation, nothing is saved
    let mut session = ChatSession::new(client_for(config)?, SessionOptions::from_config(config));
    let group = session.create_group("");
    let chat = session
        .create_chat(group, "")
        .ok_or_else(|| anyhow::anyhow!("could not create a conversation"))?;

    println!(
        "🤖 Asking {} ...\n",
        session.model().bold().magenta()
    );
    session.send_turn(chat, question)?;
    chat::stream_reply(&mut session, chat).await?;

    if let Some(block) = session.get_detected_code_block(chat) {
        chat::show_code_block(&block);
    }

    Ok(())
}

fn show_history(config: &Config) -> Result<()> {
    let store = Store::open(&config.database_path()?)?;
    let groups = store.load_groups()?;

    println!("\n{}", "📚 Saved Conversations".bold().blue());
    println!("{}", "=".repeat(40).dimmed());

    if groups.is_empty() {
        println!("{}", "Nothing saved yet. Start with: techtalk chat".yellow());
        return Ok(());
    }

    for group in groups {
        println!("\n{}", group.name.bold().green());
        if group.chats.is_empty() {
            println!("  {}", "(empty)".dimmed());
        }
        for chat in &group.chats {
            let count = store.load_messages(chat.id)?.len();
            println!(
                "  • {} ({} messages, {})",
                chat.name,
                count.to_string().dimmed(),
                chat.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
            );
        }
    }

    Ok(())
}

async fn list_models(config: &Config, set: Option<&str>) -> Result<()> {
    if let Some(model) = set {
        Config::save_default_model(model)?;
        println!("{} {}", "Default model set to".green(), model.bold());
        return Ok(());
    }

    let provider = config.provider();
    let current = config.model();

    println!(
        "\n{}",
        format!("🤖 {} Models", provider.display_name()).bold().blue()
    );
    println!("{}", "=".repeat(30).dimmed());

    let models = match provider {
        Provider::Groq => OpenAIClient::groq_models(),
        Provider::OpenAI => OpenAIClient::openai_models(),
        Provider::Claude => ClaudeClient::list_models(),
        Provider::Ollama => match OllamaClient::new(&config.ollama_url()).list_models().await {
            Ok(models) => models,
            Err(e) => {
                println!("{}: {}", "Error connecting to Ollama".red(), e);
                println!("Make sure Ollama is running: {}", "ollama serve".bold());
                return Ok(());
            }
        },
    };

    if models.is_empty() {
        println!("{}", "No models found. Pull a model with: ollama pull llama3.2".yellow());
    }
    for model in models {
        if model == current {
            println!("  • {} {}", model.green().bold(), "(default)".dimmed());
        } else {
            println!("  • {}", model.green());
        }
    }

    Ok(())
}

fn setup(mut config: Config) -> Result<()> {
    let providers = Provider::all();
    let names: Vec<&str> = providers.iter().map(|p| p.display_name()).collect();
    let current = providers
        .iter()
        .position(|p| *p == config.provider())
        .unwrap_or(0);

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a provider")
        .items(&names)
        .default(current)
        .interact()?;
    let provider = providers[selection];

    if provider.requires_api_key() {
        let key: String = Password::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("{} API key (empty keeps the current one)", provider.display_name()))
            .allow_empty_password(true)
            .interact()?;
        if !key.trim().is_empty() {
            config.set_api_key(provider, &key);
        }
    } else {
        let url: String = Input::with_theme(&ColorfulTheme::default())
            .with_prompt("Ollama URL")
            .default(config.ollama_url())
            .interact_text()?;
        config.ollama_url = Some(url);
    }

    config.provider = Some(provider.as_str().to_string());
    config.default_model = Some(provider.default_model().to_string());
    config.save()?;

    println!(
        "\n{} {} with {}",
        "✓ Using".green(),
        provider.display_name().bold(),
        provider.default_model().cyan()
    );
    println!("Config saved to {}", Config::get_config_path()?.display().to_string().dimmed());

    if provider.requires_api_key() && config.api_key(provider).is_none() {
        println!(
            "{}",
            format!(
                "No API key stored. Set {} or run setup again.",
                provider.api_key_env().unwrap_or("the key")
            )
            .yellow()
        );
    }

    Ok(())
}
