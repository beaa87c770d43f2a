use std::io::{self, Write};

use anyhow::{anyhow, Result};
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};

use techtalk_core::aggregator::ERROR_MESSAGE;
use techtalk_core::language::display_name;
use techtalk_core::markdown::to_plain_text;
use techtalk_core::{
    ChatId, ChatSession, CodeBlock, Config, GroupId, OllamaClient, Provider, Rejected, Role, Update,
};

use crate::open_session;

/// Interactive loop over one chat. Each line is sent as a turn.
pub async fn run(config: &Config, group: Option<&str>, chat: Option<&str>) -> Result<()> {
    let mut session = open_session(config)?;
    let group = resolve_group(&mut session, group);
    let mut chat = resolve_chat(&mut session, group, chat)?;

    println!(
        "\n{} {} {}",
        "💬 Techtalk".bold().blue(),
        config.provider().display_name().dimmed(),
        session.model().magenta()
    );
    println!(
        "{}",
        "Commands: /new [name], /clear, /code, /copy, /quit".dimmed()
    );
    print_header(&session, chat);
    print_transcript(&session, chat);

    if config.provider() == Provider::Ollama {
        check_ollama_model(config, session.model()).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n{} ", "you ›".bold().green());
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let input = line.trim();

        if let Some(command) = input.strip_prefix('/') {
            let (name, arg) = command.split_once(' ').unwrap_or((command, ""));
            match name {
                "quit" | "exit" | "q" => break,
                "new" => {
                    chat = session
                        .create_chat(group, arg)
                        .ok_or_else(|| anyhow!("folder disappeared"))?;
                    print_header(&session, chat);
                }
                "clear" => {
                    session.clear_chat(chat);
                    println!("{}", "Conversation cleared".dimmed());
                }
                "code" => match session.get_detected_code_block(chat) {
                    Some(block) => show_code_block(&block),
                    None => println!("{}", "No code block in this conversation yet".yellow()),
                },
                "copy" => {
                    let messages = session.get_messages(chat);
                    match messages.iter().rev().find(|m| m.role == Role::Assistant) {
                        Some(reply) => println!("{}", to_plain_text(&reply.content)),
                        None => println!("{}", "Nothing to copy yet".yellow()),
                    }
                }
                _ => println!("{} /{}", "Unknown command".red(), name),
            }
            continue;
        }

        let before = session.get_detected_code_block(chat);
        match session.send_turn(chat, input) {
            Ok(_) => {}
            Err(Rejected::EmptyInput) => continue,
            Err(e) => {
                println!("{}", e.to_string().yellow());
                continue;
            }
        }

        print!("\n{} ", "ai ›".bold().cyan());
        io::stdout().flush()?;
        stream_reply(&mut session, chat).await?;

        let after = session.get_detected_code_block(chat);
        if let Some(block) = after.filter(|b| Some(b) != before.as_ref()) {
            show_code_block(&block);
        }
    }

    println!("{}", "Bye!".dimmed());
    Ok(())
}

/// Print fragments as they arrive until the turn ends. Ctrl-C cancels the turn.
pub async fn stream_reply(session: &mut ChatSession, chat: ChatId) -> Result<()> {
    let mut stdout = io::stdout();
    loop {
        tokio::select! {
            update = session.next_update() => match update {
                Some(Update::Fragment { text, .. }) => {
                    print!("{}", text);
                    stdout.flush()?;
                }
                Some(Update::Completed { .. }) | None => {
                    println!();
                    break;
                }
                Some(Update::Failed { error, .. }) => {
                    println!();
                    println!("{}", ERROR_MESSAGE.red());
                    println!("{}", error.to_string().dimmed());
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                session.cancel(chat);
                println!("\n{}", "(cancelled)".dimmed());
                break;
            }
        }
    }
    Ok(())
}

pub fn show_code_block(block: &CodeBlock) {
    println!(
        "\n{} {}",
        "📄 Code".bold().blue(),
        display_name(&block.language).yellow()
    );
    println!("{}", "─".repeat(40).dimmed());
    for line in block.body.lines() {
        println!("{}", line.cyan());
    }
    println!("{}", "─".repeat(40).dimmed());
}

fn resolve_group(session: &mut ChatSession, name: Option<&str>) -> GroupId {
    let found = match name {
        Some(name) => session
            .groups()
            .iter()
            .find(|g| g.name.eq_ignore_ascii_case(name)),
        None => session.groups().first(),
    };
    match found {
        Some(group) => group.id,
        None => session.create_group(name.unwrap_or("")),
    }
}

fn resolve_chat(session: &mut ChatSession, group: GroupId, name: Option<&str>) -> Result<ChatId> {
    let existing = name.and_then(|name| {
        session
            .group(group)?
            .chats
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| c.id)
    });
    match existing {
        Some(id) => Ok(id),
        None => session
            .create_chat(group, name.unwrap_or(""))
            .ok_or_else(|| anyhow!("folder not found")),
    }
}

async fn check_ollama_model(config: &Config, model: &str) {
    match OllamaClient::new(&config.ollama_url()).has_model(model).await {
        Ok(true) => {}
        Ok(false) => println!(
            "{} {}",
            format!("Model {} is not pulled. Run:", model).yellow(),
            format!("ollama pull {}", model).bold()
        ),
        Err(e) => tracing::warn!(error = %e, "could not reach Ollama"),
    }
}

fn print_header(session: &ChatSession, chat: ChatId) {
    if let Some((group, chat)) = session.find_chat(chat) {
        println!("{}", format!("📁 {} / {}", group.name, chat.name).bold());
    }
}

fn print_transcript(session: &ChatSession, chat: ChatId) {
    for message in session.get_messages(chat).iter() {
        match message.role {
            Role::User => println!("\n{} {}", "you ›".bold().green(), message.content),
            Role::Assistant => println!("\n{} {}", "ai ›".bold().cyan(), message.content),
            Role::System => {}
        }
    }
}
