//! Terminal front end: chat, one-shot questions, images and key management.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::{error, info, warn};

use crate::ai::client::ChatClient;
use crate::ai::image::{ImageClient, ImageStyle, append_keyword};
use crate::core::config::{API_KEY_NAME, AppConfig};
use crate::core::credentials::{CredentialStore, FileCredentialStore, mask_secret};
use crate::core::models::Role;
use crate::core::transcript::Transcript;
use crate::errors::ChatError;

#[derive(Debug, Parser)]
#[command(
    name = "llmium",
    version,
    about = "Chat with and request images from a hosted LLM API"
)]
pub struct Cli {
    /// Model to use (overrides LLMIUM_MODEL)
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Sampling temperature (overrides LLMIUM_TEMPERATURE)
    #[arg(long, global = true)]
    pub temperature: Option<f32>,

    /// Reply length limit (overrides LLMIUM_MAX_TOKENS)
    #[arg(long, global = true)]
    pub max_tokens: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive chat with streamed replies; Ctrl-C stops the current reply
    Chat,
    /// Send one message and print the whole reply
    Ask {
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Generate an image and print its URL
    Imagine {
        #[arg(long, value_enum, default_value_t = StyleArg::Photo)]
        style: StyleArg,
        /// Keyword to add to the description; repeatable
        #[arg(long = "keyword")]
        keywords: Vec<String>,
        description: Vec<String>,
    },
    /// Store the API key
    SetKey { key: String },
    /// Print the stored API key, masked
    ShowKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StyleArg {
    Photo,
    Art,
}

impl From<StyleArg> for ImageStyle {
    fn from(style: StyleArg) -> Self {
        match style {
            StyleArg::Photo => ImageStyle::Photo,
            StyleArg::Art => ImageStyle::Art,
        }
    }
}

/// One line typed at the chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplInput<'a> {
    Empty,
    Quit,
    Clear,
    Model(&'a str),
    Message(&'a str),
}

impl<'a> ReplInput<'a> {
    #[must_use]
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        match line {
            "" => Self::Empty,
            "/quit" | "/exit" => Self::Quit,
            "/clear" => Self::Clear,
            _ => match line.strip_prefix("/model ") {
                Some(model) if !model.trim().is_empty() => Self::Model(model.trim()),
                _ => Self::Message(line),
            },
        }
    }
}

/// # Errors
///
/// Returns an error if configuration is invalid or the command fails.
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::from_env().context("loading configuration")?;
    if cli.model.is_some() {
        config.params.model = cli.model;
    }
    if cli.temperature.is_some() {
        config.params.temperature = cli.temperature;
    }
    if cli.max_tokens.is_some() {
        config.params.max_tokens = cli.max_tokens;
    }

    let store: Arc<dyn CredentialStore> =
        Arc::new(FileCredentialStore::new(&config.credentials_file));

    match cli.command {
        Command::Chat => chat(&config, store).await,
        Command::Ask { text } => ask(&config, store, &text.join(" ")).await,
        Command::Imagine {
            style,
            keywords,
            description,
        } => imagine(&config, store, style.into(), &keywords, &description.join(" ")).await,
        Command::SetKey { key } => set_key(store.as_ref(), &key).await,
        Command::ShowKey => show_key(store.as_ref()).await,
    }
}

async fn chat(config: &AppConfig, store: Arc<dyn CredentialStore>) -> Result<()> {
    let client = ChatClient::new(config.client_config(), store)?;
    let mut transcript = Transcript::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    info!(model = %client.params().model, "Chat session started");
    prompt()?;

    let interrupt = || async {
        let _ = tokio::signal::ctrl_c().await;
    };
    while let Some(line) = next_input(&mut lines, interrupt()).await? {
        match ReplInput::parse(&line) {
            ReplInput::Empty => warn!("empty input"),
            ReplInput::Quit => break,
            ReplInput::Clear => transcript.clear(),
            ReplInput::Model(model) => client.set_model(model),
            ReplInput::Message(text) => {
                transcript.append(Role::User, text);
                stream_reply(&client, &mut transcript).await;
            }
        }
        prompt()?;
    }

    println!();
    info!("Chat session ended");
    Ok(())
}

/// Next line typed at the prompt, or `None` at end of input or once
/// `interrupt` fires.
async fn next_input<R, I>(lines: &mut Lines<R>, interrupt: I) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    I: Future<Output = ()>,
{
    tokio::select! {
        line = lines.next_line() => Ok(line?),
        () = interrupt => Ok(None),
    }
}

async fn stream_reply(client: &ChatClient, transcript: &mut Transcript) {
    let conversation = transcript.collect_messages();
    let handle = client.new_request();
    let mut stdout = std::io::stdout();

    let result = {
        let send = client.send_messages_stream_with(&handle, &conversation, |batch| {
            for (_, delta) in transcript.apply_batch(batch) {
                let _ = write!(stdout, "{delta}");
            }
            let _ = stdout.flush();
        });
        tokio::pin!(send);

        tokio::select! {
            result = &mut send => result,
            _ = tokio::signal::ctrl_c() => {
                client.cancel(handle.id());
                send.await
            }
        }
    };
    println!();

    match result {
        Ok(outcome) if outcome.cancelled => eprintln!("[stopped]"),
        Ok(outcome) if !outcome.malformed.is_empty() => {
            eprintln!("[{} unreadable frames skipped]", outcome.malformed.len());
        }
        Ok(_) => {}
        Err(e) => banner(&e),
    }
}

async fn ask(config: &AppConfig, store: Arc<dyn CredentialStore>, text: &str) -> Result<()> {
    let client = ChatClient::new(config.client_config(), store)?;
    match client.send_message(text).await {
        Ok(reply) => {
            println!("{reply}");
            Ok(())
        }
        Err(e) => {
            banner(&e);
            Err(e.into())
        }
    }
}

async fn imagine(
    config: &AppConfig,
    store: Arc<dyn CredentialStore>,
    style: ImageStyle,
    keywords: &[String],
    description: &str,
) -> Result<()> {
    let mut full = String::new();
    for keyword in keywords {
        append_keyword(&mut full, keyword);
    }
    full.push_str(description);

    let client = ImageClient::new(&config.client_config(), store)?;
    match client.imagine(style, &full).await {
        Ok(url) => {
            println!("{url}");
            Ok(())
        }
        Err(e) => {
            banner(&e);
            Err(e.into())
        }
    }
}

async fn set_key(store: &dyn CredentialStore, key: &str) -> Result<()> {
    let key = key.trim();
    if key.is_empty() {
        bail!("{API_KEY_NAME} must not be empty");
    }
    store
        .set(HashMap::from([(API_KEY_NAME.to_string(), key.to_string())]))
        .await?;
    println!("saved");
    Ok(())
}

async fn show_key(store: &dyn CredentialStore) -> Result<()> {
    match store.get(API_KEY_NAME).await {
        Ok(key) => println!("{API_KEY_NAME}={}", mask_secret(&key)),
        Err(ChatError::MissingCredential(_)) => println!("{API_KEY_NAME} is not set"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn prompt() -> Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()?;
    Ok(())
}

/// Prints a user-facing alert. Access problems get their own wording so they
/// are not mistaken for network trouble.
fn banner(e: &ChatError) {
    error!(error = %e, access_denied = e.is_access_denied(), "Request failed");
    if e.is_access_denied() {
        eprintln!("!! ACCESS: {}", e.user_message());
    } else {
        eprintln!("!! {}", e.user_message());
    }
}
