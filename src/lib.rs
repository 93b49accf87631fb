/// llmium - chat with and request images from a hosted LLM API.
///
/// The crate is built around a streaming chat client:
/// - `ai::client` sends conversations, either waiting for the whole reply or
///   streaming deltas to a callback as they arrive, with per-request cancellation
/// - `ai::sse` decodes the streamed body into events
/// - `core::transcript` assembles streamed deltas into the conversation
/// - `core::credentials` stores the API key
/// - `ai::image` requests single images
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use llmium::ai::{ChatClient, ChatClientConfig};
/// use llmium::core::credentials::MemoryCredentialStore;
/// use llmium::core::models::Role;
/// use llmium::core::transcript::Transcript;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     llmium::setup_logging();
///
///     let store = Arc::new(MemoryCredentialStore::with_entry("OPENAI_API_KEY", "sk-..."));
///     let client = ChatClient::new(ChatClientConfig::default(), store)?;
///
///     let mut transcript = Transcript::new();
///     transcript.append(Role::User, "hi");
///     let conversation = transcript.collect_messages();
///
///     let outcome = client
///         .send_messages_stream(&conversation, |batch| {
///             transcript.apply_batch(batch);
///         })
///         .await?;
///     println!("{} events, done: {}", outcome.events, outcome.saw_done);
///
///     let reply = client.send_message("Say hello").await?;
///     println!("{reply}");
///     Ok(())
/// }
/// ```
// Module declarations
pub mod ai;
pub mod cli;
pub mod core;
pub mod errors;

/// Configure structured logging with JSON format on stderr.
///
/// Honors `RUST_LOG` (default `info`). Stdout is left free for chat output.
/// Calling it more than once is harmless.
///
/// # Example
///
/// ```
/// llmium::setup_logging();
/// ```
pub fn setup_logging() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_writer(std::io::stderr);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
