use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    llmium::setup_logging();
    llmium::cli::run(llmium::cli::Cli::parse()).await
}
