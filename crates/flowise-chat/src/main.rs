//! Command-line host for the Flowise chat pipeline.
//!
//! Sends one message to the configured flow and prints the answer. Settings
//! come from the environment (a `.env` file is loaded when present).

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt as _;
use flowise_pipeline::prelude::*;
use flowise_pipeline::init_observability;
use serde_json::json;

#[derive(Parser)]
#[command(name = "flowise-chat", about = "Ask a Flowise flow a question", version)]
struct Cli {
    /// Message to send
    message: String,

    /// Stream events as they arrive instead of waiting for the full answer
    #[arg(short, long)]
    stream: bool,

    /// Replay a recorded JSON-lines chunk file instead of calling Flowise
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Print every fragment as one JSON object per line
    #[arg(long)]
    json: bool,

    /// Chat session id forwarded to the flow
    #[arg(long)]
    session: Option<String>,

    /// System message forwarded to the flow
    #[arg(long)]
    system: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();
    init_observability();

    let mut config = PipelineConfig::from_env();
    let pipeline = match &cli.replay {
        Some(path) => {
            let transport = ReplayTransport::from_file(path).await?;
            fill_replay_defaults(&mut config);
            Pipeline::with_transport(config, Arc::new(transport))
        }
        None => Pipeline::new(config)?,
    };
    pipeline.on_startup().await;

    let body = json!({
        "stream": cli.stream,
        "chat_id": cli.session,
        "model_params": {"system": cli.system},
    });
    let output = pipeline
        .process_message(&cli.message, "flowise-chat", &[], &body)
        .await;

    let mut stdout = std::io::stdout().lock();
    match output {
        PipeOutput::Text(text) if cli.json => {
            writeln!(stdout, "{}", serde_json::to_string(&OutputFragment::text(text))?)?;
        }
        PipeOutput::Text(text) => writeln!(stdout, "{text}")?,
        PipeOutput::Stream(mut fragments) => {
            while let Some(fragment) = fragments.next().await {
                print_fragment(&mut stdout, &fragment, cli.json)?;
            }
            if !cli.json {
                writeln!(stdout)?;
            }
        }
    }

    pipeline.on_shutdown().await;
    Ok(())
}

/// A replayed run needs no credentials or flow id; keep whatever the
/// environment provides and fill in the rest.
fn fill_replay_defaults(config: &mut PipelineConfig) {
    if config.base_url.is_empty() {
        config.base_url = "replay://local".to_string();
    }
    if config.api_key.is_empty() {
        config.api_key = "replay".to_string();
    }
    if !config.flow_enabled || config.flow_id.is_none() || config.flow_name.is_none() {
        config.flow_enabled = true;
        config.flow_id.get_or_insert_with(|| "replay".to_string());
        config.flow_name.get_or_insert_with(|| "replay".to_string());
    }
    config.rate_limit = 0;
}

fn print_fragment(
    out: &mut impl std::io::Write,
    fragment: &OutputFragment,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        writeln!(out, "{}", serde_json::to_string(fragment)?)?;
        return Ok(());
    }
    match fragment {
        OutputFragment::Text(text) => {
            write!(out, "{text}")?;
            out.flush()?;
        }
        OutputFragment::Status { description, done } => {
            let marker = if *done { "done" } else { "..." };
            eprintln!("[{marker}] {description}");
        }
    }
    Ok(())
}
