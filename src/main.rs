mod api;
mod config;
mod conversation;
mod error;
mod transcript;

use std::io;
use std::process::exit;

use tracing_subscriber::EnvFilter;

use api::ApiClient;
use config::Config;
use conversation::{ChatLoop, Mode};

#[tokio::main]
async fn main() {
    // Logs go to stderr so they never interleave with the conversation.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let config = match Config::from_cli() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            exit(1);
        }
    };

    let mode = if config.plain { Mode::Plain } else { Mode::Chat };
    tracing::info!(model = %config.model_id, api = %config.api, ?mode, "starting conversation");
    let chat = ChatLoop::new(ApiClient::new(config), mode);

    let mut stdout = io::stdout();
    if let Err(e) = chat.run(io::stdin().lock(), &mut stdout).await {
        eprintln!("ERROR: {}", e);
        exit(1);
    }
}
