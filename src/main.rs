use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing::{error, info};

use gemini_relay::client::{run_session, RelayClient, DEFAULT_RELAY_URL};
use gemini_relay::config::{RelayConfig, ServeArgs};
use gemini_relay::logger;
use gemini_relay::provider::GeminiProvider;
use gemini_relay::router::{run_router, RouterState};

#[derive(Parser)]
#[command(name = "gemini-relay", author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
  #[command(flatten)]
  serve: ServeArgs,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Chat with a running relay from the terminal.
  Chat {
    #[arg(long, env = "RELAY_URL", default_value = DEFAULT_RELAY_URL)]
    url: String,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenv::dotenv().ok();
  let cli = Cli::parse();

  match cli.command {
    Some(Commands::Chat { url }) => chat(url).await,
    None => serve(cli.serve).await,
  }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
  logger::init(args.log_file.as_deref(), "info,tower_http=info")?;

  let config = match RelayConfig::from_args(&args) {
    Ok(config) => config,
    Err(err) => {
      error!("Error: {err}");
      return Err(err).context("invalid relay configuration");
    }
  };

  info!("--- Relay Configuration ---");
  info!("Listen Address: {}", config.bind_addr());
  info!("Model: {}", config.model);
  info!("Base URL: {}", config.base_url);
  info!(
    "Generation: temperature={} max_output_tokens={}",
    config.generation.temperature, config.generation.max_output_tokens
  );
  info!("CORS Origins: {}", config.allowed_origins.join(", "));
  info!("Upstream Timeout: {:?}", config.upstream_timeout);
  info!("---------------------------");

  let provider = GeminiProvider::new(&config)?;
  let listener = std::net::TcpListener::bind(config.bind_addr())
    .with_context(|| format!("failed to bind {}", config.bind_addr()))?;
  let port = listener.local_addr()?.port();

  let state = RouterState {
    started_at: Instant::now(),
    config: Arc::new(config),
    provider: Arc::new(provider),
  };

  info!("Gemini chat relay running on http://localhost:{port}");
  run_router(listener, state).await
}

async fn chat(url: String) -> anyhow::Result<()> {
  logger::init(None, "warn")?;
  let client = RelayClient::new(url);
  let stdin = BufReader::new(tokio::io::stdin());
  let mut stdout = std::io::stdout();
  let interactive = stdout.is_terminal();
  run_session(&client, stdin, &mut stdout, interactive).await?;
  Ok(())
}
