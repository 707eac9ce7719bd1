//! deltagate CLI binary.
//!
//! Streaming chat-completions gateway.
//!
//! # Commands
//!
//! - `serve` - Start the gateway
//! - `models` - Fetch the upstream model list once
//! - `config` - Print the effective configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use deltagate::{
    fetch::{BackoffFetcher, UpstreamRequest},
    Config, ProxyServer, VERSION,
};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "deltagate")]
#[command(version = VERSION)]
#[command(about = "Streaming chat-completions gateway with delta normalization", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/deltagate/config.toml if present)
    #[arg(short, long, global = true, env = "DELTAGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Serve(UpstreamArgs),

    /// Fetch and print the upstream model list
    Models {
        #[command(flatten)]
        upstream: UpstreamArgs,

        /// Print the raw response instead of model ids
        #[arg(long)]
        raw: bool,
    },

    /// Print the effective configuration as TOML
    Config(UpstreamArgs),
}

/// Overrides applied on top of file and environment configuration
#[derive(Args)]
struct UpstreamArgs {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Upstream API base URL (e.g., https://api.openai.com/v1)
    #[arg(short, long)]
    upstream: Option<String>,

    /// API key for upstream (or use env OPENAI_API_KEY)
    #[arg(short = 'k', long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Always send --api-key upstream instead of the client's token
    #[arg(long)]
    override_client_key: bool,

    /// Upstream attempts before giving up
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Stream timeout in seconds
    #[arg(long)]
    stream_timeout: Option<u64>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

impl UpstreamArgs {
    fn apply(self, mut config: Config) -> Config {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(upstream) = self.upstream {
            config.upstream.base_url = upstream;
        }
        if let Some(api_key) = self.api_key {
            config.upstream.api_key = Some(api_key);
        }
        if self.override_client_key {
            config.upstream.override_client_key = true;
        }
        if let Some(attempts) = self.max_attempts {
            config.retry.max_attempts = attempts;
        }
        if let Some(secs) = self.stream_timeout {
            config.stream.timeout_secs = secs;
        }
        if let Some(secs) = self.timeout {
            config.upstream.request_timeout_secs = secs;
        }
        config
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let base = Config::load(cli.config)
        .map_err(|e| anyhow::anyhow!("{}", e))?
        .with_env();

    match cli.command {
        Commands::Serve(args) => cmd_serve(args.apply(base)),
        Commands::Models { upstream, raw } => cmd_models(upstream.apply(base), raw),
        Commands::Config(args) => cmd_config(&args.apply(base)),
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn cmd_serve(config: Config) -> anyhow::Result<()> {
    let server = ProxyServer::new(config).map_err(|e| anyhow::anyhow!("{}", e))?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async { server.run().await.map_err(|e| anyhow::anyhow!("{}", e)) })
}

fn cmd_models(config: Config, raw: bool) -> anyhow::Result<()> {
    config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.upstream.request_timeout_secs))
        .build()?;
    let fetcher = BackoffFetcher::new(client, config.retry.policy());

    let mut request = UpstreamRequest::get(config.upstream.endpoint("models"));
    if let Some(key) = config.upstream.api_key.as_deref() {
        request = request.with_bearer(key)?;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let body = runtime.block_on(async {
        let fetched = fetcher.fetch(&request).await?;
        tracing::debug!(attempts = fetched.attempts, "model list fetched");
        Ok::<_, anyhow::Error>(fetched.response.text().await?)
    })?;

    if raw {
        println!("{body}");
        return Ok(());
    }

    let parsed: Value = serde_json::from_str(&body)?;
    let ids = parsed
        .get("data")
        .and_then(Value::as_array)
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m.get("id").and_then(Value::as_str))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if ids.is_empty() {
        println!("{}", serde_json::to_string_pretty(&parsed)?);
    } else {
        for id in ids {
            println!("{id}");
        }
    }
    Ok(())
}

fn cmd_config(config: &Config) -> anyhow::Result<()> {
    config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;

    let mut shown = config.clone();
    if shown.upstream.api_key.is_some() {
        shown.upstream.api_key = Some("<redacted>".to_string());
    }
    print!("{}", shown.to_toml().map_err(|e| anyhow::anyhow!("{}", e))?);
    Ok(())
}
