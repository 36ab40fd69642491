//! WebChannel CLI
//!
//! Opens a channel, sends each stdin line as a message and prints every
//! message the server sends as one JSON document per line.

mod config;

use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use webchannel_client::{ChannelEvent, ChannelOptions, WebChannel};

use config::Config;

/// WebChannel - ordered duplex messages over plain HTTP
#[derive(Parser)]
#[command(name = "webchannel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Channel base URL (requests go to <URL>/test and <URL>/bind)
    url: Option<String>,

    /// Connection-test URL
    #[arg(long)]
    test_url: Option<String>,

    /// Header sent with every request (repeatable)
    #[arg(long = "header", value_name = "K=V", value_parser = parse_key_val)]
    headers: Vec<(String, String)>,

    /// Query parameter added to every data request (repeatable)
    #[arg(long = "param", value_name = "K=V", value_parser = parse_key_val)]
    params: Vec<(String, String)>,

    /// Forward requests allowed in flight
    #[arg(long)]
    concurrent_request_limit: Option<usize>,

    /// Skip the connection test
    #[arg(long)]
    background_test: bool,

    /// Read stdin lines as JSON documents
    #[arg(long)]
    raw_json: bool,
}

impl Cli {
    /// Layer command-line flags over the file options.
    fn apply(&self, mut options: ChannelOptions) -> ChannelOptions {
        if let Some(url) = &self.test_url {
            options.test_url = Some(url.clone());
        }
        for (name, value) in &self.headers {
            options.message_headers.insert(name.clone(), value.clone());
        }
        for (name, value) in &self.params {
            options.message_url_params.insert(name.clone(), value.clone());
        }
        if let Some(limit) = self.concurrent_request_limit {
            options.concurrent_request_limit = Some(limit);
        }
        options.background_channel_test |= self.background_test;
        options.send_raw_json |= self.raw_json;
        options
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected K=V, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    config.validate()?;

    // Initialize logging; stdout carries messages only
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let url = cli
        .url
        .clone()
        .or_else(|| config.channel.url.clone())
        .ok_or_else(|| anyhow::anyhow!("No channel URL given on the command line or in config"))?;
    let options = cli.apply(config.channel.options.clone());

    run(&url, options).await
}

/// Pump stdin into the channel and channel events to stdout until it closes.
async fn run(url: &str, options: ChannelOptions) -> anyhow::Result<()> {
    let raw_json = options.send_raw_json;
    tracing::info!("Connecting to {}", url);
    let (channel, mut events) = WebChannel::open(url, options)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut failure = None;

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                match event {
                    ChannelEvent::Opened => tracing::info!("Channel opened"),
                    ChannelEvent::Message(message) => println!("{message}"),
                    ChannelEvent::Error(status) => {
                        tracing::error!("Channel error: {} ({:?})", status.detail, status.kind);
                        failure = Some(status.detail);
                    }
                    ChannelEvent::Closed { pending, undelivered } => {
                        if !pending.is_empty() || !undelivered.is_empty() {
                            tracing::warn!(
                                "Closed with {} unacknowledged and {} unsent messages",
                                pending.len(),
                                undelivered.len()
                            );
                        }
                        tracing::info!("Channel closed");
                        break;
                    }
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => send_line(&channel, &line, raw_json)?,
                    None => {
                        tracing::debug!("stdin closed");
                        stdin_open = false;
                        channel.close();
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                tracing::info!("Shutting down...");
                channel.close();
            }
        }
    }

    match failure {
        Some(error) => anyhow::bail!("Channel failed: {}", error),
        None => Ok(()),
    }
}

fn send_line(channel: &WebChannel, line: &str, raw_json: bool) -> anyhow::Result<()> {
    if raw_json {
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(document) => channel.send_json(&document)?,
            Err(e) => tracing::warn!("Skipping invalid JSON line: {}", e),
        }
    } else {
        channel.send(parse_map(line))?;
    }
    Ok(())
}

/// Parse a `k=v&k2=v2` line into a message map.
fn parse_map(line: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(line.trim().as_bytes())
        .into_owned()
        .collect()
}
