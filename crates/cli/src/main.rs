//! Topiq CLI - push JSON to a topic, pull it back from a subscription

mod logging;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tabled::{Table, Tabled};
use tokio::sync::mpsc;
use tracing::info;

use logging::LogFormat;
use topiq_core::application::publisher::ATTRIBUTES_KEY;
use topiq_core::{Message, PullOptions, PushOptions, PushOutcome, QueueInstance};
use topiq_infra_pubsub::constants::ORDERING_KEY_OPTION;
use topiq_infra_pubsub::PubSubConnector;
use topiq_infra_system::{load_settings, CredentialResolver};

#[derive(Parser)]
#[command(name = "topiq")]
#[command(about = "JSON queue over Google Cloud Pub/Sub", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (TOML, YAML or JSON); TOPIQ_* variables override it
    #[arg(long, env = "TOPIQ_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, env = "TOPIQ_LOG_FORMAT", value_enum, default_value = "pretty")]
    log_format: LogFormat,

    /// Base directory for relative credential paths (default: current dir)
    #[arg(long)]
    credentials_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish one or more JSON payloads
    Push {
        /// JSON payloads (several are pushed as one batch)
        #[arg(required = true)]
        payloads: Vec<String>,

        /// Message attribute as key=value (repeatable)
        #[arg(short, long = "attr", value_parser = parse_attribute)]
        attributes: Vec<(String, String)>,

        /// Ordering key for the publisher
        #[arg(long)]
        ordering_key: Option<String>,
    },

    /// Print messages from a subscription and acknowledge them
    Pull {
        /// Subscription name (default: from settings)
        #[arg(short, long)]
        subscription: Option<String>,

        /// Stop after this many messages (default: run until Ctrl-C)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
}

#[derive(Tabled)]
struct PushRow {
    index: usize,
    message_id: String,
}

fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

/// Merge `--attr` pairs into the payload's reserved attributes object
fn with_attributes(payload: Value, attributes: &[(String, String)]) -> Result<Value> {
    if attributes.is_empty() {
        return Ok(payload);
    }
    let Value::Object(mut body) = payload else {
        bail!("--attr requires JSON object payloads");
    };
    let mut merged = match body.remove(ATTRIBUTES_KEY) {
        Some(Value::Object(existing)) => existing,
        _ => Map::new(),
    };
    for (key, value) in attributes {
        merged.insert(key.clone(), Value::String(value.clone()));
    }
    body.insert(ATTRIBUTES_KEY.to_string(), Value::Object(merged));
    Ok(Value::Object(body))
}

fn rows(outcome: &PushOutcome) -> Vec<PushRow> {
    match outcome {
        PushOutcome::Batch(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| PushRow {
                index,
                message_id: item.message_ids().join(", "),
            })
            .collect(),
        single => vec![PushRow {
            index: 0,
            message_id: single.message_ids().join(", "),
        }],
    }
}

fn connect(cli: &Cli) -> Result<QueueInstance> {
    let settings = load_settings(cli.config.as_deref()).context("Failed to load settings")?;
    let resolver = match &cli.credentials_root {
        Some(root) => CredentialResolver::new(root.clone()),
        None => CredentialResolver::from_current_dir(),
    };
    let config = settings
        .into_config(&resolver)
        .context("Failed to resolve credentials")?;
    let connector = PubSubConnector::from_env();
    QueueInstance::connect(config, &connector).context("Failed to connect queue")
}

async fn push(
    queue: &QueueInstance,
    payloads: Vec<String>,
    attributes: Vec<(String, String)>,
    ordering_key: Option<String>,
) -> Result<()> {
    let mut values = payloads
        .iter()
        .map(|raw| {
            let value: Value = serde_json::from_str(raw).context("Invalid JSON payload")?;
            with_attributes(value, &attributes)
        })
        .collect::<Result<Vec<_>>>()?;
    let payload = if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    };

    let mut options = PushOptions::default();
    if let Some(key) = ordering_key {
        options
            .publisher
            .insert(ORDERING_KEY_OPTION.to_string(), Value::String(key));
    }

    let outcome = queue.push_with(&payload, options).await?;
    if outcome.is_skipped() {
        println!("{}", "- Null payload skipped".yellow());
        return Ok(());
    }

    println!("{}", "✓ Published".green().bold());
    println!();
    println!("{}", Table::new(rows(&outcome)));
    Ok(())
}

async fn pull(queue: &QueueInstance, subscription: Option<String>, limit: Option<usize>) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let handler = move |message: Message| {
        let tx = tx.clone();
        async move {
            let data = message
                .data()
                .map(|v| serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()))
                .unwrap_or_default();
            println!("{} {}", "▸".cyan(), message.id.as_str().bold());
            if !message.attributes.is_empty() {
                println!("  {} {:?}", "attributes:".dimmed(), message.attributes);
            }
            println!("{}", data);
            message.ack();
            let _ = tx.send(());
        }
    };

    let options = PullOptions {
        subscription,
        ..Default::default()
    };
    let handle = queue.pull_with(handler, options).await?;
    info!(subscription = %handle.name(), "Waiting for messages (Ctrl-C to stop)");

    let mut received = 0usize;
    loop {
        tokio::select! {
            got = rx.recv() => {
                if got.is_none() {
                    break;
                }
                received += 1;
                if limit.is_some_and(|limit| received >= limit) {
                    break;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
        }
    }

    handle.close().await;
    println!("{}", format!("✓ {} message(s) received", received).green().bold());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format)?;

    let queue = connect(&cli)?;
    info!(
        queue = %queue.name(),
        queue_id = %queue.id(),
        topic = %queue.topic(),
        "Topiq v{}",
        topiq_core::VERSION
    );

    match cli.command {
        Commands::Push {
            payloads,
            attributes,
            ordering_key,
        } => push(&queue, payloads, attributes, ordering_key).await,
        Commands::Pull {
            subscription,
            limit,
        } => pull(&queue, subscription, limit).await,
    }
}
