mod cli;
mod config;
mod storage;

use std::io::{self, Write};

use clap::Parser;
use cloak_core::{secure::SecureStorage, storage::BackingStore};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Command, ConfigCommand};

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let stdout = io::stdout();
    dispatch(cli, config::load, &mut stdout.lock())
}

/// Routes a parsed command. Only commands that use the config load it.
fn dispatch<W: Write>(
    cli: cli::Cli,
    load_config: impl FnOnce() -> Result<config::Config>,
    out: &mut W,
) -> Result<()> {
    match cli.command {
        Command::Version => writeln!(out, "cloak {}", env!("CARGO_PKG_VERSION"))?,
        Command::Config(ConfigCommand::Init) => {
            let path = config::write_default_if_missing(&load_config()?)?;
            writeln!(out, "Config initialized at {}", path.display())?;
        }
        command => {
            let config = load_config()?;
            let store = storage::store_from_config(&config, cli.data_file.as_deref())?;
            run(&store, command, out)?;
        }
    }
    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info; logs go to stderr so stdout stays clean JSON.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Executes one store command, writing human output to `out`.
fn run<S: BackingStore, W: Write>(
    store: &SecureStorage<S>,
    command: Command,
    out: &mut W,
) -> Result<()> {
    match command {
        Command::Get { key } => {
            let value = store.read(&key)?.ok_or_else(|| eyre!("not found: {key}"))?;
            writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
        }
        Command::Set { key, value, string } => {
            let value = if string {
                Value::String(value)
            } else {
                serde_json::from_str(&value).map_err(|e| {
                    eyre!("VALUE is not valid JSON ({e}); pass --string to store text")
                })?
            };
            store.write(&key, &value)?;
            info!("stored {key}");
        }
        Command::Rm { key } => store.remove(&key)?,
        Command::Clear => {
            let removed = store.len()?;
            store.clear()?;
            info!("removed {removed} entries");
        }
        Command::Count => writeln!(out, "{}", store.len()?)?,
        Command::Keys => {
            for key in store.keys()? {
                writeln!(out, "{key}")?;
            }
        }
        Command::Entries { physical } => {
            let entries = if physical {
                store.physical_entries()?
            } else {
                store.entries()?
            };
            for (key, value) in entries {
                let rendered = match value {
                    Some(value) => serde_json::to_string(&value)?,
                    None => "<unreadable: key hash is not idempotent, try --physical>".to_string(),
                };
                writeln!(out, "{key}\t{rendered}")?;
            }
        }
        Command::Health => {
            run_store_health(store)?;
            writeln!(out, "Storage: ok")?;
        }
        other => color_eyre::eyre::bail!("{other:?} does not operate on the store"),
    }
    Ok(())
}

/// Round-trips a probe entry through the full transform pipeline.
fn run_store_health<S: BackingStore>(store: &SecureStorage<S>) -> Result<()> {
    let probe_key = "health/probe";
    let payload = serde_json::json!({"ok": true});
    store.write(probe_key, &payload)?;
    let round_trip = store.read(probe_key)?;
    store.remove(probe_key)?;

    if round_trip.as_ref() != Some(&payload) {
        color_eyre::eyre::bail!("storage round-trip failed");
    }
    Ok(())
}
