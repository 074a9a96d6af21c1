use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "cloak",
    about = "Inspect and edit an obfuscated, encrypted key-value store",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Store file to use instead of the configured one.
    #[arg(long, global = true, value_name = "PATH")]
    pub data_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the value stored under a key.
    Get { key: String },
    /// Store a JSON value under a key.
    Set {
        key: String,
        value: String,
        /// Store VALUE as a JSON string instead of parsing it.
        #[arg(long)]
        string: bool,
    },
    /// Remove a key (no error if absent).
    #[command(alias = "remove")]
    Rm { key: String },
    /// Remove every entry in the store.
    Clear,
    /// Print the number of entries.
    Count,
    /// List physical keys in store order.
    Keys,
    /// List keys with their decoded values.
    Entries {
        /// Read physical keys directly instead of re-applying the key hash.
        #[arg(long)]
        physical: bool,
    },
    /// Write, read back, and remove a probe entry.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version and exit.
    Version,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
