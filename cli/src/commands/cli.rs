use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "statevault", version, about = "Inspect and edit persisted state files")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// State file to operate on.
    #[arg(long, short = 'f', default_value = "state.json", global = true)]
    pub file: PathBuf,

    /// Codec for the state file (json or toml). Defaults to the configured format.
    #[arg(long, global = true)]
    pub format: Option<String>,

    /// JSON indent width; 0 writes compact JSON.
    #[arg(long, global = true)]
    pub indent: Option<usize>,

    /// Config file to use instead of the default lookup.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the whole state.
    Show,
    /// Print one top-level value.
    Get { key: String },
    /// Set one top-level key.
    Set(SetArgs),
    /// Merge a JSON object into the state.
    Merge {
        /// Object whose keys replace same-named top-level keys.
        json: String,
    },
    /// Check that the state file survives a serialize/deserialize round trip.
    Validate,
    /// Save the state and copy it to the backup file.
    Backup,
    /// Replace the state file with its backup.
    Restore,
    /// Show file metadata and persistence options.
    Info,
    /// Empty the state file without removing it.
    Truncate,
    /// Remove the state file.
    Delete,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct SetArgs {
    pub key: String,

    /// JSON value. Text that is not valid JSON is stored as a string.
    pub value: String,
}
