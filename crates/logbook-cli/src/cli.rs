use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "logbook")]
#[command(about = "Log meals and moments offline, sync when you can")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding the local record store and cached photos
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Skip the automatic sync after a local change
    #[arg(long, global = true)]
    pub offline: bool,

    /// Quick capture: logbook "oatmeal with berries"
    #[arg(trailing_var_arg = true)]
    pub entry: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log a new entry
    #[command(alias = "new")]
    Add {
        /// Entry text
        text: Vec<String>,
        /// Category such as breakfast or snack
        #[arg(short, long)]
        category: Option<String>,
        /// When it happened (RFC 3339); defaults to now
        #[arg(long, value_name = "TIME")]
        at: Option<String>,
        /// Extra attribute as key=value (repeatable)
        #[arg(long = "attr", value_name = "KEY=VALUE")]
        attributes: Vec<String>,
        /// Photo to attach
        #[arg(long, value_name = "PATH")]
        photo: Option<PathBuf>,
    },
    /// List recent entries
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Only show entries waiting to sync
        #[arg(long)]
        pending: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing entry
    Edit {
        /// Entry ID or unique ID prefix
        id: String,
        /// Replacement text (opens $EDITOR when omitted)
        text: Vec<String>,
        /// Replacement category
        #[arg(short, long)]
        category: Option<String>,
    },
    /// Delete entries
    Delete {
        /// Entry IDs or unique ID prefixes
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Attach a photo to an entry, replacing any previous one
    Attach {
        /// Entry ID or unique ID prefix
        id: String,
        /// Image file
        path: PathBuf,
    },
    /// Sync with the remote service
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
        /// Keep syncing on an interval until interrupted
        #[arg(long)]
        watch: bool,
    },
    /// Drop cached photos of old, fully synced entries
    Sweep {
        /// Retention in days (defaults to LOGBOOK_RETENTION_DAYS or 30)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Show what is waiting to sync
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Send local changes, ignoring retry delays
    Push,
    /// Fetch and merge the remote collection
    Pull,
}
