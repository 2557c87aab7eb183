use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "commitsync")]
#[command(about = "Administer commit-log sync collections from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to engine config JSON
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Register a grouping field: type.field=grouping_type (repeatable)
    #[arg(long = "grouping", global = true, value_name = "TYPE.FIELD=GROUP")]
    pub groupings: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage partner collections
    Collection {
        #[command(subcommand)]
        command: CollectionCommands,
    },
    /// Compute the next export batch for a collection
    Export {
        /// Collection id
        id: String,
        /// Do not advance the watermark; confirm delivery later with `ack`
        #[arg(long)]
        no_fast_forward: bool,
        /// Only report entities updated at or after this time
        #[arg(long, value_name = "TIME")]
        since: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Confirm delivery of changes printed by `export --no-fast-forward --json`
    Ack {
        /// Collection id
        id: String,
        /// JSON file holding the delivered changes
        #[arg(long, value_name = "FILE")]
        changes: PathBuf,
    },
    /// Diff a partner manifest against a collection's import log
    Import {
        /// Collection id
        id: String,
        /// JSON file listing the partner's remote_id/remote_revision pairs
        #[arg(long, value_name = "FILE")]
        manifest: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create, update or delete entities
    Entity {
        #[command(subcommand)]
        command: EntityCommands,
    },
    /// Show the head commit for a watched type
    Head {
        /// Watched entity type
        watched_type: String,
        /// Grouping field of the watched type
        #[arg(long)]
        field: Option<String>,
    },
    /// Maintenance tasks
    Maintenance {
        #[command(subcommand)]
        command: MaintenanceCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum CollectionCommands {
    /// Create a collection for a partner
    Create {
        /// Partner identifier
        #[arg(long)]
        partner: String,
        /// Tenant the collection is scoped to
        #[arg(long)]
        account: String,
        /// Watched entity type
        #[arg(long = "type", value_name = "TYPE")]
        watched_type: String,
        /// Track a grouping field instead of raw entities
        #[arg(long)]
        field: Option<String>,
        /// Filter clause, e.g. and:owner:eq:"U" (repeatable, applied in order)
        #[arg(long = "where", value_name = "CLAUSE")]
        conditions: Vec<String>,
        /// Start the watermark at the current head instead of 0
        #[arg(long)]
        skip_history: bool,
    },
    /// List collections
    List {
        /// Only collections of this partner
        #[arg(long)]
        partner: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one collection
    Show {
        /// Collection id
        id: String,
    },
    /// Replace a collection's filter clauses
    Update {
        /// Collection id
        id: String,
        /// Filter clause (repeatable); replaces the existing clauses
        #[arg(long = "where", value_name = "CLAUSE")]
        conditions: Vec<String>,
        /// Remove every filter clause
        #[arg(long, conflicts_with = "conditions")]
        clear: bool,
    },
    /// Delete a collection (sync logs remain until purged)
    Delete {
        /// Collection id
        id: String,
    },
    /// Move the watermark to the current head
    FastForward {
        /// Collection id
        id: String,
    },
    /// Move the watermark back so later commits are delivered again
    Resync {
        /// Collection id
        id: String,
        /// Commit to resume after
        #[arg(long, default_value = "0")]
        from: i64,
    },
}

#[derive(Subcommand)]
pub enum EntityCommands {
    /// Create or update an entity, stamping a new commit
    Put {
        /// Entity type
        entity_type: String,
        /// Tenant the entity belongs to
        #[arg(long)]
        account: String,
        /// Entity id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
        /// Field assignment name=value; value is JSON or plain text (repeatable)
        #[arg(long = "set", value_name = "ASSIGNMENT")]
        fields: Vec<String>,
    },
    /// Soft-delete an entity, stamping a new commit
    Delete {
        /// Entity type
        entity_type: String,
        /// Entity id
        id: String,
    },
}

#[derive(Subcommand)]
pub enum MaintenanceCommands {
    /// Remove sync log rows of deleted collections
    PurgeLogs,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
