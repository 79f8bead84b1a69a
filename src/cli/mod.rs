//! CLI command definitions and parsing
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sourcegate",
    version,
    author = "neur0map",
    about = "Tenant- and source-scoped retrieval over per-source vector indexes",
    long_about = "Sourcegate ingests documents into one vector index per (tenant, source), \
                  searches only the sources a user may read, and re-checks every hit against \
                  the metadata of record before it is shown or sent to a language model."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/sourcegate/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a single document into one source
    Ingest {
        /// File to ingest (.md, .txt or .json)
        file: PathBuf,

        /// Tenant owning the document
        #[arg(short, long)]
        tenant: String,

        /// Source key the document belongs to
        #[arg(short, long)]
        source: String,

        /// Document title (defaults to the file name)
        #[arg(long)]
        title: Option<String>,

        /// Link back to the original document
        #[arg(long)]
        url: Option<String>,
    },

    /// Ingest a folder whose subdirectories are source keys
    IngestFolder {
        /// Root folder (e.g. data/ with data/public, data/finance, ...)
        dir: PathBuf,

        /// Tenant owning the documents
        #[arg(short, long)]
        tenant: String,
    },

    /// Manage users and their source grants
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Search the sources a user may read
    Search {
        /// Search query text
        query: String,

        /// User to search as
        #[arg(short, long)]
        user: String,

        /// Candidates per source (defaults to config)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Ask a question answered from the user's sources
    Ask {
        /// Question to ask
        question: String,

        /// User to ask as
        #[arg(short, long)]
        user: String,

        /// Force offline mode (disable LLM even if configured)
        #[arg(long)]
        offline: bool,

        /// Show the response in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show a full document the user may read
    Show {
        /// Document ID
        doc_id: String,

        /// User to read as
        #[arg(short, long)]
        user: String,
    },

    /// Rate an answer
    Feedback {
        /// Query log ID printed by `ask`
        log_id: String,

        /// User leaving the feedback
        #[arg(short, long)]
        user: String,

        #[command(flatten)]
        rating: Rating,

        /// Optional comment
        #[arg(long)]
        comment: Option<String>,
    },

    /// Show store statistics
    Stats,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct Rating {
    /// The answer was helpful
    #[arg(long)]
    pub helpful: bool,

    /// The answer was not helpful
    #[arg(long)]
    pub not_helpful: bool,
}

#[derive(Subcommand, Debug)]
pub enum UserAction {
    /// Create a user (returns the existing ID if the email is taken)
    Add {
        #[arg(short, long)]
        tenant: String,

        #[arg(short, long)]
        email: String,

        /// Role; "admin" may read every configured source
        #[arg(short, long, default_value = "member")]
        role: String,

        /// Comma-separated source keys the user may read
        #[arg(short, long, value_delimiter = ',')]
        sources: Vec<String>,
    },

    /// List users of a tenant
    List {
        #[arg(short, long)]
        tenant: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
