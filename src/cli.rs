use clap::{ArgAction, Parser, Subcommand};

pub const DEFAULT_MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

/// A filter/extract engine for log corpora spread across directory trees
/// and (possibly nested) zip archives
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Lines of context after the matched line (excerpt output)
    #[arg(long, global = true, default_value_t = 0)]
    pub after: i64,

    /// Token substituted for embedded newlines so an excerpt stays on one line
    #[arg(
        long,
        global = true,
        default_value = "\\n",
        env = "LOG_SIFT_LINE_DELIMITER"
    )]
    pub line_delimiter: String,

    /// Only consider entries inside zip archives
    #[arg(long, global = true, conflicts_with = "file_only")]
    pub zip_only: bool,

    /// Only consider plain files; archives are not opened
    #[arg(long, global = true)]
    pub file_only: bool,

    /// Maximum bytes of a single entry held in memory for content matching
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_MAX_ENTRY_BYTES,
        env = "LOG_SIFT_MAX_ENTRY_BYTES"
    )]
    pub max_entry_bytes: u64,

    /// Scan top-level subtrees on a worker pool of this size (0 = all cores)
    #[arg(long, global = true)]
    pub parallel: Option<usize>,

    /// Suppress warnings and progress
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Report skipped entries and a scan summary
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List entries whose name matches a pattern
    Name {
        /// Directory to scan, or '-' to read entry paths from stdin
        root: String,

        /// Regex applied to the entry name
        pattern: String,

        /// Match the full virtual path instead of the final segment
        #[arg(long)]
        full_path: bool,

        /// Case-insensitive matching
        #[arg(short = 'i', long)]
        ignore_case: bool,
    },
    /// Print excerpts from entries whose text matches a regex
    Regex {
        /// Directory to scan, or '-' to read entry paths from stdin
        root: String,

        /// Regex restricting which entries have their content searched
        name_pattern: String,

        /// Regex searched for in the entry text (multi-line mode)
        pattern: String,

        /// Print matching entry paths instead of excerpts
        #[arg(short = 'l', long)]
        files: bool,

        /// Prefix each excerpt with the entry path and this separator
        #[arg(
            long,
            value_name = "SEP",
            num_args = 0..=1,
            require_equals = true,
            default_missing_value = ": "
        )]
        with_path: Option<String>,
    },
    /// Select entries whose sibling JSON document satisfies a predicate
    Jq {
        /// Directory to scan, or '-' to read entry paths from stdin
        root: String,

        /// Name of the JSON document resolved within each archive or directory
        target: String,

        /// Predicate, e.g. 'applicationVersion == "1.24.36" and tags contains "application log"'
        expr: String,

        /// Print matching entry paths instead of excerpts
        #[arg(short = 'l', long)]
        files: bool,
    },
}

impl Commands {
    pub fn root(&self) -> &str {
        match self {
            Commands::Name { root, .. }
            | Commands::Regex { root, .. }
            | Commands::Jq { root, .. } => root,
        }
    }
}

pub fn cli_parse() -> Cli {
    Cli::parse()
}
