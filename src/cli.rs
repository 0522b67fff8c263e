use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "faultline",
    about = "Rank source locations by how likely they are to contain a reported bug",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Project root directory (scanned when no --corpus is given)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Path to config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Color output mode
    #[arg(long, global = true, value_enum, default_value_t = ColorMode::Auto)]
    pub color: ColorMode,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a default faultline.toml
    Init {
        /// Path to write config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Rank candidate locations for a bug report
    #[command(alias = "l")]
    Localize {
        /// Bug report file, or `-` for stdin
        report: String,

        /// JSON corpus file instead of scanning the project root
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Number of ranked locations to return
        #[arg(long)]
        top_k: Option<usize>,

        /// Overall deadline for external calls, in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,

        /// Ask the configured extraction service as well as the local heuristics
        #[arg(long)]
        extract: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,

        /// Write output to file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Classify a bug report without ranking
    Classify {
        /// Bug report file, or `-` for stdin
        report: String,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,

        /// Write output to file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Score localization against known buggy locations
    #[command(alias = "eval")]
    Evaluate {
        /// Directory of bug reports, one file per bug named `<bug id>.<ext>`
        #[arg(long)]
        reports: PathBuf,

        /// JSON file mapping bug id to buggy files or classes
        #[arg(long)]
        ground_truth: PathBuf,

        /// JSON corpus file instead of scanning the project root
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,

        /// Write output to file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Markdown,
    Json,
    Plain,
}
