//! Handler for the `faultline localize` command.
//!
//! Loads a corpus (JSON file or a scan of the project root), builds the
//! pipeline once and ranks candidate locations for a single report.

use std::path::PathBuf;

use colored::Colorize;

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::error::Result;
use crate::output::{self, FormatOptions};
use crate::pipeline::{Localization, Pipeline};
use crate::utils;

/// All inputs needed to run the localize command.
#[derive(Debug)]
pub struct LocalizeCommandOptions {
    /// Project root, scanned when no corpus file is given.
    pub root: PathBuf,
    /// Report path or `-`.
    pub report: String,
    pub corpus: Option<PathBuf>,
    pub top_k: Option<usize>,
    pub deadline_ms: Option<u64>,
    /// Enable the external extraction service for this run.
    pub extract: bool,
    pub format: OutputFormat,
    pub out: Option<PathBuf>,
    pub quiet: bool,
    pub config_path: Option<PathBuf>,
}

pub async fn run(options: LocalizeCommandOptions) -> Result<()> {
    let config = configure(&options)?;
    let text = super::read_report(&options.report)?;
    let corpus = super::load_corpus(options.corpus.as_deref(), &options.root, &config)?;

    let pipeline = Pipeline::new(&config, &corpus)?;
    let localization = pipeline.localize(&text).await?;

    let format = utils::cli_format_to_output_format(&options.format);
    let formatted = output::format_localization(&localization, format)?;
    output::write_output(
        &formatted,
        &FormatOptions {
            format,
            out: options.out.clone(),
        },
    )?;

    if !options.quiet {
        print_summary(&localization);
    }
    Ok(())
}

/// Discovered config with command-line overrides applied.
fn configure(options: &LocalizeCommandOptions) -> Result<Config> {
    let mut config = super::load_config(options.config_path.as_deref())?;
    if let Some(k) = options.top_k {
        config.pipeline.top_k = k;
    }
    if options.deadline_ms.is_some() {
        config.pipeline.deadline_ms = options.deadline_ms;
    }
    if options.extract {
        config.extraction.enabled = true;
    }
    config.validate()?;
    Ok(config)
}

fn print_summary(loc: &Localization) {
    let degraded = match loc.degradations.len() {
        0 => String::new(),
        1 => ", 1 degraded signal".to_string(),
        n => format!(", {n} degraded signals"),
    };
    eprintln!(
        "{} {} of {} candidate{} ranked as {}{}",
        "localize:".green().bold(),
        loc.judgments.len(),
        loc.total_candidates,
        if loc.total_candidates == 1 { "" } else { "s" },
        loc.classification.category,
        degraded,
    );
}
