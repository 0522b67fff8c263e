use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use faultline::cli::{Cli, ColorMode, Command};
use faultline::commands;
use faultline::commands::classify::ClassifyCommandOptions;
use faultline::commands::evaluate::EvaluateCommandOptions;
use faultline::commands::init::{InitOptions, InitResult};
use faultline::commands::localize::LocalizeCommandOptions;
use faultline::error::FaultlineError;

fn main() {
    let cli = Cli::parse();

    // Configure color output
    match cli.color {
        ColorMode::Always => colored::control::set_override(true),
        ColorMode::Never => colored::control::set_override(false),
        ColorMode::Auto => {}
    }

    // Init tracing
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli) {
        eprintln!("{} {err:#}", "error:".red().bold());
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init { config, force } => {
            let root = resolve_root(cli.root)?;
            let result = commands::init::run(InitOptions {
                root,
                config_path: config,
                force,
            })?;
            if !cli.quiet {
                print_init_result(&result);
            }
        }
        Command::Localize {
            report,
            corpus,
            top_k,
            deadline_ms,
            extract,
            format,
            out,
        } => {
            let root = resolve_root(cli.root)?;
            runtime()?.block_on(commands::localize::run(LocalizeCommandOptions {
                root,
                report,
                corpus,
                top_k,
                deadline_ms,
                extract,
                format,
                out,
                quiet: cli.quiet,
                config_path: cli.config,
            }))?;
        }
        Command::Classify {
            report,
            format,
            out,
        } => commands::classify::run(ClassifyCommandOptions {
            report,
            format,
            out,
            config_path: cli.config,
        })?,
        Command::Evaluate {
            reports,
            ground_truth,
            corpus,
            format,
            out,
        } => {
            let root = resolve_root(cli.root)?;
            runtime()?.block_on(commands::evaluate::run(EvaluateCommandOptions {
                root,
                reports,
                ground_truth,
                corpus,
                format,
                out,
                quiet: cli.quiet,
                config_path: cli.config,
            }))?;
        }
    }
    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")
}

fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf, FaultlineError> {
    match root {
        Some(p) => Ok(p),
        None => std::env::current_dir()
            .map_err(|e| FaultlineError::io("getting current directory", e)),
    }
}

fn print_init_result(result: &InitResult) {
    let verb = if result.overwritten { "Replaced" } else { "Created" };
    println!(
        "{} {verb} config at {}",
        "ok".green().bold(),
        result.config_path.display()
    );
    println!();
    println!("Next steps:");
    println!(
        "  1. Edit {} to tune weights and scanning",
        "faultline.toml".bold()
    );
    println!(
        "  2. Run {} to rank suspects for a bug report",
        "faultline localize <report>".bold()
    );
}
