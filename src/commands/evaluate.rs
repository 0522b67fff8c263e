//! Handler for the `faultline evaluate` command.
//!
//! Localizes every report in a directory against one corpus and scores the
//! rankings against a ground-truth file. Reports run one after another so
//! an external extraction service sees paced calls.

use std::path::{Path, PathBuf};

use colored::Colorize;
use tracing::debug;

use crate::cli::OutputFormat;
use crate::error::{FaultlineError, Result};
use crate::eval::{self, BugResult};
use crate::output::{self, FormatOptions};
use crate::pipeline::Pipeline;
use crate::utils;

#[derive(Debug)]
pub struct EvaluateCommandOptions {
    pub root: PathBuf,
    /// Directory of `<bug id>.<ext>` report files.
    pub reports: PathBuf,
    pub ground_truth: PathBuf,
    pub corpus: Option<PathBuf>,
    pub format: OutputFormat,
    pub out: Option<PathBuf>,
    pub quiet: bool,
    pub config_path: Option<PathBuf>,
}

pub async fn run(options: EvaluateCommandOptions) -> Result<()> {
    let config = super::load_config(options.config_path.as_deref())?;
    let truth = eval::load_ground_truth(&options.ground_truth)?;
    let reports = list_reports(&options.reports)?;
    let corpus = super::load_corpus(options.corpus.as_deref(), &options.root, &config)?;
    let pipeline = Pipeline::new(&config, &corpus)?;

    let mut results = Vec::with_capacity(reports.len());
    for (bug_id, path) in &reports {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FaultlineError::io(format!("reading bug report '{}'", path.display()), e)
        })?;
        let localization = pipeline.localize(&text).await?;
        debug!(bug_id = bug_id.as_str(), candidates = localization.total_candidates, "localized");
        results.push(BugResult::from_localization(bug_id.as_str(), &localization));
    }

    let metrics = eval::evaluate(&results, &truth);

    let format = utils::cli_format_to_output_format(&options.format);
    let formatted = output::format_metrics(&metrics, format)?;
    output::write_output(
        &formatted,
        &FormatOptions {
            format,
            out: options.out.clone(),
        },
    )?;

    if !options.quiet {
        eprintln!(
            "{} {} of {} report{} had ground truth",
            "evaluate:".green().bold(),
            metrics.evaluated,
            reports.len(),
            if reports.len() == 1 { "" } else { "s" },
        );
    }
    Ok(())
}

/// Report files in `dir` as (bug id, path), sorted by bug id.
fn list_reports(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !dir.is_dir() {
        return Err(FaultlineError::invalid_path(
            dir.display().to_string(),
            "reports must be a directory",
        ));
    }
    let entries = std::fs::read_dir(dir)
        .map_err(|e| FaultlineError::io(format!("listing reports in '{}'", dir.display()), e))?;

    let mut reports = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| FaultlineError::io(format!("listing reports in '{}'", dir.display()), e))?
            .path();
        if !path.is_file() {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.starts_with('.') {
            continue;
        }
        reports.push((stem.to_string(), path));
    }
    reports.sort();

    if reports.is_empty() {
        return Err(FaultlineError::validation(
            "reports",
            format!("no bug reports found in '{}'", dir.display()),
        ));
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_are_listed_by_stem_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Lang-2.txt"), "b").unwrap();
        std::fs::write(dir.path().join("Lang-1.md"), "a").unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let ids: Vec<String> = list_reports(dir.path())
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["Lang-1", "Lang-2"]);
    }

    #[test]
    fn empty_report_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_reports(dir.path()).unwrap_err();
        assert!(err.is_user_error());
        assert!(err.to_string().contains("no bug reports"));
    }

    #[tokio::test]
    async fn scores_rankings_against_ground_truth() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("corpus.json");
        std::fs::write(
            &corpus,
            r#"[
                {"id": "a.Parser", "text": "Parser parse token grammar", "file_path": "a/Parser.java"},
                {"id": "a.Printer", "text": "Printer print format output", "file_path": "a/Printer.java"}
            ]"#,
        )
        .unwrap();
        let reports = dir.path().join("reports");
        std::fs::create_dir(&reports).unwrap();
        std::fs::write(
            reports.join("B1.txt"),
            "Crash in parser\n\tat a.Parser.parse(Parser.java:3)\n",
        )
        .unwrap();
        let truth = dir.path().join("truth.json");
        std::fs::write(&truth, r#"{"B1": ["a/Parser.java"]}"#).unwrap();
        let out = dir.path().join("metrics.json");

        run(EvaluateCommandOptions {
            root: dir.path().to_path_buf(),
            reports,
            ground_truth: truth,
            corpus: Some(corpus),
            format: OutputFormat::Json,
            out: Some(out.clone()),
            quiet: true,
            config_path: Some(dir.path().join("missing.toml")),
        })
        .await
        .unwrap();

        let metrics: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out).unwrap()).unwrap();
        assert_eq!(metrics["evaluated"], 1);
        assert_eq!(metrics["top_1"], 100.0);
        assert_eq!(metrics["mrr"], 1.0);
    }
}
