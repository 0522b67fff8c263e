//! Handler for the `faultline classify` command.

use std::path::PathBuf;

use crate::classifier::BugClassifier;
use crate::cli::OutputFormat;
use crate::error::Result;
use crate::output::{self, FormatOptions};
use crate::utils;

#[derive(Debug)]
pub struct ClassifyCommandOptions {
    /// Report path or `-`.
    pub report: String,
    pub format: OutputFormat,
    pub out: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

/// Classify one report with the configured weight overrides.
pub fn run(options: ClassifyCommandOptions) -> Result<()> {
    let config = super::load_config(options.config_path.as_deref())?;
    let text = super::read_report(&options.report)?;

    let classification = BugClassifier::with_overrides(&config.weights)?.classify(&text)?;

    let format = utils::cli_format_to_output_format(&options.format);
    let formatted = output::format_classification(&classification, format)?;
    output::write_output(
        &formatted,
        &FormatOptions {
            format,
            out: options.out,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_classification_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("bug.txt");
        std::fs::write(&report, "java.lang.ClassCastException: Foo cannot be cast to Bar").unwrap();
        let out = dir.path().join("class.txt");

        run(ClassifyCommandOptions {
            report: report.display().to_string(),
            format: OutputFormat::Plain,
            out: Some(out.clone()),
            config_path: Some(dir.path().join("missing.toml")),
        })
        .unwrap();

        let text = std::fs::read_to_string(out).unwrap();
        assert!(text.starts_with("CastError (confidence 1.00)"), "{text}");
        assert!(text.contains("weights:"));
    }

    #[test]
    fn missing_report_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(ClassifyCommandOptions {
            report: dir.path().join("nope.txt").display().to_string(),
            format: OutputFormat::Plain,
            out: None,
            config_path: Some(dir.path().join("missing.toml")),
        })
        .unwrap_err();
        assert!(err.to_string().contains("reading bug report"));
    }
}
