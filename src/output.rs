//! Output formatting for localization results.
//!
//! Renders a [`Localization`], a bare [`BugClassification`], or evaluation
//! [`Metrics`] in the user's chosen format (Markdown, JSON, or plain text)
//! and writes the result to a file or stdout.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::classifier::{BugClassification, Signal};
use crate::collab::Relationships;
use crate::error::{FaultlineError, Result};
use crate::eval::Metrics;
use crate::pipeline::Localization;
use crate::ranker::Judgment;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Controls where and how output is written.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// Desired output format.
    pub format: Format,
    /// File path to write to; stdout when `None`.
    pub out: Option<PathBuf>,
}

/// Supported output formats.
///
/// Mirrors [`crate::cli::OutputFormat`] but decoupled from clap so that
/// library code can use it without pulling in CLI dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Markdown,
    Json,
    Plain,
}

// ---------------------------------------------------------------------------
// Localization
// ---------------------------------------------------------------------------

/// Render a localization in the given format.
pub fn format_localization(loc: &Localization, format: Format) -> Result<String> {
    match format {
        Format::Markdown => Ok(localization_markdown(loc)),
        Format::Json => to_json(loc, "localization"),
        Format::Plain => Ok(localization_plain(loc)),
    }
}

fn summary_line(loc: &Localization) -> String {
    format!(
        "{} (confidence {:.2}), {} candidates, consensus {:.1}%",
        loc.classification.category,
        loc.classification.confidence,
        loc.total_candidates,
        loc.consensus_rate * 100.0
    )
}

/// Markdown: a ranking table followed by related classes and the trace.
fn localization_markdown(loc: &Localization) -> String {
    let mut out = String::new();
    out.push_str("# Bug Localization\n\n");
    out.push_str(&format!("> {}\n\n", summary_line(loc)));

    if loc.judgments.is_empty() {
        out.push_str("_No candidate locations._\n\n");
    } else {
        out.push_str("| Rank | Score | Location | File | ST | Rel | Pat | Cov | Why |\n");
        out.push_str("|---:|---:|---|---|---:|---:|---:|---:|---|\n");
        for j in &loc.judgments {
            out.push_str(&format!(
                "| {} | {:.3} | `{}` ({}) | {} | {} | {} |\n",
                j.rank,
                j.final_score,
                j.candidate.qualified_name,
                j.candidate.kind,
                code_or_dash(&j.candidate.file_path),
                signal_cells(j).join(" | "),
                j.explanation.replace('|', "\\|"),
            ));
        }
        out.push('\n');
    }

    if !loc.related.is_empty() {
        out.push_str("## Related\n\n");
        for (class, rel) in &loc.related {
            out.push_str(&format!("- `{class}`: {}\n", describe_relationships(rel)));
        }
        out.push('\n');
    }

    if !loc.degradations.is_empty() {
        out.push_str("## Degraded signals\n\n");
        for note in &loc.degradations {
            out.push_str(&format!("- {note}\n"));
        }
        out.push('\n');
    }

    out.push_str("## Trace\n\n");
    for entry in &loc.trace {
        out.push_str(&format!("- {entry}\n"));
    }
    out
}

/// Plain text: one line per location, no decoration.
fn localization_plain(loc: &Localization) -> String {
    let mut out = String::new();
    out.push_str(&summary_line(loc));
    out.push_str("\n\n");
    for j in &loc.judgments {
        out.push_str(&format!(
            "{:>3}. {:.3}  {}",
            j.rank, j.final_score, j.candidate.qualified_name
        ));
        if !j.candidate.file_path.is_empty() {
            out.push_str(&format!("  ({})", j.candidate.file_path));
        }
        out.push_str(&format!("\n     {}\n", j.explanation));
    }
    for note in &loc.degradations {
        out.push_str(&format!("degraded: {note}\n"));
    }
    out
}

fn signal_cells(j: &Judgment) -> Vec<String> {
    Signal::ALL
        .iter()
        .map(|&s| format!("{:.2}", j.signals.get(s).score))
        .collect()
}

fn code_or_dash(s: &str) -> String {
    if s.is_empty() {
        "-".to_string()
    } else {
        format!("`{s}`")
    }
}

fn describe_relationships(rel: &Relationships) -> String {
    let parts: Vec<String> = [
        ("extends", &rel.extends),
        ("implements", &rel.implements),
        ("uses", &rel.uses),
        ("used by", &rel.used_by),
    ]
    .into_iter()
    .filter(|(_, names)| !names.is_empty())
    .map(|(label, names)| format!("{label} {}", names.join(", ")))
    .collect();
    parts.join("; ")
}

// ---------------------------------------------------------------------------
// Classification and metrics
// ---------------------------------------------------------------------------

pub fn format_classification(c: &BugClassification, format: Format) -> Result<String> {
    if format == Format::Json {
        return to_json(c, "classification");
    }
    let mut out = String::new();
    let weights: Vec<String> = Signal::ALL
        .iter()
        .map(|&s| format!("{s}={:.2}", c.weight_profile.get(s)))
        .collect();
    if format == Format::Markdown {
        out.push_str("# Bug Classification\n\n");
        out.push_str(&format!("- **Category:** {}\n", c.category));
        out.push_str(&format!("- **Confidence:** {:.2}\n", c.confidence));
        out.push_str(&format!("- **Weights:** {}\n", weights.join(", ")));
        if !c.indicators.is_empty() {
            out.push_str(&format!("- **Indicators:** {}\n", c.indicators.join(", ")));
        }
    } else {
        out.push_str(&format!("{} (confidence {:.2})\n", c.category, c.confidence));
        out.push_str(&format!("weights: {}\n", weights.join(", ")));
        if !c.indicators.is_empty() {
            out.push_str(&format!("indicators: {}\n", c.indicators.join(", ")));
        }
    }
    Ok(out)
}

pub fn format_metrics(m: &Metrics, format: Format) -> Result<String> {
    let rows = [
        ("Top-1 accuracy", format!("{:.2}%", m.top_1)),
        ("Top-5 accuracy", format!("{:.2}%", m.top_5)),
        ("Top-10 accuracy", format!("{:.2}%", m.top_10)),
        ("MRR", format!("{:.4}", m.mrr)),
        ("MAP", format!("{:.4}", m.map)),
    ];
    match format {
        Format::Json => to_json(m, "metrics"),
        Format::Markdown => {
            let mut out = format!("# Evaluation\n\n> {} bugs evaluated\n\n", m.evaluated);
            out.push_str("| Metric | Value |\n|---|---:|\n");
            for (name, value) in rows {
                out.push_str(&format!("| {name} | {value} |\n"));
            }
            Ok(out)
        }
        Format::Plain => {
            let mut out = format!("{} bugs evaluated\n", m.evaluated);
            for (name, value) in rows {
                out.push_str(&format!("{name:<16} {value}\n"));
            }
            Ok(out)
        }
    }
}

fn to_json<T: Serialize>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| {
        FaultlineError::config_with_source(format!("failed to serialize {what} as JSON"), e)
    })
}

// ---------------------------------------------------------------------------
// Output writing
// ---------------------------------------------------------------------------

/// Write a formatted string to `options.out`, or stdout when unset.
pub fn write_output(content: &str, options: &FormatOptions) -> Result<()> {
    match &options.out {
        Some(path) => write_to_file(content, path),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(content.as_bytes())
                .map_err(|e| FaultlineError::io("writing to stdout", e))
        }
    }
}

/// Write content to a file, creating parent directories if needed.
fn write_to_file(content: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            FaultlineError::io(format!("creating directory '{}'", parent.display()), e)
        })?;
    }
    std::fs::write(path, content)
        .map_err(|e| FaultlineError::io(format!("writing output to '{}'", path.display()), e))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::agents::CandidateLocation;
    use crate::classifier::BugCategory;
    use crate::extract::BugReport;
    use crate::pipeline::{Stage, TraceEntry};
    use crate::ranker::{SignalScore, SignalScores};

    fn score(score: f64) -> SignalScore {
        SignalScore {
            score,
            confidence: 1.0,
            evidence: Vec::new(),
        }
    }

    fn sample() -> Localization {
        let category = BugCategory::Npe;
        let mut related = BTreeMap::new();
        related.insert(
            "a.World".to_string(),
            Relationships {
                extends: vec!["a.Base".into()],
                used_by: vec!["a.Shadow".into()],
                ..Relationships::default()
            },
        );
        Localization {
            report: BugReport::empty("NPE in World"),
            classification: BugClassification {
                category,
                confidence: 1.0,
                weight_profile: category.default_profile(),
                indicators: vec!["NullPointerException".into()],
            },
            judgments: vec![Judgment {
                candidate: CandidateLocation::class("a.World", "src/a/World.java"),
                final_score: 0.8123,
                signals: SignalScores {
                    stack_trace: score(1.0),
                    relevance: score(0.5),
                    pattern: score(0.0),
                    coverage: score(0.25),
                },
                consensus: false,
                conflict_resolved: true,
                explanation: "primary signal: stack_trace (1.00) | odd".into(),
                rank: 1,
            }],
            total_candidates: 7,
            consensus_rate: 0.0,
            weights: category.default_profile(),
            related,
            trace: vec![TraceEntry {
                stage: Stage::Extract,
                elapsed_ms: 3,
                detail: "heuristic extraction".into(),
            }],
            degradations: vec!["source for a.World: timed out".into()],
        }
    }

    #[test]
    fn markdown_has_table_related_and_trace() {
        let out = format_localization(&sample(), Format::Markdown).unwrap();
        assert!(out.contains("> NPE (confidence 1.00), 7 candidates, consensus 0.0%"));
        assert!(out.contains(
            "| 1 | 0.812 | `a.World` (class) | `src/a/World.java` | 1.00 | 0.50 | 0.00 | 0.25 |"
        ));
        assert!(out.contains("\\| odd"));
        assert!(out.contains("- `a.World`: extends a.Base; used by a.Shadow"));
        assert!(out.contains("## Degraded signals"));
        assert!(out.contains("- [1] extract: heuristic extraction (3 ms)"));
    }

    #[test]
    fn markdown_notes_empty_result() {
        let mut loc = sample();
        loc.judgments.clear();
        let out = format_localization(&loc, Format::Markdown).unwrap();
        assert!(out.contains("_No candidate locations._"));
    }

    #[test]
    fn json_is_valid() {
        let out = format_localization(&sample(), Format::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["total_candidates"], 7);
        assert_eq!(parsed["judgments"][0]["candidate"]["kind"], "class");
        assert_eq!(parsed["classification"]["category"], "npe");
        assert_eq!(parsed["trace"][0]["stage"], "extract");
    }

    #[test]
    fn plain_lists_locations() {
        let out = format_localization(&sample(), Format::Plain).unwrap();
        assert!(out.contains("  1. 0.812  a.World  (src/a/World.java)"));
        assert!(out.contains("degraded: source for a.World: timed out"));
    }

    #[test]
    fn classification_formats() {
        let c = sample().classification;
        let md = format_classification(&c, Format::Markdown).unwrap();
        assert!(md.contains("- **Category:** NPE"));
        let plain = format_classification(&c, Format::Plain).unwrap();
        assert!(plain.starts_with("NPE (confidence 1.00)"));
        assert!(plain.contains("stack_trace="));
    }

    #[test]
    fn metrics_formats() {
        let m = Metrics {
            evaluated: 2,
            top_1: 50.0,
            top_5: 100.0,
            top_10: 100.0,
            mrr: 0.75,
            map: 0.6,
        };
        let md = format_metrics(&m, Format::Markdown).unwrap();
        assert!(md.contains("| Top-1 accuracy | 50.00% |"));
        let plain = format_metrics(&m, Format::Plain).unwrap();
        assert!(plain.contains("MRR              0.7500"));
        let json = format_metrics(&m, Format::Json).unwrap();
        assert!(json.contains("\"evaluated\": 2"));
    }

    #[test]
    fn write_to_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("dir").join("output.md");
        write_to_file("hello", &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }
}
