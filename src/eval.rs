//! Ranking quality metrics against known buggy locations.
//!
//! Ground truth maps a bug id to the files or classes that were fixed.
//! A prediction hits when its file path, file name, qualified class name
//! or simple class name appears in that set.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FaultlineError, Result};
use crate::pipeline::Localization;
use crate::utils::simple_name;

/// Bug id -> buggy files or class names.
pub type GroundTruth = BTreeMap<String, Vec<String>>;

/// One ranked location, reduced to what matching needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub file_path: String,
    /// Qualified name of the owning class.
    pub class_name: String,
}

impl Prediction {
    fn hits(&self, actual: &HashSet<&str>) -> bool {
        let file_name = self.file_path.rsplit('/').next().unwrap_or(&self.file_path);
        (!self.file_path.is_empty()
            && (actual.contains(self.file_path.as_str()) || actual.contains(file_name)))
            || actual.contains(self.class_name.as_str())
            || actual.contains(simple_name(&self.class_name))
    }
}

/// Ranked predictions for one bug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugResult {
    pub bug_id: String,
    pub predictions: Vec<Prediction>,
}

impl BugResult {
    /// Predictions in rank order, one per owning class.
    ///
    /// A method candidate and its class name the same location, so only
    /// the better-ranked of the two is kept.
    pub fn from_localization(bug_id: impl Into<String>, localization: &Localization) -> Self {
        let mut seen = HashSet::new();
        let predictions = localization
            .judgments
            .iter()
            .filter(|j| seen.insert(j.candidate.owner_class().to_string()))
            .map(|j| Prediction {
                file_path: j.candidate.file_path.clone(),
                class_name: j.candidate.owner_class().to_string(),
            })
            .collect();
        Self {
            bug_id: bug_id.into(),
            predictions,
        }
    }
}

/// Aggregate metrics. Accuracies are percentages.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Metrics {
    /// Bugs that had ground truth.
    pub evaluated: usize,
    pub top_1: f64,
    pub top_5: f64,
    pub top_10: f64,
    pub mrr: f64,
    pub map: f64,
}

/// Results paired with their ground truth; bugs without one are skipped.
fn judged<'a>(
    results: &'a [BugResult],
    truth: &'a GroundTruth,
) -> impl Iterator<Item = (&'a BugResult, HashSet<&'a str>)> {
    results.iter().filter_map(move |r| {
        truth
            .get(&r.bug_id)
            .map(|actual| (r, actual.iter().map(String::as_str).collect()))
    })
}

/// Percentage of bugs with a hit in the first `k` predictions.
pub fn top_k_accuracy(results: &[BugResult], truth: &GroundTruth, k: usize) -> f64 {
    let mut total = 0;
    let mut hits = 0;
    for (result, actual) in judged(results, truth) {
        total += 1;
        if result.predictions.iter().take(k).any(|p| p.hits(&actual)) {
            hits += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64 * 100.0
    }
}

/// Mean reciprocal rank of the first hit.
pub fn mean_reciprocal_rank(results: &[BugResult], truth: &GroundTruth) -> f64 {
    let mut total = 0;
    let mut sum = 0.0;
    for (result, actual) in judged(results, truth) {
        total += 1;
        if let Some(pos) = result.predictions.iter().position(|p| p.hits(&actual)) {
            sum += 1.0 / (pos + 1) as f64;
        }
    }
    if total == 0 {
        0.0
    } else {
        sum / total as f64
    }
}

/// Mean over bugs of average precision at each hit.
pub fn mean_average_precision(results: &[BugResult], truth: &GroundTruth) -> f64 {
    let mut total = 0;
    let mut sum = 0.0;
    for (result, actual) in judged(results, truth) {
        total += 1;
        if actual.is_empty() {
            continue;
        }
        let mut hits = 0;
        let mut precision = 0.0;
        for (i, p) in result.predictions.iter().enumerate() {
            if p.hits(&actual) {
                hits += 1;
                precision += hits as f64 / (i + 1) as f64;
            }
        }
        sum += precision / actual.len() as f64;
    }
    if total == 0 {
        0.0
    } else {
        sum / total as f64
    }
}

pub fn evaluate(results: &[BugResult], truth: &GroundTruth) -> Metrics {
    Metrics {
        evaluated: judged(results, truth).count(),
        top_1: top_k_accuracy(results, truth, 1),
        top_5: top_k_accuracy(results, truth, 5),
        top_10: top_k_accuracy(results, truth, 10),
        mrr: mean_reciprocal_rank(results, truth),
        map: mean_average_precision(results, truth),
    }
}

/// Read a JSON ground-truth file.
pub fn load_ground_truth(path: &Path) -> Result<GroundTruth> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        FaultlineError::io(format!("reading ground truth '{}'", path.display()), e)
    })?;
    serde_json::from_str(&content).map_err(|e| {
        FaultlineError::validation(
            "ground_truth",
            format!("'{}' is not a JSON object of id -> [locations]: {e}", path.display()),
        )
    })
}
