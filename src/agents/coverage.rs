//! Test-coupling evidence.
//!
//! The index maps subject classes to the test files exercising them and
//! records which subjects are tested together. It is built once per corpus
//! and shared read-only.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CandidateLocation, SignalEvidence, SignalMap};
use crate::error::{FaultlineError, Result};
use crate::utils::tested_class;

pub const OWN_TEST_WEIGHT: f64 = 0.3;
pub const CO_TESTED_WEIGHT: f64 = 0.4;
pub const MENTION_WEIGHT: f64 = 0.3;

const MENTION_PATTERNS: &[&str] = &[r"Test\w+", r"\w+Tests?", r"test\w+\(\)", r"@Test"];

/// A test source file and the classes it declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestFile {
    pub path: String,
    #[serde(default)]
    pub classes: Vec<String>,
}

/// Subject-to-test mapping and co-occurrence relation.
#[derive(Debug, Clone, Default)]
pub struct CoverageIndex {
    tests_by_class: BTreeMap<String, Vec<String>>,
    co_tested: BTreeMap<String, BTreeSet<String>>,
}

impl CoverageIndex {
    pub fn build(test_files: &[TestFile]) -> Self {
        let mut index = Self::default();
        for file in test_files {
            let subjects: BTreeSet<&str> = file
                .classes
                .iter()
                .filter_map(|c| tested_class(c))
                .collect();
            for subject in &subjects {
                let tests = index.tests_by_class.entry(subject.to_string()).or_default();
                if !tests.contains(&file.path) {
                    tests.push(file.path.clone());
                }
            }
            for a in &subjects {
                for b in &subjects {
                    if a != b {
                        index
                            .co_tested
                            .entry(a.to_string())
                            .or_default()
                            .insert(b.to_string());
                    }
                }
            }
        }
        debug!(
            test_files = test_files.len(),
            subjects = index.tests_by_class.len(),
            "coverage index built"
        );
        index
    }

    pub fn is_empty(&self) -> bool {
        self.tests_by_class.is_empty()
    }

    /// Test files exercising `class` (simple name).
    pub fn tests_for(&self, class: &str) -> &[String] {
        self.tests_by_class
            .get(class)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Classes sharing a test file with `class` (simple name).
    pub fn co_tested_with(&self, class: &str) -> Option<&BTreeSet<String>> {
        self.co_tested.get(class)
    }
}

/// Scores candidates by test coupling.
#[derive(Debug, Clone)]
pub struct CoverageAgent {
    index: Arc<CoverageIndex>,
    mention_patterns: Vec<Regex>,
}

impl CoverageAgent {
    pub fn new(index: Arc<CoverageIndex>) -> Result<Self> {
        let mention_patterns = MENTION_PATTERNS
            .iter()
            .map(|p| Regex::new(p).map_err(|e| FaultlineError::pattern(*p, e.to_string())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            index,
            mention_patterns,
        })
    }

    /// Test-like tokens mentioned in a report.
    pub fn test_mentions(&self, report: &str) -> BTreeSet<String> {
        self.mention_patterns
            .iter()
            .flat_map(|re| re.find_iter(report).map(|m| m.as_str().to_string()))
            .collect()
    }

    /// Coverage score per candidate, capped at 1.0.
    ///
    /// - +0.3 when the class has its own test file.
    /// - +0.4 scaled by the share of the other candidate classes it is
    ///   co-tested with.
    /// - +0.3 when a test-like token in the report contains its name.
    pub fn score(&self, candidates: &[CandidateLocation], report: &str) -> SignalMap {
        let mentions: Vec<(String, String)> = self
            .test_mentions(report)
            .into_iter()
            .map(|m| (m.to_lowercase(), m))
            .collect();
        let names: HashSet<&str> = candidates.iter().map(|c| c.owner_simple_name()).collect();

        candidates
            .iter()
            .map(|candidate| {
                let name = candidate.owner_simple_name();
                let mut score = 0.0;
                let mut evidence = Vec::new();

                if let Some(first) = self.index.tests_for(name).first() {
                    score += OWN_TEST_WEIGHT;
                    evidence.push(format!("tested by {first}"));
                }

                let others = names.len().saturating_sub(1);
                if others > 0 {
                    if let Some(co) = self.index.co_tested_with(name) {
                        let overlap: Vec<&str> = co
                            .iter()
                            .map(String::as_str)
                            .filter(|c| *c != name && names.contains(c))
                            .collect();
                        if !overlap.is_empty() {
                            score += CO_TESTED_WEIGHT * overlap.len() as f64 / others as f64;
                            evidence.push(format!("co-tested with {}", overlap.join(", ")));
                        }
                    }
                }

                let lowered = name.to_lowercase();
                if let Some((_, mention)) = mentions.iter().find(|(l, _)| l.contains(&lowered)) {
                    score += MENTION_WEIGHT;
                    evidence.push(format!("mentioned in {mention}"));
                }

                (candidate.key(), SignalEvidence::new(score.min(1.0), evidence))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_file(path: &str, classes: &[&str]) -> TestFile {
        TestFile {
            path: path.into(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn agent() -> CoverageAgent {
        let index = CoverageIndex::build(&[
            test_file("t/WorldTest.java", &["WorldTest"]),
            test_file("t/WeavingTests.java", &["WorldTest", "ShadowTests", "TestBcelWorld"]),
        ]);
        CoverageAgent::new(Arc::new(index)).unwrap()
    }

    #[test]
    fn index_maps_test_names_to_subjects() {
        let a = agent();
        assert_eq!(
            a.index.tests_for("World"),
            &["t/WorldTest.java".to_string(), "t/WeavingTests.java".to_string()]
        );
        assert_eq!(a.index.tests_for("Shadow"), &["t/WeavingTests.java".to_string()]);
        assert!(a.index.tests_for("Advice").is_empty());
        let co = a.index.co_tested_with("World").unwrap();
        assert!(co.contains("Shadow") && co.contains("BcelWorld"));
        assert!(!co.contains("World"));
    }

    #[test]
    fn mentions_use_test_shapes() {
        let mentions = agent().test_mentions("NPE in WorldTest during testResolve() @Test");
        assert!(mentions.contains("WorldTest"));
        assert!(mentions.contains("testResolve()"));
        assert!(mentions.contains("@Test"));
    }

    #[test]
    fn score_combines_factors() {
        let candidates = vec![
            CandidateLocation::class("a.World", ""),
            CandidateLocation::class("a.Shadow", ""),
            CandidateLocation::class("a.Advice", ""),
        ];
        let scores = agent().score(&candidates, "NPE in WorldTest when resolving types");

        // own test + co-tested with 1 of 2 others + mention
        let world = &scores[&candidates[0].key()];
        assert!((world.score - (0.3 + 0.4 * 0.5 + 0.3)).abs() < 1e-9);
        assert_eq!(world.evidence.len(), 3);

        let shadow = &scores[&candidates[1].key()];
        assert!((shadow.score - (0.3 + 0.2)).abs() < 1e-9);

        assert_eq!(scores[&candidates[2].key()].score, 0.0);
    }

    #[test]
    fn score_is_capped() {
        let index = CoverageIndex::build(&[test_file("t/ABTest.java", &["ATest", "BTest"])]);
        let agent = CoverageAgent::new(Arc::new(index)).unwrap();
        let candidates = vec![
            CandidateLocation::class("x.A", ""),
            CandidateLocation::class("x.B", ""),
        ];
        let scores = agent.score(&candidates, "ATest fails");
        let a = &scores[&candidates[0].key()];
        assert!((a.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_index_scores_zero() {
        let agent = CoverageAgent::new(Arc::new(CoverageIndex::default())).unwrap();
        let candidates = vec![CandidateLocation::class("a.World", "")];
        assert_eq!(agent.score(&candidates, "no tests here")[&candidates[0].key()].score, 0.0);
    }
}
