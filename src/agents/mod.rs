//! Independent scoring agents, one per evidence signal.
//!
//! Every agent reads the fixed candidate set plus the parsed report and
//! returns a [`SignalMap`]; none of them see each other's output. Missing
//! data (no source text, no test evidence, no index hit) produces a zero
//! score rather than an error.

pub mod coverage;
pub mod pattern;
pub mod relevance;
pub mod stack_trace;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::{simple_name, split_member};

pub use coverage::{CoverageAgent, CoverageIndex, TestFile};
pub use pattern::{PatternAgent, PatternAnalysis, PatternRule};
pub use relevance::RelevanceAgent;

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    Class,
    Method,
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class => f.write_str("class"),
            Self::Method => f.write_str("method"),
        }
    }
}

/// Unique identity of a candidate within one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateKey {
    pub kind: CandidateKind,
    pub qualified_name: String,
}

impl fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.qualified_name)
    }
}

/// A code unit that may contain the reported defect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateLocation {
    pub kind: CandidateKind,
    pub qualified_name: String,
    pub file_path: String,
}

impl CandidateLocation {
    pub fn class(qualified_name: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            kind: CandidateKind::Class,
            qualified_name: qualified_name.into(),
            file_path: file_path.into(),
        }
    }

    pub fn method(qualified_name: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            kind: CandidateKind::Method,
            qualified_name: qualified_name.into(),
            file_path: file_path.into(),
        }
    }

    pub fn key(&self) -> CandidateKey {
        CandidateKey {
            kind: self.kind,
            qualified_name: self.qualified_name.clone(),
        }
    }

    /// Qualified name of the class this candidate belongs to.
    pub fn owner_class(&self) -> &str {
        match self.kind {
            CandidateKind::Class => &self.qualified_name,
            CandidateKind::Method => split_member(&self.qualified_name)
                .map(|(owner, _)| owner)
                .unwrap_or(&self.qualified_name),
        }
    }

    /// Simple name of the owning class.
    pub fn owner_simple_name(&self) -> &str {
        simple_name(self.owner_class())
    }

    /// Simple name of the candidate itself (class or method name).
    pub fn simple_name(&self) -> &str {
        simple_name(&self.qualified_name)
    }
}

// ---------------------------------------------------------------------------
// Agent output
// ---------------------------------------------------------------------------

/// One agent's raw verdict on one candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalEvidence {
    pub score: f64,
    pub evidence: Vec<String>,
}

impl SignalEvidence {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn new(score: f64, evidence: Vec<String>) -> Self {
        Self { score, evidence }
    }
}

/// Per-candidate output of one agent.
pub type SignalMap = HashMap<CandidateKey, SignalEvidence>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_owner_is_qualifier() {
        let m = CandidateLocation::method("a.b.Foo.bar", "a/b/Foo.java");
        assert_eq!(m.owner_class(), "a.b.Foo");
        assert_eq!(m.owner_simple_name(), "Foo");
        assert_eq!(m.simple_name(), "bar");
    }

    #[test]
    fn class_owner_is_itself() {
        let c = CandidateLocation::class("a.b.Foo", "");
        assert_eq!(c.owner_class(), "a.b.Foo");
        assert_eq!(c.key().to_string(), "class:a.b.Foo");
    }

    #[test]
    fn keys_distinguish_kind() {
        let c = CandidateLocation::class("x.Y", "").key();
        let m = CandidateLocation::method("x.Y", "").key();
        assert_ne!(c, m);
    }
}
