//! Fusion of per-signal scores into a ranked, explained list.
//!
//! Each raw agent score is wrapped with a fixed reliability constant for
//! its signal, then combined with the classification's weight profile.
//! Candidates whose nonzero signals agree get a small boost; candidates
//! with strongly disagreeing signals get a small penalty. The result is
//! clamped to [0, 1] and ranked deterministically.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;

use crate::agents::{CandidateKind, CandidateLocation, SignalEvidence, SignalMap};
use crate::classifier::{BugCategory, Signal, WeightProfile};
use crate::error::Result;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const STACK_TRACE_CONFIDENCE: f64 = 1.0;
pub const STACK_TRACE_ABSENT_CONFIDENCE: f64 = 0.5;
pub const RELEVANCE_CONFIDENCE: f64 = 0.8;
/// Relevance confidence when both extraction paths named the candidate.
pub const CONFIRMED_RELEVANCE_CONFIDENCE: f64 = 0.9;
pub const PATTERN_CONFIDENCE: f64 = 0.7;
pub const COVERAGE_CONFIDENCE: f64 = 0.6;

pub const CONSENSUS_STDDEV: f64 = 0.2;
pub const CONFLICT_STDDEV: f64 = 0.4;
pub const CONSENSUS_BOOST: f64 = 1.10;
pub const CONFLICT_PENALTY: f64 = 0.95;

/// Stack-trace score above which the explanation calls out the trace.
pub const STACK_MENTION_THRESHOLD: f64 = 0.5;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// One signal's score for one candidate, with its reliability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalScore {
    pub score: f64,
    pub confidence: f64,
    pub evidence: Vec<String>,
}

impl SignalScore {
    fn from_evidence(evidence: Option<&SignalEvidence>, confidence: f64) -> Self {
        match evidence {
            Some(e) => Self {
                score: e.score,
                confidence,
                evidence: e.evidence.clone(),
            },
            None => Self {
                score: 0.0,
                confidence,
                evidence: Vec::new(),
            },
        }
    }

    /// Contribution to the fused score under `weight`.
    pub fn contribution(&self, weight: f64) -> f64 {
        weight * self.score * self.confidence
    }
}

/// All four signal scores for a candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalScores {
    pub stack_trace: SignalScore,
    pub relevance: SignalScore,
    pub pattern: SignalScore,
    pub coverage: SignalScore,
}

impl SignalScores {
    pub fn get(&self, signal: Signal) -> &SignalScore {
        match signal {
            Signal::StackTrace => &self.stack_trace,
            Signal::Relevance => &self.relevance,
            Signal::Pattern => &self.pattern,
            Signal::Coverage => &self.coverage,
        }
    }

    /// Raw scores of the signals that fired.
    pub fn nonzero(&self) -> Vec<f64> {
        Signal::ALL
            .iter()
            .map(|&s| self.get(s).score)
            .filter(|&s| s > 0.0)
            .collect()
    }
}

/// Final verdict on one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Judgment {
    pub candidate: CandidateLocation,
    pub final_score: f64,
    pub signals: SignalScores,
    pub consensus: bool,
    pub conflict_resolved: bool,
    pub explanation: String,
    /// 1-based, dense.
    pub rank: usize,
}

/// Ranked judgments plus run-level statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JudgmentSet {
    pub judgments: Vec<Judgment>,
    /// Fraction of candidates with consensus; 0 for an empty set.
    pub consensus_rate: f64,
    pub category: BugCategory,
    pub weights: WeightProfile,
}

impl JudgmentSet {
    pub fn top(&self, k: usize) -> &[Judgment] {
        &self.judgments[..k.min(self.judgments.len())]
    }
}

/// Everything the judge reads. Missing map entries count as score 0.
#[derive(Debug, Clone, Copy)]
pub struct JudgeInput<'a> {
    pub candidates: &'a [CandidateLocation],
    pub stack_trace: &'a SignalMap,
    pub relevance: &'a SignalMap,
    pub pattern: &'a SignalMap,
    pub coverage: &'a SignalMap,
    pub category: BugCategory,
    /// Names confirmed by both extraction paths.
    pub confirmed: &'a HashSet<String>,
}

// ---------------------------------------------------------------------------
// Judge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Judge {
    weights: WeightProfile,
}

impl Judge {
    /// Create a judge, renormalizing `weights` if needed.
    pub fn new(weights: WeightProfile) -> Result<Self> {
        let weights = if weights.is_normalized() {
            weights
        } else {
            weights.normalized()?
        };
        Ok(Self { weights })
    }

    pub fn weights(&self) -> WeightProfile {
        self.weights
    }

    pub fn judge(&self, input: &JudgeInput<'_>) -> JudgmentSet {
        let mut judgments: Vec<Judgment> = input
            .candidates
            .iter()
            .map(|candidate| self.judge_one(candidate, input))
            .collect();

        judgments.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.candidate.qualified_name.cmp(&b.candidate.qualified_name))
                .then_with(|| a.candidate.kind.cmp(&b.candidate.kind))
        });
        for (i, judgment) in judgments.iter_mut().enumerate() {
            judgment.rank = i + 1;
        }

        let consensus_rate = if judgments.is_empty() {
            0.0
        } else {
            judgments.iter().filter(|j| j.consensus).count() as f64 / judgments.len() as f64
        };

        JudgmentSet {
            judgments,
            consensus_rate,
            category: input.category,
            weights: self.weights,
        }
    }

    fn judge_one(&self, candidate: &CandidateLocation, input: &JudgeInput<'_>) -> Judgment {
        let key = candidate.key();
        let confirmed = is_confirmed(candidate, input.confirmed);

        let stack = input.stack_trace.get(&key);
        let stack_confidence = if stack.is_some_and(|e| e.score > 0.0) {
            STACK_TRACE_CONFIDENCE
        } else {
            STACK_TRACE_ABSENT_CONFIDENCE
        };
        let relevance_confidence = if confirmed {
            CONFIRMED_RELEVANCE_CONFIDENCE
        } else {
            RELEVANCE_CONFIDENCE
        };

        let signals = SignalScores {
            stack_trace: SignalScore::from_evidence(stack, stack_confidence),
            relevance: SignalScore::from_evidence(input.relevance.get(&key), relevance_confidence),
            pattern: SignalScore::from_evidence(input.pattern.get(&key), PATTERN_CONFIDENCE),
            coverage: SignalScore::from_evidence(input.coverage.get(&key), COVERAGE_CONFIDENCE),
        };

        let (consensus, conflict_resolved) = check_consensus(&signals.nonzero());
        let final_score = fuse(&signals, &self.weights, consensus, conflict_resolved);
        let explanation = self.explain(&signals, consensus, input.category, confirmed);

        Judgment {
            candidate: candidate.clone(),
            final_score,
            signals,
            consensus,
            conflict_resolved,
            explanation,
            rank: 0,
        }
    }

    fn explain(
        &self,
        signals: &SignalScores,
        consensus: bool,
        category: BugCategory,
        confirmed: bool,
    ) -> String {
        let mut parts = Vec::new();

        // First maximum in signal order wins.
        let mut top: Option<(Signal, f64)> = None;
        for signal in Signal::ALL {
            let weighted = signals.get(signal).score * self.weights.get(signal);
            if top.is_none_or(|(_, best)| weighted > best) {
                top = Some((signal, weighted));
            }
        }
        if let Some((signal, _)) = top {
            let score = signals.get(signal).score;
            if score > 0.0 {
                parts.push(format!("primary signal: {signal} ({score:.2})"));
            }
        }

        if consensus {
            parts.push("agents agree".to_string());
        }
        if category != BugCategory::Generic {
            parts.push(format!("bug type: {category}"));
        }
        if signals.stack_trace.score > STACK_MENTION_THRESHOLD {
            parts.push("directly mentioned in stack trace".to_string());
        }
        if confirmed {
            parts.push("confirmed by report analysis".to_string());
        }

        let risks: Vec<&str> = signals
            .pattern
            .evidence
            .iter()
            .map(|e| e.split(':').next().unwrap_or(e).trim())
            .filter(|name| !name.is_empty())
            .collect();
        if !risks.is_empty() {
            parts.push(format!("risk factors: {}", risks.join(", ")));
        }

        if parts.is_empty() {
            "low confidence candidate".to_string()
        } else {
            parts.join("; ")
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring functions
// ---------------------------------------------------------------------------

/// Population standard deviation; `None` for an empty slice.
pub fn population_stddev(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt())
}

/// `(consensus, conflict_resolved)` for the nonzero signal scores.
///
/// No fired signal means neither flag.
pub fn check_consensus(nonzero: &[f64]) -> (bool, bool) {
    match population_stddev(nonzero) {
        Some(sd) if sd < CONSENSUS_STDDEV => (true, false),
        Some(sd) if sd > CONFLICT_STDDEV => (false, true),
        _ => (false, false),
    }
}

/// Weighted, confidence-scaled sum with the consensus adjustment, in [0, 1].
pub fn fuse(
    signals: &SignalScores,
    weights: &WeightProfile,
    consensus: bool,
    conflict_resolved: bool,
) -> f64 {
    let mut raw: f64 = Signal::ALL
        .iter()
        .map(|&s| signals.get(s).contribution(weights.get(s)))
        .sum();
    if consensus {
        raw *= CONSENSUS_BOOST;
    } else if conflict_resolved {
        raw *= CONFLICT_PENALTY;
    }
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(0.0, 1.0)
}

fn is_confirmed(candidate: &CandidateLocation, confirmed: &HashSet<String>) -> bool {
    if confirmed.is_empty() {
        return false;
    }
    confirmed.contains(candidate.owner_simple_name())
        || (candidate.kind == CandidateKind::Method && confirmed.contains(candidate.simple_name()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
