//! Bug category classification and dynamic signal weighting.
//!
//! Every category owns a fixed regex table and a default weight profile;
//! both are looked up through [`BugCategory`] rather than dispatched
//! dynamically. Low-confidence classifications are blended toward the
//! generic profile so a noisy match does not over-commit the fusion.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FaultlineError, Result};

/// Confidence at or above which the category profile is used unblended.
pub const BLEND_THRESHOLD: f64 = 0.8;

/// Confidence reported when no category pattern matched.
pub const GENERIC_CONFIDENCE: f64 = 0.5;

/// Max indicator strings kept per pattern.
const INDICATORS_PER_PATTERN: usize = 3;

const WEIGHT_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Signals and weights
// ---------------------------------------------------------------------------

/// One independent source of localization evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    StackTrace,
    Relevance,
    Pattern,
    Coverage,
}

impl Signal {
    pub const ALL: [Signal; 4] = [
        Signal::StackTrace,
        Signal::Relevance,
        Signal::Pattern,
        Signal::Coverage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StackTrace => "stack_trace",
            Self::Relevance => "relevance",
            Self::Pattern => "pattern",
            Self::Coverage => "coverage",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-signal fusion weights. Normalized profiles sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightProfile {
    pub stack_trace: f64,
    pub relevance: f64,
    pub pattern: f64,
    pub coverage: f64,
}

impl WeightProfile {
    pub const fn new(stack_trace: f64, relevance: f64, pattern: f64, coverage: f64) -> Self {
        Self {
            stack_trace,
            relevance,
            pattern,
            coverage,
        }
    }

    pub fn get(&self, signal: Signal) -> f64 {
        match signal {
            Signal::StackTrace => self.stack_trace,
            Signal::Relevance => self.relevance,
            Signal::Pattern => self.pattern,
            Signal::Coverage => self.coverage,
        }
    }

    pub fn sum(&self) -> f64 {
        Signal::ALL.iter().map(|&s| self.get(s)).sum()
    }

    pub fn is_normalized(&self) -> bool {
        (self.sum() - 1.0).abs() < WEIGHT_TOLERANCE
    }

    /// Rescale so the weights sum to 1.0.
    ///
    /// Fails for negative or non-finite weights and for an all-zero profile.
    pub fn normalized(&self) -> Result<Self> {
        for signal in Signal::ALL {
            let w = self.get(signal);
            if !w.is_finite() || w < 0.0 {
                return Err(FaultlineError::weight_profile(format!(
                    "weight for {signal} must be a finite value >= 0, got {w}"
                )));
            }
        }
        let total = self.sum();
        if total <= 0.0 {
            return Err(FaultlineError::weight_profile(
                "cannot normalize a profile whose weights are all zero",
            ));
        }
        Ok(Self {
            stack_trace: self.stack_trace / total,
            relevance: self.relevance / total,
            pattern: self.pattern / total,
            coverage: self.coverage / total,
        })
    }

    /// `confidence * self + (1 - confidence) * other`, per signal.
    pub fn blend(&self, other: &WeightProfile, confidence: f64) -> Self {
        let c = confidence.clamp(0.0, 1.0);
        let mix = |a: f64, b: f64| c * a + (1.0 - c) * b;
        Self {
            stack_trace: mix(self.stack_trace, other.stack_trace),
            relevance: mix(self.relevance, other.relevance),
            pattern: mix(self.pattern, other.pattern),
            coverage: mix(self.coverage, other.coverage),
        }
    }
}

impl Default for WeightProfile {
    fn default() -> Self {
        BugCategory::Generic.default_profile()
    }
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// Fixed set of bug categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugCategory {
    Npe,
    CastError,
    ConcurrentModification,
    BoundsError,
    IllegalArgument,
    IllegalState,
    IoError,
    Generic,
}

impl BugCategory {
    /// Categories with a pattern table, in tie-break order.
    pub const MATCHABLE: [BugCategory; 7] = [
        BugCategory::Npe,
        BugCategory::CastError,
        BugCategory::ConcurrentModification,
        BugCategory::BoundsError,
        BugCategory::IllegalArgument,
        BugCategory::IllegalState,
        BugCategory::IoError,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Npe => "NPE",
            Self::CastError => "CastError",
            Self::ConcurrentModification => "ConcurrentModification",
            Self::BoundsError => "BoundsError",
            Self::IllegalArgument => "IllegalArgument",
            Self::IllegalState => "IllegalState",
            Self::IoError => "IOError",
            Self::Generic => "Generic",
        }
    }

    /// Case-insensitive report patterns for this category.
    pub fn patterns(self) -> &'static [&'static str] {
        match self {
            Self::Npe => &[
                r"NullPointerException",
                r"NPE",
                r"null\s+pointer",
                r"is\s+null",
                r"was\s+null",
                r"returns?\s+null",
                r"\.get\w*\(\)\s+returns?\s+null",
                r"dereferenc",
            ],
            Self::CastError => &[
                r"ClassCastException",
                r"cannot\s+be\s+cast",
                r"incompatible\s+types?",
                r"type\s+mismatch",
                r"wrong\s+type",
                r"cast\s+fail",
            ],
            Self::ConcurrentModification => &[
                r"ConcurrentModificationException",
                r"concurrent\s+modification",
                r"modified\s+while\s+iterating",
                r"iterator.*invalid",
                r"collection.*changed",
            ],
            Self::BoundsError => &[
                r"ArrayIndexOutOfBoundsException",
                r"IndexOutOfBoundsException",
                r"index\s+out\s+of\s+bounds",
                r"array\s+index",
                r"invalid\s+index",
            ],
            Self::IllegalArgument => &[
                r"IllegalArgumentException",
                r"illegal\s+argument",
                r"invalid\s+argument",
                r"bad\s+argument",
                r"argument.*invalid",
            ],
            Self::IllegalState => &[
                r"IllegalStateException",
                r"illegal\s+state",
                r"invalid\s+state",
                r"wrong\s+state",
                r"state.*invalid",
            ],
            Self::IoError => &[
                r"IOException",
                r"FileNotFoundException",
                r"file\s+not\s+found",
                r"cannot\s+read",
                r"cannot\s+write",
                r"stream.*closed",
            ],
            Self::Generic => &[],
        }
    }

    /// Default weight profile (stack trace, relevance, pattern, coverage).
    pub fn default_profile(self) -> WeightProfile {
        match self {
            Self::Npe => WeightProfile::new(0.35, 0.25, 0.25, 0.15),
            Self::CastError => WeightProfile::new(0.30, 0.30, 0.25, 0.15),
            Self::ConcurrentModification => WeightProfile::new(0.35, 0.20, 0.30, 0.15),
            Self::BoundsError => WeightProfile::new(0.40, 0.25, 0.20, 0.15),
            Self::IllegalArgument => WeightProfile::new(0.30, 0.30, 0.20, 0.20),
            Self::IllegalState => WeightProfile::new(0.30, 0.25, 0.25, 0.20),
            Self::IoError => WeightProfile::new(0.35, 0.30, 0.15, 0.20),
            Self::Generic => WeightProfile::new(0.35, 0.30, 0.20, 0.15),
        }
    }
}

impl fmt::Display for BugCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BugCategory {
    type Err = FaultlineError;

    fn from_str(s: &str) -> Result<Self> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "npe" | "nullpointer" => Ok(Self::Npe),
            "casterror" | "cce" => Ok(Self::CastError),
            "concurrentmodification" | "cme" => Ok(Self::ConcurrentModification),
            "boundserror" | "aiobe" | "bounds" => Ok(Self::BoundsError),
            "illegalargument" | "iae" => Ok(Self::IllegalArgument),
            "illegalstate" | "ise" => Ok(Self::IllegalState),
            "ioerror" | "ioe" | "io" => Ok(Self::IoError),
            "generic" => Ok(Self::Generic),
            _ => Err(FaultlineError::validation(
                "category",
                format!("unknown bug category '{s}'"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Result of classifying a bug report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BugClassification {
    pub category: BugCategory,
    /// Share of all pattern matches won by `category`, in [0, 1].
    pub confidence: f64,
    /// Confidence-adjusted weights, summing to 1.0.
    pub weight_profile: WeightProfile,
    /// Report fragments that matched the winning category.
    pub indicators: Vec<String>,
}

/// Regex-table classifier.
#[derive(Debug, Clone)]
pub struct BugClassifier {
    compiled: Vec<(BugCategory, Vec<Regex>)>,
    profiles: HashMap<BugCategory, WeightProfile>,
}

impl BugClassifier {
    /// Classifier with the built-in weight profiles.
    pub fn new() -> Result<Self> {
        Self::with_overrides(&HashMap::new())
    }

    /// Classifier whose profiles are replaced by `overrides` where present.
    ///
    /// Keys are category names (`"npe"`, `"cast_error"`, `"generic"`, ...).
    /// Each override is normalized; an all-zero override is an error.
    pub fn with_overrides(overrides: &HashMap<String, WeightProfile>) -> Result<Self> {
        let mut compiled = Vec::with_capacity(BugCategory::MATCHABLE.len());
        for category in BugCategory::MATCHABLE {
            let regexes = category
                .patterns()
                .iter()
                .map(|p| {
                    RegexBuilder::new(p)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| FaultlineError::pattern(*p, e.to_string()))
                })
                .collect::<Result<Vec<_>>>()?;
            compiled.push((category, regexes));
        }

        let mut profiles = HashMap::new();
        for category in BugCategory::MATCHABLE
            .iter()
            .copied()
            .chain(std::iter::once(BugCategory::Generic))
        {
            profiles.insert(category, category.default_profile());
        }
        for (key, profile) in overrides {
            let category: BugCategory = key.parse()?;
            let normalized = profile.normalized().map_err(|e| {
                FaultlineError::weight_profile(format!("override for '{key}': {e}"))
            })?;
            profiles.insert(category, normalized);
        }

        Ok(Self { compiled, profiles })
    }

    /// The configured profile for `category`.
    pub fn profile(&self, category: BugCategory) -> WeightProfile {
        self.profiles
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_profile())
    }

    /// Classify a report and derive its weight profile.
    pub fn classify(&self, report: &str) -> Result<BugClassification> {
        let mut counts: Vec<(BugCategory, usize, Vec<String>)> = Vec::new();
        for (category, regexes) in &self.compiled {
            let mut count = 0;
            let mut indicators = Vec::new();
            for re in regexes {
                let mut matched = 0;
                for m in re.find_iter(report) {
                    if matched < INDICATORS_PER_PATTERN {
                        indicators.push(m.as_str().to_string());
                    }
                    matched += 1;
                }
                count += matched;
            }
            counts.push((*category, count, indicators));
        }

        let total: usize = counts.iter().map(|(_, c, _)| c).sum();
        let generic = self.profile(BugCategory::Generic);

        if total == 0 {
            debug!("no category pattern matched; using generic profile");
            return Ok(BugClassification {
                category: BugCategory::Generic,
                confidence: GENERIC_CONFIDENCE,
                weight_profile: generic.normalized()?,
                indicators: Vec::new(),
            });
        }

        // First maximum in table order wins ties.
        let mut best = 0;
        for (i, entry) in counts.iter().enumerate() {
            if entry.1 > counts[best].1 {
                best = i;
            }
        }
        let (category, count, indicators) = counts.swap_remove(best);
        let confidence = (count as f64 / total as f64).min(1.0);

        let base = self.profile(category);
        let weight_profile = if confidence < BLEND_THRESHOLD {
            base.blend(&generic, confidence)
        } else {
            base
        }
        .normalized()?;

        debug!(
            category = %category,
            confidence,
            matches = count,
            total,
            "bug report classified"
        );

        Ok(BugClassification {
            category,
            confidence,
            weight_profile,
            indicators,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
