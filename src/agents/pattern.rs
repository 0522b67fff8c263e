//! Code-pattern heuristics keyed by bug category.
//!
//! Each rule is a regex with a severity in [0, 1]. A category selects its
//! own rule set; the null-handling rules are always added on top.

use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use regex::{Captures, Regex};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{CandidateLocation, SignalEvidence, SignalMap};
use crate::classifier::BugCategory;
use crate::collab::SourceProvider;
use crate::error::{FaultlineError, Result};
use crate::utils::call_budget;

/// Matches per rule assumed to saturate its contribution.
pub const SATURATION_MATCHES: f64 = 3.0;

/// Rules at or above this severity are reported as risk factors.
pub const RISK_SEVERITY: f64 = 0.5;

/// Extra acceptance check for a match; receives the captures and the
/// text following the match.
type Guard = fn(&Captures<'_>, &str) -> bool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleSet {
    Null,
    Type,
    Sync,
    Bounds,
}

impl RuleSet {
    /// Rule sets checked for `category`, baseline null rules last.
    pub fn for_category(category: BugCategory) -> &'static [RuleSet] {
        match category {
            BugCategory::CastError => &[RuleSet::Type, RuleSet::Null],
            BugCategory::ConcurrentModification => &[RuleSet::Sync, RuleSet::Null],
            BugCategory::BoundsError => &[RuleSet::Bounds, RuleSet::Null],
            _ => &[RuleSet::Null],
        }
    }
}

/// A compiled code-pattern rule.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub name: &'static str,
    pub set: RuleSet,
    pub severity: f64,
    pub description: &'static str,
    regex: Regex,
    guard: Option<Guard>,
}

impl PatternRule {
    fn new(
        set: RuleSet,
        name: &'static str,
        pattern: &str,
        severity: f64,
        description: &'static str,
    ) -> Result<Self> {
        let regex =
            Regex::new(pattern).map_err(|e| FaultlineError::pattern(pattern, e.to_string()))?;
        Ok(Self {
            name,
            set,
            severity,
            description,
            regex,
            guard: None,
        })
    }

    fn guarded(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Accepted matches in `source`, with the first matched text.
    pub fn count(&self, source: &str) -> (usize, Option<String>) {
        let mut count = 0;
        let mut first = None;
        for caps in self.regex.captures_iter(source) {
            let Some(m) = caps.get(0) else { continue };
            if let Some(guard) = self.guard {
                if !guard(&caps, &source[m.end()..]) {
                    continue;
                }
            }
            if first.is_none() {
                first = Some(m.as_str().to_string());
            }
            count += 1;
        }
        (count, first)
    }
}

fn not_annotated_non_null(_: &Captures<'_>, rest: &str) -> bool {
    let Some(comment) = rest.trim_start().strip_prefix("//") else {
        return true;
    };
    !comment.trim_start().starts_with("@NotNull")
}

fn not_synchronized(caps: &Captures<'_>, _: &str) -> bool {
    caps.get(2).map_or(true, |m| m.as_str() != "synchronized")
}

fn not_final(caps: &Captures<'_>, _: &str) -> bool {
    caps.get(1).map_or(true, |m| m.as_str() != "final")
}

fn builtin_rules() -> Result<Vec<PatternRule>> {
    use RuleSet::*;
    Ok(vec![
        PatternRule::new(Null, "return_null", r"return\s+null\s*;", 0.7, "method returns null directly")?,
        PatternRule::new(
            Null,
            "no_null_check_before_call",
            r"(\w+)\s*\.\s*\w+\s*\([^)]*\)",
            0.3,
            "method call without null check",
        )?,
        PatternRule::new(
            Null,
            "nullable_field",
            r"(private|protected|public)\s+\w+\s+\w+\s*;",
            0.2,
            "field without non-null annotation",
        )?
        .guarded(not_annotated_non_null),
        PatternRule::new(
            Null,
            "get_or_null",
            r"\.\s*(get|find|lookup|resolve)\w*\s*\([^)]*\)",
            0.5,
            "method that may return null",
        )?,
        PatternRule::new(Type, "unsafe_cast", r"\(\s*\w+\s*\)\s*\w+", 0.6, "direct cast without instanceof check")?,
        PatternRule::new(Type, "instanceof_check", r"instanceof\s+\w+", 0.1, "type check present")?,
        PatternRule::new(
            Type,
            "generic_raw_type",
            r"(List|Set|Map|Collection)\s+\w+\s*[=;]",
            0.4,
            "raw generic type usage",
        )?,
        PatternRule::new(
            Sync,
            "iterator_without_sync",
            r"\.iterator\(\)|for\s*\(\s*\w+\s+\w+\s*:\s*\w+\s*\)",
            0.5,
            "iterator usage",
        )?,
        PatternRule::new(
            Sync,
            "collection_modify_in_loop",
            r"(\.add\(|\.remove\(|\.clear\(\))",
            0.4,
            "collection modification",
        )?,
        PatternRule::new(
            Sync,
            "missing_synchronized",
            r"(private|protected|public)\s+(\w+)\s+\w+\s*\([^)]*\)\s*\{",
            0.2,
            "method without synchronized keyword",
        )?
        .guarded(not_synchronized),
        PatternRule::new(
            Sync,
            "shared_mutable",
            r"static\s+(\w+)\s+\w+|volatile\s+\w+",
            0.5,
            "shared mutable state",
        )?
        .guarded(not_final),
        PatternRule::new(Bounds, "array_access", r"\w+\s*\[\s*\w+\s*\]", 0.4, "array index access")?,
        PatternRule::new(
            Bounds,
            "get_by_index",
            r"\.get\s*\(\s*\d+\s*\)|\.get\s*\(\s*\w+\s*\)",
            0.4,
            "collection get by index",
        )?,
        PatternRule::new(Bounds, "substring", r"\.substring\s*\(", 0.5, "string substring operation")?,
    ])
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternMatch {
    pub rule: &'static str,
    pub count: usize,
    pub severity: f64,
    pub first_match: Option<String>,
}

/// Pattern findings for one class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternAnalysis {
    pub class_name: String,
    pub matches: Vec<PatternMatch>,
    pub score: f64,
    /// `name: description` for matched rules with severity >= 0.5.
    pub risk_factors: Vec<String>,
}

impl PatternAnalysis {
    pub fn empty(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            matches: Vec::new(),
            score: 0.0,
            risk_factors: Vec::new(),
        }
    }
}

/// Scores candidates by category-specific code patterns in their source.
#[derive(Debug, Clone)]
pub struct PatternAgent {
    rules: Vec<PatternRule>,
}

impl PatternAgent {
    pub fn new() -> Result<Self> {
        Ok(Self {
            rules: builtin_rules()?,
        })
    }

    /// Rules checked for `category`.
    pub fn rules_for(&self, category: BugCategory) -> Vec<&PatternRule> {
        let sets = RuleSet::for_category(category);
        self.rules
            .iter()
            .filter(|r| sets.contains(&r.set))
            .collect()
    }

    /// Analyze one class's source.
    ///
    /// `score = min(sum(severity * matches) / sum(severity * 3), 1)`.
    pub fn analyze(&self, class_name: &str, source: &str, category: BugCategory) -> PatternAnalysis {
        let rules = self.rules_for(category);
        let max_possible: f64 = rules.iter().map(|r| r.severity * SATURATION_MATCHES).sum();

        let mut analysis = PatternAnalysis::empty(class_name);
        let mut total = 0.0;
        for rule in rules {
            let (count, first_match) = rule.count(source);
            if count == 0 {
                continue;
            }
            total += rule.severity * count as f64;
            if rule.severity >= RISK_SEVERITY {
                analysis
                    .risk_factors
                    .push(format!("{}: {}", rule.name, rule.description));
            }
            analysis.matches.push(PatternMatch {
                rule: rule.name,
                count,
                severity: rule.severity,
                first_match,
            });
        }
        if max_possible > 0.0 {
            analysis.score = (total / max_possible).min(1.0);
        }
        analysis
    }

    /// Score every candidate, fetching each owning class's source once.
    ///
    /// Unavailable source (no provider, missing text, error or timeout)
    /// scores 0. Returns the scores and a note per degraded fetch.
    pub async fn score_candidates(
        &self,
        candidates: &[CandidateLocation],
        category: BugCategory,
        provider: Option<&dyn SourceProvider>,
        concurrency: usize,
        call_timeout: Duration,
        deadline: Option<Instant>,
    ) -> (SignalMap, Vec<String>) {
        let mut owners: Vec<&str> = candidates.iter().map(|c| c.owner_class()).collect();
        owners.sort_unstable();
        owners.dedup();

        let mut degraded = Vec::new();
        let mut analyses: HashMap<&str, PatternAnalysis> = HashMap::new();

        if let Some(provider) = provider {
            let fetched: Vec<(&str, Result<Option<String>>)> =
                stream::iter(owners)
                    .map(|owner| async move {
                        let budget = call_budget(call_timeout, deadline);
                        let result = if budget.is_zero() {
                            Err(FaultlineError::timeout("source provider", 0))
                        } else {
                            match tokio::time::timeout(budget, provider.get_source_text(owner)).await
                            {
                                Ok(result) => result,
                                Err(_) => Err(FaultlineError::timeout(
                                    "source provider",
                                    budget.as_millis() as u64,
                                )),
                            }
                        };
                        (owner, result)
                    })
                    .buffered(concurrency.max(1))
                    .collect()
                    .await;

            for (owner, result) in fetched {
                match result {
                    Ok(Some(source)) => {
                        analyses.insert(owner, self.analyze(owner, &source, category));
                    }
                    Ok(None) => debug!(class = owner, "no source text; pattern score 0"),
                    Err(err) => {
                        warn!(class = owner, error = %err, "source fetch degraded");
                        degraded.push(format!("source for {owner}: {err}"));
                    }
                }
            }
        }

        let scores = candidates
            .iter()
            .map(|candidate| {
                let evidence = analyses
                    .get(candidate.owner_class())
                    .map(|a| SignalEvidence::new(a.score, a.risk_factors.clone()))
                    .unwrap_or_default();
                (candidate.key(), evidence)
            })
            .collect();
        (scores, degraded)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::MapSourceProvider;
    use async_trait::async_trait;

    const NULLY: &str = r#"
class Registry {
    private Map cache;
    Object lookup(String key) {
        Object v = cache.get(key);
        if (v == null) {
            return null;
        }
        return v;
    }
}
"#;

    fn agent() -> PatternAgent {
        PatternAgent::new().unwrap()
    }

    #[test]
    fn rule_sets_always_include_null_rules() {
        let agent = agent();
        let npe: Vec<_> = agent.rules_for(BugCategory::Npe).iter().map(|r| r.name).collect();
        assert_eq!(
            npe,
            vec!["return_null", "no_null_check_before_call", "nullable_field", "get_or_null"]
        );
        let cce = agent.rules_for(BugCategory::CastError);
        assert!(cce.iter().any(|r| r.name == "unsafe_cast"));
        assert!(cce.iter().any(|r| r.name == "return_null"));
        assert_eq!(agent.rules_for(BugCategory::Generic).len(), 4);
    }

    #[test]
    fn analyze_scores_and_lists_risks() {
        let a = agent().analyze("Registry", NULLY, BugCategory::Npe);
        assert!(a.score > 0.0 && a.score <= 1.0);
        assert!(a.risk_factors.iter().any(|r| r.starts_with("return_null")));
        assert!(a.risk_factors.iter().any(|r| r.starts_with("get_or_null")));
        assert!(!a.risk_factors.iter().any(|r| r.starts_with("nullable_field")));

        // 0.7*1 + 0.3*1 + 0.2*1 + 0.5*1 over (0.7+0.3+0.2+0.5)*3
        let expected = (0.7 + 0.3 + 0.2 + 0.5) / (1.7 * 3.0);
        assert!((a.score - expected).abs() < 1e-9, "score {}", a.score);
    }

    #[test]
    fn score_saturates_at_one() {
        let source = "return null;\n".repeat(50);
        let a = agent().analyze("X", &source, BugCategory::Npe);
        assert!(a.score <= 1.0);
    }

    #[test]
    fn empty_source_scores_zero() {
        let a = agent().analyze("X", "", BugCategory::BoundsError);
        assert_eq!(a.score, 0.0);
        assert!(a.matches.is_empty());
    }

    #[test]
    fn guards_replace_negative_lookahead() {
        let agent = agent();
        let field = agent
            .rules
            .iter()
            .find(|r| r.name == "nullable_field")
            .unwrap();
        assert_eq!(field.count("private String name; // @NotNull").0, 0);
        assert_eq!(field.count("private String name;").0, 1);

        let sync = agent
            .rules
            .iter()
            .find(|r| r.name == "missing_synchronized")
            .unwrap();
        assert_eq!(sync.count("public synchronized void run() {").0, 0);
        assert_eq!(sync.count("public void run() {").0, 1);

        let shared = agent
            .rules
            .iter()
            .find(|r| r.name == "shared_mutable")
            .unwrap();
        assert_eq!(shared.count("static final int MAX = 3;").0, 0);
        assert_eq!(shared.count("static int counter = 0;").0, 1);
    }

    #[tokio::test]
    async fn candidates_share_owner_analysis() {
        let mut provider = MapSourceProvider::new();
        provider.insert("a.Registry", NULLY);
        let candidates = vec![
            CandidateLocation::class("a.Registry", ""),
            CandidateLocation::method("a.Registry.lookup", ""),
            CandidateLocation::class("a.NoSource", ""),
        ];
        let (scores, degraded) = agent()
            .score_candidates(
                &candidates,
                BugCategory::Npe,
                Some(&provider),
                4,
                Duration::from_secs(1),
                None,
            )
            .await;
        assert!(degraded.is_empty());
        let class = &scores[&candidates[0].key()];
        assert!(class.score > 0.0);
        assert_eq!(class, &scores[&candidates[1].key()]);
        assert_eq!(scores[&candidates[2].key()].score, 0.0);
    }

    struct FailingProvider;

    #[async_trait]
    impl SourceProvider for FailingProvider {
        async fn get_source_text(&self, _: &str) -> Result<Option<String>> {
            Err(FaultlineError::external("source", "down"))
        }
    }

    #[tokio::test]
    async fn provider_errors_degrade_to_zero() {
        let candidates = vec![CandidateLocation::class("a.X", "")];
        let (scores, degraded) = agent()
            .score_candidates(
                &candidates,
                BugCategory::Npe,
                Some(&FailingProvider),
                2,
                Duration::from_secs(1),
                None,
            )
            .await;
        assert_eq!(scores[&candidates[0].key()].score, 0.0);
        assert_eq!(degraded.len(), 1);
    }

    #[tokio::test]
    async fn no_provider_scores_zero() {
        let candidates = vec![CandidateLocation::class("a.X", "")];
        let (scores, degraded) = agent()
            .score_candidates(&candidates, BugCategory::Npe, None, 2, Duration::from_secs(1), None)
            .await;
        assert_eq!(scores[&candidates[0].key()].score, 0.0);
        assert!(degraded.is_empty());
    }
}
