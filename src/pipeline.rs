//! Localization pipeline.
//!
//! Seven fixed stages run over one [`RunState`] per call:
//!
//! ```text
//! extract -> classify -> gather candidates -> { relevance | pattern | coverage } -> fuse
//! ```
//!
//! The three scoring stages only read the report and the fixed candidate
//! set, so they run concurrently and the judge waits on all of them.
//! External calls (extraction service, knowledge store, source text) are
//! bounded by the per-call timeout and the caller's deadline; any failure
//! there becomes a degradation note and a zero signal, never an error.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::agents::{
    stack_trace, CandidateKey, CandidateLocation, CoverageAgent, CoverageIndex, PatternAgent,
    RelevanceAgent, SignalMap,
};
use crate::classifier::{
    BugCategory, BugClassification, BugClassifier, WeightProfile, GENERIC_CONFIDENCE,
};
use crate::collab::{
    Corpus, FsSourceProvider, InMemoryKnowledgeStore, KnowledgeStore, Relationships,
    SourceProvider,
};
use crate::config::{Config, PipelineConfig};
use crate::error::{FaultlineError, Result};
use crate::extract::{
    BugReport, Extractor, HeuristicExtractor, HttpExtractionService, HybridExtractor, ServiceGate,
};
use crate::indexer::{known_terms, RelevanceIndex};
use crate::ranker::{Judge, JudgeInput, Judgment, JudgmentSet};
use crate::utils::{call_budget, simple_name};

const KNOWLEDGE_STORE: &str = "knowledge store";

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Classify,
    GatherCandidates,
    Relevance,
    Pattern,
    Coverage,
    Fuse,
}

impl Stage {
    /// 1-based position in the pipeline.
    pub fn position(self) -> usize {
        match self {
            Self::Extract => 1,
            Self::Classify => 2,
            Self::GatherCandidates => 3,
            Self::Relevance => 4,
            Self::Pattern => 5,
            Self::Coverage => 6,
            Self::Fuse => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Classify => "classify",
            Self::GatherCandidates => "gather_candidates",
            Self::Relevance => "relevance",
            Self::Pattern => "pattern",
            Self::Coverage => "coverage",
            Self::Fuse => "fuse",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEntry {
    pub stage: Stage,
    pub elapsed_ms: u64,
    pub detail: String,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} ({} ms)",
            self.stage.position(),
            self.stage,
            self.detail,
            self.elapsed_ms
        )
    }
}

/// Everything one localization call produces. Never outlives the call.
#[derive(Debug, Default)]
pub struct RunState {
    pub report: Option<BugReport>,
    pub classification: Option<BugClassification>,
    pub candidates: Vec<CandidateLocation>,
    pub stack_trace: SignalMap,
    pub relevance: SignalMap,
    pub pattern: SignalMap,
    pub coverage: SignalMap,
    pub judgments: Option<JudgmentSet>,
    pub related: BTreeMap<String, Relationships>,
    pub trace: Vec<TraceEntry>,
    pub degradations: Vec<String>,
}

impl RunState {
    fn record(&mut self, stage: Stage, started: Instant, detail: impl Into<String>) {
        let entry = TraceEntry {
            stage,
            elapsed_ms: started.elapsed().as_millis() as u64,
            detail: detail.into(),
        };
        debug!(stage = %entry.stage, elapsed_ms = entry.elapsed_ms, "{}", entry.detail);
        self.trace.push(entry);
    }

    fn into_localization(self, top_k: usize) -> Localization {
        let report = self.report.unwrap_or_else(|| BugReport::empty(""));
        let classification = self.classification.unwrap_or_else(generic_classification);
        let total_candidates = self.candidates.len();
        let (judgments, consensus_rate, weights) = match self.judgments {
            Some(set) => {
                let mut judgments = set.judgments;
                judgments.truncate(top_k);
                (judgments, set.consensus_rate, set.weights)
            }
            None => (Vec::new(), 0.0, classification.weight_profile),
        };
        Localization {
            report,
            classification,
            judgments,
            total_candidates,
            consensus_rate,
            weights,
            related: self.related,
            trace: self.trace,
            degradations: self.degradations,
        }
    }
}

/// Result of one localization call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Localization {
    pub report: BugReport,
    pub classification: BugClassification,
    /// Top-K judgments, rank order.
    pub judgments: Vec<Judgment>,
    /// Candidates judged before truncation.
    pub total_candidates: usize,
    pub consensus_rate: f64,
    pub weights: WeightProfile,
    /// Structural neighbours of top-ranked classes, when known.
    pub related: BTreeMap<String, Relationships>,
    pub trace: Vec<TraceEntry>,
    pub degradations: Vec<String>,
}

fn degrade(degradations: &mut Vec<String>, note: String) {
    warn!("{note}");
    degradations.push(note);
}

fn generic_classification() -> BugClassification {
    let category = BugCategory::Generic;
    BugClassification {
        category,
        confidence: GENERIC_CONFIDENCE,
        weight_profile: category.default_profile(),
        indicators: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Shared, read-only localization engine. Build once per corpus.
pub struct Pipeline {
    config: PipelineConfig,
    extractor: Arc<dyn Extractor>,
    classifier: BugClassifier,
    relevance: RelevanceAgent,
    pattern: PatternAgent,
    coverage: CoverageAgent,
    store: Option<Arc<dyn KnowledgeStore>>,
    sources: Option<Arc<dyn SourceProvider>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("documents", &self.relevance.index().len())
            .field("knowledge_store", &self.store.is_some())
            .field("source_provider", &self.sources.is_some())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Build indexes and default collaborators for `corpus`.
    ///
    /// The knowledge store answers from the corpus documents; source text
    /// is read from disk when the corpus knows its root. With extraction
    /// enabled the external service is wired in behind its own gate.
    pub fn new(config: &Config, corpus: &Corpus) -> Result<Self> {
        config.validate()?;

        let index = if corpus.documents.is_empty() {
            RelevanceIndex::new(config.bm25)
        } else {
            RelevanceIndex::build(corpus.documents.clone(), config.bm25)?
        };
        let coverage = CoverageIndex::build(&corpus.test_files);

        let heuristic = HeuristicExtractor::new()?;
        let extractor: Arc<dyn Extractor> = if config.extraction.enabled {
            let gate = Arc::new(ServiceGate::from_config(&config.extraction));
            let service = HttpExtractionService::new(&config.extraction, gate)?;
            Arc::new(HybridExtractor::new(
                heuristic,
                Arc::new(service),
                Duration::from_millis(config.extraction.timeout_ms),
            ))
        } else {
            Arc::new(heuristic)
        };

        let store: Arc<dyn KnowledgeStore> =
            Arc::new(InMemoryKnowledgeStore::from_corpus(corpus));
        let sources = corpus.root.as_ref().map(|root| {
            Arc::new(FsSourceProvider::new(root.clone(), &corpus.documents))
                as Arc<dyn SourceProvider>
        });

        debug!(
            documents = index.len(),
            tested_classes = !coverage.is_empty(),
            extraction = config.extraction.enabled,
            "pipeline ready"
        );

        Ok(Self {
            config: config.pipeline.clone(),
            extractor,
            classifier: BugClassifier::with_overrides(&config.weights)?,
            relevance: RelevanceAgent::new(Arc::new(index)),
            pattern: PatternAgent::new()?,
            coverage: CoverageAgent::new(Arc::new(coverage))?,
            store: Some(store),
            sources,
        })
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_knowledge_store(mut self, store: Option<Arc<dyn KnowledgeStore>>) -> Self {
        self.store = store;
        self
    }

    pub fn with_source_provider(mut self, sources: Option<Arc<dyn SourceProvider>>) -> Self {
        self.sources = sources;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn index(&self) -> &RelevanceIndex {
        self.relevance.index()
    }

    /// Localize using the configured deadline, if any.
    pub async fn localize(&self, text: &str) -> Result<Localization> {
        let deadline = self
            .config
            .deadline_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        self.localize_until(text, deadline).await
    }

    /// Localize with an explicit deadline for external calls.
    ///
    /// Local work always completes; only external calls are cut short.
    /// Fails only when the classified weights cannot be normalized.
    #[instrument(skip_all, fields(chars = text.len()))]
    pub async fn localize_until(
        &self,
        text: &str,
        deadline: Option<Instant>,
    ) -> Result<Localization> {
        let mut state = RunState::default();

        // 1. extract
        let started = Instant::now();
        if text.trim().is_empty() {
            state.report = Some(BugReport::empty(text));
            state.record(Stage::Extract, started, "empty report; nothing to localize");
            return Ok(state.into_localization(self.config.top_k));
        }
        let mut report = self.extractor.extract(text, deadline).await;
        for note in std::mem::take(&mut report.degradations) {
            degrade(&mut state.degradations, note);
        }
        state.record(
            Stage::Extract,
            started,
            format!(
                "{} extraction: {} keywords, {} stack classes, {} confirmed",
                report.source,
                report.keywords.len(),
                report.stack_trace_class_names.len(),
                report.confirmed_class_names.len() + report.confirmed_method_names.len()
            ),
        );

        // 2. classify
        let started = Instant::now();
        let classification = self.classifier.classify(&report.text)?;
        state.record(
            Stage::Classify,
            started,
            format!(
                "{} (confidence {:.2})",
                classification.category, classification.confidence
            ),
        );

        // 3. gather candidates
        let started = Instant::now();
        let query = report.query_text();
        state.candidates = self
            .gather_candidates(&report, &query, deadline, &mut state.degradations)
            .await;
        state.stack_trace = stack_trace::score(&state.candidates, &report);
        state.record(
            Stage::GatherCandidates,
            started,
            format!("{} candidates", state.candidates.len()),
        );

        // 4-6. score in parallel
        let candidates = &state.candidates;
        let category = classification.category;
        let (relevance_run, pattern_run, coverage_run) = tokio::join!(
            async {
                let t = Instant::now();
                (self.relevance.score(candidates, &query), t.elapsed())
            },
            async {
                let t = Instant::now();
                let out = self
                    .pattern
                    .score_candidates(
                        candidates,
                        category,
                        self.sources.as_deref(),
                        self.config.source_fetch_concurrency,
                        Duration::from_millis(self.config.call_timeout_ms),
                        deadline,
                    )
                    .await;
                (out, t.elapsed())
            },
            async {
                let t = Instant::now();
                (self.coverage.score(candidates, &report.text), t.elapsed())
            },
        );
        let (relevance, relevance_ms) = relevance_run;
        let ((pattern, degraded), pattern_ms) = pattern_run;
        let (coverage, coverage_ms) = coverage_run;

        let fired = |m: &SignalMap| m.values().filter(|e| e.score > 0.0).count();
        let terms = known_terms(self.relevance.index(), &query);
        state.trace.extend([
            TraceEntry {
                stage: Stage::Relevance,
                elapsed_ms: relevance_ms.as_millis() as u64,
                detail: format!("{} scored, {} known query terms", fired(&relevance), terms.len()),
            },
            TraceEntry {
                stage: Stage::Pattern,
                elapsed_ms: pattern_ms.as_millis() as u64,
                detail: format!("{} with risky patterns", fired(&pattern)),
            },
            TraceEntry {
                stage: Stage::Coverage,
                elapsed_ms: coverage_ms.as_millis() as u64,
                detail: format!("{} with test evidence", fired(&coverage)),
            },
        ]);
        state.degradations.extend(degraded);
        state.relevance = relevance;
        state.pattern = pattern;
        state.coverage = coverage;

        // 7. fuse
        let started = Instant::now();
        let confirmed: HashSet<String> = report
            .confirmed_class_names
            .iter()
            .chain(&report.confirmed_method_names)
            .flat_map(|n| [n.clone(), simple_name(n).to_string()])
            .collect();
        let judge = Judge::new(classification.weight_profile)?;
        let set = judge.judge(&JudgeInput {
            candidates: &state.candidates,
            stack_trace: &state.stack_trace,
            relevance: &state.relevance,
            pattern: &state.pattern,
            coverage: &state.coverage,
            category,
            confirmed: &confirmed,
        });
        state.related = self
            .related_classes(set.top(self.config.top_k), deadline, &mut state.degradations)
            .await;
        state.record(
            Stage::Fuse,
            started,
            format!("consensus rate {:.1}%", set.consensus_rate * 100.0),
        );

        info!(
            category = %category,
            candidates = state.candidates.len(),
            consensus_rate = set.consensus_rate,
            degraded = state.degradations.len(),
            "localization complete"
        );

        state.report = Some(report);
        state.classification = Some(classification);
        state.judgments = Some(set);
        Ok(state.into_localization(self.config.top_k))
    }

    /// Stack-trace classes and their traced methods first, then relevance
    /// hits, deduplicated by key and capped.
    async fn gather_candidates(
        &self,
        report: &BugReport,
        query: &str,
        deadline: Option<Instant>,
        degradations: &mut Vec<String>,
    ) -> Vec<CandidateLocation> {
        let mut seen: HashSet<CandidateKey> = HashSet::new();
        let mut out = Vec::new();
        let mut push = |candidate: CandidateLocation, out: &mut Vec<CandidateLocation>| {
            if seen.insert(candidate.key()) {
                out.push(candidate);
            }
        };

        for traced in &report.stack_trace_class_names {
            let classes = self.resolve_class(traced, deadline, degradations).await;
            for class in classes {
                for method in self
                    .traced_methods(&class, report, deadline, degradations)
                    .await
                {
                    push(method, &mut out);
                }
                push(class, &mut out);
            }
        }

        let index = self.relevance.index();
        for hit in index.query(query, self.config.relevance_pool) {
            let file_path = index
                .document(&hit.doc_id)
                .map(|d| d.file_path.clone())
                .unwrap_or_default();
            push(CandidateLocation::class(hit.doc_id, file_path), &mut out);
        }

        if out.len() > self.config.max_candidates {
            debug!(
                dropped = out.len() - self.config.max_candidates,
                "candidate set capped"
            );
            out.truncate(self.config.max_candidates);
        }
        out
    }

    /// Classes matching a stack-trace class by simple name.
    ///
    /// Asks the knowledge store first and falls back to the indexed
    /// documents when it is missing, fails or finds nothing.
    async fn resolve_class(
        &self,
        traced: &str,
        deadline: Option<Instant>,
        degradations: &mut Vec<String>,
    ) -> Vec<CandidateLocation> {
        let simple = simple_name(traced);
        if let Some(store) = &self.store {
            match self
                .bounded(KNOWLEDGE_STORE, deadline, store.find_classes_by_name_substring(simple))
                .await
            {
                Ok(records) => {
                    let found: Vec<CandidateLocation> = records
                        .into_iter()
                        .filter(|r| simple_name(&r.qualified_name) == simple)
                        .map(|r| CandidateLocation::class(r.qualified_name, r.file_path))
                        .collect();
                    if !found.is_empty() {
                        return found;
                    }
                }
                Err(err) => {
                    let note = format!("class lookup for {simple} degraded: {err}");
                    degrade(degradations, note);
                }
            }
        }

        self.relevance
            .index()
            .documents()
            .filter(|d| d.origin_class_name == simple || simple_name(&d.id) == simple)
            .map(|d| CandidateLocation::class(d.id.clone(), d.file_path.clone()))
            .collect()
    }

    /// Method candidates for frames in `class` that the class declares.
    async fn traced_methods(
        &self,
        class: &CandidateLocation,
        report: &BugReport,
        deadline: Option<Instant>,
        degradations: &mut Vec<String>,
    ) -> Vec<CandidateLocation> {
        let class_simple = class.simple_name();
        let frames: Vec<&str> = report
            .stack_frames
            .iter()
            .filter(|f| simple_name(&f.class_name) == class_simple)
            .map(|f| f.method_name.as_str())
            .collect();
        if frames.is_empty() {
            return Vec::new();
        }

        if let Some(doc) = self.relevance.index().document(&class.qualified_name) {
            return frames
                .into_iter()
                .filter(|m| doc.method_names.iter().any(|d| d == m))
                .map(|m| {
                    CandidateLocation::method(
                        format!("{}.{m}", class.qualified_name),
                        class.file_path.clone(),
                    )
                })
                .collect();
        }

        let Some(store) = &self.store else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for method in frames {
            let signature = format!("{}.{method}", class.qualified_name);
            match self
                .bounded(KNOWLEDGE_STORE, deadline, store.find_methods_by_name_substring(method))
                .await
            {
                Ok(records) => out.extend(
                    records
                        .into_iter()
                        .filter(|r| r.signature == signature)
                        .map(|r| CandidateLocation::method(r.signature, r.file_path)),
                ),
                Err(err) => {
                    let note = format!("method lookup for {signature} degraded: {err}");
                    degrade(degradations, note);
                }
            }
        }
        out
    }

    /// Relationships of the top-ranked classes, skipping empty answers.
    async fn related_classes(
        &self,
        top: &[Judgment],
        deadline: Option<Instant>,
        degradations: &mut Vec<String>,
    ) -> BTreeMap<String, Relationships> {
        let mut related = BTreeMap::new();
        let Some(store) = &self.store else {
            return related;
        };
        for owner in top.iter().map(|j| j.candidate.owner_class()) {
            if related.contains_key(owner) {
                continue;
            }
            match self
                .bounded(KNOWLEDGE_STORE, deadline, store.find_relationships(owner))
                .await
            {
                Ok(rel) if !rel.is_empty() => {
                    related.insert(owner.to_string(), rel);
                }
                Ok(_) => {}
                Err(err) => {
                    degrade(degradations, format!("relationships for {owner} degraded: {err}"));
                }
            }
        }
        related
    }

    /// Run `fut` within the per-call timeout and the deadline.
    async fn bounded<T, F>(&self, service: &str, deadline: Option<Instant>, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let budget = call_budget(Duration::from_millis(self.config.call_timeout_ms), deadline);
        if budget.is_zero() {
            return Err(FaultlineError::timeout(service, 0));
        }
        match tokio::time::timeout(budget, fut).await {
            Ok(result) => result,
            Err(_) => Err(FaultlineError::timeout(service, budget.as_millis() as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_entry_renders_position_and_stage() {
        let entry = TraceEntry {
            stage: Stage::GatherCandidates,
            elapsed_ms: 4,
            detail: "12 candidates".into(),
        };
        assert_eq!(entry.to_string(), "[3] gather_candidates: 12 candidates (4 ms)");
    }

    #[test]
    fn empty_state_becomes_generic_localization() {
        let loc = RunState::default().into_localization(5);
        assert!(loc.judgments.is_empty());
        assert_eq!(loc.total_candidates, 0);
        assert_eq!(loc.classification.category, BugCategory::Generic);
        assert_eq!(loc.weights, BugCategory::Generic.default_profile());
    }

    #[test]
    fn degrade_keeps_every_note() {
        let mut notes = Vec::new();
        degrade(&mut notes, "first".into());
        degrade(&mut notes, "second".into());
        assert_eq!(notes, vec!["first", "second"]);
    }

    #[test]
    fn invalid_config_is_rejected_at_build() {
        let mut config = Config::default();
        config.pipeline.top_k = 0;
        let err = Pipeline::new(&config, &Corpus::default()).unwrap_err();
        assert!(err.is_user_error());
    }
}
