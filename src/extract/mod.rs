//! Signal extraction from raw bug report text.
//!
//! A deterministic heuristic pass always runs. When an external extraction
//! service is configured, [`HybridExtractor`] merges its structured result
//! into the heuristic output; any service failure falls back to the
//! heuristic result, so extraction itself never fails.

pub mod heuristic;
pub mod service;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::error::FaultlineError;
use crate::utils::{call_budget, dedup_capped};

pub use heuristic::HeuristicExtractor;
pub use service::{ExtractionService, HttpExtractionService, ServiceGate};

/// Caps applied to merged heuristic + service output.
pub const MERGED_KEYWORD_CAP: usize = 20;
pub const MERGED_CLASS_CAP: usize = 20;
pub const MERGED_METHOD_CAP: usize = 15;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Which extraction paths contributed to a [`BugReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    Heuristic,
    Hybrid,
}

impl std::fmt::Display for ExtractionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Heuristic => f.write_str("heuristic"),
            Self::Hybrid => f.write_str("hybrid"),
        }
    }
}

/// One `at pkg.Class.method(...)` line of a stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    /// Qualified class name (`pkg.Class`).
    pub class_name: String,
    pub method_name: String,
}

/// Raw report text plus everything derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BugReport {
    pub text: String,
    pub summary: String,
    pub error_type_hint: String,
    pub keywords: Vec<String>,
    /// Qualified class names from stack frames, first occurrence order.
    pub stack_trace_class_names: Vec<String>,
    pub stack_frames: Vec<StackFrame>,
    pub potential_class_names: Vec<String>,
    pub potential_method_names: Vec<String>,
    /// Class names reported by both extraction paths.
    pub confirmed_class_names: Vec<String>,
    /// Method names reported by both extraction paths.
    pub confirmed_method_names: Vec<String>,
    pub source: ExtractionSource,
    /// Why the extraction service did not contribute, when it did not.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degradations: Vec<String>,
}

impl BugReport {
    /// Report with no derived signals.
    pub fn empty(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            summary: String::new(),
            error_type_hint: heuristic::UNKNOWN_ERROR_TYPE.to_string(),
            keywords: Vec::new(),
            stack_trace_class_names: Vec::new(),
            stack_frames: Vec::new(),
            potential_class_names: Vec::new(),
            potential_method_names: Vec::new(),
            confirmed_class_names: Vec::new(),
            confirmed_method_names: Vec::new(),
            source: ExtractionSource::Heuristic,
            degradations: Vec::new(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Text used to query the relevance index.
    pub fn query_text(&self) -> String {
        let mut parts = Vec::with_capacity(
            1 + self.keywords.len()
                + self.potential_class_names.len()
                + self.potential_method_names.len(),
        );
        parts.push(self.summary.as_str());
        parts.extend(self.keywords.iter().map(String::as_str));
        parts.extend(self.potential_class_names.iter().map(String::as_str));
        parts.extend(self.potential_method_names.iter().map(String::as_str));
        parts.join(" ")
    }

    /// Whether `name` (class or method) was confirmed by both paths.
    pub fn is_confirmed(&self, name: &str) -> bool {
        self.confirmed_class_names.iter().any(|c| c == name)
            || self.confirmed_method_names.iter().any(|m| m == name)
    }
}

/// Structured output of an external extraction service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredExtraction {
    pub summary: Option<String>,
    pub error_type: Option<String>,
    pub keywords: Vec<String>,
    pub potential_classes: Vec<String>,
    pub potential_methods: Vec<String>,
    pub stack_trace_classes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Extractor capability
// ---------------------------------------------------------------------------

/// Derives a [`BugReport`] from raw text. Implementations never fail.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract signals; external work must finish before `deadline`.
    async fn extract(&self, text: &str, deadline: Option<Instant>) -> BugReport;
}

#[async_trait]
impl Extractor for HeuristicExtractor {
    async fn extract(&self, text: &str, _deadline: Option<Instant>) -> BugReport {
        self.parse(text)
    }
}

/// Heuristic extraction enriched by an external service.
pub struct HybridExtractor {
    heuristic: HeuristicExtractor,
    service: Arc<dyn ExtractionService>,
    timeout: Duration,
}

impl HybridExtractor {
    pub fn new(
        heuristic: HeuristicExtractor,
        service: Arc<dyn ExtractionService>,
        timeout: Duration,
    ) -> Self {
        Self {
            heuristic,
            service,
            timeout,
        }
    }
}

#[async_trait]
impl Extractor for HybridExtractor {
    async fn extract(&self, text: &str, deadline: Option<Instant>) -> BugReport {
        let mut local = self.heuristic.parse(text);
        if local.is_blank() {
            return local;
        }
        let service = self.service.name();
        if !self.service.is_available() {
            debug!(service, "extraction service disabled; heuristic only");
            local
                .degradations
                .push(format!("{service} disabled; heuristic extraction only"));
            return local;
        }

        let budget = call_budget(self.timeout, deadline);
        if budget.is_zero() {
            local
                .degradations
                .push(format!("{service} skipped: no time left before the deadline"));
            return local;
        }

        match tokio::time::timeout(budget, self.service.extract(text)).await {
            Ok(Ok(remote)) => merge(local, remote),
            Ok(Err(err)) => {
                local.degradations.push(err.to_string());
                local
            }
            Err(_) => {
                let err = FaultlineError::timeout(service, budget.as_millis() as u64);
                local.degradations.push(err.to_string());
                local
            }
        }
    }
}

/// Merge a service result into heuristic output.
///
/// Stack-trace evidence stays heuristic-only. Keyword, class and method
/// sets are unioned (heuristic first) and names found by both paths are
/// recorded as confirmed.
pub fn merge(local: BugReport, remote: StructuredExtraction) -> BugReport {
    let local_classes: HashSet<&str> = local
        .potential_class_names
        .iter()
        .map(String::as_str)
        .collect();
    let local_methods: HashSet<&str> = local
        .potential_method_names
        .iter()
        .map(String::as_str)
        .collect();

    let confirmed_class_names = dedup_capped(
        remote
            .potential_classes
            .iter()
            .filter(|c| local_classes.contains(c.as_str()))
            .cloned(),
        MERGED_CLASS_CAP,
    );
    let confirmed_method_names = dedup_capped(
        remote
            .potential_methods
            .iter()
            .filter(|m| local_methods.contains(m.as_str()))
            .cloned(),
        MERGED_METHOD_CAP,
    );

    let keywords = dedup_capped(
        local.keywords.into_iter().chain(remote.keywords),
        MERGED_KEYWORD_CAP,
    );
    let potential_class_names = dedup_capped(
        local
            .potential_class_names
            .into_iter()
            .chain(remote.potential_classes),
        MERGED_CLASS_CAP,
    );
    let potential_method_names = dedup_capped(
        local
            .potential_method_names
            .into_iter()
            .chain(remote.potential_methods),
        MERGED_METHOD_CAP,
    );

    let summary = remote
        .summary
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(local.summary);
    let error_type_hint = remote
        .error_type
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(local.error_type_hint);

    debug!(
        confirmed_classes = confirmed_class_names.len(),
        confirmed_methods = confirmed_method_names.len(),
        "merged service extraction"
    );

    BugReport {
        text: local.text,
        summary,
        error_type_hint,
        keywords,
        stack_trace_class_names: local.stack_trace_class_names,
        stack_frames: local.stack_frames,
        potential_class_names,
        potential_method_names,
        confirmed_class_names,
        confirmed_method_names,
        source: ExtractionSource::Hybrid,
        degradations: local.degradations,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
