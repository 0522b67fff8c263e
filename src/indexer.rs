//! BM25 relevance index over candidate documents.
//!
//! Documents are tokenized with [`crate::tokens::tokenize`] at index time
//! and queries go through the same function, so index and query terms are
//! always comparable. The index is read-only once built and can be shared
//! across threads behind an `Arc`.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FaultlineError, Result};
use crate::tokens::tokenize;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A unit of source code that can be ranked, usually one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Document {
    /// Unique id, typically the fully qualified class name.
    pub id: String,
    /// Indexed text (class name, qualified name, method names, ...).
    pub text: String,
    /// Simple name of the class the document was derived from.
    #[serde(default)]
    pub origin_class_name: String,
    /// Source file path relative to the project root.
    #[serde(default)]
    pub file_path: String,
    /// Methods declared by the class.
    #[serde(default)]
    pub method_names: Vec<String>,
}

/// BM25 tuning constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    /// Term frequency saturation.
    pub k1: f64,
    /// Document length normalization.
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

impl Bm25Params {
    pub fn validate(&self) -> Result<()> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(FaultlineError::validation("bm25.k1", "must be a finite value >= 0"));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(FaultlineError::validation("bm25.b", "must be within [0, 1]"));
        }
        Ok(())
    }
}

/// A scored document returned by [`RelevanceIndex::query`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub doc_id: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
struct IndexedDocument {
    document: Document,
    term_freqs: HashMap<String, usize>,
    len: usize,
}

/// Inverted statistics for BM25 scoring.
#[derive(Debug, Clone)]
pub struct RelevanceIndex {
    params: Bm25Params,
    docs: Vec<IndexedDocument>,
    positions: HashMap<String, usize>,
    doc_freq: HashMap<String, usize>,
    avgdl: f64,
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl RelevanceIndex {
    /// An empty index. Every query against it scores 0.
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            docs: Vec::new(),
            positions: HashMap::new(),
            doc_freq: HashMap::new(),
            avgdl: 0.0,
        }
    }

    /// Build an index in one step.
    pub fn build(documents: Vec<Document>, params: Bm25Params) -> Result<Self> {
        let mut index = Self::new(params);
        index.index(documents)?;
        Ok(index)
    }

    /// Index `documents`, replacing any previous content.
    ///
    /// Rejects an empty set and duplicate ids; on error the index is left
    /// untouched.
    pub fn index(&mut self, documents: Vec<Document>) -> Result<()> {
        self.params.validate()?;
        if documents.is_empty() {
            return Err(FaultlineError::validation(
                "documents",
                "cannot index an empty document set",
            ));
        }

        let mut positions = HashMap::with_capacity(documents.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut docs = Vec::with_capacity(documents.len());
        let mut total_len = 0usize;

        for (pos, document) in documents.into_iter().enumerate() {
            if positions.insert(document.id.clone(), pos).is_some() {
                return Err(FaultlineError::validation(
                    "documents",
                    format!("duplicate document id '{}'", document.id),
                ));
            }

            let terms = tokenize(&document.text);
            let mut term_freqs: HashMap<String, usize> = HashMap::new();
            for term in &terms {
                *term_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            for term in term_freqs.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }

            total_len += terms.len();
            docs.push(IndexedDocument {
                document,
                term_freqs,
                len: terms.len(),
            });
        }

        self.avgdl = total_len as f64 / docs.len() as f64;
        self.docs = docs;
        self.positions = positions;
        self.doc_freq = doc_freq;

        debug!(
            documents = self.docs.len(),
            terms = self.doc_freq.len(),
            avgdl = self.avgdl,
            "relevance index built"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

impl RelevanceIndex {
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    /// Look up an indexed document by id.
    pub fn document(&self, id: &str) -> Option<&Document> {
        self.positions.get(id).map(|&pos| &self.docs[pos].document)
    }

    /// All indexed documents, in indexing order.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.docs.iter().map(|d| &d.document)
    }

    /// Inverse document frequency of `term`.
    ///
    /// Terms absent from the corpus get 0 rather than the negative value
    /// the raw formula would produce.
    pub fn idf(&self, term: &str) -> f64 {
        let df = self.doc_freq.get(term).copied().unwrap_or(0);
        if df == 0 {
            return 0.0;
        }
        let n = self.docs.len() as f64;
        let df = df as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// BM25 score of a single document for a free-text query.
    pub fn score(&self, query: &str, doc_id: &str) -> f64 {
        let terms = tokenize(query);
        match self.positions.get(doc_id) {
            Some(&pos) => self.score_terms(&terms, pos),
            None => 0.0,
        }
    }

    /// Distinct query terms present in document `doc_id`, in query order.
    pub fn matched_terms(&self, query: &str, doc_id: &str) -> Vec<String> {
        let Some(&pos) = self.positions.get(doc_id) else {
            return Vec::new();
        };
        let freqs = &self.docs[pos].term_freqs;
        let mut seen = HashSet::new();
        tokenize(query)
            .into_iter()
            .filter(|t| freqs.contains_key(t) && seen.insert(t.clone()))
            .collect()
    }

    /// Score every document and return the best `top_k` with score > 0.
    ///
    /// Results are sorted by score descending, ties broken by document id
    /// ascending.
    pub fn query(&self, text: &str, top_k: usize) -> Vec<Hit> {
        let terms = tokenize(text);
        if terms.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut hits: Vec<Hit> = (0..self.docs.len())
            .filter_map(|pos| {
                let score = self.score_terms(&terms, pos);
                (score > 0.0).then(|| Hit {
                    doc_id: self.docs[pos].document.id.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        hits.truncate(top_k);
        hits
    }

    fn score_terms(&self, terms: &[String], pos: usize) -> f64 {
        let doc = &self.docs[pos];
        if doc.len == 0 || self.avgdl <= 0.0 {
            return 0.0;
        }

        terms
            .iter()
            .filter_map(|term| doc.term_freqs.get(term).map(|&tf| (term, tf)))
            .map(|(term, tf)| {
                term_weight(self.idf(term), tf, doc.len, self.avgdl, self.params)
            })
            .sum()
    }
}

/// Contribution of one query term to a document's BM25 score.
pub fn term_weight(idf: f64, tf: usize, doc_len: usize, avgdl: f64, params: Bm25Params) -> f64 {
    if tf == 0 || avgdl <= 0.0 {
        return 0.0;
    }
    let tf = tf as f64;
    let norm = 1.0 - params.b + params.b * doc_len as f64 / avgdl;
    idf * (tf * (params.k1 + 1.0)) / (tf + params.k1 * norm)
}

/// Distinct query terms that appear in the index, for diagnostics.
pub fn known_terms(index: &RelevanceIndex, query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| index.doc_freq.contains_key(t) && seen.insert(t.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            text: text.to_string(),
            origin_class_name: id.rsplit('.').next().unwrap_or(id).to_string(),
            file_path: format!("{}.java", id.replace('.', "/")),
            method_names: Vec::new(),
        }
    }

    fn sample_index() -> RelevanceIndex {
        RelevanceIndex::build(
            vec![
                doc("org.weaver.World", "World resolveType lookupType world"),
                doc("org.weaver.BcelWorld", "BcelWorld resolveType bcel"),
                doc("org.weaver.Shadow", "Shadow munger advice"),
                doc("org.util.Strings", "Strings format pad trim"),
            ],
            Bm25Params::default(),
        )
        .unwrap()
    }

    #[test]
    fn rejects_empty_document_set() {
        let mut index = RelevanceIndex::new(Bm25Params::default());
        assert!(index.index(Vec::new()).is_err());
        assert_eq!(index.score("anything", "x"), 0.0);
        assert!(index.query("anything", 10).is_empty());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = RelevanceIndex::build(
            vec![doc("a.Foo", "foo"), doc("a.Foo", "foo again")],
            Bm25Params::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_invalid_params() {
        let params = Bm25Params { k1: 1.2, b: 1.5 };
        assert!(RelevanceIndex::build(vec![doc("a.Foo", "foo")], params).is_err());
    }

    #[test]
    fn absent_term_scores_zero() {
        let index = sample_index();
        assert_eq!(index.idf("nonexistent"), 0.0);
        assert_eq!(index.score("nonexistent", "org.weaver.World"), 0.0);
    }

    #[test]
    fn matching_term_scores_positive() {
        let index = sample_index();
        assert!(index.score("shadow", "org.weaver.Shadow") > 0.0);
        assert_eq!(index.score("shadow", "org.weaver.World"), 0.0);
        assert_eq!(index.score("shadow", "missing.Doc"), 0.0);
    }

    #[test]
    fn idf_prefers_rare_terms() {
        let index = sample_index();
        // "resolve" appears in two documents, "munger" in one.
        assert!(index.idf("munger") > index.idf("resolve"));
        assert!(index.idf("resolve") > 0.0);
    }

    #[test]
    fn term_weight_non_decreasing_in_tf() {
        let params = Bm25Params::default();
        let mut last = 0.0;
        for tf in 0..20 {
            let w = term_weight(1.3, tf, 12, 10.0, params);
            assert!(w >= last, "tf={tf} weight {w} < {last}");
            last = w;
        }
    }

    #[test]
    fn query_sorted_and_filtered() {
        let index = sample_index();
        let hits = index.query("resolve type world", 10);
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.score > 0.0));
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert_eq!(hits[0].doc_id, "org.weaver.World");
        assert!(!hits.iter().any(|h| h.doc_id == "org.util.Strings"));
    }

    #[test]
    fn query_ties_broken_by_id() {
        let index = RelevanceIndex::build(
            vec![doc("b.Beta", "alpha"), doc("a.Alpha", "alpha"), doc("c.Gamma", "other")],
            Bm25Params::default(),
        )
        .unwrap();
        let hits = index.query("alpha", 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].score, hits[1].score);
        assert_eq!(hits[0].doc_id, "a.Alpha");
        assert_eq!(hits[1].doc_id, "b.Beta");
    }

    #[test]
    fn query_respects_top_k() {
        let index = sample_index();
        assert_eq!(index.query("resolve type", 1).len(), 1);
        assert!(index.query("resolve type", 0).is_empty());
    }

    #[test]
    fn reindex_replaces_content() {
        let mut index = sample_index();
        index.index(vec![doc("x.Only", "only")]).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.document("org.weaver.World").is_none());
        assert!(index.document("x.Only").is_some());
    }

    #[test]
    fn known_terms_dedupes() {
        let index = sample_index();
        assert_eq!(known_terms(&index, "shadow Shadow zzz"), vec!["shadow"]);
    }
}
