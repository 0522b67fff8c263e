//! Text relevance signal backed by the BM25 index.

use std::sync::Arc;

use super::{CandidateLocation, SignalEvidence, SignalMap};
use crate::indexer::RelevanceIndex;

/// Max matched query terms listed as evidence.
const EVIDENCE_TERMS: usize = 5;

/// Scores candidates by BM25 relevance of their owning class document.
#[derive(Debug, Clone)]
pub struct RelevanceAgent {
    index: Arc<RelevanceIndex>,
}

impl RelevanceAgent {
    pub fn new(index: Arc<RelevanceIndex>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &RelevanceIndex {
        &self.index
    }

    /// BM25 per candidate, normalized by the maximum over `candidates`.
    ///
    /// Candidates without an indexed document score 0.
    pub fn score(&self, candidates: &[CandidateLocation], query: &str) -> SignalMap {
        let raw: Vec<f64> = candidates
            .iter()
            .map(|c| self.index.score(query, c.owner_class()))
            .collect();
        let max = raw.iter().copied().fold(0.0_f64, f64::max);

        candidates
            .iter()
            .zip(raw)
            .map(|(candidate, bm25)| {
                let evidence = if bm25 > 0.0 && max > 0.0 {
                    let mut matched = self.index.matched_terms(query, candidate.owner_class());
                    matched.truncate(EVIDENCE_TERMS);
                    let mut notes = vec![format!("bm25 {bm25:.3}")];
                    if !matched.is_empty() {
                        notes.push(format!("terms: {}", matched.join(", ")));
                    }
                    SignalEvidence::new(bm25 / max, notes)
                } else {
                    SignalEvidence::zero()
                };
                (candidate.key(), evidence)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{Bm25Params, Document};

    fn doc(id: &str, text: &str) -> Document {
        Document {
            id: id.into(),
            text: text.into(),
            origin_class_name: crate::utils::simple_name(id).into(),
            file_path: String::new(),
            method_names: Vec::new(),
        }
    }

    fn agent() -> RelevanceAgent {
        let index = RelevanceIndex::build(
            vec![
                doc("a.World", "World resolveType lookupType world"),
                doc("a.Shadow", "Shadow munger advice"),
                doc("a.Strings", "Strings format pad trim"),
            ],
            Bm25Params::default(),
        )
        .unwrap();
        RelevanceAgent::new(Arc::new(index))
    }

    #[test]
    fn best_candidate_normalizes_to_one() {
        let candidates = vec![
            CandidateLocation::class("a.World", ""),
            CandidateLocation::class("a.Shadow", ""),
            CandidateLocation::class("a.Strings", ""),
        ];
        let scores = agent().score(&candidates, "resolve type in world shadow");
        let world = &scores[&candidates[0].key()];
        let shadow = &scores[&candidates[1].key()];
        assert!((world.score - 1.0).abs() < 1e-12);
        assert!(shadow.score > 0.0 && shadow.score < 1.0);
        assert_eq!(scores[&candidates[2].key()].score, 0.0);
        assert!(world.evidence[1].contains("world"));
    }

    #[test]
    fn methods_inherit_owner_relevance() {
        let candidates = vec![
            CandidateLocation::class("a.World", ""),
            CandidateLocation::method("a.World.resolveType", ""),
        ];
        let scores = agent().score(&candidates, "world");
        assert_eq!(
            scores[&candidates[0].key()].score,
            scores[&candidates[1].key()].score
        );
    }

    #[test]
    fn unknown_candidates_and_empty_queries_score_zero() {
        let candidates = vec![CandidateLocation::class("z.Missing", "")];
        let scores = agent().score(&candidates, "world");
        assert_eq!(scores[&candidates[0].key()].score, 0.0);

        let known = vec![CandidateLocation::class("a.World", "")];
        assert_eq!(agent().score(&known, "")[&known[0].key()].score, 0.0);
    }
}
