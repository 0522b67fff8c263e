//! Direct stack-trace evidence.

use std::collections::HashSet;

use super::{CandidateKind, CandidateLocation, SignalEvidence, SignalMap};
use crate::extract::BugReport;
use crate::utils::simple_name;

/// Score 1.0 for candidates whose class appears in a stack frame, else 0.
///
/// Classes are compared by simple name so a candidate found through a
/// different package path still matches its frame.
pub fn score(candidates: &[CandidateLocation], report: &BugReport) -> SignalMap {
    let traced: HashSet<&str> = report
        .stack_trace_class_names
        .iter()
        .map(|c| simple_name(c))
        .collect();

    candidates
        .iter()
        .map(|candidate| {
            let owner = candidate.owner_simple_name();
            let evidence = if !traced.contains(owner) {
                SignalEvidence::zero()
            } else {
                let frame = match candidate.kind {
                    CandidateKind::Class => report
                        .stack_trace_class_names
                        .iter()
                        .find(|c| simple_name(c) == owner)
                        .cloned()
                        .unwrap_or_else(|| owner.to_string()),
                    CandidateKind::Method => candidate.qualified_name.clone(),
                };
                SignalEvidence::new(1.0, vec![format!("stack frame {frame}")])
            };
            (candidate.key(), evidence)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::HeuristicExtractor;

    #[test]
    fn traced_classes_score_one() {
        let report = HeuristicExtractor::new()
            .unwrap()
            .parse("crash\n at a.b.Foo.bar(Foo.java:10)");
        let candidates = vec![
            CandidateLocation::class("a.b.Foo", "a/b/Foo.java"),
            CandidateLocation::class("other.Foo", ""),
            CandidateLocation::method("a.b.Foo.bar", "a/b/Foo.java"),
            CandidateLocation::class("a.b.Baz", ""),
        ];
        let scores = score(&candidates, &report);
        assert_eq!(scores[&candidates[0].key()].score, 1.0);
        assert_eq!(scores[&candidates[1].key()].score, 1.0);
        assert_eq!(scores[&candidates[2].key()].score, 1.0);
        assert_eq!(scores[&candidates[3].key()].score, 0.0);
        assert_eq!(
            scores[&candidates[0].key()].evidence,
            vec!["stack frame a.b.Foo"]
        );
    }

    #[test]
    fn no_trace_scores_zero() {
        let report = HeuristicExtractor::new().unwrap().parse("Foo is slow");
        let candidates = vec![CandidateLocation::class("a.Foo", "")];
        assert_eq!(score(&candidates, &report)[&candidates[0].key()].score, 0.0);
    }
}
