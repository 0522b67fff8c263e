//! Deterministic, regex-driven report parsing.

use regex::Regex;

use super::{BugReport, ExtractionSource, StackFrame};
use crate::error::{FaultlineError, Result};
use crate::utils::{dedup_capped, simple_name, split_member, truncate_chars};

pub const KEYWORD_CAP: usize = 20;
pub const CLASS_CAP: usize = 15;
pub const METHOD_CAP: usize = 10;
pub const SUMMARY_MAX_CHARS: usize = 200;
pub const UNKNOWN_ERROR_TYPE: &str = "Unknown";

/// Name fragments that mark a capitalized token as a likely type name.
const CLASS_SUFFIXES: &[&str] = &[
    "Pattern",
    "Type",
    "Weaver",
    "World",
    "Shadow",
    "Munger",
    "Resolver",
    "Binding",
    "Handler",
    "Manager",
    "Factory",
    "Builder",
    "Service",
    "Exception",
    "Error",
    "Aspect",
    "Annotation",
    "Match",
    "Join",
    "Point",
];

const TRIM_CHARS: &[char] = &['.', ',', '(', ')', ':', ';', '[', ']', '{', '}', '"', '\'', '-'];

/// Heuristic extractor with precompiled regexes.
#[derive(Debug, Clone)]
pub struct HeuristicExtractor {
    frame: Regex,
    qualified: Regex,
    camel_humps: Regex,
    error_type: Regex,
}

impl HeuristicExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            frame: compile(r"\bat\s+([\w$.]+)\s*\(")?,
            qualified: compile(r"\b(?:[a-z][a-z0-9_]*\.)+[A-Z][A-Za-z0-9]*")?,
            camel_humps: compile(r"^[A-Z][a-z]+(?:[A-Z][a-z]+)+$")?,
            error_type: compile(r"\b[A-Z][A-Za-z0-9]*(?:Exception|Error)\b")?,
        })
    }

    /// Parse report text into a heuristic-only [`BugReport`].
    pub fn parse(&self, text: &str) -> BugReport {
        if text.trim().is_empty() {
            return BugReport::empty(text);
        }

        let stack_frames = self.stack_frames(text);
        let stack_trace_class_names = dedup_capped(
            stack_frames.iter().map(|f| f.class_name.clone()),
            usize::MAX,
        );

        let mut keywords = Vec::new();
        let mut classes = Vec::new();
        let mut methods = Vec::new();
        for word in text.split_whitespace() {
            let cleaned = word.trim_matches(TRIM_CHARS);
            let Some(first) = cleaned.chars().next() else {
                continue;
            };
            let alnum = cleaned.chars().all(|c| c.is_alphanumeric());

            if first.is_uppercase() && cleaned.chars().any(|c| c.is_lowercase()) {
                keywords.push(cleaned.to_string());
                if cleaned.chars().count() > 3 && alnum && self.looks_like_class(cleaned) {
                    classes.push(cleaned.to_string());
                }
            }
            if first.is_lowercase()
                && alnum
                && cleaned.chars().any(|c| c.is_uppercase())
                && cleaned.chars().count() > 4
            {
                methods.push(cleaned.to_string());
            }
        }

        for m in self.qualified.find_iter(text) {
            classes.push(simple_name(m.as_str()).to_string());
        }
        for class in &stack_trace_class_names {
            classes.push(simple_name(class).to_string());
        }

        BugReport {
            text: text.to_string(),
            summary: summary(text),
            error_type_hint: self
                .error_type
                .find(text)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| UNKNOWN_ERROR_TYPE.to_string()),
            keywords: dedup_capped(keywords, KEYWORD_CAP),
            stack_trace_class_names,
            stack_frames,
            potential_class_names: dedup_capped(classes, CLASS_CAP),
            potential_method_names: dedup_capped(methods, METHOD_CAP),
            confirmed_class_names: Vec::new(),
            confirmed_method_names: Vec::new(),
            source: ExtractionSource::Heuristic,
            degradations: Vec::new(),
        }
    }

    /// Frames of the form `at pkg.Class.method(...)`, in order.
    pub fn stack_frames(&self, text: &str) -> Vec<StackFrame> {
        let mut frames: Vec<StackFrame> = Vec::new();
        for caps in self.frame.captures_iter(text) {
            let Some((class_name, method_name)) = caps.get(1).and_then(|m| split_member(m.as_str()))
            else {
                continue;
            };
            let frame = StackFrame {
                class_name: class_name.to_string(),
                method_name: method_name.to_string(),
            };
            if !frames.contains(&frame) {
                frames.push(frame);
            }
        }
        frames
    }

    fn looks_like_class(&self, token: &str) -> bool {
        CLASS_SUFFIXES.iter().any(|s| token.contains(s)) || self.camel_humps.is_match(token)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| FaultlineError::pattern(pattern, e.to_string()))
}

/// First non-frame line longer than 10 characters, else the first line.
fn summary(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.starts_with("at ") && l.chars().count() > 10)
        .or_else(|| text.lines().map(str::trim).find(|l| !l.is_empty()))
        .unwrap_or("");
    truncate_chars(line, SUMMARY_MAX_CHARS).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
NullPointerException in WildAnnotationTypePattern

When matching annotations with array values, resolveAnnotationValues throws.

Stack trace:
at org.aspectj.weaver.patterns.WildAnnotationTypePattern.resolveAnnotationValues(WildAnnotationTypePattern.java:123)
at org.aspectj.weaver.patterns.SignaturePattern.match(SignaturePattern.java:456)
";

    fn parse(text: &str) -> BugReport {
        HeuristicExtractor::new().unwrap().parse(text)
    }

    #[test]
    fn extracts_stack_frames_in_order() {
        let report = parse(REPORT);
        assert_eq!(
            report.stack_trace_class_names,
            vec![
                "org.aspectj.weaver.patterns.WildAnnotationTypePattern",
                "org.aspectj.weaver.patterns.SignaturePattern",
            ]
        );
        assert_eq!(report.stack_frames[0].method_name, "resolveAnnotationValues");
        assert_eq!(report.stack_frames[1].method_name, "match");
    }

    #[test]
    fn collects_class_and_method_candidates() {
        let report = parse(REPORT);
        assert_eq!(report.potential_class_names[0], "NullPointerException");
        assert!(report
            .potential_class_names
            .contains(&"WildAnnotationTypePattern".to_string()));
        assert!(report
            .potential_class_names
            .contains(&"SignaturePattern".to_string()));
        assert_eq!(report.potential_method_names, vec!["resolveAnnotationValues"]);
    }

    #[test]
    fn keywords_are_capitalized_tokens() {
        let report = parse(REPORT);
        assert!(report.keywords.contains(&"When".to_string()));
        assert!(report.keywords.contains(&"Stack".to_string()));
        assert!(!report.keywords.iter().any(|k| k == "at"));
    }

    #[test]
    fn summary_and_error_type() {
        let report = parse(REPORT);
        assert_eq!(report.summary, "NullPointerException in WildAnnotationTypePattern");
        assert_eq!(report.error_type_hint, "NullPointerException");
        assert_eq!(parse("something broke badly today").error_type_hint, UNKNOWN_ERROR_TYPE);
    }

    #[test]
    fn summary_is_truncated() {
        let long = "x".repeat(500);
        assert_eq!(parse(&long).summary.len(), SUMMARY_MAX_CHARS);
    }

    #[test]
    fn qualified_mentions_add_simple_names() {
        let report = parse("see org.example.cache.LruCache for details");
        assert_eq!(report.potential_class_names, vec!["LruCache"]);
    }

    #[test]
    fn single_frame_scenario() {
        let report = parse("boom\n at a.b.Foo.bar(Foo.java:10)");
        assert_eq!(report.stack_trace_class_names, vec!["a.b.Foo"]);
        assert!(report.potential_class_names.contains(&"Foo".to_string()));
    }

    #[test]
    fn blank_report_is_empty() {
        let report = parse("   \n ");
        assert!(report.is_blank());
        assert!(report.keywords.is_empty());
        assert_eq!(report.source, ExtractionSource::Heuristic);
    }

    #[test]
    fn lists_are_capped() {
        let text: String = (0..40)
            .map(|i| format!("Widget{i}Handler "))
            .collect();
        let report = parse(&text);
        assert_eq!(report.keywords.len(), KEYWORD_CAP);
        assert_eq!(report.potential_class_names.len(), CLASS_CAP);
    }
}
