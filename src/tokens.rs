//! Identifier-aware tokenization.
//!
//! Both the relevance index and its queries go through [`tokenize`], so the
//! function must stay pure and deterministic: the same input always yields
//! the same term sequence.

/// Minimum token length kept by [`tokenize`].
pub const MIN_TOKEN_LEN: usize = 2;

/// Split text into lower-cased terms.
///
/// - camelCase and PascalCase are split at lower→upper transitions
///   (`myVarX` → `my Var X`) and before the last capital of an acronym run
///   (`HTTPServer` → `HTTP Server`).
/// - snake_case and any other non-alphanumeric character separate terms.
/// - Terms shorter than [`MIN_TOKEN_LEN`] characters are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        split_camel(word, &mut tokens);
    }
    tokens
}

fn split_camel(word: &str, out: &mut Vec<String>) {
    let chars: Vec<char> = word.chars().collect();
    let mut start = 0;

    for i in 1..chars.len() {
        let prev = chars[i - 1];
        let cur = chars[i];
        let lower_to_upper = prev.is_lowercase() && cur.is_uppercase();
        let acronym_end = prev.is_uppercase()
            && cur.is_uppercase()
            && chars.get(i + 1).is_some_and(|next| next.is_lowercase());

        if lower_to_upper || acronym_end {
            push_term(&chars[start..i], out);
            start = i;
        }
    }
    push_term(&chars[start..], out);
}

fn push_term(chars: &[char], out: &mut Vec<String>) {
    if chars.len() < MIN_TOKEN_LEN {
        return;
    }
    let term: String = chars.iter().collect::<String>().to_lowercase();
    out.push(term);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_camel_case_and_drops_short_terms() {
        assert_eq!(tokenize("myVarX"), vec!["my", "var"]);
        assert_eq!(
            tokenize("WildAnnotationTypePattern"),
            vec!["wild", "annotation", "type", "pattern"]
        );
    }

    #[test]
    fn splits_acronym_runs() {
        assert_eq!(tokenize("HTTPServerError"), vec!["http", "server", "error"]);
        assert_eq!(tokenize("parseXML"), vec!["parse", "xml"]);
    }

    #[test]
    fn splits_snake_case_and_punctuation() {
        assert_eq!(
            tokenize("resolve_annotation_values(a.b)"),
            vec!["resolve", "annotation", "values"]
        );
    }

    #[test]
    fn keeps_digits_attached() {
        assert_eq!(tokenize("utf8Decoder v2"), vec!["utf8", "decoder", "v2"]);
    }

    #[test]
    fn empty_and_noise_inputs() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("a b c . , ;").is_empty());
    }

    #[test]
    fn deterministic() {
        let text = "NullPointerException in World.resolveType(BcelWorld.java:10)";
        assert_eq!(tokenize(text), tokenize(text));
    }
}
