use tantivy::tokenizer::{
    Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, StopWordFilter,
    TextAnalyzer, Tokenizer,
};

/// Name under which the analyzer is registered with the index.
pub const ANALYZER_NAME: &str = "en_stem";

/// English analysis pipeline shared by indexing, query building and the
/// SimHash fingerprinter: split, drop overlong tokens, lowercase, remove
/// stop words, stem.
pub fn analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(StopWordFilter::new(Language::English).expect("english stop words compiled in"))
        .filter(Stemmer::new(Language::English))
        .build()
}

/// Run `text` through the pipeline, truncating the input at
/// `max_input_bytes` and the output at `max_tokens`.
pub fn tokenize(text: &str, max_input_bytes: usize, max_tokens: usize) -> Vec<String> {
    let mut end = text.len().min(max_input_bytes);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut analyzer = analyzer();
    let mut stream = analyzer.token_stream(&text[..end]);
    let mut tokens = Vec::new();
    while let Some(token) = stream.next() {
        if tokens.len() >= max_tokens {
            break;
        }
        tokens.push(token.text.clone());
    }
    tokens
}

/// Distinct tokens in first-seen order; the document's `tokens` field.
pub fn token_set(text: &str, max_input_bytes: usize, max_tokens: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tokenize(text, max_input_bytes, max_tokens * 4)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .take(max_tokens)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems_and_drops_stop_words() {
        let tokens = tokenize("the quick foxes are running", 1024, 100);
        assert!(tokens.contains(&"quick".to_string()));
        assert!(tokens.contains(&"fox".to_string()));
        assert!(tokens.contains(&"run".to_string()));
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"are".to_string()));
    }

    #[test]
    fn token_set_is_distinct_and_bounded() {
        let text = "rust rust rust tokio tokio async";
        let set = token_set(text, 1024, 100);
        assert_eq!(set, vec!["rust", "tokio", "async"]);
        let capped = token_set(text, 1024, 2);
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn input_cap_respects_char_boundaries() {
        let text = "héllo wörld ".repeat(100);
        // a cap landing mid-codepoint must not panic
        for cap in 0..40 {
            let _ = tokenize(&text, cap, 100);
        }
    }
}
