/// Curated dictionary the per-token corrector checks against. Skewed
/// toward the technical vocabulary this engine indexes.
const DICTIONARY: &[&str] = &[
    "algorithm", "android", "angular", "api", "application", "array", "async", "authentication",
    "backend", "benchmark", "binary", "blockchain", "browser", "cache", "class", "client",
    "cloud", "cluster", "compiler", "concurrency", "container", "cookie", "crawler", "database",
    "debugging", "deployment", "design", "development", "distributed", "docker", "documentation",
    "encryption", "engine", "error", "example", "exception", "framework", "frontend", "function",
    "garbage", "golang", "gradle", "graph", "guide", "hashmap", "haskell", "howto", "html",
    "http", "index", "inheritance", "install", "integration", "interface", "iterator", "java",
    "javascript", "kernel", "kotlin", "kubernetes", "lambda", "latency", "library", "linux",
    "machine", "memory", "microservice", "migration", "module", "mutex", "network", "node",
    "object", "optimization", "pagination", "parallel", "parsing", "pattern", "performance",
    "pipeline", "pointer", "postgres", "programming", "protocol", "python", "query", "queue",
    "react", "recursion", "redis", "reference", "regex", "request", "response", "runtime",
    "rust", "scaling", "schema", "search", "security", "server", "service", "session", "socket",
    "software", "spring", "storage", "stream", "string", "structure", "syntax", "system",
    "template", "testing", "thread", "threading", "tutorial", "typescript", "variable",
    "version", "virtual", "webpack", "websocket",
];

/// Classic two-row Levenshtein distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

fn correct_token(token: &str) -> Option<String> {
    if token.len() < 3 || DICTIONARY.contains(&token) {
        return None;
    }
    let mut best: Option<(usize, &str)> = None;
    for word in DICTIONARY {
        // a length gap over 2 cannot be within distance 2
        if token.len().abs_diff(word.len()) > 2 {
            continue;
        }
        let distance = levenshtein(token, word);
        if distance <= 2 && best.map(|(d, _)| distance < d).unwrap_or(true) {
            best = Some((distance, word));
            if distance == 1 {
                break;
            }
        }
    }
    best.map(|(_, word)| word.to_string())
}

/// Per-token correction against the dictionary. Returns the corrected
/// query and, when anything changed, the full suggestion for the
/// `didYouMean` field.
pub fn correct_query(normalized: &str) -> (String, Option<String>) {
    let mut corrected_any = false;
    let corrected: Vec<String> = normalized
        .split_whitespace()
        .map(|token| match correct_token(token) {
            Some(fixed) => {
                corrected_any = true;
                fixed
            }
            None => token.to_string(),
        })
        .collect();
    let corrected = corrected.join(" ");
    if corrected_any {
        let suggestion = corrected.clone();
        (corrected, Some(suggestion))
    } else {
        (corrected, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_basics() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", "abc"), 0);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("concurency", "concurrency"), 1);
    }

    #[test]
    fn corrects_misspelled_tokens() {
        let (corrected, did_you_mean) = correct_query("java concurency tutoral");
        assert_eq!(corrected, "java concurrency tutorial");
        assert_eq!(did_you_mean.as_deref(), Some("java concurrency tutorial"));
    }

    #[test]
    fn leaves_correct_queries_untouched() {
        let (corrected, did_you_mean) = correct_query("rust async programming");
        assert_eq!(corrected, "rust async programming");
        assert!(did_you_mean.is_none());
    }

    #[test]
    fn ignores_short_and_unknown_tokens() {
        let (corrected, did_you_mean) = correct_query("go qzxwv");
        // "go" too short to correct; "qzxwv" too far from anything
        assert_eq!(corrected, "go qzxwv");
        assert!(did_you_mean.is_none());
    }
}
