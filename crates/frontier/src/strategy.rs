use searchlight_core::config::FrontierConfig;
use searchlight_core::CrawlError;

/// Ceiling for the breadth-first score; depth 0 scores highest.
const BFS_MAX_SCORE: f64 = 100.0;

/// Everything a strategy may look at when scoring a candidate.
#[derive(Debug, Clone)]
pub struct ScoreInputs<'a> {
    pub url: &'a str,
    pub domain: &'a str,
    pub depth: u32,
    pub max_depth: u32,
    /// From the last completed rank job, when known.
    pub pagerank: Option<f64>,
    pub domain_authority: Option<f64>,
    /// OPIC cash accumulated on this URL.
    pub cash: f64,
}

/// Frontier scoring, selected at configuration time and switchable at
/// runtime under the strategy lock.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoringStrategy {
    Bfs,
    BestFirst,
    Opic,
    Focused {
        keywords: Vec<String>,
        whitelist: Vec<String>,
    },
}

impl ScoringStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ScoringStrategy::Bfs => "bfs",
            ScoringStrategy::BestFirst => "best-first",
            ScoringStrategy::Opic => "opic",
            ScoringStrategy::Focused { .. } => "focused",
        }
    }

    pub fn parse(name: &str, config: &FrontierConfig) -> Result<Self, CrawlError> {
        match name {
            "bfs" => Ok(ScoringStrategy::Bfs),
            "best-first" => Ok(ScoringStrategy::BestFirst),
            "opic" => Ok(ScoringStrategy::Opic),
            "focused" => Ok(ScoringStrategy::Focused {
                keywords: config
                    .focus_keywords
                    .iter()
                    .map(|k| k.to_lowercase())
                    .collect(),
                whitelist: config
                    .focus_whitelist
                    .iter()
                    .map(|d| d.to_lowercase())
                    .collect(),
            }),
            other => Err(CrawlError::Config(format!("unknown strategy {other}"))),
        }
    }

    /// Score a candidate; `None` refuses admission outright.
    pub fn score(&self, inputs: &ScoreInputs<'_>) -> Option<f64> {
        match self {
            ScoringStrategy::Bfs => Some(BFS_MAX_SCORE - inputs.depth as f64),
            ScoringStrategy::BestFirst => {
                let pr = inputs.pagerank.unwrap_or(0.0);
                let authority = inputs.domain_authority.unwrap_or(0.0);
                let depth_share = if inputs.max_depth == 0 {
                    0.0
                } else {
                    (inputs.max_depth.saturating_sub(inputs.depth)) as f64
                        / inputs.max_depth as f64
                };
                Some((0.5 * pr + 0.3 * authority + 0.2 * depth_share) * 100.0)
            }
            ScoringStrategy::Opic => Some(inputs.cash),
            ScoringStrategy::Focused {
                keywords,
                whitelist,
            } => {
                if !whitelist.is_empty() {
                    let domain = inputs.domain.to_lowercase();
                    let listed = whitelist
                        .iter()
                        .any(|d| domain == *d || domain.ends_with(&format!(".{d}")));
                    if !listed {
                        return None;
                    }
                }
                let haystack = inputs.url.to_lowercase();
                let keyword_part = if keywords.is_empty() {
                    0.0
                } else {
                    let matches = keywords.iter().filter(|k| haystack.contains(*k)).count();
                    matches as f64 / keywords.len() as f64 * 50.0
                };
                let rank_part = match inputs.pagerank {
                    Some(pr) => pr * 50.0,
                    None => 25.0,
                };
                Some(keyword_part + rank_part)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(depth: u32) -> ScoreInputs<'static> {
        ScoreInputs {
            url: "https://example.com/page/",
            domain: "example.com",
            depth,
            max_depth: 10,
            pagerank: None,
            domain_authority: None,
            cash: 1.0,
        }
    }

    #[test]
    fn bfs_prefers_shallow() {
        let s = ScoringStrategy::Bfs;
        assert!(s.score(&inputs(0)).unwrap() > s.score(&inputs(3)).unwrap());
    }

    #[test]
    fn best_first_weighs_rank_over_depth() {
        let s = ScoringStrategy::BestFirst;
        let mut deep_but_ranked = inputs(8);
        deep_but_ranked.pagerank = Some(0.9);
        deep_but_ranked.domain_authority = Some(0.8);
        let shallow_unranked = inputs(1);
        assert!(s.score(&deep_but_ranked).unwrap() > s.score(&shallow_unranked).unwrap());
        // components bounded: score stays in [0, 100]
        assert!(s.score(&deep_but_ranked).unwrap() <= 100.0);
    }

    #[test]
    fn opic_score_is_cash() {
        let s = ScoringStrategy::Opic;
        let mut rich = inputs(2);
        rich.cash = 3.5;
        assert_eq!(s.score(&rich).unwrap(), 3.5);
    }

    #[test]
    fn focused_refuses_outside_whitelist() {
        let s = ScoringStrategy::Focused {
            keywords: vec!["rust".into()],
            whitelist: vec!["example.com".into()],
        };
        let mut off_list = inputs(1);
        off_list.domain = "other.org";
        assert!(s.score(&off_list).is_none());
        // subdomains of whitelisted domains pass
        let mut sub = inputs(1);
        sub.domain = "docs.example.com";
        assert!(s.score(&sub).is_some());
    }

    #[test]
    fn focused_scores_keywords_and_rank() {
        let s = ScoringStrategy::Focused {
            keywords: vec!["rust".into(), "async".into()],
            whitelist: vec![],
        };
        let mut hit = inputs(1);
        hit.url = "https://example.com/rust/async-book/";
        // both keywords match (50) + unknown rank (25)
        assert_eq!(s.score(&hit).unwrap(), 75.0);
        let mut ranked = hit.clone();
        ranked.pagerank = Some(0.5);
        assert_eq!(s.score(&ranked).unwrap(), 75.0);
        let miss = inputs(1);
        assert_eq!(s.score(&miss).unwrap(), 25.0);
    }

    #[test]
    fn parse_rejects_unknown_names() {
        let config = FrontierConfig::default();
        assert!(ScoringStrategy::parse("bfs", &config).is_ok());
        assert!(ScoringStrategy::parse("best-first", &config).is_ok());
        assert!(ScoringStrategy::parse("dfs", &config).is_err());
    }
}
