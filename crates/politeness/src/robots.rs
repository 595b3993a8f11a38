use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use searchlight_core::CrawlError;
use searchlight_kv::KvStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RobotsRule {
    pub pattern: String,
    pub allow: bool,
}

/// Parsed robots.txt for one domain: the rule list of the most specific
/// user-agent group, kept in original order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotsRules {
    pub exists: bool,
    pub rules: Vec<RobotsRule>,
    pub crawl_delay_ms: Option<u64>,
    pub sitemaps: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

impl RobotsRules {
    pub fn allow_all(exists: bool) -> Self {
        Self {
            exists,
            rules: Vec::new(),
            crawl_delay_ms: None,
            sitemaps: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    /// Parse a robots.txt body, selecting the rule group whose user-agent
    /// token is the longest match for `user_agent` (falling back to `*`).
    /// Directives are case-insensitive; `#` starts a comment.
    pub fn parse(body: &str, user_agent: &str) -> Self {
        struct Group {
            agents: Vec<String>,
            rules: Vec<RobotsRule>,
            crawl_delay: Option<f64>,
        }

        let mut groups: Vec<Group> = Vec::new();
        let mut sitemaps: Vec<String> = Vec::new();
        let mut in_agent_run = false;

        for raw_line in body.lines() {
            let line = match raw_line.find('#') {
                Some(idx) => &raw_line[..idx],
                None => raw_line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if in_agent_run {
                        if let Some(group) = groups.last_mut() {
                            group.agents.push(value.to_lowercase());
                        }
                    } else {
                        groups.push(Group {
                            agents: vec![value.to_lowercase()],
                            rules: Vec::new(),
                            crawl_delay: None,
                        });
                        in_agent_run = true;
                    }
                }
                "allow" | "disallow" => {
                    in_agent_run = false;
                    if let Some(group) = groups.last_mut() {
                        // "Disallow:" with an empty value constrains nothing
                        if !value.is_empty() {
                            group.rules.push(RobotsRule {
                                pattern: value.to_string(),
                                allow: key == "allow",
                            });
                        }
                    }
                }
                "crawl-delay" => {
                    in_agent_run = false;
                    if let Some(group) = groups.last_mut() {
                        group.crawl_delay = value.parse::<f64>().ok();
                    }
                }
                "sitemap" => {
                    sitemaps.push(value.to_string());
                }
                _ => {}
            }
        }

        let ua = user_agent.to_lowercase();
        let selected = groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| a != "*" && ua.contains(a.as_str())))
            .max_by_key(|g| {
                g.agents
                    .iter()
                    .filter(|a| ua.contains(a.as_str()))
                    .map(|a| a.len())
                    .max()
                    .unwrap_or(0)
            })
            .or_else(|| groups.iter().find(|g| g.agents.iter().any(|a| a == "*")));

        match selected {
            Some(group) => Self {
                exists: true,
                rules: group.rules.clone(),
                crawl_delay_ms: group.crawl_delay.map(|d| (d * 1000.0) as u64),
                sitemaps,
                fetched_at: Utc::now(),
            },
            None => Self {
                exists: true,
                rules: Vec::new(),
                crawl_delay_ms: None,
                sitemaps,
                fetched_at: Utc::now(),
            },
        }
    }

    /// Longest-matching pattern decides; a tie between Allow and Disallow
    /// of equal length goes to Allow. No matching rule means allowed.
    pub fn is_allowed(&self, path_and_query: &str) -> bool {
        let path = if path_and_query.is_empty() {
            "/"
        } else {
            path_and_query
        };
        if path == "/robots.txt" {
            return true;
        }
        self.rules
            .iter()
            .filter(|rule| pattern_matches(&rule.pattern, path))
            .max_by_key(|rule| (rule.pattern.len(), rule.allow))
            .map(|rule| rule.allow)
            .unwrap_or(true)
    }

    pub fn is_url_allowed(&self, url: &Url) -> bool {
        let path = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };
        self.is_allowed(&path)
    }
}

/// robots.txt pattern match: a rule is a prefix pattern where `*` matches
/// any run of characters and a trailing `$` anchors the end of the path.
/// Every other character, including regex metacharacters, is literal.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(stripped) => (stripped, true),
        None => (pattern, false),
    };
    let parts: Vec<&str> = pattern.split('*').collect();

    let mut pos = 0usize;
    for (i, part) in parts.iter().enumerate() {
        let last = i == parts.len() - 1;
        if i == 0 {
            if !path[pos..].starts_with(part) {
                return false;
            }
            pos += part.len();
        } else if last && anchored {
            let rest = &path[pos..];
            return rest.len() >= part.len() && rest.ends_with(part);
        } else {
            match path[pos..].find(part) {
                Some(idx) => pos += idx + part.len(),
                None => return false,
            }
        }
    }
    if anchored {
        pos == path.len()
    } else {
        true
    }
}

/// Per-domain robots.txt cache in the shared store (`robots:<domain>`,
/// 24 h TTL by default). A 404 is negative-cached as allow-all; fetch
/// errors degrade to allow-all as well, on the grounds that the circuit
/// breaker already guards a broken host.
pub struct RobotsCache {
    kv: Arc<dyn KvStore>,
    http: reqwest::Client,
    user_agent: String,
    ttl: Duration,
}

impl RobotsCache {
    pub fn new(
        kv: Arc<dyn KvStore>,
        user_agent: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self, CrawlError> {
        let user_agent = user_agent.into();
        let http = reqwest::Client::builder()
            .user_agent(user_agent.clone())
            .connect_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CrawlError::Network(format!("robots client: {e}")))?;
        Ok(Self {
            kv,
            http,
            user_agent,
            ttl,
        })
    }

    fn key(domain: &str) -> String {
        format!("robots:{domain}")
    }

    /// Cache a parsed ruleset; the fetch path and tests both go through
    /// this writer.
    pub async fn insert(&self, domain: &str, rules: &RobotsRules) -> Result<(), CrawlError> {
        let encoded = serde_json::to_string(rules)
            .map_err(|e| CrawlError::Store(format!("robots encode: {e}")))?;
        self.kv
            .set_with_ttl(&Self::key(domain), &encoded, self.ttl)
            .await
    }

    pub async fn rules_for(&self, domain: &str, scheme: &str) -> Result<RobotsRules, CrawlError> {
        if let Some(cached) = self.kv.get(&Self::key(domain)).await? {
            if let Ok(rules) = serde_json::from_str::<RobotsRules>(&cached) {
                return Ok(rules);
            }
        }

        let robots_url = format!("{scheme}://{domain}/robots.txt");
        let rules = match self.http.get(&robots_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let body = resp.text().await.unwrap_or_default();
                RobotsRules::parse(&body, &self.user_agent)
            }
            Ok(resp) => {
                debug!(domain, status = resp.status().as_u16(), "no robots.txt, allowing all");
                RobotsRules::allow_all(false)
            }
            Err(e) => {
                debug!(domain, "robots fetch failed, allowing all: {e}");
                RobotsRules::allow_all(false)
            }
        };
        self.insert(domain, &rules).await?;
        Ok(rules)
    }

    pub async fn sitemaps(&self, domain: &str, scheme: &str) -> Result<Vec<String>, CrawlError> {
        Ok(self.rules_for(domain, scheme).await?.sitemaps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"
# example rules
User-agent: *
Disallow: /private/*
Allow: /private/press/
Crawl-delay: 2
Sitemap: https://example.com/sitemap.xml

User-agent: SearchlightBot
Disallow: /internal
Disallow: /*.cgi$
"#;

    #[test]
    fn selects_specific_group_over_wildcard() {
        let rules = RobotsRules::parse(BODY, "SearchlightBot/1.0");
        assert!(!rules.is_allowed("/internal/reports"));
        // wildcard group's rule does not apply to the specific group
        assert!(rules.is_allowed("/private/x"));
    }

    #[test]
    fn wildcard_group_longest_match_with_allow_override() {
        let rules = RobotsRules::parse(BODY, "OtherBot");
        assert!(!rules.is_allowed("/private/a"));
        assert!(rules.is_allowed("/private/press/release.html"));
        assert!(rules.is_allowed("/public/a"));
        assert_eq!(rules.crawl_delay_ms, Some(2000));
        assert_eq!(rules.sitemaps, vec!["https://example.com/sitemap.xml"]);
    }

    #[test]
    fn dollar_anchors_end_of_path() {
        let rules = RobotsRules::parse(BODY, "SearchlightBot");
        assert!(!rules.is_allowed("/cgi-bin/run.cgi"));
        assert!(rules.is_allowed("/cgi-bin/run.cgi?x=1"));
    }

    #[test]
    fn tie_between_allow_and_disallow_goes_to_allow() {
        let body = "User-agent: *\nDisallow: /x/\nAllow: /x/\n";
        let rules = RobotsRules::parse(body, "AnyBot");
        assert!(rules.is_allowed("/x/page"));
    }

    #[test]
    fn star_matches_any_run() {
        assert!(pattern_matches("/a/*/c", "/a/bbb/c"));
        assert!(pattern_matches("/a/*/c", "/a//c"));
        assert!(!pattern_matches("/a/*/c", "/a/b"));
        assert!(pattern_matches("/*.php", "/x/y.php"));
        assert!(pattern_matches("/*.php$", "/x/y.php"));
        assert!(!pattern_matches("/*.php$", "/x/y.php5"));
        // metacharacters other than * and $ are literal
        assert!(!pattern_matches("/(a|b)", "/a"));
        assert!(pattern_matches("/(a|b)", "/(a|b)/c"));
    }

    #[test]
    fn prefix_rules_follow_longest_match_precedence() {
        let body = "user-agent: *\ndisallow: /\nallow: /fish\n";
        let rules = RobotsRules::parse(body, "AnyBot");
        assert!(rules.is_allowed("/fish"));
        assert!(rules.is_allowed("/fish.html"));
        assert!(rules.is_allowed("/fishheads/yummy.html"));
        assert!(!rules.is_allowed("/bar"));
        assert!(!rules.is_allowed("/catfish"));

        let body = "user-agent: *\nallow: /p\ndisallow: /\n";
        let rules = RobotsRules::parse(body, "AnyBot");
        assert!(rules.is_allowed("/page"));
        assert!(!rules.is_allowed("/other"));

        let body = "user-agent: *\nallow: /page\ndisallow: /*.htm\n";
        let rules = RobotsRules::parse(body, "AnyBot");
        assert!(!rules.is_allowed("/page.htm"));
        assert!(rules.is_allowed("/page"));
    }

    #[test]
    fn consecutive_user_agent_lines_share_one_group() {
        let body = "user-agent: FooBot\nuser-agent: SearchlightBot\ndisallow: /x/\n";
        let rules = RobotsRules::parse(body, "SearchlightBot");
        assert!(!rules.is_allowed("/x/y"));
        let rules = RobotsRules::parse(body, "FooBot");
        assert!(!rules.is_allowed("/x/y"));
        let rules = RobotsRules::parse(body, "OtherBot");
        assert!(rules.is_allowed("/x/y"));
    }

    #[test]
    fn robots_txt_itself_is_always_allowed() {
        let body = "User-agent: *\nDisallow: /\n";
        let rules = RobotsRules::parse(body, "AnyBot");
        assert!(rules.is_allowed("/robots.txt"));
        assert!(!rules.is_allowed("/anything"));
    }

    #[test]
    fn comments_and_case_are_handled() {
        let body = "USER-AGENT: * # trailing comment\nDISALLOW: /Secret\n";
        let rules = RobotsRules::parse(body, "AnyBot");
        assert!(!rules.is_allowed("/Secret/page"));
        // path matching itself is case sensitive
        assert!(rules.is_allowed("/secret/page"));
    }

    #[test]
    fn empty_body_allows_everything() {
        let rules = RobotsRules::parse("", "AnyBot");
        assert!(rules.is_allowed("/anything"));
        assert!(rules.exists);
    }
}
