use ego_tree::NodeRef;
use scraper::{Html, Node, Selector};
use url::Url;

/// Chrome that carries no document text.
const STRIPPED_TAGS: &[&str] = &["script", "style", "nav", "footer", "header"];

/// Binary/media targets we never fetch.
const MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "pdf", "zip", "exe", "mp4", "mp3", "avi", "doc", "docx", "xls",
    "xlsx", "ppt", "pptx",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    pub url: String,
    pub anchor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedPage {
    pub title: Option<String>,
    /// Cleaned body text: chrome stripped, whitespace collapsed, capped.
    pub text: String,
    /// Absolute http(s) links with media targets filtered out.
    pub links: Vec<ExtractedLink>,
}

/// Extract title, cleaned text and outbound links from an HTML document.
/// `max_text_bytes` caps the cleaned body (cut at a char boundary).
pub fn parse_html(html_str: &str, base_url: &Url, max_text_bytes: usize) -> ParsedPage {
    let document = Html::parse_document(html_str);

    let title = selector("title")
        .and_then(|s| document.select(&s).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let mut pieces: Vec<String> = Vec::new();
    collect_text(document.tree.root(), &mut pieces);
    let joined = pieces.join(" ");
    let collapsed = joined.split_whitespace().collect::<Vec<_>>().join(" ");
    let text = truncate_at_char_boundary(&collapsed, max_text_bytes).to_string();

    let links = extract_links(&document, base_url);

    ParsedPage { title, text, links }
}

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

fn collect_text(node: NodeRef<'_, Node>, out: &mut Vec<String>) {
    for child in node.children() {
        match child.value() {
            Node::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
            }
            Node::Element(element) => {
                let name = element.name();
                if name != "title" && !STRIPPED_TAGS.contains(&name) {
                    collect_text(child, out);
                }
            }
            _ => {}
        }
    }
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn has_media_extension(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    path.rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .map(|(_, ext)| MEDIA_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<ExtractedLink> {
    let Some(sel) = selector("a[href]") else {
        return vec![];
    };

    document
        .select(&sel)
        .filter_map(|el| {
            let href = el.value().attr("href")?;

            if href.starts_with("javascript:")
                || href.starts_with("mailto:")
                || href.starts_with("tel:")
                || href.starts_with("data:")
                || href.starts_with('#')
            {
                return None;
            }

            let resolved = base_url.join(href).ok()?;
            if resolved.scheme() != "http" && resolved.scheme() != "https" {
                return None;
            }
            if has_media_extension(&resolved) {
                return None;
            }

            let anchor = {
                let t = el.text().collect::<String>().trim().to_string();
                if t.is_empty() {
                    None
                } else {
                    Some(t)
                }
            };

            Some(ExtractedLink {
                url: resolved.to_string(),
                anchor,
            })
        })
        .collect()
}
