pub mod html;
pub mod sitemap;

pub use html::{parse_html, ExtractedLink, ParsedPage};
pub use sitemap::parse_sitemap;
