//! XML fragments of the sitemap document.

use chrono::NaiveDate;
use sitemapper_core::{ContentItem, SitemapConfig};

/// Format preamble plus the opening root element.
pub const HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n";

/// Closing root element.
pub const FOOTER: &str = "</urlset>\n";

/// Priority used when a content type has no configured default.
pub const FALLBACK_PRIORITY: &str = "0.5";

/// Priority given to the site root and to priority paths.
pub const TOP_PRIORITY: &str = "1.0";

/// Escape the five XML special characters.
pub fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// One `<url>` element.
pub fn url_entry(loc: &str, lastmod: NaiveDate, changefreq: &str, priority: &str) -> String {
    format!(
        "  <url>\n    <loc>{}</loc>\n    <lastmod>{}</lastmod>\n    <changefreq>{}</changefreq>\n    <priority>{}</priority>\n  </url>\n",
        escape_xml(loc),
        lastmod.format("%Y-%m-%d"),
        escape_xml(changefreq),
        priority
    )
}

fn is_site_root(url: &str, site_url: &str) -> bool {
    url.trim_end_matches('/') == site_url.trim_end_matches('/')
}

/// Top priority for the site root and priority paths, else the type default.
pub fn priority_for<'a>(config: &'a SitemapConfig, url: &str, content_type: &str) -> &'a str {
    if is_site_root(url, &config.site_url)
        || config.priority_paths.iter().any(|p| url.contains(p.as_str()))
    {
        return TOP_PRIORITY;
    }
    config.type_priority(content_type).unwrap_or(FALLBACK_PRIORITY)
}

/// `<url>` element for a content item.
pub fn item_entry(config: &SitemapConfig, item: &ContentItem) -> String {
    url_entry(
        &item.url,
        item.last_modified.date_naive(),
        &config.change_freq,
        priority_for(config, &item.url, &item.content_type),
    )
}

/// Absolute URL of the auxiliary resource.
pub fn auxiliary_url(config: &SitemapConfig) -> String {
    format!(
        "{}/{}",
        config.site_url.trim_end_matches('/'),
        config.auxiliary.path.trim_start_matches('/')
    )
}

/// Synthetic auxiliary entry followed by the closing tag.
pub fn trailer(config: &SitemapConfig, today: NaiveDate) -> String {
    let mut out = url_entry(
        &auxiliary_url(config),
        today,
        &config.change_freq,
        &config.auxiliary.priority,
    );
    out.push_str(FOOTER);
    out
}
