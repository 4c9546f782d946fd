//! Sitemap discovery for cache warming.
//!
//! Handles both `<urlset>` documents and `<sitemapindex>` documents; indexes
//! are followed recursively up to [`MAX_INDEX_DEPTH`] levels.

use std::{future::Future, pin::Pin};

use quick_xml::{Reader, events::Event};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

/// Maximum nesting of sitemap indexes.
pub const MAX_INDEX_DEPTH: u8 = 3;

/// Maximum child sitemaps followed from a single index.
pub const MAX_CHILD_SITEMAPS: usize = 100;

const TARGET: &str = "quire::infra::sitemap";

#[derive(Debug, Error)]
pub enum SitemapError {
    #[error("failed to fetch sitemap `{url}`: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to parse sitemap: {0}")]
    Parse(String),
    #[error("sitemap index nesting exceeds {MAX_INDEX_DEPTH} levels")]
    TooDeep,
}

/// Parsed sitemap document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapContent {
    /// Page URLs from a `<urlset>`.
    Urls(Vec<String>),
    /// Child sitemap URLs from a `<sitemapindex>`.
    Index(Vec<String>),
}

pub fn is_sitemap_index(xml: &str) -> bool {
    xml.contains("<sitemapindex")
}

/// Parse a sitemap body, collecting the `<loc>` of each `<url>` or `<sitemap>` entry.
pub fn parse_sitemap(xml: &str) -> Result<SitemapContent, SitemapError> {
    let index = is_sitemap_index(xml);
    let entry_tag: &[u8] = if index { b"sitemap" } else { b"url" };

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut locs = Vec::new();
    let mut buf = Vec::new();
    let mut in_entry = false;
    let mut in_loc = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == entry_tag {
                    in_entry = true;
                } else if in_entry && name.as_ref() == b"loc" {
                    in_loc = true;
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == entry_tag {
                    in_entry = false;
                }
                in_loc = false;
            }
            Ok(Event::Text(e)) if in_loc => {
                let text = e
                    .unescape()
                    .map_err(|err| SitemapError::Parse(err.to_string()))?;
                let text = text.trim();
                if !text.is_empty() {
                    locs.push(text.to_string());
                }
            }
            Ok(Event::CData(e)) if in_loc => {
                let text = String::from_utf8_lossy(&e);
                let text = text.trim();
                if !text.is_empty() {
                    locs.push(text.to_string());
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(SitemapError::Parse(format!("XML parse error: {err}"))),
            _ => {}
        }
        buf.clear();
    }

    Ok(if index {
        SitemapContent::Index(locs)
    } else {
        SitemapContent::Urls(locs)
    })
}

/// Fetch a sitemap and every page URL it lists, following nested indexes.
/// A failing child sitemap is logged and skipped.
pub async fn fetch_sitemap_urls(client: &Client, url: &str) -> Result<Vec<String>, SitemapError> {
    fetch_recursive(client.clone(), url.to_string(), 0).await
}

type SitemapFuture = Pin<Box<dyn Future<Output = Result<Vec<String>, SitemapError>> + Send>>;

fn fetch_recursive(client: Client, url: String, depth: u8) -> SitemapFuture {
    Box::pin(async move {
        if depth > MAX_INDEX_DEPTH {
            return Err(SitemapError::TooDeep);
        }

        debug!(target = TARGET, url = %url, depth, "Fetching sitemap");
        let http = |source| SitemapError::Http {
            url: url.clone(),
            source,
        };
        let xml = client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(http)?
            .text()
            .await
            .map_err(http)?;

        match parse_sitemap(&xml)? {
            SitemapContent::Urls(urls) => Ok(urls),
            SitemapContent::Index(children) => {
                let mut urls = Vec::new();
                for child in children.into_iter().take(MAX_CHILD_SITEMAPS) {
                    match fetch_recursive(client.clone(), child.clone(), depth + 1).await {
                        Ok(found) => urls.extend(found),
                        Err(err) => warn!(
                            target = TARGET,
                            url = %child,
                            error = %err,
                            "Failed to fetch child sitemap"
                        ),
                    }
                }
                Ok(urls)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    const URLSET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://example.com/blog/one</loc><lastmod>2024-01-01</lastmod></url>
  <url><loc> https://example.com/blog/two?a=1&amp;b=2 </loc></url>
</urlset>"#;

    #[test]
    fn urlset_locs_are_collected_and_unescaped() {
        let content = parse_sitemap(URLSET).expect("parse");
        assert_eq!(
            content,
            SitemapContent::Urls(vec![
                "https://example.com/blog/one".to_string(),
                "https://example.com/blog/two?a=1&b=2".to_string(),
            ])
        );
    }

    #[test]
    fn index_documents_are_detected() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://example.com/pages.xml</loc></sitemap>
</sitemapindex>"#;
        assert!(is_sitemap_index(xml));
        assert_eq!(
            parse_sitemap(xml).expect("parse"),
            SitemapContent::Index(vec!["https://example.com/pages.xml".to_string()])
        );
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let err = parse_sitemap("<urlset><url><loc>x</url></urlset>").expect_err("mismatched tags");
        assert!(matches!(err, SitemapError::Parse(_)));
    }

    #[tokio::test]
    async fn nested_indexes_are_followed_and_broken_children_skipped() {
        let server = MockServer::start_async().await;
        let index = format!(
            r#"<sitemapindex>
  <sitemap><loc>{}</loc></sitemap>
  <sitemap><loc>{}</loc></sitemap>
</sitemapindex>"#,
            server.url("/pages.xml"),
            server.url("/missing.xml")
        );
        server
            .mock_async(|when, then| {
                when.method(GET).path("/sitemap.xml");
                then.status(200).body(index);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/pages.xml");
                then.status(200).body(URLSET);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing.xml");
                then.status(404);
            })
            .await;

        let urls = fetch_sitemap_urls(&Client::new(), &server.url("/sitemap.xml"))
            .await
            .expect("urls");
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0], "https://example.com/blog/one");
    }
}
