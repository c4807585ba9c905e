//! Web-page and sitemap fetching.

use scraper::{ElementRef, Html, Selector};
use std::time::Duration;

use crate::error::{Error, Result};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("kb-search/", env!("CARGO_PKG_VERSION"));

/// Extracted text shorter than this usually means an error page or a
/// bot-blocking interstitial.
const SUSPICIOUS_TEXT_LEN: usize = 100;

fn client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::Internal(format!("failed to build http client: {e}")))
}

/// Fetch a web page and convert it to plain text.
pub async fn fetch_page(url: &str) -> Result<String> {
    let resp = client()?
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Transient(format!("failed to fetch {url}: {e}")))?;

    if !resp.status().is_success() {
        return Err(Error::Transient(format!(
            "HTTP error fetching {url}: {}",
            resp.status()
        )));
    }

    let body = resp
        .text()
        .await
        .map_err(|e| Error::Transient(format!("failed to read body of {url}: {e}")))?;

    let text = html_to_text(&body);
    if text.len() < SUSPICIOUS_TEXT_LEN {
        tracing::warn!(
            url,
            text_length = text.len(),
            html_length = body.len(),
            "Very short content extracted from URL"
        );
    }

    Ok(text)
}

/// Fetch a sitemap and return the extracted text of every page it lists.
/// Pages that fail to fetch are skipped, not fatal.
pub async fn fetch_sitemap(url: &str) -> Result<Vec<String>> {
    let resp = client()?
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Transient(format!("failed to fetch sitemap {url}: {e}")))?;

    if !resp.status().is_success() {
        return Err(Error::Transient(format!(
            "HTTP error fetching sitemap {url}: {}",
            resp.status()
        )));
    }

    let xml = resp
        .text()
        .await
        .map_err(|e| Error::Transient(format!("failed to read sitemap {url}: {e}")))?;

    let locations = parse_sitemap_locations(&xml);
    tracing::info!(url, pages = locations.len(), "Walking sitemap");

    let mut pages = Vec::new();
    for location in locations {
        match fetch_page(&location).await {
            Ok(text) => pages.push(text),
            Err(e) => tracing::warn!(url = %location, "Skipping sitemap page: {e}"),
        }
    }
    Ok(pages)
}

/// Pull `<loc>` entries out of a sitemap document.
fn parse_sitemap_locations(xml: &str) -> Vec<String> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut locations = Vec::new();
    let mut in_loc = false;

    loop {
        match reader.read_event() {
            Ok(quick_xml::events::Event::Start(e)) if e.local_name().as_ref() == b"loc" => {
                in_loc = true;
            }
            Ok(quick_xml::events::Event::End(e)) if e.local_name().as_ref() == b"loc" => {
                in_loc = false;
            }
            Ok(quick_xml::events::Event::Text(t)) if in_loc => {
                if let Ok(text) = t.unescape() {
                    let text = text.trim();
                    if !text.is_empty() {
                        locations.push(text.to_string());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => {
                tracing::warn!("Sitemap parse error: {e}");
                break;
            }
            _ => {}
        }
    }

    locations
}

/// Strip HTML down to its visible text, one line per text node.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut parts = Vec::new();

    let body = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next());
    match body {
        Some(body) => collect_text(body, &mut parts),
        None => collect_text(document.root_element(), &mut parts),
    }

    parts.join("\n")
}

fn collect_text(element: ElementRef, parts: &mut Vec<String>) {
    use scraper::node::Node;

    match element.value().name() {
        "script" | "style" | "noscript" | "iframe" | "svg" | "head" => return,
        _ => {}
    }

    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
            }
            Node::Element(_) => {
                if let Some(child_element) = ElementRef::wrap(child) {
                    collect_text(child_element, parts);
                }
            }
            _ => {}
        }
    }
}
