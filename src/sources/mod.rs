//! External-source fetching: git repositories, sitemaps, and web pages.
//!
//! [`fetch_source`] routes a URL to the right fetcher by suffix and returns
//! plain text ready for chunking. [`manager::SourceManager`] drives the
//! periodic refresh of every registered source.

pub mod git;
pub mod manager;
pub mod web;

use crate::error::Result;

/// Per-process source-fetching configuration.
#[derive(Debug, Clone, Default)]
pub struct SourceConfig {
    /// Base64-encoded SSH private key for cloning private git repos.
    pub git_ssh_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    GitRepository,
    Sitemap,
    WebPage,
}

/// Classify a URL by suffix.
pub fn classify(url: &str) -> SourceKind {
    if url.ends_with(".git") {
        SourceKind::GitRepository
    } else if url.ends_with("sitemap.xml") {
        SourceKind::Sitemap
    } else {
        SourceKind::WebPage
    }
}

/// Fetch a source URL and return its extracted text.
pub async fn fetch_source(url: &str, config: &SourceConfig) -> Result<String> {
    match classify(url) {
        SourceKind::GitRepository => {
            git::fetch_repository(url, config.git_ssh_key.as_deref()).await
        }
        SourceKind::Sitemap => {
            let pages = web::fetch_sitemap(url).await?;
            Ok(pages.join("\n"))
        }
        SourceKind::WebPage => web::fetch_page(url).await,
    }
}

/// Deterministic entry name for a source, so repeated updates replace the
/// previous content instead of accumulating.
pub fn synthetic_filename(collection: &str, url: &str) -> String {
    format!("source-{collection}-{}.txt", sanitize_url(url))
}

/// Convert a URL into a filesystem-safe string: lowercase, URL
/// punctuation and whitespace collapsed to single dashes, at most 255
/// bytes.
pub fn sanitize_url(url: &str) -> String {
    let mut sanitized = String::with_capacity(url.len());
    let mut last_dash = false;
    for c in url.to_lowercase().chars() {
        let mapped = match c {
            ':' | '/' | '?' | '&' | '=' | '#' | '@' | '.' | '+' => '-',
            c if c.is_whitespace() => '-',
            c => c,
        };
        if mapped == '-' {
            if !last_dash {
                sanitized.push('-');
            }
            last_dash = true;
        } else {
            sanitized.push(mapped);
            last_dash = false;
        }
    }

    let mut sanitized = sanitized.trim_matches('-').to_string();
    if sanitized.len() > 255 {
        let mut end = 255;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized.truncate(end);
        sanitized = sanitized.trim_end_matches('-').to_string();
    }
    sanitized
}
