//! Client for the remote cover scanning service.
//!
//! The service takes a photo of a book cover and answers with candidate
//! metadata records. It is an untrusted, best-effort collaborator: any
//! failure is logged and treated as "no candidates".

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::models::{split_genres, NewBook};

/// Upper bound on candidates shown for one scan.
pub const MAX_CANDIDATES: usize = 4;

const SCAN_ROUTE: &str = "/books/scan_cover";

/// One possible match for a scanned cover.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScanCandidate {
    #[serde(default)]
    pub isbn: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: String,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub page_count: Option<i64>,
    #[serde(default)]
    pub genres: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub published_date: String,
}

impl ScanCandidate {
    /// Convert into the fields of a scanned (non-custom) user book. Ratings
    /// arrive as averages and are rounded into the 1-5 star range; zero means
    /// unrated.
    pub fn to_new_book(&self) -> NewBook {
        let rating = if self.rating.is_finite() && self.rating > 0.0 {
            Some(self.rating.round().clamp(1.0, 5.0) as u8)
        } else {
            None
        };

        NewBook {
            title: self.title.trim().to_string(),
            author: self.authors.trim().to_string(),
            excerpt: self.excerpt.clone(),
            summary: self.summary.clone(),
            image: self.thumbnail.clone(),
            rating,
            genres: split_genres(&self.genres),
            is_favorite: false,
            publisher: non_blank(&self.publisher),
            published_date: non_blank(&self.published_date),
            page_count: self.page_count.filter(|count| *count > 0),
            notes: String::new(),
            is_custom_book: false,
            isbn: non_blank(&self.isbn),
            work_id: None,
        }
    }

    pub fn display_title(&self) -> String {
        if self.authors.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.title, self.authors)
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ScanResponse {
    #[serde(default)]
    message: String,
    #[serde(default)]
    results: Vec<ScanCandidate>,
    #[serde(default, rename = "resultsCount")]
    results_count: usize,
}

/// Parse a response body, dropping untitled entries and keeping at most
/// `limit` candidates.
pub fn parse_scan_response(body: &str, limit: usize) -> Result<Vec<ScanCandidate>> {
    let response: ScanResponse =
        serde_json::from_str(body).context("Failed to parse scan response")?;
    debug!(
        message = %response.message,
        reported = response.results_count,
        received = response.results.len(),
        "scan response"
    );

    Ok(response
        .results
        .into_iter()
        .filter(|candidate| !candidate.title.trim().is_empty())
        .take(limit.min(MAX_CANDIDATES))
        .collect())
}

/// Blocking HTTP client for the scanning endpoint.
pub struct CoverScanner {
    client: Client,
    url: String,
    limit: usize,
}

impl CoverScanner {
    pub fn new(config: &ScanConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("tabby/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: format!("{}{}", config.endpoint.trim_end_matches('/'), SCAN_ROUTE),
            limit: config.candidate_limit(),
        })
    }

    /// Send the image and return the candidates, or none at all when the
    /// service cannot be reached or answers with something unusable.
    pub fn scan_cover(&self, image: &[u8]) -> Vec<ScanCandidate> {
        match self.try_scan(image) {
            Ok(candidates) => {
                info!(count = candidates.len(), "cover scan finished");
                candidates
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), url = %self.url, "cover scan failed");
                Vec::new()
            }
        }
    }

    /// Read an image from disk and scan it. A missing or unreadable file is
    /// the caller's mistake and is reported; service failures still degrade
    /// to an empty list.
    pub fn scan_file(&self, path: &Path) -> Result<Vec<ScanCandidate>> {
        let image = fs::read(path)
            .with_context(|| format!("Failed to read image {}", path.display()))?;
        if image.is_empty() {
            bail!("Image {} is empty", path.display());
        }
        Ok(self.scan_cover(&image))
    }

    fn try_scan(&self, image: &[u8]) -> Result<Vec<ScanCandidate>> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"))
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .body(image.to_vec())
            .send()
            .context("Scan request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("Scan service returned {status}");
        }

        let body = response.text().context("Failed to read scan response")?;
        parse_scan_response(&body, self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "message": "Found 5 books.",
        "results": [
            {"isbn": "9780261102217", "title": "The Hobbit", "authors": "J.R.R. Tolkien",
             "rating": 4.4, "excerpt": "In a hole...", "summary": "In a hole in the ground",
             "thumbnail": "http://covers/1.jpg", "page_count": 310, "genres": "Fantasy, Classic",
             "publisher": "Allen & Unwin", "published_date": "1937"},
            {"isbn": "", "title": "  ", "authors": "Nobody"},
            {"isbn": "2", "title": "Two"},
            {"isbn": "3", "title": "Three"},
            {"isbn": "4", "title": "Four"},
            {"isbn": "5", "title": "Five"}
        ],
        "resultsCount": 6
    }"#;

    #[test]
    fn response_is_capped_and_untitled_entries_dropped() {
        let candidates = parse_scan_response(SAMPLE, 10).unwrap();
        assert_eq!(
            candidates
                .iter()
                .map(|c| c.title.as_str())
                .collect::<Vec<_>>(),
            vec!["The Hobbit", "Two", "Three", "Four"]
        );
        assert_eq!(parse_scan_response(SAMPLE, 2).unwrap().len(), 2);
    }

    #[test]
    fn empty_and_malformed_bodies() {
        let empty = r#"{"message": "No books found.", "results": [], "resultsCount": 0}"#;
        assert!(parse_scan_response(empty, 4).unwrap().is_empty());
        assert!(parse_scan_response("<html>502</html>", 4).is_err());
    }

    #[test]
    fn candidate_converts_to_scanned_book() {
        let candidate = parse_scan_response(SAMPLE, 1).unwrap().remove(0);
        let book = candidate.to_new_book();
        assert_eq!(book.title, "The Hobbit");
        assert_eq!(book.author, "J.R.R. Tolkien");
        assert_eq!(book.rating, Some(4));
        assert_eq!(book.genres, vec!["Fantasy", "Classic"]);
        assert_eq!(book.isbn.as_deref(), Some("9780261102217"));
        assert_eq!(book.page_count, Some(310));
        assert!(!book.is_custom_book);

        let bare = ScanCandidate {
            isbn: " ".to_string(),
            title: "Bare".to_string(),
            authors: String::new(),
            rating: 0.0,
            excerpt: String::new(),
            summary: String::new(),
            thumbnail: String::new(),
            page_count: Some(0),
            genres: String::new(),
            publisher: String::new(),
            published_date: String::new(),
        };
        let book = bare.to_new_book();
        assert_eq!(book.rating, None);
        assert_eq!(book.isbn, None);
        assert_eq!(book.page_count, None);
    }

    #[test]
    fn unreachable_service_degrades_to_no_candidates() {
        let scanner = CoverScanner::new(&ScanConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            max_candidates: 4,
        })
        .unwrap();
        assert!(scanner.scan_cover(b"not really a jpeg").is_empty());
    }

    #[test]
    fn missing_image_file_is_reported() {
        let scanner = CoverScanner::new(&ScanConfig::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(scanner.scan_file(&dir.path().join("nope.jpg")).is_err());
    }
}
