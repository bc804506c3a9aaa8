use anyhow::{Result, anyhow};
use reqwest::blocking::Client;
use scraper::{Html, Selector};
use std::time::Duration;

const SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub content_type: String,
    pub body: String,
    pub truncated: bool,
    pub total_bytes: usize,
}

/// HTTP-backed tools. The per-request timeout doubles as the executor's
/// bound on web calls: a stalled request resolves to an error here instead
/// of hanging the loop.
pub struct WebClient {
    client: Client,
}

impl WebClient {
    pub fn new(timeout_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    pub fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let response = self
            .client
            .get(SEARCH_ENDPOINT)
            .query(&[("q", query)])
            .send()?
            .error_for_status()?;
        let html = response.text()?;
        Ok(parse_search_results(&html, max_results))
    }

    pub fn fetch(&self, url: &str, max_bytes: usize) -> Result<FetchedPage> {
        let response = self.client.get(url).send()?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response.bytes()?;
        if bytes.is_empty() && status >= 400 {
            return Err(anyhow!("request failed with HTTP {status}"));
        }
        let total_bytes = bytes.len();
        let truncated = total_bytes > max_bytes;
        let slice = if truncated { &bytes[..max_bytes] } else { &bytes };
        Ok(FetchedPage {
            status,
            content_type,
            body: String::from_utf8_lossy(slice).to_string(),
            truncated,
            total_bytes,
        })
    }
}

/// Pull result links and snippets out of the DuckDuckGo HTML endpoint.
pub fn parse_search_results(html: &str, max_results: usize) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    let result_sel = Selector::parse(".result").expect("valid selector");
    let link_sel = Selector::parse(".result__a").expect("valid selector");
    let snippet_sel = Selector::parse(".result__snippet").expect("valid selector");

    let mut results = Vec::new();
    for element in document.select(&result_sel) {
        let Some(link) = element.select(&link_sel).next() else {
            continue;
        };
        let title = link.text().collect::<String>().trim().to_string();
        let url = link.value().attr("href").unwrap_or_default().to_string();
        if title.is_empty() || url.is_empty() {
            continue;
        }
        let snippet = element
            .select(&snippet_sel)
            .next()
            .map(|s| s.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        results.push(SearchResult {
            title,
            url,
            snippet,
        });
        if results.len() >= max_results {
            break;
        }
    }
    results
}

pub fn format_search_results(query: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!("No results found for: {query}");
    }
    let mut out = String::new();
    for (i, result) in results.iter().enumerate() {
        out.push_str(&format!("{}. {}\n   {}\n", i + 1, result.title, result.url));
        if !result.snippet.is_empty() {
            out.push_str(&format!("   {}\n", result.snippet));
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <html><body>
          <div class="result">
            <a class="result__a" href="https://doc.rust-lang.org/">Rust Documentation</a>
            <a class="result__snippet">Learn Rust programming.</a>
          </div>
          <div class="result">
            <a class="result__a" href="https://crates.io/">crates.io</a>
          </div>
          <div class="result"><span>no link here</span></div>
        </body></html>
    "#;

    #[test]
    fn parses_titles_urls_and_snippets() {
        let results = parse_search_results(SAMPLE, 5);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Rust Documentation");
        assert_eq!(results[0].url, "https://doc.rust-lang.org/");
        assert_eq!(results[0].snippet, "Learn Rust programming.");
        assert_eq!(results[1].snippet, "");
    }

    #[test]
    fn result_cap_is_honored() {
        let results = parse_search_results(SAMPLE, 1);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn formatting_numbers_results() {
        let results = parse_search_results(SAMPLE, 5);
        let formatted = format_search_results("rust", &results);
        assert!(formatted.starts_with("1. Rust Documentation"));
        assert!(formatted.contains("2. crates.io"));

        assert!(format_search_results("rust", &[]).contains("No results"));
    }
}
