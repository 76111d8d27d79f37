//! Phase 1: Web search and context building
//!
//! Runs each task's query against Tavily and turns the hits into two texts:
//! a bullet list of sources for display and a context block for the
//! summarizer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use deepcast_sdk::{ContextBuilder, Retriever, SearchOutcome, SearchResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

pub const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
pub const MAX_TOKENS_PER_SOURCE: usize = 2000;
const CHARS_PER_TOKEN: usize = 4;

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
    include_answer: bool,
    include_raw_content: bool,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchResult>,
}

pub struct TavilyRetriever {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    max_results: usize,
    fetch_full_page: bool,
}

impl TavilyRetriever {
    pub fn new(api_key: Option<String>, max_results: usize, fetch_full_page: bool) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build search HTTP client")?;
        Ok(Self {
            http,
            endpoint: TAVILY_ENDPOINT.to_string(),
            api_key,
            max_results,
            fetch_full_page,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Retriever for TavilyRetriever {
    async fn search(&self, query: &str, loop_count: u32) -> Result<SearchOutcome> {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::warn!(query, "TAVILY_API_KEY is not set, search skipped");
            return Ok(SearchOutcome {
                results: None,
                notices: vec!["Tavily API key is not configured; search skipped".to_string()],
                answer: None,
                backend: "tavily".to_string(),
            });
        };

        let request = TavilyRequest {
            api_key,
            query,
            max_results: self.max_results,
            search_depth: "advanced",
            include_answer: true,
            include_raw_content: self.fetch_full_page,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Search request failed for query: {}", query))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Search backend returned {}: {}", status, body);
        }

        let body = response
            .text()
            .await
            .context("Failed to read search response")?;
        let parsed: TavilyResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(query, error = %e, "search backend returned a non-JSON response");
                let text = body.trim();
                let notices = if text.is_empty() {
                    Vec::new()
                } else {
                    vec![text.chars().take(500).collect()]
                };
                return Ok(SearchOutcome {
                    results: None,
                    notices,
                    answer: None,
                    backend: "tavily".to_string(),
                });
            }
        };

        tracing::info!(
            backend = "tavily",
            loop_count,
            answer = parsed.answer.is_some(),
            results = parsed.results.len(),
            "search finished"
        );

        Ok(SearchOutcome {
            results: Some(parsed.results),
            notices: Vec::new(),
            answer: parsed.answer.filter(|a| !a.trim().is_empty()),
            backend: "tavily".to_string(),
        })
    }
}

/// Deduplicating source formatter
#[derive(Debug, Clone)]
pub struct SourceFormatter {
    /// Append (truncated) raw page content to each source
    pub fetch_full_page: bool,
    pub max_tokens_per_source: usize,
}

impl Default for SourceFormatter {
    fn default() -> Self {
        Self {
            fetch_full_page: true,
            max_tokens_per_source: MAX_TOKENS_PER_SOURCE,
        }
    }
}

impl SourceFormatter {
    /// One `* title : url` line per result with a URL
    pub fn format_sources(results: &[SearchResult]) -> String {
        results
            .iter()
            .filter_map(|r| {
                let url = r.url.as_deref().filter(|u| !u.is_empty())?;
                let title = r.title.as_deref().filter(|t| !t.is_empty()).unwrap_or(url);
                Some(format!("* {} : {}", title, url))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Context block with one section per distinct URL
    pub fn format_context(&self, results: &[SearchResult]) -> String {
        let mut seen = HashSet::new();
        let mut out = String::new();
        let char_limit = self.max_tokens_per_source * CHARS_PER_TOKEN;

        for result in results {
            let Some(url) = result.url.as_deref().filter(|u| !u.is_empty()) else {
                continue;
            };
            if !seen.insert(url) {
                continue;
            }

            let title = result.title.as_deref().filter(|t| !t.is_empty()).unwrap_or(url);
            out.push_str(&format!("Source: {}\n\n", title));
            out.push_str(&format!("URL: {}\n\n", url));
            out.push_str(&format!(
                "Content: {}\n\n",
                result.content.as_deref().unwrap_or_default()
            ));

            if self.fetch_full_page {
                let raw = result.raw_content.as_deref().unwrap_or_default();
                let raw = if raw.chars().count() > char_limit {
                    format!("{}... [truncated]", raw.chars().take(char_limit).collect::<String>())
                } else {
                    raw.to_string()
                };
                out.push_str(&format!(
                    "Full content (limited to {} tokens): {}\n\n",
                    self.max_tokens_per_source, raw
                ));
            }
        }

        out.trim().to_string()
    }
}

impl ContextBuilder for SourceFormatter {
    fn prepare(&self, results: &[SearchResult], answer: Option<&str>) -> (String, String) {
        let sources_summary = Self::format_sources(results);
        let mut context = self.format_context(results);
        if let Some(answer) = answer.filter(|a| !a.trim().is_empty()) {
            context = format!("Direct answer:\n{}\n\n{}", answer, context);
        }
        (sources_summary, context)
    }
}
