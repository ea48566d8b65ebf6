//! Web search tool
//!
//! Queries an HTML search page (DuckDuckGo by default, no API key needed)
//! and extracts titles, links and snippets from the result markup.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::{Result, StepwiseError, ToolResult};
use crate::tools::tool::{required_str, Tool};

/// Hard cap on results per query
const MAX_RESULTS: usize = 10;

/// One extracted search hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Search the web and return the top results
pub struct WebSearch {
    client: reqwest::Client,
    endpoint: String,
    default_results: usize,
}

impl WebSearch {
    pub fn new(endpoint: impl Into<String>, default_results: usize, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; stepwise/0.1)")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            default_results: default_results.clamp(1, MAX_RESULTS),
        })
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let url = url::Url::parse_with_params(&self.endpoint, &[("q", query)])
            .map_err(|e| StepwiseError::tool(format!("Invalid search endpoint: {}", e)))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StepwiseError::tool(format!("Search request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(StepwiseError::tool(format!(
                "Search request failed with status {}",
                status
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| StepwiseError::tool(format!("Could not read search results: {}", e)))?;
        Ok(extract_results(&html, limit))
    }
}

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information. Returns the top results with titles, links and snippets. Use for current information or to find pages worth opening with the browser."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "num_results": {
                    "type": "integer",
                    "description": "Number of results to return (default: 5, at most 10)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let query = required_str(&args, "query")?.trim();
        if query.is_empty() {
            return Err(StepwiseError::tool("Search query is empty"));
        }
        let limit = args
            .get("num_results")
            .and_then(Value::as_u64)
            .map_or(self.default_results, |n| n as usize)
            .clamp(1, MAX_RESULTS);

        tracing::debug!(query, limit, "Web search");
        let hits = self.search(query, limit).await?;
        if hits.is_empty() {
            return Ok(ToolResult::success(format!("No results found for: {}", query)));
        }

        let listing = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                let mut entry = format!("{}. {}\n   {}", i + 1, hit.title, hit.url);
                if !hit.snippet.is_empty() {
                    entry.push_str(&format!("\n   {}", hit.snippet));
                }
                entry
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(ToolResult::success(listing))
    }
}

/// Pull results out of DuckDuckGo-style HTML
///
/// Each result body carries `result__a` (title and link), `result__snippet`
/// and `result__url` elements; bodies without a title are skipped.
pub fn extract_results(html: &str, limit: usize) -> Vec<SearchHit> {
    html.split("result__body")
        .skip(1)
        .filter_map(|chunk| {
            let title = element_text(chunk, "result__a")?;
            let url = element_text(chunk, "result__url")
                .or_else(|| element_href(chunk, "result__a"))
                .unwrap_or_default();
            let snippet = element_text(chunk, "result__snippet").unwrap_or_default();
            Some(SearchHit {
                title,
                url,
                snippet,
            })
        })
        .take(limit)
        .collect()
}

/// Text inside the first element with `class`, tags stripped
fn element_text(chunk: &str, class: &str) -> Option<String> {
    let marker = format!("class=\"{}\"", class);
    let start = chunk.find(&marker)? + marker.len();
    let rest = &chunk[start..];
    let body = &rest[rest.find('>')? + 1..];

    let mut text = String::new();
    let mut in_tag = false;
    let mut depth = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '<' => {
                // Closing tag of the element itself ends the text
                if body[i..].starts_with("</") {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                } else {
                    depth += 1;
                }
                in_tag = true;
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    let text = decode_entities(text.split_whitespace().collect::<Vec<_>>().join(" ").as_str());
    (!text.is_empty()).then_some(text)
}

/// `href` of the first element with `class`
fn element_href(chunk: &str, class: &str) -> Option<String> {
    let marker = format!("class=\"{}\"", class);
    let start = chunk.find(&marker)?;
    let tag_start = chunk[..start].rfind('<')?;
    let tag_end = start + chunk[start..].find('>')?;
    let tag = &chunk[tag_start..tag_end];
    let href = tag.split("href=\"").nth(1)?.split('"').next()?;
    Some(decode_entities(href))
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
