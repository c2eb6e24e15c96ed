//! Wikipedia tools: full-text search and plain-text page loading through the
//! MediaWiki action API (`/w/api.php`).

use async_trait::async_trait;
use scraper::Html;
use serde::Deserialize;
use url::Url;

use super::terminal::truncate_output;
use super::web::{element_text, fetch_json, http_client, API_USER_AGENT};
use super::{ParamKind, Tool, ToolArguments, ToolDescriptor, ToolError, ToolParameter, ToolResult};
use crate::config::ToolSettings;

/// Search hits returned per query.
const MAX_HITS: usize = 5;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(default)]
    query: Option<PageQuery>,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    title: String,
    #[serde(default)]
    extract: Option<String>,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
}

/// Shared HTTP client and API endpoint for both Wikipedia tools.
#[derive(Clone)]
struct WikipediaApi {
    client: reqwest::Client,
    endpoint: Url,
}

impl WikipediaApi {
    fn new(settings: &ToolSettings) -> Result<Self, ToolError> {
        let endpoint = Url::parse(&settings.wikipedia_base_url)
            .and_then(|base| base.join("/w/api.php"))
            .map_err(|e| {
                ToolError::Setup(format!(
                    "invalid Wikipedia base URL '{}': {}",
                    settings.wikipedia_base_url, e
                ))
            })?;

        Ok(Self {
            client: http_client(API_USER_AGENT, settings.search_timeout)?,
            endpoint,
        })
    }

    fn url(&self, params: &[(&str, &str)]) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("format", "json")
            .append_pair("formatversion", "2")
            .extend_pairs(params);
        url
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ToolError> {
        let limit = MAX_HITS.to_string();
        let url = self.url(&[
            ("action", "query"),
            ("list", "search"),
            ("srsearch", query),
            ("srlimit", limit.as_str()),
        ]);
        tracing::info!("Wikipedia search: {}", url);

        let response: SearchResponse = fetch_json(self.client.get(url)).await?;
        Ok(response.query.map(|q| q.search).unwrap_or_default())
    }

    async fn page(&self, title: &str) -> Result<Option<Page>, ToolError> {
        let url = self.url(&[
            ("action", "query"),
            ("prop", "extracts"),
            ("explaintext", "1"),
            ("redirects", "1"),
            ("titles", title),
        ]);
        tracing::info!("Wikipedia page: {}", url);

        let response: PageResponse = fetch_json(self.client.get(url)).await?;
        Ok(response
            .query
            .and_then(|q| q.pages.into_iter().next())
            .filter(|p| !p.missing && !p.invalid))
    }
}

/// Render search hits one per line, snippet markup removed.
fn format_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| {
            let fragment = Html::parse_fragment(&hit.snippet);
            let snippet = element_text(fragment.root_element());
            if snippet.is_empty() {
                format!("- {}", hit.title)
            } else {
                format!("- {}: {}", hit.title, snippet)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Find Wikipedia pages matching a query.
pub struct WikipediaSearch {
    api: WikipediaApi,
    descriptor: ToolDescriptor,
}

impl WikipediaSearch {
    pub fn new(settings: &ToolSettings) -> Result<Self, ToolError> {
        let descriptor = ToolDescriptor::new(
            "wikipedia_search",
            "Search Wikipedia. Returns up to 5 page titles with a short matching snippet each. \
             Use wikipedia_load with an exact title to read a page.",
        )
        .with_parameter(ToolParameter::required(
            "query",
            ParamKind::String,
            "What to look for, e.g. 'Apollo 11 landing date'",
        ));

        Ok(Self {
            api: WikipediaApi::new(settings)?,
            descriptor,
        })
    }

    pub async fn search(&self, query: &str) -> ToolResult {
        match self.api.search(query).await {
            Ok(hits) if hits.is_empty() => {
                ToolResult::Ok(format!("No Wikipedia pages found for '{}'.", query))
            }
            Ok(hits) => ToolResult::Ok(format_hits(&hits)),
            Err(e) => {
                tracing::warn!("Wikipedia search for '{}' failed: {}", query, e);
                e.into()
            }
        }
    }
}

#[async_trait]
impl Tool for WikipediaSearch {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: &ToolArguments) -> ToolResult {
        match args.str("query") {
            Ok(query) => self.search(query).await,
            Err(e) => e.into(),
        }
    }
}

/// Load the plain text of one Wikipedia page.
pub struct WikipediaLoad {
    api: WikipediaApi,
    max_output_chars: usize,
    descriptor: ToolDescriptor,
}

impl WikipediaLoad {
    pub fn new(settings: &ToolSettings) -> Result<Self, ToolError> {
        let descriptor = ToolDescriptor::new(
            "wikipedia_load",
            "Load the text of a Wikipedia page by its title. Redirects are followed; \
             long pages are cut off.",
        )
        .with_parameter(ToolParameter::required(
            "page",
            ParamKind::String,
            "Exact page title, e.g. 'Apollo 11'",
        ));

        Ok(Self {
            api: WikipediaApi::new(settings)?,
            max_output_chars: settings.max_output_chars,
            descriptor,
        })
    }

    pub async fn load(&self, title: &str) -> ToolResult {
        let page = match self.api.page(title).await {
            Ok(Some(page)) => page,
            Ok(None) => return ToolError::PageNotFound(title.to_string()).into(),
            Err(e) => {
                tracing::warn!("Loading Wikipedia page '{}' failed: {}", title, e);
                return e.into();
            }
        };

        let text = page.extract.as_deref().map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return ToolResult::Ok(format!("# {}\n\n(The page has no text.)", page.title));
        }
        ToolResult::Ok(format!(
            "# {}\n\n{}",
            page.title,
            truncate_output(text, self.max_output_chars)
        ))
    }
}

#[async_trait]
impl Tool for WikipediaLoad {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: &ToolArguments) -> ToolResult {
        match args.str("page") {
            Ok(page) => self.load(page).await,
            Err(e) => e.into(),
        }
    }
}
