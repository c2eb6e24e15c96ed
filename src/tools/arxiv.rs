//! arXiv paper search over the public Atom API (`/api/query`).
//!
//! The feed is read with the same HTML selector engine the product search
//! uses: Atom elements have no HTML meaning, so they parse as plain nested
//! elements and the selectors below find them by tag name.

use std::sync::OnceLock;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::web::{element_text, fetch_text, http_client, API_USER_AGENT};
use super::{ParamKind, Tool, ToolArguments, ToolDescriptor, ToolError, ToolParameter, ToolResult};
use crate::config::ToolSettings;

/// Upper bound for the `max_results` argument.
pub const MAX_PAPERS: usize = 10;

const UNKNOWN: &str = "unknown";

struct FeedSelectors {
    entry: Selector,
    id: Selector,
    title: Selector,
    summary: Selector,
    author: Selector,
    published: Selector,
}

fn selectors() -> &'static FeedSelectors {
    static SELECTORS: OnceLock<FeedSelectors> = OnceLock::new();
    SELECTORS.get_or_init(|| FeedSelectors {
        entry: parse_selector("entry"),
        id: parse_selector("id"),
        title: parse_selector("title"),
        summary: parse_selector("summary"),
        author: parse_selector("author name"),
        published: parse_selector("published"),
    })
}

fn parse_selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid CSS")
}

/// One paper from a search feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArxivPaper {
    pub title: String,
    pub authors: Vec<String>,
    /// `YYYY-MM-DD`
    pub published: String,
    pub link: String,
    pub summary: String,
}

impl ArxivPaper {
    fn render(&self) -> String {
        let authors = if self.authors.is_empty() {
            UNKNOWN.to_string()
        } else {
            self.authors.join(", ")
        };
        format!(
            "Title: {}\nAuthors: {}\nPublished: {}\nLink: {}\nAbstract: {}",
            self.title, authors, self.published, self.link, self.summary
        )
    }
}

/// What a feed turned out to hold.
#[derive(Debug, PartialEq, Eq)]
pub enum ArxivFeed {
    Papers(Vec<ArxivPaper>),
    /// The API answers bad queries with a single entry describing the error.
    Error(String),
}

/// Parse an Atom search feed.
pub fn parse_feed(xml: &str) -> ArxivFeed {
    let document = Html::parse_document(xml);
    let sel = selectors();

    let mut papers = Vec::new();
    for entry in document.select(&sel.entry) {
        let id = child_text(entry, &sel.id);
        if id.as_deref().is_some_and(|id| id.contains("/api/errors")) {
            let message =
                child_text(entry, &sel.summary).unwrap_or_else(|| "unknown error".to_string());
            return ArxivFeed::Error(message);
        }

        papers.push(ArxivPaper {
            title: child_text(entry, &sel.title).unwrap_or_else(|| UNKNOWN.to_string()),
            authors: entry
                .select(&sel.author)
                .map(element_text)
                .filter(|name| !name.is_empty())
                .collect(),
            published: child_text(entry, &sel.published)
                .map(|date| date.chars().take(10).collect())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            link: id.unwrap_or_else(|| UNKNOWN.to_string()),
            summary: child_text(entry, &sel.summary).unwrap_or_else(|| UNKNOWN.to_string()),
        });
    }
    ArxivFeed::Papers(papers)
}

fn child_text(entry: ElementRef<'_>, selector: &Selector) -> Option<String> {
    entry
        .select(selector)
        .next()
        .map(element_text)
        .filter(|text| !text.is_empty())
}

/// Turn free text into an arXiv `search_query`.
///
/// Queries that already use field prefixes (`ti:`, `au:`, `cat:` ...) pass
/// through; otherwise every word must appear in some field.
fn search_query(query: &str) -> String {
    if query.contains(':') {
        return query.trim().to_string();
    }
    query
        .split_whitespace()
        .map(|word| format!("all:{}", word))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Search arXiv for papers.
pub struct ArxivSearch {
    client: reqwest::Client,
    endpoint: Url,
    default_results: usize,
    descriptor: ToolDescriptor,
}

impl ArxivSearch {
    pub fn new(settings: &ToolSettings) -> Result<Self, ToolError> {
        let endpoint = Url::parse(&settings.arxiv_base_url)
            .and_then(|base| base.join("/api/query"))
            .map_err(|e| {
                ToolError::Setup(format!(
                    "invalid arXiv base URL '{}': {}",
                    settings.arxiv_base_url, e
                ))
            })?;

        let descriptor = ToolDescriptor::new(
            "arxiv_search",
            "Search arXiv for scientific papers. Returns title, authors, publication date, \
             link and abstract for each paper.",
        )
        .with_parameter(ToolParameter::required(
            "query",
            ParamKind::String,
            "Keywords, e.g. 'multimodal large language models'",
        ))
        .with_parameter(ToolParameter::optional(
            "max_results",
            ParamKind::Integer,
            "How many papers to return (1-10)",
        ))
        .with_parameter(ToolParameter::optional(
            "newest",
            ParamKind::Boolean,
            "Order by submission date, newest first, instead of by relevance",
        ));

        Ok(Self {
            client: http_client(API_USER_AGENT, settings.search_timeout)?,
            endpoint,
            default_results: settings.arxiv_max_results.clamp(1, MAX_PAPERS),
            descriptor,
        })
    }

    pub fn search_url(&self, query: &str, max_results: usize, newest: bool) -> Url {
        let (sort_by, sort_order) = if newest {
            ("submittedDate", "descending")
        } else {
            ("relevance", "descending")
        };
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("search_query", &search_query(query))
            .append_pair("start", "0")
            .append_pair("max_results", &max_results.to_string())
            .append_pair("sortBy", sort_by)
            .append_pair("sortOrder", sort_order);
        url
    }

    pub async fn search(&self, query: &str, max_results: Option<usize>, newest: bool) -> ToolResult {
        let max_results = max_results
            .unwrap_or(self.default_results)
            .clamp(1, MAX_PAPERS);
        let url = self.search_url(query, max_results, newest);
        tracing::info!("arXiv search: {}", url);

        let feed = match fetch_text(self.client.get(url)).await {
            Ok(feed) => feed,
            Err(e) => {
                tracing::warn!("arXiv search for '{}' failed: {}", query, e);
                return e.into();
            }
        };

        match parse_feed(&feed) {
            ArxivFeed::Error(message) => {
                ToolError::Network(format!("arXiv rejected the query: {}", message)).into()
            }
            ArxivFeed::Papers(papers) if papers.is_empty() => {
                ToolResult::Ok(format!("No arXiv papers found for '{}'.", query))
            }
            ArxivFeed::Papers(papers) => ToolResult::Ok(
                papers
                    .iter()
                    .take(max_results)
                    .map(ArxivPaper::render)
                    .collect::<Vec<_>>()
                    .join("\n\n"),
            ),
        }
    }
}

#[async_trait]
impl Tool for ArxivSearch {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: &ToolArguments) -> ToolResult {
        let query = match args.str("query") {
            Ok(query) => query,
            Err(e) => return e.into(),
        };
        let max_results = args
            .opt_int("max_results")
            .map(|n| usize::try_from(n).unwrap_or(1));
        let newest = args.opt_bool("newest").unwrap_or(false);
        self.search(query, max_results, newest).await
    }
}
