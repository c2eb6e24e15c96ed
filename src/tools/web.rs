//! Product search tool: fetches a shop's search page and extracts product cards.
//!
//! The markup contract is fixed and undocumented by the site:
//! - each product is a `div.card`
//! - `div.card__head[data-price]` carries the numeric price
//! - `a.card__title` carries the title text and a relative `href`
//! - `div.star-gradient-number` carries the rating, when there is one
//!
//! Any of these may be missing. A missing field becomes a placeholder; it
//! never stops extraction of the other fields or cards. A site redesign
//! therefore looks the same as cards that simply lack those fields.

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::de::DeserializeOwned;
use url::Url;

use super::{ParamKind, Tool, ToolArguments, ToolDescriptor, ToolError, ToolParameter, ToolResult};
use crate::config::ToolSettings;

/// Hard cap on extracted cards per search.
pub const MAX_RECORDS: usize = 5;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Identifies the agent to public APIs that ask callers to name themselves.
pub(super) const API_USER_AGENT: &str =
    concat!("scout-agent/", env!("CARGO_PKG_VERSION"), " (tool-using research agent)");

const SEARCH_PATH: &str = "/uk/search";

const TITLE_PLACEHOLDER: &str = "title not found";
const PRICE_PLACEHOLDER: &str = "price not listed";
const RATING_PLACEHOLDER: &str = "no rating";
const LINK_PLACEHOLDER: &str = "link not found";

struct CardSelectors {
    card: Selector,
    head: Selector,
    title: Selector,
    rating: Selector,
}

fn selectors() -> &'static CardSelectors {
    static SELECTORS: OnceLock<CardSelectors> = OnceLock::new();
    SELECTORS.get_or_init(|| CardSelectors {
        card: parse_selector("div.card"),
        head: parse_selector("div.card__head"),
        title: parse_selector("a.card__title"),
        rating: parse_selector("div.star-gradient-number"),
    })
}

fn parse_selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid CSS")
}

/// One product card. Every field holds either a value or its placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRecord {
    pub title: String,
    pub price: String,
    pub rating: String,
    pub link: String,
}

impl fmt::Display for ExtractedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "- Title: {}, Price: {}, Rating: {}, Link: {}",
            self.title, self.price, self.rating, self.link
        )
    }
}

/// Extract at most [`MAX_RECORDS`] product cards from a search page.
pub fn extract_records(html: &str, base_url: &Url, currency: &str) -> Vec<ExtractedRecord> {
    let document = Html::parse_document(html);
    document
        .select(&selectors().card)
        .take(MAX_RECORDS)
        .map(|card| extract_card(card, base_url, currency))
        .collect()
}

/// Render records one per line for the engine.
pub fn format_records(records: &[ExtractedRecord]) -> String {
    records
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn extract_card(card: ElementRef<'_>, base_url: &Url, currency: &str) -> ExtractedRecord {
    let sel = selectors();
    let title_tag = card.select(&sel.title).next();

    let title = title_tag
        .map(element_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| TITLE_PLACEHOLDER.to_string());

    let price = card
        .select(&sel.head)
        .next()
        .and_then(|head| head.value().attr("data-price"))
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
        .map(|v| format!("{} {}", v, currency))
        .unwrap_or_else(|| PRICE_PLACEHOLDER.to_string());

    let rating = card
        .select(&sel.rating)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| RATING_PLACEHOLDER.to_string());

    let link = title_tag
        .and_then(|a| a.value().attr("href"))
        .filter(|href| !href.trim().is_empty())
        .and_then(|href| base_url.join(href.trim()).ok())
        .map(String::from)
        .unwrap_or_else(|| LINK_PLACEHOLDER.to_string());

    ExtractedRecord {
        title,
        price,
        rating,
        link,
    }
}

/// Descendant text with whitespace collapsed.
pub(super) fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Search the shop for products.
pub struct ProductSearch {
    client: reqwest::Client,
    base_url: Url,
    currency: String,
    descriptor: ToolDescriptor,
}

impl ProductSearch {
    pub fn new(settings: &ToolSettings) -> Result<Self, ToolError> {
        let base_url = Url::parse(&settings.search_base_url).map_err(|e| {
            ToolError::Setup(format!(
                "invalid search base URL '{}': {}",
                settings.search_base_url, e
            ))
        })?;

        let client = http_client(USER_AGENT, settings.search_timeout)?;

        let descriptor = ToolDescriptor::new(
            "search_products",
            "Search the online shop for products. Returns up to 5 products with title, price, \
             rating and link, one per line.",
        )
        .with_parameter(ToolParameter::required(
            "query",
            ParamKind::String,
            "The product search query, e.g. 'capybara'",
        ));

        Ok(Self {
            client,
            base_url,
            currency: settings.currency.clone(),
            descriptor,
        })
    }

    /// The search page URL for `query`.
    pub fn search_url(&self, query: &str) -> String {
        format!(
            "{}{}?query={}",
            self.base_url.as_str().trim_end_matches('/'),
            SEARCH_PATH,
            urlencoding::encode(query)
        )
    }

    /// Fetch the search page for `query` and extract its product cards.
    pub async fn search(&self, query: &str) -> ToolResult {
        let url = self.search_url(query);
        tracing::info!("Searching products: {}", url);

        let html = match self.fetch(&url).await {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!("Product search for '{}' failed: {}", query, e);
                return e.into();
            }
        };

        let records = extract_records(&html, &self.base_url, &self.currency);
        tracing::debug!("Extracted {} product cards for '{}'", records.len(), query);

        if records.is_empty() {
            return ToolResult::Ok(format!("Nothing found for '{}'.", query));
        }
        ToolResult::Ok(format_records(&records))
    }

    async fn fetch(&self, url: &str) -> Result<String, ToolError> {
        fetch_text(self.client.get(url)).await
    }
}

/// An HTTP client with a fixed user agent and a per-request time limit.
pub(super) fn http_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client, ToolError> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .map_err(|e| ToolError::Setup(format!("cannot build HTTP client: {}", e)))
}

/// Send `request` and return the body of a successful response.
pub(super) async fn fetch_text(request: reqwest::RequestBuilder) -> Result<String, ToolError> {
    let response = request
        .send()
        .await
        .map_err(|e| ToolError::Network(describe_reqwest_error(&e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ToolError::Network(format!(
            "HTTP error: {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        )));
    }

    response
        .text()
        .await
        .map_err(|e| ToolError::Network(format!("failed to read response body: {}", e)))
}

/// Like [`fetch_text`], decoding the body as JSON.
pub(super) async fn fetch_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, ToolError> {
    let body = fetch_text(request).await?;
    serde_json::from_str(&body)
        .map_err(|e| ToolError::Network(format!("unexpected response format: {}", e)))
}

fn describe_reqwest_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {}", e)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}

#[async_trait]
impl Tool for ProductSearch {
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
