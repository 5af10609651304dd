//! Post fetching from the server-rendered page
//!
//! Post pages embed their application state as a JSON document. The page
//! can be served before that state is hydrated, so the fetcher re-polls
//! until the document appears or the hydration timeout elapses.

use crate::config::{CrawlerConfig, NetworkConfig};
use crate::fetcher::payload::{AggregateBuilder, DetailsLookup, PageState};
use crate::fetcher::{FetchError, HttpClient};
use crate::model::{FrontierItem, PostAggregate};
use crate::pool::TaskHandler;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::time::Duration;
use tokio::time::Instant;

const STATE_SELECTOR: &str = "script#__NUXT_STATE__";

/// Extracts the raw application-state document from a page
pub fn extract_state_document(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(STATE_SELECTOR).ok()?;

    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>())
        .filter(|text| !text.trim().is_empty())
}

/// Decodes an application-state document into an aggregate
pub fn decode_state(
    url: &str,
    primary_id: &str,
    document: &str,
    fetched_at: i64,
) -> Result<PostAggregate, FetchError> {
    let state: PageState = serde_json::from_str(document).map_err(|e| FetchError::Payload {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let details = DetailsLookup {
        found: state
            .product_details
            .product_details
            .into_iter()
            .map(|(id, wire)| (id, wire.into()))
            .collect(),
        failed: Default::default(),
    };

    AggregateBuilder::new(url, fetched_at)
        .media_objects(state.media_objects.media_objects)
        .details(details)
        .build(primary_id, state.ltks.ltks, state.products.products)
}

/// Fetches posts by loading their share page
pub struct PageStateFetcher {
    http: HttpClient,
    hydration_timeout: Duration,
    hydration_poll: Duration,
}

impl PageStateFetcher {
    pub fn new(network: &NetworkConfig, crawler: &CrawlerConfig) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpClient::from_config(network)?,
            hydration_timeout: Duration::from_millis(crawler.hydration_timeout_ms),
            hydration_poll: Duration::from_millis(crawler.hydration_poll_ms),
        })
    }

    pub async fn fetch(&self, item: &FrontierItem) -> Result<PostAggregate, FetchError> {
        let started = Instant::now();

        loop {
            let html = self.http.get_text(&item.locator).await?;

            if let Some(document) = extract_state_document(&html) {
                let fetched_at = chrono::Utc::now().timestamp();
                return decode_state(&item.locator, &item.id, &document, fetched_at);
            }

            let waited = started.elapsed();
            if waited + self.hydration_poll > self.hydration_timeout {
                return Err(FetchError::NotHydrated {
                    url: item.locator.clone(),
                    waited_ms: waited.as_millis() as u64,
                });
            }

            tracing::debug!("State not hydrated at {}, polling again", item.locator);
            tokio::time::sleep(self.hydration_poll).await;
        }
    }
}

#[async_trait]
impl TaskHandler for PageStateFetcher {
    type Task = FrontierItem;
    type Output = PostAggregate;

    async fn handle(&mut self, task: &FrontierItem) -> Result<PostAggregate, FetchError> {
        self.fetch(task).await
    }
}
