//! Fetching posts and their products
//!
//! Two interchangeable strategies produce the same [`PostAggregate`] for a
//! frontier item:
//! - [`PageStateFetcher`] reads the state embedded in the post's share page
//! - [`ApiFetcher`] queries the JSON API directly
//!
//! Every failure is a [`FetchError`] carrying an [`ErrorClass`].

mod api;
mod client;
mod error;
mod page;
pub mod payload;

pub use api::ApiFetcher;
pub use client::{build_http_client, classify_request_error, HttpClient};
pub use error::{ErrorClass, FetchError};
pub use page::{decode_state, extract_state_document, PageStateFetcher};

use crate::config::{Config, FetcherKind};
use crate::model::{FrontierItem, PostAggregate};
use crate::pool::TaskHandler;
use async_trait::async_trait;

/// The strategy selected by configuration
pub enum PostFetcher {
    Page(PageStateFetcher),
    Api(ApiFetcher),
}

impl PostFetcher {
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        Ok(match config.crawler.fetcher {
            FetcherKind::Page => {
                PostFetcher::Page(PageStateFetcher::new(&config.network, &config.crawler)?)
            }
            FetcherKind::Api => PostFetcher::Api(ApiFetcher::new(&config.network, &config.crawler)?),
        })
    }

    /// One exclusive fetcher per worker
    pub fn for_workers(config: &Config, workers: usize) -> Result<Vec<Self>, FetchError> {
        (0..workers).map(|_| Self::from_config(config)).collect()
    }
}

#[async_trait]
impl TaskHandler for PostFetcher {
    type Task = FrontierItem;
    type Output = PostAggregate;

    async fn handle(&mut self, task: &FrontierItem) -> Result<PostAggregate, FetchError> {
        match self {
            PostFetcher::Page(fetcher) => fetcher.fetch(task).await,
            PostFetcher::Api(fetcher) => fetcher.fetch(task).await,
        }
    }
}
