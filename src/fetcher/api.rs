//! Post fetching from the JSON API
//!
//! Posts are looked up through the `ltks` endpoint and product details
//! through `product_details`. Both accept at most 50 ids per request, so
//! lookups are split into batches whose lists are concatenated. The
//! `search/shop` endpoint lists the recent post ids of a profile.

use crate::config::{CrawlerConfig, NetworkConfig};
use crate::fetcher::payload::{
    AggregateBuilder, DetailsLookup, LtksResponse, ProductDetailsResponse, ProfileSearch,
    SearchHit, SearchResponse, WireProduct,
};
use crate::fetcher::{FetchError, HttpClient};
use crate::model::{FrontierItem, PostAggregate};
use crate::pool::TaskHandler;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Fetches posts and their product details from the API
pub struct ApiFetcher {
    http: HttpClient,
    api_base: String,
    batch_size: usize,
}

impl ApiFetcher {
    pub fn new(network: &NetworkConfig, crawler: &CrawlerConfig) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpClient::from_config(network)?,
            api_base: crawler.api_base.trim_end_matches('/').to_string(),
            batch_size: crawler.api_batch_size.max(1),
        })
    }

    async fn fetch_ltks(&self, ids: &[String]) -> Result<LtksResponse, FetchError> {
        let url = format!("{}/ltks", self.api_base);
        let mut combined = LtksResponse::default();

        for batch in ids.chunks(self.batch_size) {
            let mut query: Vec<(&str, String)> =
                batch.iter().map(|id| ("ids[]", id.clone())).collect();
            query.push(("limit", self.batch_size.to_string()));
            query.push(("link_types[]", "LTK_WEB".to_string()));

            let page: LtksResponse = self.http.get_json(&url, &query).await?;
            combined.extend(page);
        }

        Ok(combined)
    }

    /// Looks up product details batch by batch
    ///
    /// A batch that fails recoverably is recorded against its ids and the
    /// remaining batches still run; a fatal failure aborts the lookup.
    async fn fetch_details(&self, ids: &[String]) -> Result<DetailsLookup, FetchError> {
        let url = format!("{}/product_details/", self.api_base);
        let mut lookup = DetailsLookup::default();

        for batch in ids.chunks(self.batch_size) {
            let query: Vec<(&str, String)> =
                batch.iter().map(|id| ("ids[]", id.clone())).collect();

            match self.http.get_json::<ProductDetailsResponse>(&url, &query).await {
                Ok(page) => {
                    for details in page.product_details {
                        lookup.found.insert(details.id.clone(), details.into());
                    }
                }
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    tracing::warn!("Product details batch failed: {}", error);
                    for id in batch {
                        lookup.failed.insert(id.clone(), error.to_string());
                    }
                }
            }
        }

        Ok(lookup)
    }

    /// Ids of up to `limit` recent posts of a profile, duplicates removed
    pub async fn search_profile(
        &self,
        profile_id: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, FetchError> {
        let url = format!("{}/search/shop", self.api_base);
        let response: SearchResponse = self
            .http
            .post_json(&url, &ProfileSearch::recent(profile_id, limit))
            .await?;

        let mut seen = HashSet::new();
        Ok(response
            .hits
            .into_iter()
            .filter(|hit| seen.insert(hit.object_id.clone()))
            .collect())
    }

    /// Locator for a post known only by id
    pub fn post_locator(&self, id: &str) -> String {
        format!("{}/ltks/{}", self.api_base, id)
    }

    pub async fn fetch(&self, item: &FrontierItem) -> Result<PostAggregate, FetchError> {
        let response = self.fetch_ltks(std::slice::from_ref(&item.id)).await?;
        let details = self.fetch_details(&details_ids(&response.products)).await?;
        let fetched_at = chrono::Utc::now().timestamp();
        let url = format!("{}/ltks", self.api_base);

        let posts = keyed(&url, "ltks[].id", response.ltks, |ltk| ltk.id.clone())?;
        let products = keyed(&url, "products[].id", response.products, |product| {
            product.id.clone()
        })?;
        let media = response
            .media_objects
            .into_iter()
            .filter_map(|object| object.id.clone().map(|id| (id, object)));

        AggregateBuilder::new(&url, fetched_at)
            .media_objects(media)
            .details(details)
            .build(&item.id, posts, products)
    }

    /// Fetches many posts with batched requests
    ///
    /// The outer error is a request that failed for the whole set; each
    /// inner result is one post, in the order of `ids`. Every aggregate holds
    /// exactly its own post and the products attached to it.
    pub async fn fetch_many(
        &self,
        ids: &[String],
    ) -> Result<Vec<Result<PostAggregate, FetchError>>, FetchError> {
        let response = self.fetch_ltks(ids).await?;
        let details = self.fetch_details(&details_ids(&response.products)).await?;
        let fetched_at = chrono::Utc::now().timestamp();
        let url = format!("{}/ltks", self.api_base);

        let mut posts: HashMap<String, _> =
            keyed(&url, "ltks[].id", response.ltks, |ltk| ltk.id.clone())?
                .into_iter()
                .collect();
        let mut products: HashMap<String, Vec<(String, WireProduct)>> = HashMap::new();
        for (id, product) in keyed(&url, "products[].id", response.products, |product| {
            product.id.clone()
        })? {
            products
                .entry(product.ltk_id.clone())
                .or_default()
                .push((id, product));
        }
        let media = response
            .media_objects
            .into_iter()
            .filter_map(|object| object.id.clone().map(|id| (id, object)));

        let builder = AggregateBuilder::new(&url, fetched_at)
            .media_objects(media)
            .details(details);

        Ok(ids
            .iter()
            .map(|id| {
                let post = posts.remove(id).map(|ltk| (id.clone(), ltk));
                builder.build(id, post, products.remove(id).unwrap_or_default())
            })
            .collect())
    }
}

/// Distinct product details ids referenced by `products`
fn details_ids(products: &[WireProduct]) -> Vec<String> {
    let mut ids: Vec<String> = products
        .iter()
        .filter_map(|product| product.product_details_id.clone())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Pairs API list entries with their ids
fn keyed<T>(
    url: &str,
    field: &str,
    entries: Vec<T>,
    id: impl Fn(&T) -> Option<String>,
) -> Result<Vec<(String, T)>, FetchError> {
    entries
        .into_iter()
        .map(|entry| match id(&entry) {
            Some(key) => Ok((key, entry)),
            None => Err(FetchError::MissingField {
                url: url.to_string(),
                field: field.to_string(),
            }),
        })
        .collect()
}

#[async_trait]
impl TaskHandler for ApiFetcher {
    type Task = FrontierItem;
    type Output = PostAggregate;

    async fn handle(&mut self, task: &FrontierItem) -> Result<PostAggregate, FetchError> {
        self.fetch(task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ltks_body() -> serde_json::Value {
        json!({
            "ltks": [{
                "id": "p1",
                "hero_image": "https://cdn.example.com/p1.jpg",
                "hero_image_width": 640,
                "hero_image_height": 800,
                "video_media_id": "vid-1",
                "profile_id": "profile-1",
                "profile_user_id": "user-1",
                "status": "published",
                "caption": "look",
                "share_url": "https://www.shopltk.com/explore/someone/posts/p1",
                "date_created": "2024-01-01T00:00:00Z",
                "date_updated": "2024-01-01T00:00:00Z",
                "date_published": "2024-01-01T00:00:00Z",
                "product_ids": ["prod-a", "prod-b"]
            }],
            "products": [
                {"id": "prod-a", "ltk_id": "p1", "hyperlink": "https://shop.example.com/a",
                 "image_url": "https://cdn.example.com/a.jpg", "product_details_id": "det-a"},
                {"id": "prod-b", "ltk_id": "p1", "hyperlink": "https://shop.example.com/b",
                 "image_url": "https://cdn.example.com/b.jpg", "product_details_id": "det-b"}
            ],
            "media_objects": [{"id": "vid-1", "media_cdn_url": "https://cdn.example.com/v.mp4"}]
        })
    }

    fn details_body(id: &str, price: &str) -> serde_json::Value {
        json!({"product_details": [{"id": id, "name": "Item", "price": price, "currency": "USD"}]})
    }

    fn fetcher(server: &MockServer, timeout_ms: u64, batch: usize) -> ApiFetcher {
        let network = NetworkConfig {
            request_timeout_ms: timeout_ms,
            ..NetworkConfig::default()
        };
        let crawler = CrawlerConfig {
            api_base: server.uri(),
            api_batch_size: batch,
            ..CrawlerConfig::default()
        };
        ApiFetcher::new(&network, &crawler).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_post_with_details() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ltks"))
            .and(query_param("ids[]", "p1"))
            .and(query_param("link_types[]", "LTK_WEB"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ltks_body()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/product_details/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "product_details": [
                    {"id": "det-a", "price": "10"},
                    {"id": "det-b", "price": "not a price"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut fetcher = fetcher(&server, 2000, 50);
        let item = FrontierItem::new("p1", "https://www.shopltk.com/explore/someone/posts/p1");
        let aggregate = fetcher.handle(&item).await.unwrap();

        let post = aggregate.primary().unwrap();
        assert_eq!(post.video_url.as_deref(), Some("https://cdn.example.com/v.mp4"));
        assert_eq!(aggregate.products.len(), 2);
        assert_eq!(aggregate.products[0].details.as_ref().unwrap().price, Some(10.0));
        assert_eq!(aggregate.products[1].details.as_ref().unwrap().price, None);
    }

    #[tokio::test]
    async fn test_failed_details_batch_leaves_stub_with_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ltks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ltks_body()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/product_details/"))
            .and(query_param("ids[]", "det-a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(details_body("det-a", "5")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/product_details/"))
            .and(query_param("ids[]", "det-b"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(details_body("det-b", "6"))
                    .set_delay(Duration::from_millis(1000)),
            )
            .mount(&server)
            .await;

        let fetcher = fetcher(&server, 300, 1);
        let item = FrontierItem::new("p1", "https://www.shopltk.com/explore/someone/posts/p1");
        let aggregate = fetcher.fetch(&item).await.unwrap();

        let a = &aggregate.products[0];
        assert!(a.details.is_some());
        assert!(a.error.is_none());

        let b = &aggregate.products[1];
        assert!(b.details.is_none());
        assert!(b.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_post_is_recoverable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ltks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ltks": []})))
            .mount(&server)
            .await;

        let fetcher = fetcher(&server, 2000, 50);
        let item = FrontierItem::new("gone", "https://www.shopltk.com/explore/someone/posts/gone");
        let error = fetcher.fetch(&item).await.unwrap_err();

        assert!(matches!(error, FetchError::MissingField { .. }));
        assert!(!error.is_fatal());
    }

    fn bulk_ltk(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "hero_image": format!("https://cdn.example.com/{}.jpg", id),
            "profile_id": "profile-1",
            "profile_user_id": "user-1",
            "status": "published",
            "share_url": format!("https://www.shopltk.com/explore/someone/posts/{}", id),
            "date_created": "2024-01-01T00:00:00Z",
            "date_updated": "2024-01-01T00:00:00Z",
            "date_published": "2024-01-01T00:00:00Z",
            "product_ids": [format!("{}-prod", id)]
        })
    }

    fn bulk_product(post: &str) -> serde_json::Value {
        json!({"id": format!("{}-prod", post), "ltk_id": post,
               "hyperlink": "https://shop.example.com/x", "image_url": "https://cdn.example.com/x.jpg"})
    }

    #[tokio::test]
    async fn test_fetch_many_batches_and_splits_per_post() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ltks"))
            .and(query_param("ids[]", "n1"))
            .and(query_param("ids[]", "n2"))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ltks": [bulk_ltk("n1"), bulk_ltk("n2")],
                "products": [bulk_product("n1"), bulk_product("n2")],
                "media_objects": []
            })))
            .expect(1)
            .mount(&server)
            .await;
        // The third post has been removed upstream
        Mock::given(method("GET"))
            .and(path("/ltks"))
            .and(query_param("ids[]", "n3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ltks": []})))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fetcher(&server, 2000, 2);
        let ids = vec!["n1".to_string(), "n2".to_string(), "n3".to_string()];
        let outcomes = fetcher.fetch_many(&ids).await.unwrap();

        assert_eq!(outcomes.len(), 3);
        let n2 = outcomes[1].as_ref().unwrap();
        assert_eq!(n2.posts.len(), 1);
        assert_eq!(n2.posts[0].id, "n2");
        assert_eq!(n2.products.len(), 1);
        assert_eq!(n2.products[0].id, "n2-prod");
        assert!(matches!(outcomes[2], Err(FetchError::MissingField { .. })));
    }

    #[tokio::test]
    async fn test_search_profile_dedups_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search/shop"))
            .and(body_partial_json(json!({"profile_id": "profile-1", "ranking": "recent", "limit": 10})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": [{"objectID": "a"}, {"objectID": "b"}, {"objectID": "a"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fetcher(&server, 2000, 50);
        let hits = fetcher.search_profile("profile-1", 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|hit| hit.object_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
