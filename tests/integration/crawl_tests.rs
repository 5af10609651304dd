//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the platform API and a
//! temporary SQLite file as the frontier, and run full crawl cycles
//! end-to-end.

use ltk_harvest::config::{Config, FetcherKind};
use ltk_harvest::crawler::Coordinator;
use ltk_harvest::model::{FrontierItem, Product, ProductDetails};
use ltk_harvest::storage::{Backoff, RetryPolicy, SqliteStorage, Storage};
use ltk_harvest::HarvestError;
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SHARE_URL: &str = "https://www.shopltk.com/explore/someone/posts/p1";

/// Creates a test configuration using the API fetcher against `api_base`
fn create_test_config(dir: &TempDir, api_base: &str) -> Config {
    let mut config = Config::default();
    config.storage.database_path = dir.path().join("harvest.db").display().to_string();
    config.storage.retry_max_backoff_ms = 5;
    config.network.request_timeout_ms = 300;
    config.network.connect_timeout_ms = 300;
    config.crawler.fetcher = FetcherKind::Api;
    config.crawler.api_base = api_base.to_string();
    config.crawler.api_batch_size = 1;
    config.crawler.workers = 2;
    config
}

fn open(config: &Config) -> SqliteStorage {
    SqliteStorage::open(
        Path::new(&config.storage.database_path),
        RetryPolicy {
            backoff: Backoff::Fixed(Duration::from_millis(1)),
            max_attempts: None,
        },
    )
    .expect("Failed to open database")
}

fn ltks_body() -> serde_json::Value {
    json!({
        "ltks": [{
            "id": "p1",
            "hero_image": "https://cdn.example.com/p1.jpg",
            "hero_image_width": 1080,
            "hero_image_height": 1350,
            "profile_id": "profile-1",
            "profile_user_id": "user-1",
            "status": "published",
            "caption": "weekend looks",
            "share_url": SHARE_URL,
            "date_created": "2024-05-01T09:00:00Z",
            "date_updated": "2024-05-01T09:30:00Z",
            "date_published": "2024-05-01T10:00:00Z",
            "product_ids": ["prod-a", "prod-b"]
        }],
        "products": [
            {"id": "prod-a", "ltk_id": "p1", "hyperlink": "https://shop.example.com/a",
             "image_url": "https://cdn.example.com/a.jpg", "retailer_id": "ret-1",
             "product_details_id": "det-a"},
            {"id": "prod-b", "ltk_id": "p1", "hyperlink": "https://shop.example.com/b",
             "image_url": "https://cdn.example.com/b.jpg", "retailer_id": "ret-1",
             "product_details_id": "det-b"}
        ],
        "media_objects": []
    })
}

async fn mount_post(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/ltks"))
        .and(query_param("ids[]", "p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ltks_body()))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/product_details/"))
        .and(query_param("ids[]", "det-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "product_details": [{"id": "det-a", "name": "Linen shirt", "price": "39.90",
                                 "currency": "USD", "retailer_ids": ["ret-1"]}]
        })))
        .expect(1)
        .mount(server)
        .await;

    // Answers long after the request timeout
    Mock::given(method("GET"))
        .and(path("/product_details/"))
        .and(query_param("ids[]", "det-b"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"product_details": [{"id": "det-b", "price": "12"}]}))
                .set_delay(Duration::from_millis(1500)),
        )
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_crawl_records_partial_product_failure_and_resumes() {
    let server = MockServer::start().await;
    mount_post(&server).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, &server.uri());

    let coordinator = Coordinator::new(config.clone()).unwrap();
    coordinator.seed(&[SHARE_URL.to_string()]).await.unwrap();

    let report = coordinator.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.errors, 0);
    drop(coordinator);

    let storage = open(&config);
    assert_eq!(storage.visited_state("p1").unwrap(), Some(None));

    let post = storage.get_post("p1").unwrap().expect("post should be stored");
    assert_eq!(post.product_ids, vec!["prod-a", "prod-b"]);
    assert_eq!(post.date_published, 1714557600);

    let products = storage
        .get_products(&["prod-a".to_string(), "prod-b".to_string()])
        .unwrap();
    assert_eq!(products.len(), 2);

    let a = &products[0];
    assert_eq!(a.details.as_ref().unwrap().price, Some(39.9));
    assert!(a.error.is_none());

    let b = &products[1];
    assert!(b.details.is_none());
    assert!(b.error.as_deref().unwrap().contains("timed out"));
    drop(storage);

    // A second run over the same database finds nothing to do
    let requests_before = server.received_requests().await.unwrap().len();
    let coordinator = Coordinator::new(config).unwrap();
    let report = coordinator.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.dispatched, 0);
    assert_eq!(
        server.received_requests().await.unwrap().len(),
        requests_before
    );
}

#[tokio::test]
async fn test_unreachable_proxy_aborts_and_leaves_item_pending() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = closed.local_addr().unwrap().port();
    drop(closed);

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir, "http://api.invalid");
    config.network.proxy = Some(format!("http://127.0.0.1:{}", port));
    config.network.connect_timeout_ms = 2000;
    config.network.request_timeout_ms = 2000;

    let coordinator = Coordinator::new(config.clone()).unwrap();
    coordinator.seed(&[SHARE_URL.to_string()]).await.unwrap();

    let result = coordinator.run(&CancellationToken::new()).await;
    match result {
        Err(HarvestError::FatalTransport { id, .. }) => assert_eq!(id, "p1"),
        other => panic!("expected fatal transport error, got {:?}", other.map(|_| ())),
    }
    drop(coordinator);

    let storage = open(&config);
    assert_eq!(storage.visited_state("p1").unwrap(), None);
    assert_eq!(storage.count_pending().unwrap(), 1);
}

#[tokio::test]
async fn test_interrupt_leaves_unfinished_items_pending() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ltks"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ltks_body())
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir, &server.uri());
    config.network.request_timeout_ms = 30_000;

    let coordinator = Coordinator::new(config.clone()).unwrap();
    coordinator.seed(&[SHARE_URL.to_string()]).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let result = coordinator.run(&cancel).await;
    assert!(matches!(result, Err(HarvestError::Interrupted)));
    drop(coordinator);

    assert_eq!(open(&config).count_pending().unwrap(), 1);
}

fn product(fetched_at: i64, with_details: bool) -> Product {
    Product {
        id: "prod-shared".to_string(),
        post_id: "p1".to_string(),
        hyperlink: format!("https://shop.example.com/{}", fetched_at),
        image_url: "https://cdn.example.com/shared.jpg".to_string(),
        retailer_display_name: "Shop".to_string(),
        retailer_id: "ret-1".to_string(),
        fetched_at,
        details: with_details.then(|| ProductDetails {
            id: "det-shared".to_string(),
            name: "Tote".to_string(),
            advertiser_name: "Shop".to_string(),
            advertiser_parent_id: "adv-1".to_string(),
            price: Some(20.0),
            local_price: None,
            currency: "USD".to_string(),
            retailer_id: "ret-1".to_string(),
            retailer_ids: vec!["ret-1".to_string()],
            min_price: String::new(),
            min_sale_price: String::new(),
            max_price: String::new(),
            max_sale_price: String::new(),
            top_level_category: "Bags".to_string(),
        }),
        error: None,
    }
}

#[test]
fn test_concurrent_writers_leave_one_complete_row() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "http://unused.invalid");
    drop(open(&config));

    let barrier = Arc::new(Barrier::new(2));
    let writers: Vec<_> = [(1_000, true), (2_000, false)]
        .into_iter()
        .map(|(base, with_details)| {
            let config = config.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let mut storage = open(&config);
                barrier.wait();
                for i in 0..50 {
                    storage
                        .upsert_products(&[product(base + i, with_details)])
                        .unwrap();
                }
                product(base + 49, with_details)
            })
        })
        .collect();

    let finals: Vec<Product> = writers.into_iter().map(|w| w.join().unwrap()).collect();

    let storage = open(&config);
    let stored = storage
        .get_products(&["prod-shared".to_string()])
        .unwrap()
        .pop()
        .unwrap();

    // Whole-row last write wins: never a mix of the two writers' fields
    assert!(
        finals.contains(&stored),
        "stored row matches neither writer: {:?}",
        stored
    );
}

#[test]
fn test_concurrently_visited_items_never_listed_pending() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "http://unused.invalid");

    let items: Vec<FrontierItem> = (0..100)
        .map(|i| FrontierItem::new(format!("p{}", i), format!("https://example.com/posts/p{}", i)))
        .collect();
    open(&config).enqueue(&items).unwrap();

    let marker = {
        let config = config.clone();
        std::thread::spawn(move || {
            let mut storage = open(&config);
            for i in 0..100 {
                storage.mark_visited(&format!("p{}", i), None).unwrap();
            }
        })
    };

    // Every id seen visited on one pass must stay out of later scans
    let reader = open(&config);
    let mut visited_so_far = HashSet::new();
    loop {
        let pending = reader.list_pending(1000).unwrap();
        for id in &visited_so_far {
            assert!(
                !pending.iter().any(|item| &item.id == id),
                "{} listed pending after being visited",
                id
            );
        }
        if pending.is_empty() {
            break;
        }
        for item in &items {
            if reader.visited_state(&item.id).unwrap().is_some() {
                visited_so_far.insert(item.id.clone());
            }
        }
    }

    marker.join().unwrap();
    assert_eq!(reader.count_visited().unwrap(), 100);
}

#[test]
fn test_reapplying_an_upsert_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "http://unused.invalid");
    let mut storage = open(&config);

    let row = product(5, true);
    storage.upsert_products(&[row.clone()]).unwrap();
    storage.upsert_products(&[row.clone()]).unwrap();

    assert_eq!(storage.count_products().unwrap(), 1);
    assert_eq!(
        storage.get_products(&["prod-shared".to_string()]).unwrap(),
        vec![row]
    );
}
