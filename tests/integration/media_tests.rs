//! Integration tests for the media pass
//!
//! Images are served by wiremock; the frontier is a temporary SQLite file.

use image::{ImageOutputFormat, Rgb, RgbImage};
use ltk_harvest::config::Config;
use ltk_harvest::media::{MediaCoordinator, MediaRun};
use ltk_harvest::model::{MediaFilter, MediaKind, Post, Product};
use ltk_harvest::storage::{MediaRecord, Storage};
use std::io::Cursor;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn png_bytes() -> Vec<u8> {
    let image = RgbImage::from_pixel(4, 4, Rgb([30, 120, 200]));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageOutputFormat::Png)
        .expect("Failed to encode PNG");
    bytes.into_inner()
}

fn create_test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.database_path = dir.path().join("harvest.db").display().to_string();
    config.storage.retry_max_backoff_ms = 5;
    config.network.request_timeout_ms = 2000;
    config.media.workers = 2;
    config.media.batch_size = 2;
    config
}

fn post(id: &str, hero_image: String) -> Post {
    Post {
        id: id.to_string(),
        hero_image,
        hero_image_width: 4,
        hero_image_height: 4,
        video_url: None,
        profile_id: "profile-1".to_string(),
        profile_user_id: "user-1".to_string(),
        status: "published".to_string(),
        caption: String::new(),
        share_url: format!("https://www.shopltk.com/explore/someone/posts/{}", id),
        date_created: 0,
        date_updated: 0,
        date_published: 0,
        product_ids: Vec::new(),
        fetched_at: 1,
    }
}

fn product(id: &str, image_url: String) -> Product {
    Product {
        id: id.to_string(),
        post_id: "p1".to_string(),
        hyperlink: format!("https://shop.example.com/{}", id),
        image_url,
        retailer_display_name: "Shop".to_string(),
        retailer_id: "ret-1".to_string(),
        fetched_at: 1,
        details: None,
        error: None,
    }
}

/// Serves a valid PNG for `good` and a truncated one for `bad`
async fn mount_images(server: &MockServer) {
    let png = png_bytes();
    let truncated = png[..png.len() / 2].to_vec();

    Mock::given(method("GET"))
        .and(path("/img/good.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/bad.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(truncated))
        .mount(server)
        .await;
}

async fn seeded_coordinator(dir: &TempDir, server: &MockServer) -> MediaCoordinator {
    let coordinator = MediaCoordinator::new(create_test_config(dir)).unwrap();
    let base = server.uri();

    coordinator
        .storage()
        .call(move |s| {
            s.upsert_posts(&[post("p1", format!("{}/img/good.png", base))])?;
            s.upsert_products(&[
                product("prod-good", format!("{}/img/good.png", base)),
                product("prod-bad", format!("{}/img/bad.png", base)),
            ])
        })
        .await
        .unwrap();

    coordinator
}

fn run(kind: MediaKind, retry_errors: bool) -> MediaRun {
    MediaRun {
        kind,
        filter: MediaFilter::default(),
        retry_errors,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_media_pass_stores_valid_and_records_corrupt() {
    let server = MockServer::start().await;
    mount_images(&server).await;
    let dir = TempDir::new().unwrap();
    let coordinator = seeded_coordinator(&dir, &server).await;

    let report = coordinator
        .run(run(MediaKind::ProductImage, false), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.errors, 1);

    let storage = coordinator.storage();
    let good = storage
        .call(|s| s.get_media(MediaKind::ProductImage, "prod-good"))
        .await
        .unwrap();
    assert_eq!(good, Some(MediaRecord::Blob(png_bytes())));

    let bad = storage
        .call(|s| s.get_media(MediaKind::ProductImage, "prod-bad"))
        .await
        .unwrap();
    assert!(matches!(bad, Some(MediaRecord::Error(_))));

    let (blobs, errors) = storage
        .call(|s| s.count_media(MediaKind::ProductImage))
        .await
        .unwrap();
    assert_eq!((blobs, errors), (1, 1));

    // Hero images are a separate kind with their own table
    let hero = coordinator
        .run(run(MediaKind::PostHeroImage, false), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(hero.dispatched, 1);
    assert_eq!(hero.errors, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_errored_media_needs_explicit_reset() {
    let server = MockServer::start().await;
    mount_images(&server).await;
    let dir = TempDir::new().unwrap();
    let coordinator = seeded_coordinator(&dir, &server).await;
    let cancel = CancellationToken::new();

    coordinator
        .run(run(MediaKind::ProductImage, false), &cancel)
        .await
        .unwrap();

    // Stored and errored ids are both skipped
    let again = coordinator
        .run(run(MediaKind::ProductImage, false), &cancel)
        .await
        .unwrap();
    assert_eq!(again.dispatched, 0);

    // Resetting errors makes only the failed id eligible
    let retried = coordinator
        .run(run(MediaKind::ProductImage, true), &cancel)
        .await
        .unwrap();
    assert_eq!(retried.dispatched, 1);
    assert_eq!(retried.errors, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_media_is_recorded_as_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let coordinator = seeded_coordinator(&dir, &server).await;

    let report = coordinator
        .run(run(MediaKind::PostHeroImage, false), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.errors, 1);

    let record = coordinator
        .storage()
        .call(|s| s.get_media(MediaKind::PostHeroImage, "p1"))
        .await
        .unwrap();
    match record {
        Some(MediaRecord::Error(message)) => assert!(message.contains("404")),
        other => panic!("expected error row, got {:?}", other),
    }
}
