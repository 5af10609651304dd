//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.
//! Each write is a single autocommitted statement, so concurrent upserts of
//! the same id resolve to whichever statement committed last.

use crate::model::{FrontierItem, MediaFilter, MediaKind, Post, Product, ProductDetails};
use crate::storage::retry::RetryPolicy;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageResult};
use crate::storage::MediaRecord;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;

const PRODUCT_COLUMNS: &str = "id, post_id, hyperlink, image_url, retailer_display_name, \
     fetched_at, details_id, name, advertiser_name, advertiser_parent_id, price, local_price, \
     currency, retailer_id, retailer_ids, min_price, min_sale_price, max_price, max_sale_price, \
     top_level_category, error";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
    retry: RetryPolicy,
}

impl SqliteStorage {
    /// Opens (or creates) the database at `path`
    ///
    /// SQLite's own busy handler is disabled so that lock contention reaches
    /// the retry policy instead of being absorbed by a fixed timeout.
    pub fn open(path: &Path, retry: RetryPolicy) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::ZERO)?;

        retry.run("configure", || {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA temp_store = MEMORY;
            ",
            )
        })?;
        retry.run("initialize_schema", || initialize_schema(&conn))?;

        Ok(Self { conn, retry })
    }

    /// Creates an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn,
            retry: RetryPolicy::default(),
        })
    }
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    let details_id: Option<String> = row.get(6)?;

    let details = match details_id {
        Some(id) => {
            let retailer_ids: Option<String> = row.get(14)?;
            let retailer_ids = match retailer_ids {
                Some(json) => serde_json::from_str(&json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(14, Type::Text, Box::new(e))
                })?,
                None => Vec::new(),
            };

            Some(ProductDetails {
                id,
                name: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                advertiser_name: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                advertiser_parent_id: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
                price: row.get(10)?,
                local_price: row.get(11)?,
                currency: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
                retailer_id: row.get::<_, Option<String>>(13)?.unwrap_or_default(),
                retailer_ids,
                min_price: row.get::<_, Option<String>>(15)?.unwrap_or_default(),
                min_sale_price: row.get::<_, Option<String>>(16)?.unwrap_or_default(),
                max_price: row.get::<_, Option<String>>(17)?.unwrap_or_default(),
                max_sale_price: row.get::<_, Option<String>>(18)?.unwrap_or_default(),
                top_level_category: row.get::<_, Option<String>>(19)?.unwrap_or_default(),
            })
        }
        None => None,
    };

    Ok(Product {
        id: row.get(0)?,
        post_id: row.get(1)?,
        hyperlink: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        image_url: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        retailer_display_name: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        retailer_id: row.get::<_, Option<String>>(13)?.unwrap_or_default(),
        fetched_at: row.get::<_, Option<i64>>(5)?.unwrap_or_default(),
        details,
        error: row.get(20)?,
    })
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    let product_ids: Option<String> = row.get(13)?;

    Ok(Post {
        id: row.get(0)?,
        hero_image: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        hero_image_width: row.get::<_, Option<i64>>(2)?.unwrap_or_default(),
        hero_image_height: row.get::<_, Option<i64>>(3)?.unwrap_or_default(),
        video_url: row.get(4)?,
        profile_id: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        profile_user_id: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        status: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        caption: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        share_url: row.get(9)?,
        date_created: row.get::<_, Option<i64>>(10)?.unwrap_or_default(),
        date_updated: row.get::<_, Option<i64>>(11)?.unwrap_or_default(),
        date_published: row.get::<_, Option<i64>>(12)?.unwrap_or_default(),
        product_ids: product_ids
            .map(|ids| {
                ids.split(',')
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        fetched_at: row.get::<_, Option<i64>>(14)?.unwrap_or_default(),
    })
}

/// Static scan for ids that have a media locator but no blob row
fn missing_media_sql(kind: MediaKind, filter: MediaFilter) -> &'static str {
    match (kind, filter.only_with_price, filter.most_recent_first) {
        (MediaKind::ProductImage, false, false) => {
            "SELECT products.id, products.image_url FROM products
             LEFT JOIN product_images ON product_images.id = products.id
             WHERE product_images.id IS NULL
               AND products.image_url IS NOT NULL AND products.image_url <> ''
             LIMIT ?1"
        }
        (MediaKind::ProductImage, true, false) => {
            "SELECT products.id, products.image_url FROM products
             LEFT JOIN product_images ON product_images.id = products.id
             WHERE product_images.id IS NULL
               AND products.image_url IS NOT NULL AND products.image_url <> ''
               AND products.price IS NOT NULL
             LIMIT ?1"
        }
        (MediaKind::ProductImage, false, true) => {
            "SELECT products.id, products.image_url FROM products
             LEFT JOIN product_images ON product_images.id = products.id
             WHERE product_images.id IS NULL
               AND products.image_url IS NOT NULL AND products.image_url <> ''
             ORDER BY products.fetched_at DESC
             LIMIT ?1"
        }
        (MediaKind::ProductImage, true, true) => {
            "SELECT products.id, products.image_url FROM products
             LEFT JOIN product_images ON product_images.id = products.id
             WHERE product_images.id IS NULL
               AND products.image_url IS NOT NULL AND products.image_url <> ''
               AND products.price IS NOT NULL
             ORDER BY products.fetched_at DESC
             LIMIT ?1"
        }
        (MediaKind::PostHeroImage, _, false) => {
            "SELECT posts.id, posts.hero_image FROM posts
             LEFT JOIN post_hero_images ON post_hero_images.id = posts.id
             WHERE post_hero_images.id IS NULL
               AND posts.hero_image IS NOT NULL AND posts.hero_image <> ''
             LIMIT ?1"
        }
        (MediaKind::PostHeroImage, _, true) => {
            "SELECT posts.id, posts.hero_image FROM posts
             LEFT JOIN post_hero_images ON post_hero_images.id = posts.id
             WHERE post_hero_images.id IS NULL
               AND posts.hero_image IS NOT NULL AND posts.hero_image <> ''
             ORDER BY posts.fetched_at DESC
             LIMIT ?1"
        }
    }
}

fn insert_media_sql(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::ProductImage => {
            "INSERT OR REPLACE INTO product_images (id, data, error) VALUES (?1, ?2, ?3)"
        }
        MediaKind::PostHeroImage => {
            "INSERT OR REPLACE INTO post_hero_images (id, data, error) VALUES (?1, ?2, ?3)"
        }
    }
}

fn get_media_sql(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::ProductImage => "SELECT data, error FROM product_images WHERE id = ?1",
        MediaKind::PostHeroImage => "SELECT data, error FROM post_hero_images WHERE id = ?1",
    }
}

fn clear_media_errors_sql(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::ProductImage => "DELETE FROM product_images WHERE error IS NOT NULL",
        MediaKind::PostHeroImage => "DELETE FROM post_hero_images WHERE error IS NOT NULL",
    }
}

fn count_media_sql(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::ProductImage => {
            "SELECT COUNT(data), COUNT(error) FROM product_images"
        }
        MediaKind::PostHeroImage => {
            "SELECT COUNT(data), COUNT(error) FROM post_hero_images"
        }
    }
}

impl SqliteStorage {
    fn count(&self, operation: &str, sql: &str) -> StorageResult<u64> {
        let count: i64 = self
            .retry
            .run(operation, || self.conn.query_row(sql, [], |row| row.get(0)))?;
        Ok(count as u64)
    }
}

impl Storage for SqliteStorage {
    // ===== Frontier =====

    fn enqueue(&mut self, items: &[FrontierItem]) -> StorageResult<()> {
        for item in items {
            self.retry.run("enqueue", || {
                self.conn.execute(
                    "INSERT INTO posts (id, share_url) VALUES (?1, ?2)
                     ON CONFLICT(id) DO UPDATE SET share_url = excluded.share_url",
                    params![item.id, item.locator],
                )
            })?;
        }
        Ok(())
    }

    fn list_pending(&self, limit: usize) -> StorageResult<Vec<FrontierItem>> {
        self.retry.run("list_pending", || {
            let mut stmt = self.conn.prepare(
                "SELECT posts.id, posts.share_url
                 FROM posts
                 LEFT JOIN visited_posts ON posts.id = visited_posts.id
                 WHERE visited_posts.id IS NULL
                 LIMIT ?1",
            )?;

            let items = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(FrontierItem::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(items)
        })
    }

    fn mark_visited(&mut self, id: &str, error: Option<&str>) -> StorageResult<()> {
        self.retry.run("mark_visited", || {
            self.conn.execute(
                "INSERT OR REPLACE INTO visited_posts (id, error) VALUES (?1, ?2)",
                params![id, error],
            )
        })?;
        Ok(())
    }

    fn visited_state(&self, id: &str) -> StorageResult<Option<Option<String>>> {
        self.retry.run("visited_state", || {
            self.conn
                .query_row(
                    "SELECT error FROM visited_posts WHERE id = ?1",
                    params![id],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()
        })
    }

    // ===== Records =====

    fn upsert_posts(&mut self, posts: &[Post]) -> StorageResult<()> {
        for post in posts {
            let product_ids = post.product_ids.join(",");
            self.retry.run("upsert_posts", || {
                self.conn.execute(
                    "INSERT OR REPLACE INTO posts (
                        id, hero_image, hero_image_width, hero_image_height, video_url,
                        profile_id, profile_user_id, status, caption, share_url,
                        date_created, date_updated, date_published, product_ids, fetched_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                    params![
                        post.id,
                        post.hero_image,
                        post.hero_image_width,
                        post.hero_image_height,
                        post.video_url,
                        post.profile_id,
                        post.profile_user_id,
                        post.status,
                        post.caption,
                        post.share_url,
                        post.date_created,
                        post.date_updated,
                        post.date_published,
                        product_ids,
                        post.fetched_at,
                    ],
                )
            })?;
        }
        Ok(())
    }

    fn upsert_products(&mut self, products: &[Product]) -> StorageResult<()> {
        for product in products {
            let details = product.details.as_ref();
            let retailer_ids = details
                .map(|d| serde_json::to_string(&d.retailer_ids))
                .transpose()?;
            // A product without details still carries its own retailer id
            let retailer_id = details
                .map(|d| d.retailer_id.as_str())
                .unwrap_or(product.retailer_id.as_str());

            self.retry.run("upsert_products", || {
                self.conn.execute(
                    "INSERT OR REPLACE INTO products (
                        id, post_id, hyperlink, image_url, retailer_display_name, fetched_at,
                        details_id, name, advertiser_name, advertiser_parent_id, price,
                        local_price, currency, retailer_id, retailer_ids, min_price,
                        min_sale_price, max_price, max_sale_price, top_level_category, error
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                              ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
                    params![
                        product.id,
                        product.post_id,
                        product.hyperlink,
                        product.image_url,
                        product.retailer_display_name,
                        product.fetched_at,
                        details.map(|d| &d.id),
                        details.map(|d| &d.name),
                        details.map(|d| &d.advertiser_name),
                        details.map(|d| &d.advertiser_parent_id),
                        details.and_then(|d| d.price),
                        details.and_then(|d| d.local_price),
                        details.map(|d| &d.currency),
                        retailer_id,
                        retailer_ids,
                        details.map(|d| &d.min_price),
                        details.map(|d| &d.min_sale_price),
                        details.map(|d| &d.max_price),
                        details.map(|d| &d.max_sale_price),
                        details.map(|d| &d.top_level_category),
                        product.error,
                    ],
                )
            })?;
        }
        Ok(())
    }

    fn get_post(&self, id: &str) -> StorageResult<Option<Post>> {
        self.retry.run("get_post", || {
            self.conn
                .query_row(
                    "SELECT id, hero_image, hero_image_width, hero_image_height, video_url,
                            profile_id, profile_user_id, status, caption, share_url,
                            date_created, date_updated, date_published, product_ids, fetched_at
                     FROM posts WHERE id = ?1 AND fetched_at IS NOT NULL",
                    params![id],
                    post_from_row,
                )
                .optional()
        })
    }

    fn get_products(&self, ids: &[String]) -> StorageResult<Vec<Product>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT {} FROM products WHERE id IN ({}) ORDER BY id",
            PRODUCT_COLUMNS, placeholders
        );

        self.retry.run("get_products", || {
            let mut stmt = self.conn.prepare(&sql)?;
            let products = stmt
                .query_map(params_from_iter(ids.iter()), product_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(products)
        })
    }

    fn profile_post_counts(&self) -> StorageResult<Vec<(String, u64)>> {
        self.retry.run("profile_post_counts", || {
            let mut stmt = self.conn.prepare(
                "SELECT profile_id, COUNT(*) AS posts
                 FROM posts
                 WHERE profile_id IS NOT NULL AND profile_id != ''
                 GROUP BY profile_id
                 ORDER BY posts ASC, profile_id ASC",
            )?;

            let counts = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(counts)
        })
    }

    // ===== Media =====

    fn list_missing_media(
        &self,
        kind: MediaKind,
        limit: usize,
        filter: MediaFilter,
    ) -> StorageResult<Vec<FrontierItem>> {
        if kind == MediaKind::PostHeroImage && filter.only_with_price {
            tracing::debug!("Price filter does not apply to post hero images; ignoring");
        }

        let sql = missing_media_sql(kind, filter);
        self.retry.run("list_missing_media", || {
            let mut stmt = self.conn.prepare(sql)?;
            let items = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(FrontierItem::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(items)
        })
    }

    fn insert_media(
        &mut self,
        kind: MediaKind,
        id: &str,
        outcome: Result<&[u8], &str>,
    ) -> StorageResult<()> {
        let (data, error) = match outcome {
            Ok(bytes) => (Some(bytes), None),
            Err(message) => (None, Some(message)),
        };

        self.retry.run("insert_media", || {
            self.conn
                .execute(insert_media_sql(kind), params![id, data, error])
        })?;
        Ok(())
    }

    fn get_media(&self, kind: MediaKind, id: &str) -> StorageResult<Option<MediaRecord>> {
        let row = self.retry.run("get_media", || {
            self.conn
                .query_row(get_media_sql(kind), params![id], |row| {
                    Ok((
                        row.get::<_, Option<Vec<u8>>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                    ))
                })
                .optional()
        })?;

        Ok(row.map(|(data, error)| match (data, error) {
            (Some(bytes), _) => MediaRecord::Blob(bytes),
            (None, error) => MediaRecord::Error(error.unwrap_or_default()),
        }))
    }

    fn clear_media_errors(&mut self, kind: MediaKind) -> StorageResult<usize> {
        self.retry.run("clear_media_errors", || {
            self.conn.execute(clear_media_errors_sql(kind), [])
        })
    }

    // ===== Statistics =====

    fn count_posts(&self) -> StorageResult<u64> {
        self.count("count_posts", "SELECT COUNT(*) FROM posts")
    }

    fn count_visited(&self) -> StorageResult<u64> {
        self.count("count_visited", "SELECT COUNT(*) FROM visited_posts")
    }

    fn count_visited_with_error(&self) -> StorageResult<u64> {
        self.count(
            "count_visited_with_error",
            "SELECT COUNT(*) FROM visited_posts WHERE error IS NOT NULL",
        )
    }

    fn count_pending(&self) -> StorageResult<u64> {
        self.count(
            "count_pending",
            "SELECT COUNT(*) FROM posts
             LEFT JOIN visited_posts ON posts.id = visited_posts.id
             WHERE visited_posts.id IS NULL",
        )
    }

    fn count_products(&self) -> StorageResult<u64> {
        self.count("count_products", "SELECT COUNT(*) FROM products")
    }

    fn count_media(&self, kind: MediaKind) -> StorageResult<(u64, u64)> {
        let (blobs, errors): (i64, i64) = self.retry.run("count_media", || {
            self.conn
                .query_row(count_media_sql(kind), [], |row| Ok((row.get(0)?, row.get(1)?)))
        })?;
        Ok((blobs as u64, errors as u64))
    }
}
