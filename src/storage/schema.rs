//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Posts: full records, or stubs holding only id and share_url until fetched
CREATE TABLE IF NOT EXISTS posts (
    id TEXT PRIMARY KEY,
    hero_image TEXT,
    hero_image_width INTEGER,
    hero_image_height INTEGER,
    video_url TEXT,
    profile_id TEXT,
    profile_user_id TEXT,
    status TEXT,
    caption TEXT,
    share_url TEXT NOT NULL,
    date_created INTEGER,
    date_updated INTEGER,
    date_published INTEGER,
    product_ids TEXT,
    fetched_at INTEGER
);

-- Products with their details denormalized into the same row
CREATE TABLE IF NOT EXISTS products (
    id TEXT PRIMARY KEY,
    post_id TEXT NOT NULL,
    hyperlink TEXT,
    image_url TEXT,
    retailer_display_name TEXT,
    fetched_at INTEGER,
    details_id TEXT,
    name TEXT,
    advertiser_name TEXT,
    advertiser_parent_id TEXT,
    price REAL,
    local_price REAL,
    currency TEXT,
    retailer_id TEXT,
    retailer_ids TEXT,
    min_price TEXT,
    min_sale_price TEXT,
    max_price TEXT,
    max_sale_price TEXT,
    top_level_category TEXT,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_products_post ON products(post_id);

-- Terminal state of frontier items
CREATE TABLE IF NOT EXISTS visited_posts (
    id TEXT PRIMARY KEY,
    error TEXT
);

-- Media blobs, one table per media kind
CREATE TABLE IF NOT EXISTS product_images (
    id TEXT PRIMARY KEY,
    data BLOB,
    error TEXT,
    CHECK ((data IS NULL) <> (error IS NULL))
);

CREATE TABLE IF NOT EXISTS post_hero_images (
    id TEXT PRIMARY KEY,
    data BLOB,
    error TEXT,
    CHECK ((data IS NULL) <> (error IS NULL))
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}
