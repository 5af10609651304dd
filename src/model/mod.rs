//! Data model for harvested records
//!
//! Posts, products, and product details mirror the rows stored by the
//! frontier store. Relationships between them are by id only.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::HarvestError;

/// A pending entry of the frontier: a post id and where to fetch it from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrontierItem {
    pub id: String,
    pub locator: String,
}

impl FrontierItem {
    pub fn new(id: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            locator: locator.into(),
        }
    }

    /// Builds a frontier item from a post share URL
    ///
    /// Share URLs end with the platform id of the post
    /// (`https://www.shopltk.com/explore/<user>/posts/<id>`), so the last
    /// non-empty path segment becomes the item id.
    pub fn from_locator(locator: &str) -> Result<Self, HarvestError> {
        let invalid = |reason: &str| HarvestError::InvalidLocator {
            locator: locator.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(locator).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }

        let id = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .ok_or_else(|| invalid("no path segment to derive an id from"))?;

        Ok(Self::new(id, locator))
    }
}

/// Shared product details record (many products may reference one)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDetails {
    pub id: String,
    pub name: String,
    pub advertiser_name: String,
    pub advertiser_parent_id: String,
    pub price: Option<f64>,
    pub local_price: Option<f64>,
    pub currency: String,
    pub retailer_id: String,
    pub retailer_ids: Vec<String>,
    pub min_price: String,
    pub min_sale_price: String,
    pub max_price: String,
    pub max_sale_price: String,
    pub top_level_category: String,
}

/// A product attached to a post
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: String,
    pub post_id: String,
    pub hyperlink: String,
    pub image_url: String,
    pub retailer_display_name: String,
    pub retailer_id: String,
    pub fetched_at: i64,
    pub details: Option<ProductDetails>,
    /// Why details could not be fetched; the product is stored as a stub
    pub error: Option<String>,
}

/// A post record
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: String,
    pub hero_image: String,
    pub hero_image_width: i64,
    pub hero_image_height: i64,
    pub video_url: Option<String>,
    pub profile_id: String,
    pub profile_user_id: String,
    pub status: String,
    pub caption: String,
    pub share_url: String,
    pub date_created: i64,
    pub date_updated: i64,
    pub date_published: i64,
    pub product_ids: Vec<String>,
    pub fetched_at: i64,
}

/// Everything one fetch produced
///
/// The post that was asked for comes first; any other posts found on the
/// same page are cross-references that join the frontier when persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostAggregate {
    pub posts: Vec<Post>,
    pub products: Vec<Product>,
}

impl PostAggregate {
    pub fn primary(&self) -> Option<&Post> {
        self.posts.first()
    }
}

/// The two classes of binary media the harvester downloads
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum MediaKind {
    /// `products.image_url`, stored in `product_images`
    #[value(name = "product")]
    #[serde(rename = "product")]
    ProductImage,
    /// `posts.hero_image`, stored in `post_hero_images`
    #[value(name = "post")]
    #[serde(rename = "post")]
    PostHeroImage,
}

impl MediaKind {
    pub const ALL: [MediaKind; 2] = [MediaKind::ProductImage, MediaKind::PostHeroImage];
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProductImage => write!(f, "product"),
            Self::PostHeroImage => write!(f, "post"),
        }
    }
}

/// Optional narrowing/ordering of the missing-media scan
///
/// These only change which missing ids come back first; they never make the
/// scan return an id that already has a blob row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaFilter {
    /// Product images only: skip products without a price
    pub only_with_price: bool,
    /// Order by `fetched_at` descending
    pub most_recent_first: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_locator_uses_last_segment() {
        let item =
            FrontierItem::from_locator("https://www.shopltk.com/explore/jane/posts/abc-123")
                .unwrap();
        assert_eq!(item.id, "abc-123");
        assert_eq!(item.locator, "https://www.shopltk.com/explore/jane/posts/abc-123");
    }

    #[test]
    fn test_from_locator_ignores_trailing_slash() {
        let item = FrontierItem::from_locator("https://example.com/posts/xyz/").unwrap();
        assert_eq!(item.id, "xyz");
    }

    #[test]
    fn test_from_locator_rejects_bad_input() {
        assert!(FrontierItem::from_locator("not a url").is_err());
        assert!(FrontierItem::from_locator("https://example.com/").is_err());
        assert!(FrontierItem::from_locator("ftp://example.com/a").is_err());
    }

    #[test]
    fn test_empty_aggregate_has_no_primary() {
        let aggregate = PostAggregate::default();
        assert!(aggregate.primary().is_none());
    }

    #[test]
    fn test_media_kind_display() {
        assert_eq!(MediaKind::ProductImage.to_string(), "product");
        assert_eq!(MediaKind::PostHeroImage.to_string(), "post");
    }
}
