//! Wire formats for post payloads and their conversion into model records
//!
//! The embedded page state uses camelCase keys while the API responds in
//! snake_case; the wire structs accept both spellings.

use crate::fetcher::FetchError;
use crate::model::{Post, PostAggregate, Product, ProductDetails};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct WireLtk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "heroImage")]
    pub hero_image: String,
    #[serde(alias = "heroImageWidth", default)]
    pub hero_image_width: i64,
    #[serde(alias = "heroImageHeight", default)]
    pub hero_image_height: i64,
    #[serde(alias = "videoMediaId", default)]
    pub video_media_id: Option<String>,
    #[serde(alias = "profileId")]
    pub profile_id: String,
    #[serde(alias = "profileUserId")]
    pub profile_user_id: String,
    pub status: String,
    #[serde(default)]
    pub caption: String,
    #[serde(alias = "shareUrl")]
    pub share_url: String,
    #[serde(alias = "dateCreated")]
    pub date_created: String,
    #[serde(alias = "dateUpdated")]
    pub date_updated: String,
    #[serde(alias = "datePublished")]
    pub date_published: String,
    #[serde(alias = "productIds", default)]
    pub product_ids: Vec<String>,
    #[serde(alias = "fetchedAt", default)]
    pub fetched_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireProduct {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "ltkId")]
    pub ltk_id: String,
    pub hyperlink: String,
    #[serde(alias = "imageUrl")]
    pub image_url: String,
    #[serde(alias = "retailerDisplayName", default)]
    pub retailer_display_name: String,
    #[serde(alias = "retailerId", default)]
    pub retailer_id: String,
    #[serde(alias = "productDetailsId", default)]
    pub product_details_id: Option<String>,
    #[serde(alias = "fetchedAt", default)]
    pub fetched_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireProductDetails {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(alias = "advertiserName", default)]
    pub advertiser_name: String,
    #[serde(alias = "advertiserParentId", default)]
    pub advertiser_parent_id: String,
    #[serde(default)]
    pub price: Value,
    #[serde(alias = "localPrice", default)]
    pub local_price: Value,
    #[serde(default)]
    pub currency: String,
    #[serde(alias = "retailerId", default)]
    pub retailer_id: String,
    #[serde(alias = "retailerIds", default)]
    pub retailer_ids: Vec<String>,
    #[serde(alias = "minPrice", default)]
    pub min_price: Value,
    #[serde(alias = "minSalePrice", default)]
    pub min_sale_price: Value,
    #[serde(alias = "maxPrice", default)]
    pub max_price: Value,
    #[serde(alias = "maxSalePrice", default)]
    pub max_sale_price: Value,
    #[serde(alias = "topLevelCategory", default)]
    pub top_level_category: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireMediaObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "mediaCdnUrl", default)]
    pub media_cdn_url: Option<String>,
}

/// Embedded application state of a post page
#[derive(Debug, Deserialize)]
pub struct PageState {
    pub ltks: LtkMap,
    #[serde(default)]
    pub products: ProductMap,
    #[serde(rename = "media-objects", default)]
    pub media_objects: MediaObjectMap,
    #[serde(rename = "product-details", default)]
    pub product_details: ProductDetailsMap,
}

#[derive(Debug, Deserialize)]
pub struct LtkMap {
    pub ltks: HashMap<String, WireLtk>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductMap {
    #[serde(default)]
    pub products: HashMap<String, WireProduct>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MediaObjectMap {
    #[serde(rename = "mediaObjects", default)]
    pub media_objects: HashMap<String, WireMediaObject>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductDetailsMap {
    #[serde(rename = "productDetails", default)]
    pub product_details: HashMap<String, WireProductDetails>,
}

/// One page of the `ltks` API endpoint
#[derive(Debug, Default, Deserialize)]
pub struct LtksResponse {
    #[serde(default)]
    pub ltks: Vec<WireLtk>,
    #[serde(default)]
    pub products: Vec<WireProduct>,
    #[serde(default)]
    pub media_objects: Vec<WireMediaObject>,
}

impl LtksResponse {
    pub fn extend(&mut self, other: LtksResponse) {
        self.ltks.extend(other.ltks);
        self.products.extend(other.products);
        self.media_objects.extend(other.media_objects);
    }
}

/// One page of the `product_details` API endpoint
#[derive(Debug, Default, Deserialize)]
pub struct ProductDetailsResponse {
    #[serde(default)]
    pub product_details: Vec<WireProductDetails>,
}

/// Body of a `search/shop` request for the recent posts of one profile
#[derive(Debug, Serialize)]
pub struct ProfileSearch<'a> {
    pub query: &'a str,
    pub ranking: &'a str,
    pub profile_id: &'a str,
    pub page: u32,
    pub limit: usize,
    pub analytics: [&'a str; 2],
    pub filters: Vec<String>,
}

impl<'a> ProfileSearch<'a> {
    pub fn recent(profile_id: &'a str, limit: usize) -> Self {
        Self {
            query: "",
            ranking: "recent",
            profile_id,
            page: 0,
            limit,
            analytics: ["version:3.458.0-COA-1609.1", "platform:web"],
            filters: Vec::new(),
        }
    }
}

/// One page of `search/shop` results
#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "objectID")]
    pub object_id: String,
    #[serde(default)]
    pub share_url: Option<String>,
}

/// Converts an ISO-8601 timestamp to epoch seconds
///
/// Offsets are honoured; timestamps without one are read as UTC.
pub fn parse_timestamp(value: &str) -> Option<i64> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.timestamp());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp())
}

/// Lenient price parsing: numbers and numeric strings, anything else is `None`
pub fn maybe_parse_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl From<WireProductDetails> for ProductDetails {
    fn from(wire: WireProductDetails) -> Self {
        ProductDetails {
            price: maybe_parse_float(&wire.price),
            local_price: maybe_parse_float(&wire.local_price),
            min_price: value_text(&wire.min_price),
            min_sale_price: value_text(&wire.min_sale_price),
            max_price: value_text(&wire.max_price),
            max_sale_price: value_text(&wire.max_sale_price),
            id: wire.id,
            name: wire.name,
            advertiser_name: wire.advertiser_name,
            advertiser_parent_id: wire.advertiser_parent_id,
            currency: wire.currency,
            retailer_id: wire.retailer_id,
            retailer_ids: wire.retailer_ids,
            top_level_category: wire.top_level_category,
        }
    }
}

/// Details that could be fetched, plus the reason for those that could not
#[derive(Debug, Default)]
pub struct DetailsLookup {
    pub found: HashMap<String, ProductDetails>,
    pub failed: HashMap<String, String>,
}

/// Builds model records from decoded wire payloads
pub struct AggregateBuilder<'a> {
    url: &'a str,
    fetched_at: i64,
    media: HashMap<String, String>,
    details: DetailsLookup,
}

impl<'a> AggregateBuilder<'a> {
    /// `fetched_at` is used for records the payload does not timestamp itself
    pub fn new(url: &'a str, fetched_at: i64) -> Self {
        Self {
            url,
            fetched_at,
            media: HashMap::new(),
            details: DetailsLookup::default(),
        }
    }

    pub fn media_objects(
        mut self,
        objects: impl IntoIterator<Item = (String, WireMediaObject)>,
    ) -> Self {
        for (id, object) in objects {
            if let Some(url) = object.media_cdn_url {
                self.media.insert(id, url);
            }
        }
        self
    }

    pub fn details(mut self, details: DetailsLookup) -> Self {
        self.details = details;
        self
    }

    fn timestamp(&self, field: &str, value: &str) -> Result<i64, FetchError> {
        parse_timestamp(value).ok_or_else(|| FetchError::Payload {
            url: self.url.to_string(),
            message: format!("invalid {} timestamp '{}'", field, value),
        })
    }

    fn post(&self, id: String, wire: WireLtk) -> Result<Post, FetchError> {
        let video_url = wire
            .video_media_id
            .as_ref()
            .and_then(|media_id| self.media.get(media_id))
            .cloned();

        Ok(Post {
            date_created: self.timestamp("dateCreated", &wire.date_created)?,
            date_updated: self.timestamp("dateUpdated", &wire.date_updated)?,
            date_published: self.timestamp("datePublished", &wire.date_published)?,
            fetched_at: wire.fetched_at.unwrap_or(self.fetched_at),
            id,
            hero_image: wire.hero_image,
            hero_image_width: wire.hero_image_width,
            hero_image_height: wire.hero_image_height,
            video_url,
            profile_id: wire.profile_id,
            profile_user_id: wire.profile_user_id,
            status: wire.status,
            caption: wire.caption,
            share_url: wire.share_url,
            product_ids: wire.product_ids,
        })
    }

    fn product(&self, id: String, wire: WireProduct) -> Product {
        let (details, error) = match &wire.product_details_id {
            Some(details_id) => (
                self.details.found.get(details_id).cloned(),
                self.details.failed.get(details_id).cloned(),
            ),
            None => (None, None),
        };

        Product {
            id,
            post_id: wire.ltk_id,
            hyperlink: wire.hyperlink,
            image_url: wire.image_url,
            retailer_display_name: wire.retailer_display_name,
            retailer_id: wire.retailer_id,
            fetched_at: wire.fetched_at.unwrap_or(self.fetched_at),
            details,
            error,
        }
    }

    /// Assembles the aggregate with the post `primary_id` first
    ///
    /// Fails if the payload does not contain the requested post.
    pub fn build(
        &self,
        primary_id: &str,
        posts: impl IntoIterator<Item = (String, WireLtk)>,
        products: impl IntoIterator<Item = (String, WireProduct)>,
    ) -> Result<PostAggregate, FetchError> {
        let mut built = Vec::new();
        for (id, wire) in posts {
            built.push(self.post(id, wire)?);
        }

        let position = built
            .iter()
            .position(|post| post.id == primary_id)
            .ok_or_else(|| FetchError::MissingField {
                url: self.url.to_string(),
                field: format!("post {}", primary_id),
            })?;
        built.swap(0, position);
        built[1..].sort_by(|a, b| a.id.cmp(&b.id));

        let mut products: Vec<Product> = products
            .into_iter()
            .map(|(id, wire)| self.product(id, wire))
            .collect();
        products.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(PostAggregate {
            posts: built,
            products,
        })
    }
}
