//! Statistics generation from the harvest database
//!
//! This module provides functionality for extracting and displaying
//! harvest progress from the storage layer.

use crate::model::MediaKind;
use crate::storage::{Storage, StorageResult};

/// Stored and failed media rows of one kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaCounts {
    pub kind: MediaKind,
    pub stored: u64,
    pub errors: u64,
}

/// Harvest statistics summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestStatistics {
    /// Posts known to the frontier, fetched or not
    pub total_posts: u64,

    pub pending_posts: u64,

    pub visited_posts: u64,

    /// Visited posts whose fetch ended in an error
    pub failed_posts: u64,

    pub total_products: u64,

    pub media: Vec<MediaCounts>,
}

/// Loads statistics from storage
pub fn load_statistics(storage: &dyn Storage) -> StorageResult<HarvestStatistics> {
    let mut media = Vec::with_capacity(MediaKind::ALL.len());
    for kind in MediaKind::ALL {
        let (stored, errors) = storage.count_media(kind)?;
        media.push(MediaCounts {
            kind,
            stored,
            errors,
        });
    }

    Ok(HarvestStatistics {
        total_posts: storage.count_posts()?,
        pending_posts: storage.count_pending()?,
        visited_posts: storage.count_visited()?,
        failed_posts: storage.count_visited_with_error()?,
        total_products: storage.count_products()?,
        media,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Posts:");
    println!("  Known: {}", stats.total_posts);
    println!("  Pending: {}", stats.pending_posts);
    println!("  Visited: {}", stats.visited_posts);
    println!("  Failed: {}", stats.failed_posts);
    println!();

    println!("Products: {}", stats.total_products);
    println!();

    println!("Media:");
    for counts in &stats.media {
        println!(
            "  {}: {} stored, {} errors",
            counts.kind, counts.stored, counts.errors
        );
    }
    println!();

    let success_rate = if stats.visited_posts > 0 {
        ((stats.visited_posts - stats.failed_posts) as f64 / stats.visited_posts as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Success Rate: {:.1}% ({} / {} posts fetched without error)",
        success_rate,
        stats.visited_posts - stats.failed_posts,
        stats.visited_posts
    );
}
