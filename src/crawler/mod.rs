//! Crawler module for draining the post frontier
//!
//! This module contains the core crawling logic:
//! - The generic batch dispatch loop shared with the media pass
//! - Post coordination: seeding, fetching, and recording outcomes
//! - Profile discovery: finding new posts of known profiles

mod coordinator;
pub mod dispatch;
mod profiles;

pub use coordinator::{run_crawl, Coordinator};
pub use profiles::{DiscoveryReport, ProfileDiscovery};
pub use dispatch::{drain, BatchSource, DrainReport};
