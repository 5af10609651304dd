//! Output module for reporting harvest progress
//!
//! This module handles:
//! - Loading frontier and media counts from storage
//! - Printing them for the `stats` command

pub mod stats;

pub use stats::{load_statistics, print_statistics, HarvestStatistics, MediaCounts};
