//! Scrapers that turn fetched pages into [`NewsRecord`](crate::models::NewsRecord)s.
//!
//! # Supported Pages
//!
//! | Page | Module | Method | Notes |
//! |------|--------|--------|-------|
//! | News listing | [`listing`] | HTML scraping | Card layout set by CSS selectors |
//!
//! Scrapers never fail the run: a page that cannot be fetched is logged
//! and yields no records.

pub mod listing;
