//! Data models for scraped news items and the persisted seen-set.
//!
//! This module defines the two structures that flow through the pipeline:
//! - [`NewsRecord`]: One news card scraped from the listing page
//! - [`SeenSet`]: Every record observed so far, in first-observation order
//!
//! The JSON shape matches the ledger file the tracker has always written
//! (`postedNews.json`): an array of objects with `title`, `link`,
//! `thumbnail` and `time` keys.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single news item discovered on the listing page.
///
/// Identity is carried by [`link`](NewsRecord::link) alone. Two records
/// describe the same news item iff both links are present and equal; a record
/// without a link never matches anything, not even another link-less record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NewsRecord {
    /// Headline text, empty when the card had no title element.
    #[serde(default)]
    pub title: String,
    /// Absolute article URL.
    #[serde(default)]
    pub link: Option<String>,
    /// Absolute thumbnail URL with its query string removed.
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Extraction time (RFC 3339) or the page-provided date text.
    #[serde(rename = "time")]
    pub timestamp: String,
}

/// The durable collection of every [`NewsRecord`] ever observed.
///
/// Ordered by first observation. Entries are never rewritten once stored;
/// the set only grows by appending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SeenSet {
    records: Vec<NewsRecord>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn records(&self) -> &[NewsRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NewsRecord> {
        self.records.iter()
    }

    /// Records appended after the first `previous_len` entries.
    ///
    /// Used to pick out what a merge added relative to the loaded set.
    pub fn added_since(&self, previous_len: usize) -> &[NewsRecord] {
        self.records.get(previous_len..).unwrap_or(&[])
    }

    /// Links that occur on more than one stored record.
    pub fn duplicate_links(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut dupes = Vec::new();
        for link in self.records.iter().filter_map(|r| r.link.as_deref()) {
            if !seen.insert(link) && !dupes.contains(&link) {
                dupes.push(link);
            }
        }
        dupes
    }

    pub(crate) fn push(&mut self, record: NewsRecord) {
        self.records.push(record);
    }
}

impl From<Vec<NewsRecord>> for SeenSet {
    fn from(records: Vec<NewsRecord>) -> Self {
        Self { records }
    }
}

impl<'a> IntoIterator for &'a SeenSet {
    type Item = &'a NewsRecord;
    type IntoIter = std::slice::Iter<'a, NewsRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
