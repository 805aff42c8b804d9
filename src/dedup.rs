//! Merge freshly scraped records into the persisted seen-set.

use crate::models::{NewsRecord, SeenSet};
use std::collections::HashSet;
use tracing::{debug, instrument};

/// Append every genuinely new record from `extracted` to a copy of `seen`.
///
/// Stored entries keep their position and content; new data never replaces
/// an existing record. A record is new when its link is absent from `seen`
/// and from everything appended earlier in the same batch. Records without a
/// link are always appended.
#[instrument(level = "info", skip_all, fields(seen = seen.len(), extracted = extracted.len()))]
pub fn merge(seen: &SeenSet, extracted: Vec<NewsRecord>) -> SeenSet {
    let mut known: HashSet<String> = seen
        .iter()
        .filter_map(|r| r.link.clone())
        .collect();
    let mut merged = seen.clone();

    for record in extracted {
        let already_seen = match record.link.as_deref() {
            Some(link) => !known.insert(link.to_string()),
            None => false,
        };
        if already_seen {
            debug!(link = ?record.link, title = %record.title, "Already seen; dropping");
        } else {
            merged.push(record);
        }
    }

    debug!(added = merged.len() - seen.len(), "Merge complete");
    merged
}
