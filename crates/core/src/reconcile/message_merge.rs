//! Merge rules for message-level records.

use super::reconcile_model::{MessageRecord, TimestampField};
use crate::aggregate::{supersedes, MessageEngagement};
use crate::constants::{CLICKED_URLS_MAX_LEN, CLICKED_URLS_SEPARATOR};

/// Applies one batch's engagement onto a fetched message record.
///
/// - open/click counts are added to the stored counts
/// - first-opened is only set when the record has none
/// - last-clicked moves only when the batch's latest click is newer
/// - clicked URLs become the deduplicated union, capped in length
/// - bounce date/reason are overwritten by the batch's latest bounce
///
/// Stored timestamps that could not be read are never replaced, except the
/// bounce date, which the batch overwrites regardless.
///
/// Returns true if the record changed.
pub fn apply_message_engagement(record: &mut MessageRecord, engagement: &MessageEngagement) -> bool {
    let mut changed = false;

    let opens = engagement.open_count();
    if opens > 0 {
        record.open_count = record.open_count.saturating_add(opens);
        changed = true;
    }
    let clicks = engagement.click_count();
    if clicks > 0 {
        record.click_count = record.click_count.saturating_add(clicks);
        changed = true;
    }

    if record.first_opened_at.is_none()
        && !record.unreadable.contains(&TimestampField::FirstOpened)
    {
        if let Some(first) = engagement.first_open() {
            record.first_opened_at = Some(first);
            changed = true;
        }
    }

    if let Some(click) = engagement.last_click() {
        if !record.unreadable.contains(&TimestampField::LastClicked)
            && supersedes(click.occurred_at, record.last_clicked_at)
        {
            record.last_clicked_at = Some(click.occurred_at);
            changed = true;
        }
    }

    let new_urls = engagement.clicked_urls();
    if !new_urls.is_empty() {
        let merged = merge_clicked_urls(record.clicked_urls.as_deref(), &new_urls);
        if merged != record.clicked_urls {
            record.clicked_urls = merged;
            changed = true;
        }
    }

    if let Some(bounce) = &engagement.bounce {
        record.bounced_at = Some(bounce.occurred_at);
        record.bounce_reason = bounce.reason.clone();
        record.unreadable.remove(&TimestampField::Bounced);
        changed = true;
    }

    changed
}

/// Union of the stored URL list and new URLs, existing entries first.
///
/// The serialized list is capped at [`CLICKED_URLS_MAX_LEN`] characters by
/// dropping whole trailing URLs; a lone URL longer than the cap is cut.
pub fn merge_clicked_urls(existing: Option<&str>, new_urls: &[&str]) -> Option<String> {
    let mut urls: Vec<&str> = Vec::new();
    let stored = existing
        .unwrap_or_default()
        .split(CLICKED_URLS_SEPARATOR)
        .map(str::trim);
    for url in stored.chain(new_urls.iter().map(|u| u.trim())) {
        if !url.is_empty() && !urls.contains(&url) {
            urls.push(url);
        }
    }

    let mut serialized = String::new();
    let mut length = 0;
    for url in urls {
        let url_len = url.chars().count();
        if length == 0 {
            if url_len > CLICKED_URLS_MAX_LEN {
                serialized = url.chars().take(CLICKED_URLS_MAX_LEN).collect();
                break;
            }
            serialized.push_str(url);
            length = url_len;
        } else if length + 1 + url_len <= CLICKED_URLS_MAX_LEN {
            serialized.push(CLICKED_URLS_SEPARATOR);
            serialized.push_str(url);
            length += 1 + url_len;
        } else {
            break;
        }
    }

    if serialized.is_empty() {
        None
    } else {
        Some(serialized)
    }
}
