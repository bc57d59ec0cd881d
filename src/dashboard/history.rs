//! Calendar bucketing for the history view.
//!
//! History is additive: nothing here removes entries except the explicit
//! `remove_*` helpers that back user deletions.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use super::model::{CompletedItem, HistoryDay, QueueItem, UploadedVideo, Video};

pub type History = BTreeMap<String, HistoryDay>;

/// Calendar day (`YYYY-MM-DD`) of `ts` in `tz`.
pub fn date_key(ts: DateTime<Utc>, tz: Tz) -> String {
    ts.with_timezone(&tz).format("%Y-%m-%d").to_string()
}

/// Add or remove a checklist completion for `date`. A day never holds the same item twice.
pub fn set_checklist_completion(history: &mut History, date: &str, item_id: &str, done: bool) {
    let day = history.entry(date.to_string()).or_default();
    let present = day
        .completed_items
        .iter()
        .any(|c| matches!(c, CompletedItem::Checklist { id } if id == item_id));

    if done && !present {
        day.completed_items.push(CompletedItem::Checklist {
            id: item_id.to_string(),
        });
    } else if !done {
        day.completed_items
            .retain(|c| !matches!(c, CompletedItem::Checklist { id } if id == item_id));
    }
}

pub fn contains_uploaded_video(history: &History, video_id: &str) -> bool {
    history
        .values()
        .any(|day| day.uploaded_videos.iter().any(|v| v.id == video_id))
}

/// Record a finished queue item under `date`.
///
/// Idempotent on the item id across every day; returns whether an entry was added.
pub fn record_upload(
    history: &mut History,
    date: &str,
    item: &QueueItem,
    at: DateTime<Utc>,
) -> bool {
    if contains_uploaded_video(history, &item.id) {
        return false;
    }

    let day = history.entry(date.to_string()).or_default();
    day.uploaded_videos.push(UploadedVideo {
        id: item.id.clone(),
        title: item.title.clone(),
        platform: item.platform,
        url: item.url.clone(),
        timestamp: at,
    });
    day.recount();
    true
}

/// Remove an uploaded video from one day. Returns whether anything was removed.
pub fn remove_uploaded_video(history: &mut History, date: &str, video_id: &str) -> bool {
    let Some(day) = history.get_mut(date) else {
        return false;
    };
    let before = day.uploaded_videos.len();
    day.uploaded_videos.retain(|v| v.id != video_id);
    day.recount();
    before != day.uploaded_videos.len()
}

/// Remove an uploaded video from every day it appears in.
pub fn remove_uploaded_video_everywhere(history: &mut History, video_id: &str) -> bool {
    let mut changed = false;
    for day in history.values_mut() {
        let before = day.uploaded_videos.len();
        day.uploaded_videos.retain(|v| v.id != video_id);
        if before != day.uploaded_videos.len() {
            day.recount();
            changed = true;
        }
    }
    changed
}

/// Merge fetched channel videos into history, bucketed by publish date.
///
/// For every date that has at least one fetched video, the published-video
/// entries of that day are replaced by the fetched set; checklist entries and
/// uploaded videos are kept. Dates without fetched videos are untouched.
pub fn sync_published_videos(history: &mut History, videos: &[Video], tz: Tz) -> usize {
    let mut by_date: HashMap<String, Vec<&Video>> = HashMap::new();
    for video in videos {
        by_date
            .entry(date_key(video.published_at, tz))
            .or_default()
            .push(video);
    }

    let affected = by_date.len();
    for (date, videos) in by_date {
        let day = history.entry(date).or_default();
        day.completed_items
            .retain(|c| !matches!(c, CompletedItem::PublishedVideo { .. }));

        for video in videos {
            let duplicate = day.completed_items.iter().any(|c| {
                matches!(c, CompletedItem::PublishedVideo { id, .. } if *id == video.id)
            });
            if duplicate {
                continue;
            }
            day.completed_items.push(CompletedItem::PublishedVideo {
                id: video.id.clone(),
                title: video.title.clone(),
                url: video.url.clone(),
                thumbnail_url: video.thumbnail_url.clone(),
            });
        }
    }
    affected
}
