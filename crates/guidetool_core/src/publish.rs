use std::collections::HashSet;

use anyhow::{Result, bail};
use chrono::{FixedOffset, Utc};
use serde::Serialize;

use crate::model::{Guide, is_iso_date};
use crate::runtime::ResolvedPaths;
use crate::store::{load_guides, save_guides};

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Override for "today" (`YYYY-MM-DD`); wall clock otherwise.
    pub today: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub today: String,
    pub due: usize,
    pub published: usize,
    pub skipped_duplicates: Vec<String>,
    pub remaining_in_queue: usize,
    pub total_published: usize,
    pub dry_run: bool,
}

/// Outcome of partitioning the queue against a date.
#[derive(Debug, Clone)]
pub struct Partition {
    /// Due and not already published; these move.
    pub publishable: Vec<Guide>,
    /// Due but their id already exists in the published set.
    pub duplicates: Vec<Guide>,
    /// Not yet due; these stay queued.
    pub remaining: Vec<Guide>,
}

/// Today's date in the site's fixed publishing timezone. Offsets are
/// clamped to real timezones, so the fallback to UTC is unreachable in
/// practice.
pub fn today_string(utc_offset_hours: i32) -> String {
    let seconds = utc_offset_hours.clamp(-12, 14) * 3600;
    match FixedOffset::east_opt(seconds) {
        Some(offset) => Utc::now().with_timezone(&offset).date_naive().to_string(),
        None => Utc::now().date_naive().to_string(),
    }
}

/// Split the queue into publishable / duplicate / remaining sets.
///
/// A record is due when `publishDate <= today` (lexicographic compare,
/// sound for `YYYY-MM-DD` strings). Due records whose id is already in
/// the published set are dropped rather than published twice, which is
/// what makes repeated runs idempotent.
pub fn partition_due(queue: Vec<Guide>, published_ids: &HashSet<String>, today: &str) -> Partition {
    let mut publishable = Vec::new();
    let mut duplicates = Vec::new();
    let mut remaining = Vec::new();
    let mut batch_ids: HashSet<String> = HashSet::new();

    for guide in queue {
        if guide.publish_date.as_str() > today {
            remaining.push(guide);
        } else if published_ids.contains(&guide.id) || !batch_ids.insert(guide.id.clone()) {
            duplicates.push(guide);
        } else {
            publishable.push(guide);
        }
    }

    Partition {
        publishable,
        duplicates,
        remaining,
    }
}

/// Move every due queue record into the published set and rewrite both
/// files. Duplicate ids are dropped from the queue without being
/// re-published.
pub fn run_publish(
    paths: &ResolvedPaths,
    utc_offset_hours: i32,
    options: &PublishOptions,
) -> Result<PublishReport> {
    let today = match &options.today {
        Some(value) => {
            if !is_iso_date(value) {
                bail!("--today must be YYYY-MM-DD, got {value:?}");
            }
            value.clone()
        }
        None => today_string(utc_offset_hours),
    };

    let mut published_file = load_guides(&paths.published_path)?;
    let mut queue_file = load_guides(&paths.queue_path)?;

    let published_ids: HashSet<String> = published_file
        .guides
        .iter()
        .map(|guide| guide.id.clone())
        .collect();

    let queue = std::mem::take(&mut queue_file.guides);
    let partition = partition_due(queue, &published_ids, &today);

    let report = PublishReport {
        today: today.clone(),
        due: partition.publishable.len() + partition.duplicates.len(),
        published: partition.publishable.len(),
        skipped_duplicates: partition
            .duplicates
            .iter()
            .map(|guide| guide.id.clone())
            .collect(),
        remaining_in_queue: partition.remaining.len(),
        total_published: published_file.guides.len() + partition.publishable.len(),
        dry_run: options.dry_run,
    };

    if options.dry_run {
        return Ok(report);
    }

    published_file.guides.extend(partition.publishable);
    queue_file.guides = partition.remaining;

    // Published first: if the queue rewrite is lost, the duplicate guard
    // drops the re-offered records on the next run.
    save_guides(&paths.published_path, &published_file)?;
    save_guides(&paths.queue_path, &queue_file)?;

    Ok(report)
}
