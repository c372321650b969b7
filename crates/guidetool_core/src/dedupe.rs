use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde::Serialize;

use crate::model::Guide;
use crate::runtime::ResolvedPaths;
use crate::store::{load_guides, save_guides};

#[derive(Debug, Clone, Serialize)]
pub struct RemovedRecord {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DedupeReport {
    pub published_total: usize,
    pub queue_total: usize,
    pub removed_from_published: Vec<RemovedRecord>,
    pub removed_from_queue: Vec<RemovedRecord>,
    pub applied: bool,
}

impl DedupeReport {
    pub fn duplicates_found(&self) -> usize {
        self.removed_from_published.len() + self.removed_from_queue.len()
    }
}

/// Drop records that repeat an id or slug already kept within the set.
/// The earliest publishDate wins; on a tie the first occurrence stays.
pub fn dedupe_set(guides: Vec<Guide>) -> (Vec<Guide>, Vec<RemovedRecord>) {
    // Pass 1: find the winner (earliest date, then first position) for
    // every id and slug key.
    let mut winners: HashMap<String, usize> = HashMap::new();
    for (position, guide) in guides.iter().enumerate() {
        for key in record_keys(guide) {
            match winners.get(&key) {
                Some(&current) => {
                    if guides[current].publish_date > guide.publish_date {
                        winners.insert(key, position);
                    }
                }
                None => {
                    winners.insert(key, position);
                }
            }
        }
    }

    // Pass 2: keep only records that won every one of their keys.
    let mut kept = Vec::with_capacity(guides.len());
    let mut removed = Vec::new();
    for (position, guide) in guides.into_iter().enumerate() {
        let losing_key = record_keys(&guide)
            .into_iter()
            .find(|key| winners.get(key) != Some(&position));
        match losing_key {
            None => kept.push(guide),
            Some(key) => removed.push(RemovedRecord {
                id: guide.id.clone(),
                reason: format!("duplicate of kept record for key {key:?}"),
            }),
        }
    }
    (kept, removed)
}

fn record_keys(guide: &Guide) -> Vec<String> {
    let id_key = format!("id:{}", guide.id);
    let slug_key = format!("slug:{}", guide.slug());
    if guide.slug() == guide.id {
        vec![id_key]
    } else {
        vec![id_key, slug_key]
    }
}

/// Deduplicate both data files and drop queue records whose id or slug
/// is already published (published always wins across files). Writes
/// only when `apply` is set.
pub fn run_dedupe(paths: &ResolvedPaths, apply: bool) -> Result<DedupeReport> {
    let mut published_file = load_guides(&paths.published_path)?;
    let mut queue_file = load_guides(&paths.queue_path)?;

    let (published, removed_from_published) = dedupe_set(std::mem::take(&mut published_file.guides));
    let (queue, mut removed_from_queue) = dedupe_set(std::mem::take(&mut queue_file.guides));

    let published_keys: HashSet<String> = published.iter().flat_map(|g| record_keys(g)).collect();
    let mut remaining_queue = Vec::with_capacity(queue.len());
    for guide in queue {
        if record_keys(&guide)
            .iter()
            .any(|key| published_keys.contains(key))
        {
            removed_from_queue.push(RemovedRecord {
                id: guide.id.clone(),
                reason: "already published".to_string(),
            });
        } else {
            remaining_queue.push(guide);
        }
    }

    let report = DedupeReport {
        published_total: published.len(),
        queue_total: remaining_queue.len(),
        removed_from_published,
        removed_from_queue,
        applied: apply,
    };

    if apply && report.duplicates_found() > 0 {
        published_file.guides = published;
        queue_file.guides = remaining_queue;
        save_guides(&paths.published_path, &published_file)?;
        save_guides(&paths.queue_path, &queue_file)?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::model::Section;
    use crate::runtime::{
        InitOptions, PathOverrides, ResolutionContext, init_layout, resolve_paths,
    };
    use crate::store::{FileShape, GuideFile};

    fn guide(id: &str, slug: Option<&str>, publish_date: &str) -> Guide {
        Guide {
            id: id.to_string(),
            slug: slug.map(ToString::to_string),
            title: format!("Fix {id}"),
            meta_title: String::new(),
            meta_description: String::new(),
            excerpt: String::new(),
            category: "dll-errors".to_string(),
            publish_date: publish_date.to_string(),
            update_date: None,
            keywords: Vec::new(),
            sections: vec![Section {
                heading: "Overview".to_string(),
                content: "Body.".to_string(),
            }],
            related_dlls: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn earliest_publish_date_wins() {
        let (kept, removed) = dedupe_set(vec![
            guide("a", None, "2025-03-01"),
            guide("a", None, "2025-01-01"),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].publish_date, "2025-01-01");
        assert_eq!(removed.len(), 1);
    }

    #[test]
    fn tie_keeps_first_occurrence() {
        let mut first = guide("a", None, "2025-01-01");
        first.title = "first".to_string();
        let mut second = guide("a", None, "2025-01-01");
        second.title = "second".to_string();
        let (kept, removed) = dedupe_set(vec![first, second]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].title, "first");
        assert_eq!(removed.len(), 1);
    }

    #[test]
    fn slug_collisions_count_as_duplicates() {
        let (kept, removed) = dedupe_set(vec![
            guide("a", Some("same-slug"), "2025-01-01"),
            guide("b", Some("same-slug"), "2025-02-01"),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "a");
        assert_eq!(removed[0].id, "b");
    }

    #[test]
    fn distinct_records_pass_through() {
        let (kept, removed) = dedupe_set(vec![
            guide("a", None, "2025-01-01"),
            guide("b", None, "2025-01-01"),
        ]);
        assert_eq!(kept.len(), 2);
        assert!(removed.is_empty());
    }

    fn test_paths(temp: &tempfile::TempDir) -> ResolvedPaths {
        let root = temp.path().join("site");
        fs::create_dir_all(&root).expect("create root");
        let context = ResolutionContext {
            cwd: root.clone(),
            executable_dir: None,
        };
        let overrides = PathOverrides {
            project_root: Some(root),
            ..PathOverrides::default()
        };
        let paths = resolve_paths(&context, &overrides).expect("resolve");
        init_layout(&paths, &InitOptions::default()).expect("init");
        paths
    }

    fn write(path: &std::path::Path, guides: Vec<Guide>) {
        save_guides(
            path,
            &GuideFile {
                guides,
                shape: FileShape::BareArray,
                comment: None,
            },
        )
        .expect("write guides");
    }

    #[test]
    fn published_wins_across_files() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(&temp);
        write(&paths.published_path, vec![guide("a", None, "2025-01-01")]);
        write(
            &paths.queue_path,
            vec![guide("a", None, "2025-05-01"), guide("b", None, "2025-05-02")],
        );

        let report = run_dedupe(&paths, true).expect("dedupe");
        assert_eq!(report.removed_from_queue.len(), 1);
        assert_eq!(report.removed_from_queue[0].id, "a");
        assert_eq!(report.removed_from_queue[0].reason, "already published");

        let queue = load_guides(&paths.queue_path).expect("queue");
        assert_eq!(queue.guides.len(), 1);
        assert_eq!(queue.guides[0].id, "b");
        let published = load_guides(&paths.published_path).expect("published");
        assert_eq!(published.guides.len(), 1);
    }

    #[test]
    fn report_mode_leaves_files_alone() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(&temp);
        write(
            &paths.queue_path,
            vec![guide("a", None, "2025-05-01"), guide("a", None, "2025-05-02")],
        );

        let report = run_dedupe(&paths, false).expect("dedupe");
        assert_eq!(report.duplicates_found(), 1);
        assert!(!report.applied);

        let queue = load_guides(&paths.queue_path).expect("queue");
        assert_eq!(queue.guides.len(), 2);
    }
}
