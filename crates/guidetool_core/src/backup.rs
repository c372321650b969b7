use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use zip::CompressionMethod;
use zip::write::{FileOptions, ZipWriter};

use crate::runtime::ResolvedPaths;

pub const DEFAULT_RETAIN: usize = 14;

#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub archive_path: String,
    pub entries: Vec<String>,
    pub pruned: Vec<String>,
}

/// Zip the data files into `.guidetool/backups/data-<today>.zip` and
/// prune snapshots beyond the retention count. Re-running on the same
/// day replaces that day's archive.
pub fn run_backup(paths: &ResolvedPaths, today: &str, retain: usize) -> Result<BackupReport> {
    fs::create_dir_all(&paths.backups_dir)
        .with_context(|| format!("failed to create {}", paths.backups_dir.display()))?;

    let archive_path = paths.backups_dir.join(format!("data-{today}.zip"));
    let file = File::create(&archive_path)
        .with_context(|| format!("failed to create {}", archive_path.display()))?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = Vec::new();
    for source in [
        &paths.published_path,
        &paths.queue_path,
        &paths.catalog_path,
    ] {
        if !source.exists() {
            continue;
        }
        let name = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow::anyhow!("data path has no file name: {}", source.display()))?;
        writer
            .start_file(name, options)
            .with_context(|| format!("failed to add {name} to archive"))?;
        let mut content = Vec::new();
        File::open(source)
            .with_context(|| format!("failed to read {}", source.display()))?
            .read_to_end(&mut content)
            .with_context(|| format!("failed to read {}", source.display()))?;
        writer
            .write_all(&content)
            .with_context(|| format!("failed to write {name} into archive"))?;
        entries.push(name.to_string());
    }
    writer
        .finish()
        .context("failed to finalize backup archive")?;

    let pruned = prune_backups(&paths.backups_dir, retain.max(1))?;
    Ok(BackupReport {
        archive_path: crate::runtime::normalize_for_display(&archive_path),
        entries,
        pruned,
    })
}

/// Remove the oldest `data-*.zip` snapshots beyond `retain`. Archive
/// names embed the date, so lexicographic order is chronological.
fn prune_backups(backups_dir: &Path, retain: usize) -> Result<Vec<String>> {
    let mut snapshots = Vec::new();
    let entries = fs::read_dir(backups_dir)
        .with_context(|| format!("failed to list {}", backups_dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", backups_dir.display()))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("data-") && name.ends_with(".zip") {
            snapshots.push(name);
        }
    }
    snapshots.sort();

    let mut pruned = Vec::new();
    while snapshots.len() > retain {
        let oldest = snapshots.remove(0);
        fs::remove_file(backups_dir.join(&oldest))
            .with_context(|| format!("failed to prune backup {oldest}"))?;
        pruned.push(oldest);
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;
    use zip::ZipArchive;

    use super::*;
    use crate::runtime::{
        InitOptions, PathOverrides, ResolutionContext, init_layout, resolve_paths,
    };

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

    #[test]
    fn backup_archives_all_data_files() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(&temp);
        fs::write(&paths.published_path, "[{\"id\":\"a\",\"title\":\"T\",\"publishDate\":\"2025-01-01\"}]")
            .expect("seed published");

        let report = run_backup(&paths, "2025-06-01", DEFAULT_RETAIN).expect("backup");
        assert_eq!(
            report.entries,
            vec![
                "guides.json".to_string(),
                "queue.json".to_string(),
                "dll-catalog.json".to_string(),
            ]
        );
        assert!(report.pruned.is_empty());

        let archive_path = paths.backups_dir.join("data-2025-06-01.zip");
        assert!(archive_path.exists());
        let file = fs::File::open(&archive_path).expect("open archive");
        let mut archive = ZipArchive::new(file).expect("read archive");
        assert_eq!(archive.len(), 3);
        let mut content = String::new();
        std::io::Read::read_to_string(
            &mut archive.by_name("guides.json").expect("entry"),
            &mut content,
        )
        .expect("read entry");
        assert!(content.contains("\"id\":\"a\""));
    }

    #[test]
    fn prune_keeps_newest_snapshots() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(&temp);
        for day in ["2025-05-28", "2025-05-29", "2025-05-30"] {
            run_backup(&paths, day, DEFAULT_RETAIN).expect("backup");
        }

        let report = run_backup(&paths, "2025-05-31", 2).expect("backup with prune");
        assert_eq!(
            report.pruned,
            vec![
                "data-2025-05-28.zip".to_string(),
                "data-2025-05-29.zip".to_string(),
            ]
        );
        assert!(paths.backups_dir.join("data-2025-05-30.zip").exists());
        assert!(paths.backups_dir.join("data-2025-05-31.zip").exists());
    }

    #[test]
    fn missing_catalog_is_skipped_not_fatal() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(&temp);
        fs::remove_file(&paths.catalog_path).expect("remove catalog");
        let report = run_backup(&paths, "2025-06-01", DEFAULT_RETAIN).expect("backup");
        assert_eq!(report.entries.len(), 2);
    }
}
