use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use serde::Serialize;

use crate::model::Guide;
use crate::runtime::ResolvedPaths;
use crate::store::{load_catalog, load_guides};

const INDEX_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS indexed_guides (
    id TEXT NOT NULL,
    slug TEXT NOT NULL,
    title TEXT NOT NULL,
    category TEXT NOT NULL,
    publish_date TEXT NOT NULL,
    word_count INTEGER NOT NULL,
    source TEXT NOT NULL,
    indexed_at_unix INTEGER NOT NULL,
    PRIMARY KEY (id, source)
);
CREATE INDEX IF NOT EXISTS idx_indexed_guides_slug ON indexed_guides(slug);
CREATE INDEX IF NOT EXISTS idx_indexed_guides_category ON indexed_guides(category);

CREATE TABLE IF NOT EXISTS indexed_keywords (
    guide_id TEXT NOT NULL,
    source TEXT NOT NULL,
    keyword TEXT NOT NULL,
    PRIMARY KEY (guide_id, source, keyword)
);

CREATE TABLE IF NOT EXISTS indexed_dll_refs (
    guide_id TEXT NOT NULL,
    source TEXT NOT NULL,
    dll_name TEXT NOT NULL,
    PRIMARY KEY (guide_id, source, dll_name)
);
CREATE INDEX IF NOT EXISTS idx_indexed_dll_refs_name ON indexed_dll_refs(dll_name);

CREATE TABLE IF NOT EXISTS catalog_dlls (
    name TEXT PRIMARY KEY
);
"#;

pub const SOURCE_PUBLISHED: &str = "published";
pub const SOURCE_QUEUE: &str = "queue";

#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub db_path: String,
    pub indexed_guides: usize,
    pub indexed_keywords: usize,
    pub indexed_dll_refs: usize,
    pub catalog_dlls: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredIndexStats {
    pub indexed_guides: usize,
    pub published: usize,
    pub queued: usize,
    pub catalog_dlls: usize,
    pub by_category: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateEntry {
    pub key: String,
    pub kind: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingRef {
    pub dll_name: String,
    pub guide_ids: Vec<String>,
}

/// Full rebuild of the content index in a single transaction: both data
/// files and the DLL catalog are re-read and every table is replaced.
/// The index is a disposable cache; there is no incremental path.
pub fn rebuild_index(paths: &ResolvedPaths) -> Result<RebuildReport> {
    let published = load_guides(&paths.published_path)?;
    let queue = load_guides(&paths.queue_path)?;
    let catalog = if paths.catalog_path.exists() {
        load_catalog(&paths.catalog_path)?
    } else {
        Vec::new()
    };

    ensure_db_parent(paths)?;
    let mut connection = open_connection(&paths.db_path)?;
    connection
        .execute_batch(INDEX_SCHEMA_SQL)
        .context("failed to initialize index schema")?;
    let indexed_at_unix = unix_timestamp()?;

    let transaction = connection
        .transaction()
        .context("failed to start index rebuild transaction")?;
    for table in ["indexed_guides", "indexed_keywords", "indexed_dll_refs", "catalog_dlls"] {
        transaction
            .execute(&format!("DELETE FROM {table}"), [])
            .with_context(|| format!("failed to clear {table}"))?;
    }

    let mut indexed_guides = 0usize;
    let mut indexed_keywords = 0usize;
    let mut indexed_dll_refs = 0usize;
    {
        let mut guide_statement = transaction
            .prepare(
                "INSERT OR REPLACE INTO indexed_guides (
                    id, slug, title, category, publish_date, word_count, source, indexed_at_unix
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .context("failed to prepare indexed_guides insert")?;
        let mut keyword_statement = transaction
            .prepare(
                "INSERT OR IGNORE INTO indexed_keywords (guide_id, source, keyword)
                 VALUES (?1, ?2, ?3)",
            )
            .context("failed to prepare indexed_keywords insert")?;
        let mut ref_statement = transaction
            .prepare(
                "INSERT OR IGNORE INTO indexed_dll_refs (guide_id, source, dll_name)
                 VALUES (?1, ?2, ?3)",
            )
            .context("failed to prepare indexed_dll_refs insert")?;

        let sets = [
            (SOURCE_PUBLISHED, &published.guides),
            (SOURCE_QUEUE, &queue.guides),
        ];
        for (source, guides) in sets {
            for guide in guides.iter() {
                insert_guide(
                    &mut guide_statement,
                    guide,
                    source,
                    indexed_at_unix,
                )?;
                indexed_guides += 1;
                for keyword in &guide.keywords {
                    indexed_keywords += keyword_statement
                        .execute(params![guide.id, source, keyword])
                        .with_context(|| format!("failed to index keywords for {}", guide.id))?;
                }
                for dll_name in &guide.related_dlls {
                    indexed_dll_refs += ref_statement
                        .execute(params![guide.id, source, dll_name.to_lowercase()])
                        .with_context(|| format!("failed to index DLL refs for {}", guide.id))?;
                }
            }
        }
    }

    let mut catalog_count = 0usize;
    {
        let mut catalog_statement = transaction
            .prepare("INSERT OR IGNORE INTO catalog_dlls (name) VALUES (?1)")
            .context("failed to prepare catalog_dlls insert")?;
        for record in &catalog {
            catalog_count += catalog_statement
                .execute(params![record.name.to_lowercase()])
                .with_context(|| format!("failed to index catalog record {}", record.name))?;
        }
    }

    transaction
        .commit()
        .context("failed to commit index rebuild transaction")?;

    Ok(RebuildReport {
        db_path: crate::runtime::normalize_for_display(&paths.db_path),
        indexed_guides,
        indexed_keywords,
        indexed_dll_refs,
        catalog_dlls: catalog_count,
    })
}

fn insert_guide(
    statement: &mut rusqlite::Statement<'_>,
    guide: &Guide,
    source: &str,
    indexed_at_unix: u64,
) -> Result<()> {
    statement
        .execute(params![
            guide.id,
            guide.slug(),
            guide.title,
            guide.category,
            guide.publish_date,
            i64::try_from(guide.word_count()).context("word count does not fit into i64")?,
            source,
            i64::try_from(indexed_at_unix).context("timestamp does not fit into i64")?,
        ])
        .with_context(|| format!("failed to insert {}", guide.id))?;
    Ok(())
}

pub fn load_stored_index_stats(paths: &ResolvedPaths) -> Result<Option<StoredIndexStats>> {
    let connection = match open_indexed_connection(paths)? {
        Some(connection) => connection,
        None => return Ok(None),
    };

    let indexed_guides = count_query(&connection, "SELECT COUNT(*) FROM indexed_guides")
        .context("failed to count indexed guides")?;
    let published = count_query(
        &connection,
        "SELECT COUNT(*) FROM indexed_guides WHERE source = 'published'",
    )
    .context("failed to count published guides")?;
    let queued = count_query(
        &connection,
        "SELECT COUNT(*) FROM indexed_guides WHERE source = 'queue'",
    )
    .context("failed to count queued guides")?;
    let catalog_dlls = count_query(&connection, "SELECT COUNT(*) FROM catalog_dlls")
        .context("failed to count catalog records")?;

    let mut by_category = BTreeMap::new();
    let mut statement = connection
        .prepare(
            "SELECT category, COUNT(*) FROM indexed_guides GROUP BY category ORDER BY category",
        )
        .context("failed to prepare category stats query")?;
    let rows = statement
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .context("failed to run category stats query")?;
    for row in rows {
        let (category, count) = row.context("failed to decode category stats row")?;
        by_category.insert(category, count.max(0) as usize);
    }

    Ok(Some(StoredIndexStats {
        indexed_guides,
        published,
        queued,
        catalog_dlls,
        by_category,
    }))
}

/// Ids present in both sources plus slugs shared by distinct ids.
pub fn query_duplicates(paths: &ResolvedPaths) -> Result<Option<Vec<DuplicateEntry>>> {
    let connection = match open_indexed_connection(paths)? {
        Some(connection) => connection,
        None => return Ok(None),
    };

    let mut out = Vec::new();
    let mut statement = connection
        .prepare(
            "SELECT id, COUNT(*) AS uses
             FROM indexed_guides
             GROUP BY id
             HAVING COUNT(*) > 1
             ORDER BY id",
        )
        .context("failed to prepare duplicate id query")?;
    let rows = statement
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .context("failed to run duplicate id query")?;
    for row in rows {
        let (key, count) = row.context("failed to decode duplicate id row")?;
        out.push(DuplicateEntry {
            key,
            kind: "id".to_string(),
            count: count.max(0) as usize,
        });
    }

    let mut statement = connection
        .prepare(
            "SELECT slug, COUNT(DISTINCT id) AS ids
             FROM indexed_guides
             GROUP BY slug
             HAVING COUNT(DISTINCT id) > 1
             ORDER BY slug",
        )
        .context("failed to prepare duplicate slug query")?;
    let rows = statement
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .context("failed to run duplicate slug query")?;
    for row in rows {
        let (key, count) = row.context("failed to decode duplicate slug row")?;
        out.push(DuplicateEntry {
            key,
            kind: "slug".to_string(),
            count: count.max(0) as usize,
        });
    }
    Ok(Some(out))
}

/// relatedDlls entries with no matching DLL catalog record, with the
/// guides referencing them. The original data had no referential check
/// at all; this is the audit for it.
pub fn query_missing_refs(paths: &ResolvedPaths) -> Result<Option<Vec<MissingRef>>> {
    let connection = match open_indexed_connection(paths)? {
        Some(connection) => connection,
        None => return Ok(None),
    };

    let mut statement = connection
        .prepare(
            "SELECT r.dll_name, r.guide_id
             FROM indexed_dll_refs r
             WHERE NOT EXISTS (SELECT 1 FROM catalog_dlls c WHERE c.name = r.dll_name)
             ORDER BY r.dll_name, r.guide_id",
        )
        .context("failed to prepare missing refs query")?;
    let rows = statement
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .context("failed to run missing refs query")?;

    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for row in rows {
        let (dll_name, guide_id) = row.context("failed to decode missing refs row")?;
        let ids = grouped.entry(dll_name).or_default();
        if !ids.contains(&guide_id) {
            ids.push(guide_id);
        }
    }

    Ok(Some(
        grouped
            .into_iter()
            .map(|(dll_name, guide_ids)| MissingRef {
                dll_name,
                guide_ids,
            })
            .collect(),
    ))
}

fn open_indexed_connection(paths: &ResolvedPaths) -> Result<Option<Connection>> {
    if !paths.db_path.exists() {
        return Ok(None);
    }
    let connection = open_connection(&paths.db_path)?;
    if !table_exists(&connection, "indexed_guides")? {
        return Ok(None);
    }
    Ok(Some(connection))
}

fn table_exists(connection: &Connection, name: &str) -> Result<bool> {
    let exists: i64 = connection
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [name],
            |row| row.get(0),
        )
        .with_context(|| format!("failed to check for table {name}"))?;
    Ok(exists == 1)
}

fn count_query(connection: &Connection, sql: &str) -> Result<usize> {
    let count: i64 = connection.query_row(sql, [], |row| row.get(0))?;
    Ok(count.max(0) as usize)
}

fn open_connection(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys pragma")?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL journal mode")?;
    Ok(connection)
}

fn ensure_db_parent(paths: &ResolvedPaths) -> Result<()> {
    let parent = paths
        .db_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("db path has no parent: {}", paths.db_path.display()))?;
    fs::create_dir_all(parent).with_context(|| {
        format!("failed to create database parent directory {}", parent.display())
    })
}

fn unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock error")?
        .as_secs())
}
