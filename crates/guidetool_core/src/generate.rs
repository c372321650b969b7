use std::collections::HashSet;

use anyhow::{Context, Result, bail};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::{Guide, Section, is_iso_date, slugify};
use crate::runtime::ResolvedPaths;
use crate::seo::truncate_on_word_boundary;
use crate::store::{load_guides, save_guides};

const EMBEDDED_TEMPLATES: &str = include_str!("../../../config/generator-templates.json");

/// Template tables driving the guide generator. All variability is a
/// hash of the record slug over these tables, never a real RNG, so a
/// regeneration run reproduces the exact same records.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorTables {
    pub games: Vec<String>,
    pub dlls: Vec<DllTemplate>,
    pub error_variants: Vec<String>,
    pub title_templates: Vec<String>,
    pub excerpt_templates: Vec<String>,
    pub opening_templates: Vec<String>,
    pub section_templates: Vec<SectionTemplate>,
    pub keyword_templates: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DllTemplate {
    pub name: String,
    pub category: String,
    pub runtime: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SectionTemplate {
    pub heading: String,
    pub variants: Vec<String>,
}

pub fn embedded_tables() -> Result<GeneratorTables> {
    let tables: GeneratorTables = serde_json::from_str(EMBEDDED_TEMPLATES)
        .context("embedded generator-templates.json is malformed")?;
    if tables.games.is_empty() || tables.dlls.is_empty() {
        bail!("embedded generator tables must list at least one game and one DLL");
    }
    Ok(tables)
}

/// Deterministic variant index: SHA-256 over `slug:tag`, folded into the
/// table length. Distinct tags decorrelate the fields of one guide.
pub fn variant_index(slug: &str, tag: &str, len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    let digest = Sha256::digest(format!("{slug}:{tag}").as_bytes());
    let mut value = 0u64;
    for byte in digest.iter().take(8) {
        value = (value << 8) | u64::from(*byte);
    }
    (value % len as u64) as usize
}

fn pick<'a>(items: &'a [String], slug: &str, tag: &str) -> &'a str {
    &items[variant_index(slug, tag, items.len())]
}

fn fill(template: &str, game: &str, dll: &DllTemplate, error: &str) -> String {
    template
        .replace("$ERROR", error)
        .replace("$RUNTIME", &dll.runtime)
        .replace("$GAME", game)
        .replace("$DLL", &dll.name)
}

pub fn guide_slug(dll: &DllTemplate, game: &str) -> String {
    slugify(&format!("fix {} {game}", dll.name))
}

/// Build one guide record for a (DLL, game) pair.
pub fn build_guide(
    tables: &GeneratorTables,
    dll: &DllTemplate,
    game: &str,
    publish_date: &str,
    title_limit: usize,
    description_limit: usize,
) -> Guide {
    let slug = guide_slug(dll, game);
    let error = fill(pick(&tables.error_variants, &slug, "error"), game, dll, "");
    let title = fill(pick(&tables.title_templates, &slug, "title"), game, dll, &error);
    let excerpt = fill(
        pick(&tables.excerpt_templates, &slug, "excerpt"),
        game,
        dll,
        &error,
    );

    let mut sections = Vec::with_capacity(tables.section_templates.len());
    for (index, template) in tables.section_templates.iter().enumerate() {
        let tag = format!("section-{index}");
        let variant = &template.variants[variant_index(&slug, &tag, template.variants.len())];
        let mut content = fill(variant, game, dll, &error);
        if index == 0 {
            let opening = fill(
                pick(&tables.opening_templates, &slug, "opening"),
                game,
                dll,
                &error,
            );
            content = format!("{opening} {content}");
        }
        sections.push(Section {
            heading: fill(&template.heading, game, dll, &error),
            content,
        });
    }

    let keywords = tables
        .keyword_templates
        .iter()
        .map(|template| fill(template, game, dll, &error))
        .collect();

    Guide {
        id: slug.clone(),
        slug: Some(slug),
        meta_title: truncate_on_word_boundary(&title, title_limit),
        meta_description: truncate_on_word_boundary(&excerpt, description_limit),
        title,
        excerpt,
        category: dll.category.clone(),
        publish_date: publish_date.to_string(),
        update_date: None,
        keywords,
        sections,
        related_dlls: vec![dll.name.clone()],
        extra: Default::default(),
    }
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub count: usize,
    /// First publish date for the batch; defaults to the day after the
    /// latest date already scheduled (or after today).
    pub start_date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateReport {
    pub requested: usize,
    pub generated: Vec<String>,
    pub skipped_existing: usize,
    pub first_date: Option<String>,
    pub last_date: Option<String>,
    pub queue_total: usize,
}

/// Append up to `count` new guides to the queue, one publish date per
/// day. Slugs already present in the queue or the published set are
/// skipped, so the generator can be re-run safely.
pub fn run_generate(
    paths: &ResolvedPaths,
    today: &str,
    title_limit: usize,
    description_limit: usize,
    options: &GenerateOptions,
) -> Result<GenerateReport> {
    if options.count == 0 {
        bail!("generate requires --count >= 1");
    }
    if let Some(start) = &options.start_date
        && !is_iso_date(start)
    {
        bail!("--start-date must be YYYY-MM-DD, got {start:?}");
    }

    let tables = embedded_tables()?;
    let published_file = load_guides(&paths.published_path)?;
    let mut queue_file = load_guides(&paths.queue_path)?;

    let mut used: HashSet<String> = HashSet::new();
    for guide in published_file.guides.iter().chain(queue_file.guides.iter()) {
        used.insert(guide.id.clone());
        used.insert(guide.slug().to_string());
    }

    let start = match &options.start_date {
        Some(start) => parse_date(start)?,
        None => next_schedule_date(&queue_file.guides, today)?,
    };

    let mut generated = Vec::new();
    let mut skipped_existing = 0usize;
    let mut date = start;
    'outer: for dll in &tables.dlls {
        for game in &tables.games {
            if generated.len() >= options.count {
                break 'outer;
            }
            let slug = guide_slug(dll, game);
            if used.contains(&slug) {
                skipped_existing += 1;
                continue;
            }
            let guide = build_guide(
                &tables,
                dll,
                game,
                &date.to_string(),
                title_limit,
                description_limit,
            );
            used.insert(slug);
            generated.push(guide.id.clone());
            queue_file.guides.push(guide);
            date = date
                .checked_add_days(Days::new(1))
                .context("schedule date overflowed the calendar")?;
        }
    }

    let report = GenerateReport {
        requested: options.count,
        first_date: (!generated.is_empty()).then(|| start.to_string()),
        last_date: queue_file
            .guides
            .iter()
            .rev()
            .find(|guide| generated.contains(&guide.id))
            .map(|guide| guide.publish_date.clone()),
        generated,
        skipped_existing,
        queue_total: queue_file.guides.len(),
    };

    if !report.generated.is_empty() {
        save_guides(&paths.queue_path, &queue_file)?;
    }
    Ok(report)
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("invalid date: {value:?}"))
}

/// Day after the latest of today and every well-formed queue date.
fn next_schedule_date(queue: &[Guide], today: &str) -> Result<NaiveDate> {
    let mut latest = parse_date(today)?;
    for guide in queue {
        if let Ok(date) = NaiveDate::parse_from_str(&guide.publish_date, "%Y-%m-%d")
            && date > latest
        {
            latest = date;
        }
    }
    latest
        .checked_add_days(Days::new(1))
        .context("schedule date overflowed the calendar")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

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
    fn embedded_tables_parse() {
        let tables = embedded_tables().expect("tables");
        assert!(tables.games.len() >= 5);
        assert!(tables.dlls.len() >= 5);
        assert!(!tables.section_templates.is_empty());
        for template in &tables.section_templates {
            assert!(!template.variants.is_empty());
        }
    }

    #[test]
    fn variant_index_is_stable_and_tag_sensitive() {
        let first = variant_index("fix-msvcp140-dll-elden-ring", "title", 7);
        let second = variant_index("fix-msvcp140-dll-elden-ring", "title", 7);
        assert_eq!(first, second);
        assert!(first < 7);
        assert_eq!(variant_index("anything", "tag", 1), 0);
    }

    #[test]
    fn build_guide_is_deterministic_and_filled() {
        let tables = embedded_tables().expect("tables");
        let dll = &tables.dlls[0];
        let game = &tables.games[0];
        let first = build_guide(&tables, dll, game, "2025-07-01", 60, 155);
        let second = build_guide(&tables, dll, game, "2025-07-01", 60, 155);
        assert_eq!(first, second);

        assert!(first.title.contains(&dll.name) || first.title.contains(game));
        assert!(first.related_dlls.contains(&dll.name));
        assert_eq!(first.category, dll.category);
        assert!(first.meta_title.chars().count() <= 60);
        assert!(first.meta_description.chars().count() <= 155);
        assert_eq!(first.sections.len(), tables.section_templates.len());
        for section in &first.sections {
            assert!(!section.content.contains('$'), "unfilled placeholder in {}", section.heading);
            assert!(!section.heading.contains('$'));
        }
        assert!(!first.keywords.is_empty());
    }

    #[test]
    fn generate_schedules_one_per_day_and_skips_existing() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(&temp);

        let first = run_generate(
            &paths,
            "2025-06-01",
            60,
            155,
            &GenerateOptions {
                count: 3,
                start_date: None,
            },
        )
        .expect("generate");
        assert_eq!(first.generated.len(), 3);
        assert_eq!(first.first_date.as_deref(), Some("2025-06-02"));
        assert_eq!(first.last_date.as_deref(), Some("2025-06-04"));

        let queue = load_guides(&paths.queue_path).expect("queue");
        assert_eq!(queue.guides.len(), 3);
        let dates: Vec<&str> = queue
            .guides
            .iter()
            .map(|guide| guide.publish_date.as_str())
            .collect();
        assert_eq!(dates, vec!["2025-06-02", "2025-06-03", "2025-06-04"]);

        // Re-running skips everything already queued and continues the
        // daily cadence after the last scheduled date.
        let second = run_generate(
            &paths,
            "2025-06-01",
            60,
            155,
            &GenerateOptions {
                count: 2,
                start_date: None,
            },
        )
        .expect("generate again");
        assert_eq!(second.generated.len(), 2);
        assert_eq!(second.skipped_existing, 3);
        assert_eq!(second.first_date.as_deref(), Some("2025-06-05"));

        let queue = load_guides(&paths.queue_path).expect("queue");
        assert_eq!(queue.guides.len(), 5);
    }

    #[test]
    fn generate_respects_start_date_override() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(&temp);
        let report = run_generate(
            &paths,
            "2025-06-01",
            60,
            155,
            &GenerateOptions {
                count: 1,
                start_date: Some("2025-09-10".to_string()),
            },
        )
        .expect("generate");
        assert_eq!(report.first_date.as_deref(), Some("2025-09-10"));
    }

    #[test]
    fn generate_rejects_bad_inputs() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(&temp);
        assert!(
            run_generate(
                &paths,
                "2025-06-01",
                60,
                155,
                &GenerateOptions {
                    count: 0,
                    start_date: None
                }
            )
            .is_err()
        );
        assert!(
            run_generate(
                &paths,
                "2025-06-01",
                60,
                155,
                &GenerateOptions {
                    count: 1,
                    start_date: Some("next week".to_string())
                }
            )
            .is_err()
        );
    }
}
