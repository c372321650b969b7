use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use guidetool_core::audit::{fix_guides as audit_fix, scan_guides};
use guidetool_core::backup::{DEFAULT_RETAIN, run_backup};
use guidetool_core::config::{SiteConfig, load_config};
use guidetool_core::dedupe::run_dedupe;
use guidetool_core::generate::{GenerateOptions, run_generate};
use guidetool_core::index::{
    StoredIndexStats, load_stored_index_stats, query_duplicates, query_missing_refs, rebuild_index,
};
use guidetool_core::notify::{NotifyOptions, run_notify};
use guidetool_core::publish::{PublishOptions, run_publish, today_string};
use guidetool_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, ensure_runtime_ready,
    init_layout, inspect_runtime, resolve_paths,
};
use guidetool_core::seo::{check_guides, fix_guides as seo_fix};
use guidetool_core::store::{load_guides, save_guides};

#[derive(Debug, Parser)]
#[command(
    name = "guidetool",
    version,
    about = "Content pipeline CLI for the DLL-error guide site (generate, audit, schedule, publish)"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    Status,
    Publish(PublishArgs),
    Generate(GenerateArgs),
    Audit(AuditArgs),
    Seo(SeoArgs),
    Dedupe(DedupeArgs),
    Index(IndexArgs),
    Notify(NotifyArgs),
    Backup(BackupArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config.toml")]
    force: bool,
    #[arg(long, help = "Skip writing .guidetool/config.toml")]
    no_config: bool,
}

#[derive(Debug, Args)]
struct PublishArgs {
    #[arg(long, value_name = "YYYY-MM-DD", help = "Override today's date")]
    today: Option<String>,
    #[arg(long, help = "Report the partition without writing")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(short = 'n', long, default_value_t = 7, help = "Guides to generate")]
    count: usize,
    #[arg(long, value_name = "YYYY-MM-DD", help = "First publish date for the batch")]
    start_date: Option<String>,
}

#[derive(Debug, Args)]
struct AuditArgs {
    #[command(subcommand)]
    command: AuditSubcommand,
}

#[derive(Debug, Subcommand)]
enum AuditSubcommand {
    Scan,
    Fix(AuditFixArgs),
}

#[derive(Debug, Args)]
struct AuditFixArgs {
    #[arg(long, help = "Print unified diffs of rewritten fields")]
    diff: bool,
    #[arg(long, help = "Also fix the queue, not only published guides")]
    include_queue: bool,
}

#[derive(Debug, Args)]
struct SeoArgs {
    #[command(subcommand)]
    command: SeoSubcommand,
}

#[derive(Debug, Subcommand)]
enum SeoSubcommand {
    Check,
    Fix,
}

#[derive(Debug, Args)]
struct DedupeArgs {
    #[arg(long, help = "Rewrite the data files instead of only reporting")]
    apply: bool,
}

#[derive(Debug, Args)]
struct IndexArgs {
    #[command(subcommand)]
    command: IndexSubcommand,
}

#[derive(Debug, Subcommand)]
enum IndexSubcommand {
    Rebuild,
    Stats,
    Duplicates,
    Refs,
}

#[derive(Debug, Args)]
struct NotifyArgs {
    #[arg(long, default_value_t = 10, help = "Recently published URLs to submit")]
    limit: usize,
    #[arg(long, help = "Print URLs and payload without network calls")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct BackupArgs {
    #[arg(long, default_value_t = DEFAULT_RETAIN, help = "Snapshots to keep")]
    retain: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Publish(args)) => run_publish_command(&runtime, args),
        Some(Commands::Generate(args)) => run_generate_command(&runtime, args),
        Some(Commands::Audit(AuditArgs { command })) => match command {
            AuditSubcommand::Scan => run_audit_scan(&runtime),
            AuditSubcommand::Fix(args) => run_audit_fix(&runtime, args),
        },
        Some(Commands::Seo(SeoArgs { command })) => match command {
            SeoSubcommand::Check => run_seo_check(&runtime),
            SeoSubcommand::Fix => run_seo_fix(&runtime),
        },
        Some(Commands::Dedupe(args)) => run_dedupe_command(&runtime, args),
        Some(Commands::Index(IndexArgs { command })) => match command {
            IndexSubcommand::Rebuild => run_index_rebuild(&runtime),
            IndexSubcommand::Stats => run_index_stats(&runtime),
            IndexSubcommand::Duplicates => run_index_duplicates(&runtime),
            IndexSubcommand::Refs => run_index_refs(&runtime),
        },
        Some(Commands::Notify(args)) => run_notify_command(&runtime, args),
        Some(Commands::Backup(args)) => run_backup_command(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;

    println!("Initialized guidetool data layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("content_dir: {}", normalize_path(&paths.content_dir));
    println!("published_path: {}", normalize_path(&paths.published_path));
    println!("queue_path: {}", normalize_path(&paths.queue_path));
    println!("catalog_path: {}", normalize_path(&paths.catalog_path));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("created_data_files: {}", report.created_data_files.len());
    println!("wrote_config: {}", report.wrote_config);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    println!("runtime status");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("content_dir_exists: {}", format_flag(status.content_dir_exists));
    println!("published_exists: {}", format_flag(status.published_exists));
    println!("queue_exists: {}", format_flag(status.queue_exists));
    println!("catalog_exists: {}", format_flag(status.catalog_exists));
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );

    if status.published_exists {
        let published = load_guides(&paths.published_path)?;
        println!("published.count: {}", published.guides.len());
    }
    if status.queue_exists {
        let queue = load_guides(&paths.queue_path)?;
        println!("queue.count: {}", queue.guides.len());
        let config = load_config(&paths.config_path)?;
        let today = today_string(config.utc_offset_hours());
        let due = queue
            .guides
            .iter()
            .filter(|guide| guide.publish_date.as_str() <= today.as_str())
            .count();
        println!("queue.due_today: {due}");
    }
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_publish_command(runtime: &RuntimeOptions, args: PublishArgs) -> Result<()> {
    let (paths, config) = ready_runtime(runtime)?;
    let report = run_publish(
        &paths,
        config.utc_offset_hours(),
        &PublishOptions {
            today: args.today,
            dry_run: args.dry_run,
        },
    )?;

    println!("publish from queue");
    println!("today: {}", report.today);
    println!("dry_run: {}", report.dry_run);
    println!("due: {}", report.due);
    println!("published: {}", report.published);
    println!("remaining_in_queue: {}", report.remaining_in_queue);
    println!("total_published: {}", report.total_published);
    if report.skipped_duplicates.is_empty() {
        println!("skipped_duplicates: <none>");
    } else {
        for id in &report.skipped_duplicates {
            println!("skipped_duplicates.id: {id}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_generate_command(runtime: &RuntimeOptions, args: GenerateArgs) -> Result<()> {
    let (paths, config) = ready_runtime(runtime)?;
    let today = today_string(config.utc_offset_hours());
    let report = run_generate(
        &paths,
        &today,
        config.title_limit(),
        config.description_limit(),
        &GenerateOptions {
            count: args.count,
            start_date: args.start_date,
        },
    )?;

    println!("generate guides");
    println!("requested: {}", report.requested);
    println!("generated: {}", report.generated.len());
    println!("skipped_existing: {}", report.skipped_existing);
    println!("first_date: {}", report.first_date.as_deref().unwrap_or("<none>"));
    println!("last_date: {}", report.last_date.as_deref().unwrap_or("<none>"));
    println!("queue_total: {}", report.queue_total);
    for id in &report.generated {
        println!("generated.id: {id}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_audit_scan(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, _) = ready_runtime(runtime)?;
    let published = load_guides(&paths.published_path)?;
    let queue = load_guides(&paths.queue_path)?;
    let mut guides = published.guides;
    guides.extend(queue.guides);
    let report = scan_guides(&guides);

    println!("audit scan");
    println!("scanned: {}", report.scanned);
    println!("phrase_hits: {}", report.phrase_hits.len());
    for hit in &report.phrase_hits {
        println!(
            "phrase_hits.item: {} {} {:?} x{}",
            hit.guide_id, hit.field, hit.phrase, hit.count
        );
    }
    println!("thin_guides: {}", report.thin_guides.len());
    for thin in &report.thin_guides {
        println!("thin_guides.item: {} ({} words)", thin.guide_id, thin.word_count);
    }
    println!("duplicate_openings: {}", report.duplicate_openings.len());
    for group in &report.duplicate_openings {
        println!(
            "duplicate_openings.item: {:?} used by {}",
            group.opening,
            group.guide_ids.join(", ")
        );
    }
    println!("clean: {}", format_flag(report.is_clean()));
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_audit_fix(runtime: &RuntimeOptions, args: AuditFixArgs) -> Result<()> {
    let (paths, config) = ready_runtime(runtime)?;
    let today = today_string(config.utc_offset_hours());

    println!("audit fix");
    let mut published = load_guides(&paths.published_path)?;
    let report = audit_fix(&mut published.guides, &today, args.diff);
    if report.guides_changed > 0 {
        save_guides(&paths.published_path, &published)?;
    }
    println!("published.scanned: {}", report.scanned);
    println!("published.guides_changed: {}", report.guides_changed);
    println!("published.phrase_fixes: {}", report.phrase_fixes);
    println!("published.opening_rewrites: {}", report.opening_rewrites);
    print_field_diffs(&report.diffs);

    if args.include_queue {
        let mut queue = load_guides(&paths.queue_path)?;
        let report = audit_fix(&mut queue.guides, &today, args.diff);
        if report.guides_changed > 0 {
            save_guides(&paths.queue_path, &queue)?;
        }
        println!("queue.scanned: {}", report.scanned);
        println!("queue.guides_changed: {}", report.guides_changed);
        println!("queue.phrase_fixes: {}", report.phrase_fixes);
        println!("queue.opening_rewrites: {}", report.opening_rewrites);
        print_field_diffs(&report.diffs);
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_seo_check(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, config) = ready_runtime(runtime)?;
    let published = load_guides(&paths.published_path)?;
    let queue = load_guides(&paths.queue_path)?;
    let mut guides = published.guides;
    guides.extend(queue.guides);
    let report = check_guides(&guides, config.title_limit(), config.description_limit());

    println!("seo check");
    println!("title_limit: {}", config.title_limit());
    println!("description_limit: {}", config.description_limit());
    println!("checked: {}", report.checked);
    println!("issues: {}", report.issues.len());
    for issue in &report.issues {
        println!(
            "issues.item: {} {} length={} limit={}",
            issue.guide_id, issue.field, issue.length, issue.limit
        );
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_seo_fix(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, config) = ready_runtime(runtime)?;

    println!("seo fix");
    println!("title_limit: {}", config.title_limit());
    println!("description_limit: {}", config.description_limit());
    for (label, path) in [
        ("published", paths.published_path.clone()),
        ("queue", paths.queue_path.clone()),
    ] {
        let mut file = load_guides(&path)?;
        let report = seo_fix(
            &mut file.guides,
            config.title_limit(),
            config.description_limit(),
        );
        let changed = report.truncated_titles
            + report.truncated_descriptions
            + report.derived_titles
            + report.derived_descriptions;
        if changed > 0 {
            save_guides(&path, &file)?;
        }
        println!("{label}.checked: {}", report.checked);
        println!("{label}.truncated_titles: {}", report.truncated_titles);
        println!(
            "{label}.truncated_descriptions: {}",
            report.truncated_descriptions
        );
        println!("{label}.derived_titles: {}", report.derived_titles);
        println!(
            "{label}.derived_descriptions: {}",
            report.derived_descriptions
        );
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_dedupe_command(runtime: &RuntimeOptions, args: DedupeArgs) -> Result<()> {
    let (paths, _) = ready_runtime(runtime)?;
    let report = run_dedupe(&paths, args.apply)?;

    println!("dedupe");
    println!("applied: {}", report.applied);
    println!("duplicates_found: {}", report.duplicates_found());
    println!("published_total: {}", report.published_total);
    println!("queue_total: {}", report.queue_total);
    for removed in &report.removed_from_published {
        println!("removed_from_published.item: {} ({})", removed.id, removed.reason);
    }
    for removed in &report.removed_from_queue {
        println!("removed_from_queue.item: {} ({})", removed.id, removed.reason);
    }
    if !report.applied && report.duplicates_found() > 0 {
        println!("hint: re-run with --apply to rewrite the data files");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_index_rebuild(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, _) = ready_runtime(runtime)?;
    let report = rebuild_index(&paths)?;

    println!("index rebuild");
    println!("db_path: {}", report.db_path);
    println!("indexed_guides: {}", report.indexed_guides);
    println!("indexed_keywords: {}", report.indexed_keywords);
    println!("indexed_dll_refs: {}", report.indexed_dll_refs);
    println!("catalog_dlls: {}", report.catalog_dlls);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_index_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    println!("index stats");
    println!("db_path: {}", normalize_path(&paths.db_path));
    match load_stored_index_stats(&paths)? {
        Some(stats) => print_stored_index_stats(&stats),
        None => println!("index.storage: <not built> (run `guidetool index rebuild`)"),
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_index_duplicates(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    println!("index duplicates");
    match query_duplicates(&paths)? {
        Some(duplicates) => {
            println!("duplicates.count: {}", duplicates.len());
            for entry in duplicates {
                println!("duplicates.{}: {} x{}", entry.kind, entry.key, entry.count);
            }
        }
        None => println!("index.storage: <not built> (run `guidetool index rebuild`)"),
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_index_refs(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    println!("index refs");
    match query_missing_refs(&paths)? {
        Some(missing) => {
            println!("missing_refs.count: {}", missing.len());
            for entry in missing {
                println!(
                    "missing_refs.item: {} referenced by {}",
                    entry.dll_name,
                    entry.guide_ids.join(", ")
                );
            }
        }
        None => println!("index.storage: <not built> (run `guidetool index rebuild`)"),
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_notify_command(runtime: &RuntimeOptions, args: NotifyArgs) -> Result<()> {
    let (paths, config) = ready_runtime(runtime)?;
    let report = run_notify(
        &paths,
        &config,
        &NotifyOptions {
            limit: args.limit,
            dry_run: args.dry_run,
        },
    )?;

    println!("notify search engines");
    println!("dry_run: {}", report.dry_run);
    println!("urls.count: {}", report.urls.len());
    for url in &report.urls {
        println!("urls.item: {url}");
    }
    match &report.indexnow_payload {
        Some(payload) => {
            println!("indexnow.payload: {}", serde_json::to_string(payload)?);
        }
        None => println!("indexnow.payload: <skipped: no indexnow_key configured>"),
    }
    for outcome in &report.outcomes {
        match (&outcome.status, &outcome.error) {
            (Some(status), None) => {
                println!(
                    "outcomes.item: {} {} HTTP {status}",
                    format_flag(outcome.ok),
                    outcome.endpoint
                );
            }
            (_, Some(error)) => {
                println!(
                    "outcomes.item: {} {} ({error})",
                    format_flag(outcome.ok),
                    outcome.endpoint
                );
            }
            _ => println!("outcomes.item: {} {}", format_flag(outcome.ok), outcome.endpoint),
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_backup_command(runtime: &RuntimeOptions, args: BackupArgs) -> Result<()> {
    let (paths, config) = ready_runtime(runtime)?;
    let today = today_string(config.utc_offset_hours());
    let report = run_backup(&paths, &today, args.retain)?;

    println!("backup data files");
    println!("archive_path: {}", report.archive_path);
    println!("entries: {}", report.entries.join(", "));
    if report.pruned.is_empty() {
        println!("pruned: <none>");
    } else {
        for name in &report.pruned {
            println!("pruned.item: {name}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn print_stored_index_stats(stats: &StoredIndexStats) {
    println!("index.indexed_guides: {}", stats.indexed_guides);
    println!("index.published: {}", stats.published);
    println!("index.queued: {}", stats.queued);
    println!("index.catalog_dlls: {}", stats.catalog_dlls);
    if stats.by_category.is_empty() {
        println!("index.by_category: <empty>");
    } else {
        for (category, count) in &stats.by_category {
            println!("index.category.{category}: {count}");
        }
    }
}

fn print_field_diffs(diffs: &[guidetool_core::audit::FieldDiff]) {
    for diff in diffs {
        println!("diff: {} {}", diff.guide_id, diff.field);
        for line in diff.diff.lines() {
            println!("  {line}");
        }
    }
}

fn ready_runtime(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, SiteConfig)> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    ensure_runtime_ready(&paths, &status)?;
    let config = load_config(&paths.config_path)?;
    Ok((paths, config))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
