use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

pub const PUBLISHED_FILENAME: &str = "guides.json";
pub const QUEUE_FILENAME: &str = "queue.json";
pub const CATALOG_FILENAME: &str = "dll-catalog.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    /// `data/` directory holding the JSON files the site builds from.
    pub content_dir: PathBuf,
    pub published_path: PathBuf,
    pub queue_path: PathBuf,
    pub catalog_path: PathBuf,
    pub state_dir: PathBuf,
    pub index_dir: PathBuf,
    pub db_path: PathBuf,
    pub backups_dir: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub content_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\ncontent_dir={} ({})\npublished_path={}\nqueue_path={}\ncatalog_path={}\nstate_dir={}\ndb_path={}\nbackups_dir={}\nconfig_path={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.content_dir),
            self.content_source.as_str(),
            normalize_for_display(&self.published_path),
            normalize_for_display(&self.queue_path),
            normalize_for_display(&self.catalog_path),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.db_path),
            normalize_for_display(&self.backups_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub content_dir_exists: bool,
    pub published_exists: bool,
    pub queue_exists: bool,
    pub catalog_exists: bool,
    pub state_dir_exists: bool,
    pub db_exists: bool,
    pub db_size_bytes: Option<u64>,
    pub config_exists: bool,
    pub warnings: Vec<String>,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env)
        .context("failed to resolve project root")?;

    let state_dir = project_root.join(".guidetool");

    let (content_dir, content_source) = if let Some(path) = overrides.data_dir.as_deref() {
        (
            absolutize(path, &project_root),
            ValueSource::Flag,
        )
    } else if let Some(value) = lookup_env("GUIDETOOL_DATA_DIR") {
        (
            absolutize(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else {
        (project_root.join("data"), ValueSource::Default)
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (
            absolutize(path, &project_root),
            ValueSource::Flag,
        )
    } else if let Some(value) = lookup_env("GUIDETOOL_CONFIG") {
        (
            absolutize(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else {
        (state_dir.join("config.toml"), ValueSource::Default)
    };

    let index_dir = state_dir.join("data");
    Ok(ResolvedPaths {
        published_path: content_dir.join(PUBLISHED_FILENAME),
        queue_path: content_dir.join(QUEUE_FILENAME),
        catalog_path: content_dir.join(CATALOG_FILENAME),
        db_path: index_dir.join("guidetool.db"),
        backups_dir: state_dir.join("backups"),
        project_root,
        content_dir,
        state_dir,
        index_dir,
        config_path,
        root_source,
        content_source,
        config_source,
    })
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let project_root_exists = paths.project_root.exists();
    let content_dir_exists = paths.content_dir.exists();
    let published_exists = paths.published_path.exists();
    let queue_exists = paths.queue_path.exists();
    let catalog_exists = paths.catalog_path.exists();
    let state_dir_exists = paths.state_dir.exists();
    let config_exists = paths.config_path.exists();
    let db_exists = paths.db_path.exists();
    let db_size_bytes = if db_exists {
        let metadata = fs::metadata(&paths.db_path)
            .with_context(|| format!("failed to inspect {}", paths.db_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };

    let mut warnings = Vec::new();
    if !published_exists {
        warnings.push(format!(
            "{PUBLISHED_FILENAME} is missing; run `guidetool init` before publishing"
        ));
    }
    if !queue_exists {
        warnings.push(format!(
            "{QUEUE_FILENAME} is missing; run `guidetool init` or `guidetool generate`"
        ));
    }
    if !catalog_exists {
        warnings.push(format!(
            "{CATALOG_FILENAME} is missing; `index refs` will report every relatedDlls entry"
        ));
    }
    if !state_dir_exists {
        warnings.push(".guidetool/ is missing; run `guidetool init`".to_string());
    }

    Ok(RuntimeStatus {
        project_root_exists,
        content_dir_exists,
        published_exists,
        queue_exists,
        catalog_exists,
        state_dir_exists,
        db_exists,
        db_size_bytes,
        config_exists,
        warnings,
    })
}

/// Commands that rewrite the data files refuse to run half-initialized:
/// a missing file would otherwise silently become an empty data set.
pub fn ensure_runtime_ready(paths: &ResolvedPaths, status: &RuntimeStatus) -> Result<()> {
    if !status.published_exists || !status.queue_exists {
        bail!(
            "Data layout is not initialized.\nMissing required files:\n  - {} ({})\n  - {} ({})\nRun: guidetool init --project-root {}",
            normalize_for_display(&paths.published_path),
            if status.published_exists { "ok" } else { "missing" },
            normalize_for_display(&paths.queue_path),
            if status.queue_exists { "ok" } else { "missing" },
            normalize_for_display(&paths.project_root)
        );
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub materialize_config: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            materialize_config: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub created_data_files: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    let required_dirs = [
        paths.content_dir.clone(),
        paths.state_dir.clone(),
        paths.index_dir.clone(),
        paths.backups_dir.clone(),
    ];
    for dir in &required_dirs {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let mut created_data_files = Vec::new();
    for path in [
        &paths.published_path,
        &paths.queue_path,
        &paths.catalog_path,
    ] {
        if !path.exists() {
            fs::write(path, "[]\n")
                .with_context(|| format!("failed to write {}", path.display()))?;
            created_data_files.push(path.clone());
        }
    }

    let wrote_config = if options.materialize_config {
        write_text_file(
            &paths.config_path,
            &render_materialized_config(paths),
            options.force,
        )?
    } else {
        false
    };

    Ok(InitReport {
        created_dirs,
        created_data_files,
        wrote_config,
    })
}

pub fn render_materialized_config(paths: &ResolvedPaths) -> String {
    let content_dir = normalize_for_display(&paths.content_dir);
    format!(
        "# guidetool runtime configuration (materialized by `guidetool init`)\n\n[site]\n# base_url = \"https://fixdllerrors.example\"\nguide_path = \"/guides/$1\"\n\n[publish]\n# Fixed offset from UTC used to derive \"today\" for the publish queue.\nutc_offset_hours = 0\n\n[seo]\ntitle_limit = 60\ndescription_limit = 155\n\n[notify]\n# indexnow_key = \"<32-char key served at /<key>.txt>\"\n# indexnow_endpoint = \"https://api.indexnow.org/indexnow\"\n# ping_endpoints = [\"https://www.bing.com/ping?sitemap=$1\"]\n\n[paths]\ncontent_dir = \"{content_dir}\"\n",
    )
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> Result<(PathBuf, ValueSource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return Ok((absolutize(path, &context.cwd), ValueSource::Flag));
    }

    if let Some(value) = lookup_env("GUIDETOOL_PROJECT_ROOT") {
        return Ok((
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        ));
    }

    let root = detect_project_root_heuristic(&context.cwd, context.executable_dir.as_deref());
    Ok((root, ValueSource::Heuristic))
}

fn detect_project_root_heuristic(cwd: &Path, executable_dir: Option<&Path>) -> PathBuf {
    let mut seen = HashSet::new();
    for candidate in candidate_roots(cwd, executable_dir) {
        let key = normalize_for_display(&candidate);
        if !seen.insert(key) {
            continue;
        }
        if candidate.join("data").join(PUBLISHED_FILENAME).exists()
            || candidate.join(".guidetool").exists()
        {
            return candidate;
        }
    }
    cwd.to_path_buf()
}

fn candidate_roots(cwd: &Path, executable_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut out = ancestors(cwd);
    if let Some(exe_dir) = executable_dir {
        out.extend(ancestors(exe_dir));
    }
    out
}

fn ancestors(path: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut cursor = Some(path);
    while let Some(current) = cursor {
        out.push(current.to_path_buf());
        cursor = current.parent();
    }
    out
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::tempdir;

    use super::{
        InitOptions, PathOverrides, ResolutionContext, ValueSource, ensure_runtime_ready,
        init_layout, inspect_runtime, resolve_paths_with_lookup,
    };

    #[test]
    fn resolve_paths_prefers_flag_over_env() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().join("cwd");
        let from_flag = temp.path().join("flag-root");
        fs::create_dir_all(&cwd).expect("create cwd");

        let overrides = PathOverrides {
            project_root: Some(from_flag.clone()),
            ..PathOverrides::default()
        };
        let context = ResolutionContext {
            cwd: cwd.clone(),
            executable_dir: None,
        };
        let env = HashMap::from([(
            "GUIDETOOL_PROJECT_ROOT".to_string(),
            temp.path().join("env-root").to_string_lossy().to_string(),
        )]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.project_root, from_flag);
        assert_eq!(resolved.root_source, ValueSource::Flag);
        assert_eq!(resolved.content_dir, from_flag.join("data"));
        assert_eq!(resolved.published_path, from_flag.join("data/guides.json"));
    }

    #[test]
    fn heuristic_walks_up_to_data_dir() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("site");
        let nested = root.join("scripts").join("deep");
        fs::create_dir_all(&nested).expect("create nested");
        fs::create_dir_all(root.join("data")).expect("create data");
        fs::write(root.join("data/guides.json"), "[]").expect("seed published");

        let context = ResolutionContext {
            cwd: nested,
            executable_dir: None,
        };
        let resolved =
            resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
                .expect("resolve paths");
        assert_eq!(resolved.project_root, root);
        assert_eq!(resolved.root_source, ValueSource::Heuristic);
    }

    #[test]
    fn init_layout_creates_dirs_files_and_config() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        fs::create_dir_all(&root).expect("create root");

        let context = ResolutionContext {
            cwd: root.clone(),
            executable_dir: None,
        };
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let paths = resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve");

        let report = init_layout(&paths, &InitOptions::default()).expect("init");
        assert!(!report.created_dirs.is_empty());
        assert_eq!(report.created_data_files.len(), 3);
        assert!(report.wrote_config);
        assert!(paths.published_path.exists());
        assert!(paths.queue_path.exists());
        assert!(paths.catalog_path.exists());
        assert!(paths.backups_dir.exists());

        // Second init is a no-op for existing files.
        let second = init_layout(&paths, &InitOptions::default()).expect("re-init");
        assert!(second.created_data_files.is_empty());
        assert!(!second.wrote_config);
    }

    #[test]
    fn readiness_fails_without_init() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        fs::create_dir_all(&root).expect("create root");
        let context = ResolutionContext {
            cwd: root.clone(),
            executable_dir: None,
        };
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let paths = resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve");
        let status = inspect_runtime(&paths).expect("inspect");
        assert!(!status.warnings.is_empty());
        let err = ensure_runtime_ready(&paths, &status).expect_err("must fail");
        assert!(err.to_string().contains("Data layout is not initialized"));
    }
}
