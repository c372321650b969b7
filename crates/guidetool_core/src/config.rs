use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_GUIDE_PATH: &str = "/guides/$1";
pub const DEFAULT_TITLE_LIMIT: usize = 60;
pub const DEFAULT_DESCRIPTION_LIMIT: usize = 155;
pub const DEFAULT_INDEXNOW_ENDPOINT: &str = "https://api.indexnow.org/indexnow";

/// Default ping targets; `$1` is replaced with the URL-encoded sitemap URL.
pub const DEFAULT_PING_ENDPOINTS: &[&str] = &[
    "https://www.bing.com/ping?sitemap=$1",
    "https://webmaster.yandex.com/ping?sitemap=$1",
];

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct SiteConfig {
    #[serde(default)]
    pub site: SiteSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub seo: SeoSection,
    #[serde(default)]
    pub notify: NotifySection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct SiteSection {
    pub base_url: Option<String>,
    pub guide_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct PublishSection {
    pub utc_offset_hours: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct SeoSection {
    pub title_limit: Option<usize>,
    pub description_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct NotifySection {
    pub indexnow_key: Option<String>,
    pub indexnow_endpoint: Option<String>,
    #[serde(default)]
    pub ping_endpoints: Vec<String>,
}

impl SiteConfig {
    /// Resolve the public site base URL: env GUIDETOOL_BASE_URL > config > None.
    pub fn base_url(&self) -> Option<String> {
        if let Ok(value) = env::var("GUIDETOOL_BASE_URL") {
            let trimmed = value.trim().trim_end_matches('/').to_string();
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
        self.site
            .base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string())
    }

    pub fn guide_path(&self) -> &str {
        self.site
            .guide_path
            .as_deref()
            .unwrap_or(DEFAULT_GUIDE_PATH)
    }

    /// Fixed offset from UTC used to derive "today" for the publish queue.
    pub fn utc_offset_hours(&self) -> i32 {
        if let Ok(value) = env::var("GUIDETOOL_UTC_OFFSET_HOURS")
            && let Ok(parsed) = value.trim().parse::<i32>()
        {
            return parsed.clamp(-12, 14);
        }
        self.publish.utc_offset_hours.unwrap_or(0).clamp(-12, 14)
    }

    pub fn title_limit(&self) -> usize {
        self.seo.title_limit.unwrap_or(DEFAULT_TITLE_LIMIT)
    }

    pub fn description_limit(&self) -> usize {
        self.seo
            .description_limit
            .unwrap_or(DEFAULT_DESCRIPTION_LIMIT)
    }

    /// Resolve the IndexNow key: env GUIDETOOL_INDEXNOW_KEY > config > None.
    pub fn indexnow_key(&self) -> Option<String> {
        if let Ok(value) = env::var("GUIDETOOL_INDEXNOW_KEY") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
        self.notify.indexnow_key.clone()
    }

    pub fn indexnow_endpoint(&self) -> &str {
        self.notify
            .indexnow_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_INDEXNOW_ENDPOINT)
    }

    pub fn ping_endpoints(&self) -> Vec<String> {
        if self.notify.ping_endpoints.is_empty() {
            DEFAULT_PING_ENDPOINTS
                .iter()
                .map(ToString::to_string)
                .collect()
        } else {
            self.notify.ping_endpoints.clone()
        }
    }
}

/// Load and parse a SiteConfig from a TOML file. Returns defaults if the
/// file does not exist; unknown sections (e.g. `[paths]`) are tolerated.
pub fn load_config(config_path: &Path) -> Result<SiteConfig> {
    if !config_path.exists() {
        return Ok(SiteConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: SiteConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}
