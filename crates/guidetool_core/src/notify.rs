use std::env;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::SiteConfig;
use crate::model::Guide;
use crate::runtime::ResolvedPaths;
use crate::store::load_guides;

const DEFAULT_USER_AGENT: &str = "guidetool/0.2 (+https://github.com/fixdll/guidetool)";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RETRIES: usize = 2;
const DEFAULT_RETRY_DELAY_MS: u64 = 350;
const DEFAULT_URL_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct NotifyOptions {
    /// Most-recently-published URLs to submit; IndexNow caps batches.
    pub limit: usize,
    pub dry_run: bool,
}

impl Default for NotifyOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_URL_LIMIT,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointOutcome {
    pub endpoint: String,
    pub ok: bool,
    pub status: Option<u16>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotifyReport {
    pub urls: Vec<String>,
    pub indexnow_payload: Option<Value>,
    pub outcomes: Vec<EndpointOutcome>,
    pub dry_run: bool,
}

/// Public URL for one guide: base_url + guide_path with `$1` replaced.
pub fn guide_url(base_url: &str, guide_path: &str, slug: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = guide_path.replace("$1", slug);
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// IndexNow submission body, per the protocol: host, key, urlList.
pub fn indexnow_payload(host: &str, key: &str, urls: &[String]) -> Value {
    json!({
        "host": host,
        "key": key,
        "urlList": urls,
    })
}

/// The most recently published guide URLs, newest publishDate first.
pub fn recent_urls(guides: &[Guide], base_url: &str, guide_path: &str, limit: usize) -> Vec<String> {
    let mut sorted: Vec<&Guide> = guides.iter().collect();
    sorted.sort_by(|left, right| right.publish_date.cmp(&left.publish_date));
    sorted
        .iter()
        .take(limit)
        .map(|guide| guide_url(base_url, guide_path, guide.slug()))
        .collect()
}

/// Submit recently published URLs to IndexNow and the configured ping
/// endpoints. Endpoint failures land in the report, never in an `Err`:
/// notification is best-effort and must not fail the publishing run.
pub fn run_notify(
    paths: &ResolvedPaths,
    config: &SiteConfig,
    options: &NotifyOptions,
) -> Result<NotifyReport> {
    let Some(base_url) = config.base_url() else {
        bail!(
            "notify requires site.base_url in {} (or GUIDETOOL_BASE_URL)",
            crate::runtime::normalize_for_display(&paths.config_path)
        );
    };

    let published = load_guides(&paths.published_path)?;
    let urls = recent_urls(
        &published.guides,
        &base_url,
        config.guide_path(),
        options.limit.max(1),
    );
    if urls.is_empty() {
        return Ok(NotifyReport {
            urls,
            indexnow_payload: None,
            outcomes: Vec::new(),
            dry_run: options.dry_run,
        });
    }

    let host = Url::parse(&base_url)
        .ok()
        .and_then(|url| url.host_str().map(ToString::to_string))
        .with_context(|| format!("site.base_url is not a valid URL: {base_url}"))?;

    let payload = config
        .indexnow_key()
        .map(|key| indexnow_payload(&host, &key, &urls));
    let sitemap_url = format!("{base_url}/sitemap.xml");

    let mut report = NotifyReport {
        urls: urls.clone(),
        indexnow_payload: payload.clone(),
        outcomes: Vec::new(),
        dry_run: options.dry_run,
    };
    if options.dry_run {
        return Ok(report);
    }

    let client = notify_client()?;
    if let Some(payload) = &payload {
        report.outcomes.push(client.post_json(
            config.indexnow_endpoint(),
            payload,
        ));
    }
    for endpoint in config.ping_endpoints() {
        let target = ping_target(&endpoint, &sitemap_url);
        report.outcomes.push(client.get(&target));
    }
    Ok(report)
}

/// Fill a ping endpoint template: `$1` becomes the URL-encoded sitemap
/// URL; templates without `$1` get it appended as-is (legacy form).
pub fn ping_target(endpoint: &str, sitemap_url: &str) -> String {
    if endpoint.contains("$1") {
        endpoint.replace("$1", &urlencode(sitemap_url))
    } else {
        format!("{endpoint}{sitemap_url}")
    }
}

fn urlencode(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                output.push(byte as char);
            }
            _ => output.push_str(&format!("%{byte:02X}")),
        }
    }
    output
}

struct NotifyClient {
    client: Client,
    user_agent: String,
    retries: usize,
    retry_delay_ms: u64,
}

impl NotifyClient {
    fn post_json(&self, endpoint: &str, payload: &Value) -> EndpointOutcome {
        self.attempt(endpoint, |client, user_agent| {
            client
                .post(endpoint)
                .header("User-Agent", user_agent)
                .json(payload)
                .send()
        })
    }

    fn get(&self, endpoint: &str) -> EndpointOutcome {
        self.attempt(endpoint, |client, user_agent| {
            client.get(endpoint).header("User-Agent", user_agent).send()
        })
    }

    fn attempt<F>(&self, endpoint: &str, send: F) -> EndpointOutcome
    where
        F: Fn(&Client, &str) -> reqwest::Result<reqwest::blocking::Response>,
    {
        let mut last_status = None;
        let mut last_error = None;
        for attempt in 0..=self.retries {
            match send(&self.client, &self.user_agent) {
                Ok(response) => {
                    let status = response.status();
                    last_status = Some(status.as_u16());
                    if status.is_success() {
                        return EndpointOutcome {
                            endpoint: endpoint.to_string(),
                            ok: true,
                            status: last_status,
                            error: None,
                        };
                    }
                    last_error = Some(format!("HTTP {status}"));
                }
                Err(error) => {
                    last_error = Some(error.to_string());
                }
            }
            if attempt < self.retries {
                sleep(Duration::from_millis(
                    self.retry_delay_ms.saturating_mul(attempt as u64 + 1),
                ));
            }
        }
        EndpointOutcome {
            endpoint: endpoint.to_string(),
            ok: false,
            status: last_status,
            error: last_error,
        }
    }
}

fn notify_client() -> Result<NotifyClient> {
    let timeout_ms = env::var("GUIDETOOL_HTTP_TIMEOUT_MS")
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_TIMEOUT_MS);
    let retries = env::var("GUIDETOOL_HTTP_RETRIES")
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_RETRIES);
    let retry_delay_ms = env::var("GUIDETOOL_HTTP_RETRY_DELAY_MS")
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_DELAY_MS);
    let user_agent =
        env::var("GUIDETOOL_USER_AGENT").unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string());
    let client = Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .context("failed to build notification HTTP client")?;
    Ok(NotifyClient {
        client,
        user_agent,
        retries,
        retry_delay_ms,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::model::Section;

    fn guide(id: &str, publish_date: &str) -> Guide {
        Guide {
            id: id.to_string(),
            slug: None,
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
    fn guide_url_joins_cleanly() {
        assert_eq!(
            guide_url("https://fixdll.example/", "/guides/$1", "fix-msvcp140"),
            "https://fixdll.example/guides/fix-msvcp140"
        );
        assert_eq!(
            guide_url("https://fixdll.example", "guides/$1", "a"),
            "https://fixdll.example/guides/a"
        );
    }

    #[test]
    fn recent_urls_sorts_newest_first_and_limits() {
        let guides = vec![
            guide("old", "2025-01-01"),
            guide("newest", "2025-06-01"),
            guide("middle", "2025-03-01"),
        ];
        let urls = recent_urls(&guides, "https://fixdll.example", "/guides/$1", 2);
        assert_eq!(
            urls,
            vec![
                "https://fixdll.example/guides/newest".to_string(),
                "https://fixdll.example/guides/middle".to_string(),
            ]
        );
    }

    #[test]
    fn indexnow_payload_shape() {
        let urls = vec!["https://fixdll.example/guides/a".to_string()];
        let payload = indexnow_payload("fixdll.example", "key123", &urls);
        assert_eq!(payload["host"], "fixdll.example");
        assert_eq!(payload["key"], "key123");
        assert_eq!(payload["urlList"][0], "https://fixdll.example/guides/a");
    }

    #[test]
    fn ping_target_encodes_sitemap_url() {
        let target = ping_target(
            "https://www.bing.com/ping?sitemap=$1",
            "https://fixdll.example/sitemap.xml",
        );
        assert_eq!(
            target,
            "https://www.bing.com/ping?sitemap=https%3A%2F%2Ffixdll.example%2Fsitemap.xml"
        );

        let appended = ping_target(
            "https://ping.example/submit?url=",
            "https://fixdll.example/sitemap.xml",
        );
        assert!(appended.ends_with("https://fixdll.example/sitemap.xml"));
    }
}
