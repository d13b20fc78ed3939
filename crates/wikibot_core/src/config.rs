use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::batch::MAX_BATCH_SIZE;
use crate::session::Credentials;
use crate::throttle::{DEFAULT_PER_BATCH_DELAY_MS, DEFAULT_PER_EDIT_DELAY_MS, ThrottleConfig};
use crate::transport::MediaWikiClientConfig;

pub const DEFAULT_CONFIG_FILENAME: &str = "wikibot.toml";
pub const DEFAULT_USER_AGENT: &str = "wikibot/0.1";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_READ_DELAY_MS: u64 = 300;
pub const DEFAULT_USERNAME_ENV: &str = "WIKI_BOT_USER";
pub const DEFAULT_PASSWORD_ENV: &str = "WIKI_BOT_PASS";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BotConfig {
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub throttle: ThrottleSection,
    #[serde(default)]
    pub sites: BTreeMap<String, SiteSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HttpSection {
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub read_delay_ms: Option<u64>,
    pub retries: Option<usize>,
    pub write_retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ThrottleSection {
    pub per_edit_delay_ms: Option<u64>,
    pub per_batch_delay_ms: Option<u64>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SiteSection {
    pub api_url: String,
    pub username_env: Option<String>,
    pub password_env: Option<String>,
    #[serde(default)]
    pub cookies: Vec<CookieSource>,
}

/// Cookie whose value is read from an environment variable at startup.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CookieSource {
    pub name: String,
    pub env: String,
}

/// Everything needed to open a session against one wiki.
#[derive(Debug, Clone)]
pub struct ResolvedSite {
    pub name: String,
    pub api_url: String,
    pub credentials: Credentials,
    pub cookies: Vec<(String, String)>,
}

impl BotConfig {
    /// Resolve user agent: env WIKIBOT_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        self.user_agent_with_lookup(&env_lookup)
    }

    fn user_agent_with_lookup(&self, lookup: &impl Fn(&str) -> Option<String>) -> String {
        lookup("WIKIBOT_USER_AGENT")
            .or_else(|| self.http.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn throttle_config(&self) -> Result<ThrottleConfig> {
        self.throttle_config_with_lookup(&env_lookup)
    }

    fn throttle_config_with_lookup(
        &self,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<ThrottleConfig> {
        let per_edit_delay_ms = match lookup("WIKIBOT_PER_EDIT_DELAY_MS") {
            Some(value) => parse_millis("WIKIBOT_PER_EDIT_DELAY_MS", &value)?,
            None => self
                .throttle
                .per_edit_delay_ms
                .unwrap_or(DEFAULT_PER_EDIT_DELAY_MS),
        };
        let per_batch_delay_ms = match lookup("WIKIBOT_PER_BATCH_DELAY_MS") {
            Some(value) => parse_millis("WIKIBOT_PER_BATCH_DELAY_MS", &value)?,
            None => self
                .throttle
                .per_batch_delay_ms
                .unwrap_or(DEFAULT_PER_BATCH_DELAY_MS),
        };
        Ok(ThrottleConfig {
            per_edit_delay_ms,
            per_batch_delay_ms,
        })
    }

    /// Configured batch size, clamped to the server's multi-value limit.
    pub fn batch_size(&self) -> usize {
        self.throttle
            .batch_size
            .unwrap_or(MAX_BATCH_SIZE)
            .clamp(1, MAX_BATCH_SIZE)
    }

    pub fn client_config(&self, site: &ResolvedSite) -> MediaWikiClientConfig {
        let mut config = MediaWikiClientConfig::new(site.api_url.clone());
        config.user_agent = self.user_agent();
        if let Some(timeout_ms) = self.http.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(read_delay_ms) = self.http.read_delay_ms {
            config.read_delay_ms = read_delay_ms;
        }
        if let Some(retries) = self.http.retries {
            config.max_retries = retries;
        }
        if let Some(write_retries) = self.http.write_retries {
            config.max_write_retries = write_retries;
        }
        if let Some(retry_delay_ms) = self.http.retry_delay_ms {
            config.retry_delay_ms = retry_delay_ms;
        }
        config.cookies = site.cookies.clone();
        config
    }

    /// Pick the target wiki and read its secrets from the environment.
    ///
    /// Without a name, a lone configured site is used; `WIKIBOT_API_URL`
    /// overrides the chosen site's endpoint, or stands in for a site when
    /// none is configured.
    pub fn resolve_site(&self, name: Option<&str>) -> Result<ResolvedSite> {
        self.resolve_site_with_lookup(name, &env_lookup)
    }

    fn resolve_site_with_lookup(
        &self,
        name: Option<&str>,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<ResolvedSite> {
        let api_override = lookup("WIKIBOT_API_URL");
        let (site_name, section) = match name {
            Some(name) => match self.sites.get(name) {
                Some(section) => (name.to_string(), Some(section)),
                None => bail!(
                    "unknown site `{name}`; configured sites: {}",
                    self.site_names()
                ),
            },
            None if self.sites.len() == 1 => match self.sites.iter().next() {
                Some((name, section)) => (name.clone(), Some(section)),
                None => bail!("no site configured"),
            },
            None if api_override.is_some() => ("default".to_string(), None),
            None if self.sites.is_empty() => {
                bail!("no site configured; set WIKIBOT_API_URL or add a [sites.<name>] section")
            }
            None => bail!(
                "several sites configured, pick one with --site: {}",
                self.site_names()
            ),
        };

        let api_url = match (api_override, section) {
            (Some(url), _) => url,
            (None, Some(section)) => section.api_url.trim().to_string(),
            (None, None) => bail!("site `{site_name}` has no api_url"),
        };
        if api_url.is_empty() {
            bail!("site `{site_name}` has an empty api_url");
        }

        let username_env = section
            .and_then(|section| section.username_env.as_deref())
            .unwrap_or(DEFAULT_USERNAME_ENV);
        let password_env = section
            .and_then(|section| section.password_env.as_deref())
            .unwrap_or(DEFAULT_PASSWORD_ENV);
        let credentials = Credentials {
            username: required_var(lookup, username_env, &site_name)?,
            password: required_var(lookup, password_env, &site_name)?,
        };

        let mut cookies = Vec::new();
        for cookie in section.map(|section| section.cookies.as_slice()).unwrap_or_default() {
            match lookup(&cookie.env) {
                Some(value) => cookies.push((cookie.name.clone(), value)),
                None => warn!(
                    site = %site_name,
                    cookie = %cookie.name,
                    env = %cookie.env,
                    "cookie variable not set; skipping"
                ),
            }
        }

        Ok(ResolvedSite {
            name: site_name,
            api_url,
            credentials,
            cookies,
        })
    }

    fn site_names(&self) -> String {
        if self.sites.is_empty() {
            return "(none)".to_string();
        }
        self.sites.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Load and parse a BotConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<BotConfig> {
    if !config_path.exists() {
        return Ok(BotConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: BotConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Derive wiki base URL from an API URL by stripping `/api.php` or `/w/api.php`.
pub fn derive_wiki_url(api_url: &str) -> Option<String> {
    let trimmed = api_url.trim();
    let stripped = trimmed
        .strip_suffix("/w/api.php")
        .or_else(|| trimmed.strip_suffix("/api.php"))
        .unwrap_or(trimmed);
    let result = stripped.trim_end_matches('/').to_string();
    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

fn env_lookup(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required_var(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    site: &str,
) -> Result<String> {
    lookup(key).with_context(|| format!("missing environment variable {key} for site `{site}`"))
}

fn parse_millis(key: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .with_context(|| format!("{key} must be a whole number of milliseconds, got `{value}`"))
}
