use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ScoutConfig — file-based config loader (inbox-scout.json) with env-var fallback
// ---------------------------------------------------------------------------

/// Target-site profile (mirrors the `site` key in inbox-scout.json).
///
/// The engine drives exactly one messaging platform; these fields pin down
/// where that platform lives and how a logged-in page is recognized.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct SiteConfig {
    /// Origin of the target platform, e.g. `https://internshala.com`.
    pub base_url: Option<String>,
    /// Path of the login form, joined onto `base_url`.
    pub login_path: Option<String>,
    /// Path of the chat inbox, joined onto `base_url`.
    pub chat_path: Option<String>,
    /// Path of one conversation, with `{id}` standing in for the
    /// conversation identifier. Joined onto `base_url`.
    pub conversation_path: Option<String>,
    /// URL substrings that mean "this tab is logged in" (dashboard, profile).
    pub logged_in_url_markers: Option<Vec<String>>,
}

impl SiteConfig {
    /// Base URL: JSON field → `INBOX_SCOUT_BASE_URL` env var → the default target.
    pub fn resolve_base_url(&self) -> String {
        if let Some(u) = &self.base_url {
            if !u.trim().is_empty() {
                return u.trim_end_matches('/').to_string();
            }
        }
        std::env::var(ENV_BASE_URL)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or_else(|| "https://internshala.com".to_string())
    }

    pub fn resolve_login_url(&self) -> String {
        let path = self
            .login_path
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "/login/user".to_string());
        format!("{}{}", self.resolve_base_url(), path)
    }

    pub fn resolve_chat_url(&self) -> String {
        let path = self
            .chat_path
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "/chat".to_string());
        format!("{}{}", self.resolve_base_url(), path)
    }

    /// URL of one conversation. The path template's `{id}` placeholder is
    /// replaced with the (percent-encoding-safe) conversation identifier.
    pub fn resolve_conversation_url(&self, conversation_id: &str) -> String {
        let template = self
            .conversation_path
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "/chat/{id}".to_string());
        format!(
            "{}{}",
            self.resolve_base_url(),
            template.replace("{id}", conversation_id)
        )
    }

    /// URL fragments that prove a page is authenticated.
    pub fn resolve_logged_in_markers(&self) -> Vec<String> {
        match &self.logged_in_url_markers {
            Some(v) if !v.is_empty() => v.clone(),
            _ => vec!["/dashboard".to_string(), "/student/".to_string(), "/chat".to_string()],
        }
    }

    /// Cookie domain key for the persisted session (host without scheme).
    pub fn resolve_domain(&self) -> String {
        let base = self.resolve_base_url();
        url::Url::parse(&base)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or(base)
    }
}

/// Credentials and login-loop tuning (mirrors the `auth` key).
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct AuthConfig {
    /// Account email. Prefer `INBOX_SCOUT_EMAIL` over committing this to disk.
    pub email: Option<String>,
    /// Account password. Never logged. Prefer `INBOX_SCOUT_PASSWORD`.
    pub password: Option<String>,
    /// Total login attempts before giving up. Default: 3.
    pub max_attempts: Option<u32>,
    /// Base backoff delay between attempts in ms (doubles per attempt). Default: 2000.
    pub retry_base_ms: Option<u64>,
    /// How long to wait for the post-submit success/failure race. Default: 15000.
    pub outcome_timeout_ms: Option<u64>,
}

impl AuthConfig {
    /// Email: JSON field → `INBOX_SCOUT_EMAIL` env var → `None`.
    pub fn resolve_email(&self) -> Option<String> {
        if let Some(e) = &self.email {
            if !e.trim().is_empty() {
                return Some(e.trim().to_string());
            }
        }
        std::env::var(ENV_EMAIL).ok().filter(|v| !v.trim().is_empty())
    }

    /// Password: JSON field → `INBOX_SCOUT_PASSWORD` env var → `None`. Never logged.
    pub fn resolve_password(&self) -> Option<String> {
        if let Some(p) = &self.password {
            if !p.is_empty() {
                return Some(p.clone());
            }
        }
        std::env::var(ENV_PASSWORD).ok().filter(|v| !v.is_empty())
    }

    pub fn resolve_max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(3).max(1)
    }

    pub fn resolve_retry_base_ms(&self) -> u64 {
        self.retry_base_ms.unwrap_or(2000)
    }

    pub fn resolve_outcome_timeout_ms(&self) -> u64 {
        self.outcome_timeout_ms.unwrap_or(15_000)
    }
}

/// Remote captcha-solving service (mirrors the `solver` key).
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct SolverConfig {
    pub api_url: Option<String>,
    /// API key. Never logged.
    pub api_key: Option<String>,
}

impl SolverConfig {
    /// Solver endpoint: JSON field → `CAPTCHA_API_URL` env var → `None` (solving disabled).
    pub fn resolve_api_url(&self) -> Option<String> {
        if let Some(u) = &self.api_url {
            if !u.trim().is_empty() {
                return Some(u.trim_end_matches('/').to_string());
            }
        }
        std::env::var(ENV_CAPTCHA_API_URL)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim_end_matches('/').to_string())
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.api_key {
            return Some(k.trim().to_string());
        }
        std::env::var(ENV_CAPTCHA_API_KEY).ok().filter(|v| !v.trim().is_empty())
    }
}

/// Remote batch-scraping job service for internship listings (`listings` key).
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct ListingsConfig {
    pub api_url: Option<String>,
    /// API key. Never logged.
    pub api_key: Option<String>,
}

impl ListingsConfig {
    /// Listings endpoint: JSON field → `LISTINGS_API_URL` env var → `None` (tool disabled).
    pub fn resolve_api_url(&self) -> Option<String> {
        if let Some(u) = &self.api_url {
            if !u.trim().is_empty() {
                return Some(u.trim_end_matches('/').to_string());
            }
        }
        std::env::var(ENV_LISTINGS_API_URL)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim_end_matches('/').to_string())
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.api_key {
            return Some(k.trim().to_string());
        }
        std::env::var(ENV_LISTINGS_API_KEY).ok().filter(|v| !v.trim().is_empty())
    }
}

/// Persistence knobs (mirrors the `storage` key).
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct StorageConfig {
    /// Directory holding cookies.json / message_history.json / sessions.json.
    pub data_dir: Option<String>,
    /// Age in days after which a saved session forces a fresh login. Default: 7.
    pub session_max_age_days: Option<i64>,
}

impl StorageConfig {
    /// Data directory: JSON field → `INBOX_SCOUT_DATA_DIR` env var → `~/.inbox-scout`.
    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(d) = &self.data_dir {
            if !d.trim().is_empty() {
                return PathBuf::from(d.trim());
            }
        }
        if let Ok(d) = std::env::var(ENV_DATA_DIR) {
            if !d.trim().is_empty() {
                return PathBuf::from(d.trim());
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".inbox-scout")
    }

    pub fn resolve_session_max_age_days(&self) -> i64 {
        self.session_max_age_days.unwrap_or(7).max(1)
    }
}

/// Optional overrides for the built-in selector books (`selectors` key).
///
/// The candidate lists are data, not code: when the target site ships new
/// markup, operators can patch the ordered lists here without a rebuild.
/// Each list replaces the built-in book wholesale when non-empty.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct SelectorOverrides {
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub containers: Vec<String>,
    #[serde(default)]
    pub compose_inputs: Vec<String>,
    #[serde(default)]
    pub send_buttons: Vec<String>,
    #[serde(default)]
    pub own_markers: Vec<String>,
}

/// Top-level config loaded from `inbox-scout.json`.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct ScoutConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub listings: ListingsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub selectors: SelectorOverrides,
}

/// Load `inbox-scout.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `INBOX_SCOUT_CONFIG` env var path
/// 2. `./inbox-scout.json`  (process cwd)
/// 3. `../inbox-scout.json` (one level up — repo root when running from a subdir)
///
/// Missing file → `ScoutConfig::default()` (silent, all env-var fallbacks apply).
/// Parse error → log a warning, return `ScoutConfig::default()`.
pub fn load_scout_config() -> ScoutConfig {
    let candidates: Vec<PathBuf> = {
        let mut v = vec![
            PathBuf::from("inbox-scout.json"),
            PathBuf::from("../inbox-scout.json"),
        ];
        if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
            v.insert(0, PathBuf::from(env_path));
        }
        v
    };

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<ScoutConfig>(&contents) {
                Ok(cfg) => {
                    tracing::info!("inbox-scout.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "inbox-scout.json parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    return ScoutConfig::default();
                }
            },
            Err(_) => continue, // file not found at this path — try next
        }
    }

    // No config file found anywhere — silently use defaults (env-var fallbacks apply).
    ScoutConfig::default()
}

// ---------------------------------------------------------------------------

pub const ENV_CONFIG_PATH: &str = "INBOX_SCOUT_CONFIG";
pub const ENV_BASE_URL: &str = "INBOX_SCOUT_BASE_URL";
pub const ENV_EMAIL: &str = "INBOX_SCOUT_EMAIL";
pub const ENV_PASSWORD: &str = "INBOX_SCOUT_PASSWORD";
pub const ENV_DATA_DIR: &str = "INBOX_SCOUT_DATA_DIR";
pub const ENV_CAPTCHA_API_URL: &str = "CAPTCHA_API_URL";
pub const ENV_CAPTCHA_API_KEY: &str = "CAPTCHA_API_KEY";
pub const ENV_LISTINGS_API_URL: &str = "LISTINGS_API_URL";
pub const ENV_LISTINGS_API_KEY: &str = "LISTINGS_API_KEY";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";

/// Optional override for the Chromium-family browser executable.
///
/// Default behavior is auto-discovery (see `browser::find_chrome_executable()`).
/// This function only returns a value when `CHROME_EXECUTABLE` is set to an
/// existing path.
pub fn chrome_executable_override() -> Option<String> {
    let p = std::env::var(ENV_CHROME_EXECUTABLE).ok()?;
    let p = p.trim();
    if p.is_empty() {
        return None;
    }
    if Path::new(p).exists() {
        Some(p.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_without_a_config_file() {
        let cfg = ScoutConfig::default();
        assert!(cfg.site.resolve_base_url().starts_with("https://"));
        assert!(cfg.site.resolve_login_url().contains("/login"));
        assert_eq!(cfg.auth.resolve_max_attempts(), 3);
        assert_eq!(cfg.auth.resolve_retry_base_ms(), 2000);
        assert_eq!(cfg.auth.resolve_outcome_timeout_ms(), 15_000);
        assert_eq!(cfg.storage.resolve_session_max_age_days(), 7);
    }

    #[test]
    fn json_fields_beat_defaults() {
        let cfg: ScoutConfig = serde_json::from_str(
            r#"{
                "site": {"base_url": "https://example.org/", "login_path": "/signin"},
                "auth": {"max_attempts": 5, "retry_base_ms": 100},
                "storage": {"session_max_age_days": 14}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.site.resolve_base_url(), "https://example.org");
        assert_eq!(cfg.site.resolve_login_url(), "https://example.org/signin");
        assert_eq!(cfg.site.resolve_domain(), "example.org");
        assert_eq!(
            cfg.site.resolve_conversation_url("abc123"),
            "https://example.org/chat/abc123"
        );
        assert_eq!(cfg.auth.resolve_max_attempts(), 5);
        assert_eq!(cfg.auth.resolve_retry_base_ms(), 100);
        assert_eq!(cfg.storage.resolve_session_max_age_days(), 14);
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let cfg: ScoutConfig =
            serde_json::from_str(r#"{"auth": {"max_attempts": 0}}"#).unwrap();
        assert_eq!(cfg.auth.resolve_max_attempts(), 1);
    }
}
