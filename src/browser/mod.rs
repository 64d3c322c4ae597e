//! Chromium lifecycle for the bot's long-lived chat session.
//!
//! Unlike a scrape-per-request tool, the bot keeps **one** browser process
//! and one logged-in tab alive for hours. If the process dies mid-watch,
//! the next `acquire_page()` relaunches it transparently; the caller is
//! responsible for logging back in on the fresh page.

pub mod probe;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::config;
use crate::stealth::{self, FingerprintProfile};

// ── Browser executable discovery ─────────────────────────────────────────────

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (explicit override)
/// 2. PATH scan – finds package-manager installs on all platforms.
/// 3. OS-specific well-known install paths.
pub fn find_chrome_executable() -> Option<String> {
    // 1. Explicit env override
    if let Some(p) = config::chrome_executable_override() {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    // 2. PATH scan (Linux / macOS / Windows package managers)
    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
            "brave-browser",
            "brave",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    // 3. Platform-specific well-known paths
    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
            "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/brave-browser",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

// ── Session browser ──────────────────────────────────────────────────────────

/// A lazily-started browser that survives for the whole bot run.
///
/// Store `Arc<BotBrowser>` in the app state so the HTTP surface and the
/// watch loop share one Chromium process.
pub struct BotBrowser {
    exe: String,
    headless: bool,
    profile: FingerprintProfile,
    inner: Mutex<Option<Browser>>,
}

impl BotBrowser {
    /// Browser for the given executable. The process is lazy-started on the
    /// first `acquire_page()`; the fingerprint profile is drawn once and
    /// stays fixed for the lifetime of this instance so the session looks
    /// like one consistent machine.
    pub fn new(exe: impl Into<String>, headless: bool) -> Arc<Self> {
        Arc::new(Self {
            exe: exe.into(),
            headless,
            profile: stealth::random_profile(),
            inner: Mutex::new(None),
        })
    }

    /// Browser using the auto-discovered executable.
    /// Returns `None` if no Chromium-family binary is installed.
    pub fn new_auto(headless: bool) -> Option<Arc<Self>> {
        find_chrome_executable().map(|exe| Self::new(exe, headless))
    }

    /// Fingerprint this instance presents to every page it opens.
    pub fn profile(&self) -> &FingerprintProfile {
        &self.profile
    }

    /// Open a fresh tab with the stealth script pre-armed.
    ///
    /// * Lazy-starts the browser on first call.
    /// * Restarts transparently if the process has crashed — in that case
    ///   any previous login session is gone and the caller must
    ///   re-authenticate on the returned page.
    pub async fn acquire_page(&self) -> Result<Page> {
        let mut guard = self.inner.lock().await;

        let alive = match guard.as_mut() {
            Some(b) => b.pages().await.is_ok(),
            None => false,
        };

        if !alive {
            if guard.is_some() {
                warn!("🔄 Browser instance dead, restarting...");
                if let Some(mut old) = guard.take() {
                    let _ = old.close().await;
                }
            }
            info!("🚀 Launching browser ({})", self.exe);
            let config = build_session_config(&self.exe, &self.profile, self.headless)?;
            let (new_browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| anyhow!("failed to launch ({}): {}", self.exe, e))?;
            tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if let Err(e) = event {
                        warn!("CDP handler error: {}", e);
                    }
                }
            });
            *guard = Some(new_browser);
        }

        let b = guard.as_mut().ok_or_else(|| anyhow!("browser not initialised"))?;
        let page = b
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow!("failed to open tab: {}", e))?;
        arm_stealth(&page, &self.profile).await?;
        Ok(page)
    }

    /// Gracefully close the browser process.
    pub async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(mut b) = guard.take() {
            let _ = b.close().await;
            info!("🛑 Browser shut down");
        }
    }
}

impl Drop for BotBrowser {
    fn drop(&mut self) {
        // Best-effort cleanup. Drop cannot await; if we're inside a tokio runtime,
        // spawn a task to close the browser to avoid zombie Chromium processes.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        if let Ok(mut guard) = self.inner.try_lock() {
            if let Some(mut browser) = guard.take() {
                handle.spawn(async move {
                    let _ = browser.close().await;
                });
            }
        }
    }
}

/// Build a `BrowserConfig` carrying our fingerprint profile.
///
/// Flags chosen for:
/// * Compatibility with CI / restricted environments (`--no-sandbox`, `--disable-dev-shm-usage`).
/// * Stealth — `--disable-blink-features=AutomationControlled` hides the
///   `navigator.webdriver` flag; UA and viewport come from the profile.
fn build_session_config(
    exe: &str,
    profile: &FingerprintProfile,
    headless: bool,
) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width: profile.viewport_width,
            height: profile.viewport_height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(profile.viewport_width, profile.viewport_height)
        .arg("--disable-gpu")
        .arg("--no-sandbox") // often required in CI / restricted environments
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage") // avoids /dev/shm OOM in constrained environments
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--disable-crash-reporter")
        .arg("--disable-breakpad")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--hide-scrollbars")
        .arg("--mute-audio")
        // Stealth: suppress CDP automation fingerprint
        .arg("--disable-blink-features=AutomationControlled")
        .arg(format!("--user-agent={}", profile.user_agent));

    if !headless {
        builder = builder.with_head();
    }

    builder
        .build()
        .map_err(|e| anyhow!("failed to build browser config: {}", e))
}

/// Install the fingerprint-masking script so it runs before any site JS on
/// every navigation of this tab.
async fn arm_stealth(page: &Page, profile: &FingerprintProfile) -> Result<()> {
    let params = AddScriptToEvaluateOnNewDocumentParams::builder()
        .source(stealth::init_script(profile))
        .build()
        .map_err(|e| anyhow!("stealth script params: {}", e))?;
    page.execute(params).await?;
    Ok(())
}

// ── Smart wait / networkidle ─────────────────────────────────────────────────

/// Wait until the page network goes idle (no new resource entries for `quiet_ms`
/// consecutive ms) or until `timeout_ms` has elapsed.
///
/// Polls `performance.getEntriesByType("resource").length` every 250 ms —
/// a Playwright-style networkidle heuristic that works without CDP Network events.
pub async fn wait_until_stable(page: &Page, quiet_ms: u64, timeout_ms: u64) {
    let poll_ms = 250u64;
    let start = std::time::Instant::now();
    let mut last_count: u64 = 0;
    let mut stable_since = std::time::Instant::now();

    loop {
        if start.elapsed().as_millis() as u64 >= timeout_ms {
            info!("wait_until_stable: timeout after {}ms", timeout_ms);
            break;
        }

        let count: u64 = page
            .evaluate("performance.getEntriesByType('resource').length")
            .await
            .ok()
            .and_then(|v| v.into_value::<serde_json::Value>().ok())
            .and_then(|j| j.as_u64())
            .unwrap_or(0);

        let ready_complete: bool = page
            .evaluate("document.readyState")
            .await
            .ok()
            .and_then(|v| v.into_value::<serde_json::Value>().ok())
            .and_then(|j| j.as_str().map(|s| s == "complete"))
            .unwrap_or(false);

        if !ready_complete {
            // DOM not fully loaded; keep waiting and do not allow "idle" to trigger.
            stable_since = std::time::Instant::now();
            last_count = count;
        } else if count != last_count {
            last_count = count;
            stable_since = std::time::Instant::now();
        } else if stable_since.elapsed().as_millis() as u64 >= quiet_ms {
            info!(
                "wait_until_stable: idle after {}ms ({} resources)",
                start.elapsed().as_millis(),
                count
            );
            break;
        }

        tokio::time::sleep(Duration::from_millis(poll_ms)).await;
    }
}
