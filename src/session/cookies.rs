//! Cookie capture and re-injection for CDP pages.
//!
//! Cookies are stored as raw JSON values exactly as the browser reported
//! them, so nothing is lost between capture and the next injection. On the
//! way back in they are deserialized into [`CookieParam`]s; any individual
//! cookie that fails to convert is skipped so one malformed entry never
//! blocks a login.

use chromiumoxide::cdp::browser_protocol::network::{CookieParam, SetCookiesParams};
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use tracing::{info, warn};

/// Dump the page's current cookie jar as raw JSON values.
pub async fn capture(page: &Page) -> Result<Vec<serde_json::Value>, CdpError> {
    let cookies = page.get_cookies().await?;
    Ok(cookies
        .iter()
        .filter_map(|c| serde_json::to_value(c).ok())
        .collect())
}

/// Inject stored cookies into a live page.
///
/// Call this before navigating to an authenticated URL so the cookies ride
/// along on the first request. Returns how many cookies were accepted.
pub async fn inject(page: &Page, raw_cookies: &[serde_json::Value]) -> usize {
    let params: Vec<CookieParam> = raw_cookies
        .iter()
        .filter_map(|v| serde_json::from_value::<CookieParam>(v.clone()).ok())
        .collect();

    if params.is_empty() {
        warn!("cookies: stored jar contained no convertible cookies — skipping injection");
        return 0;
    }

    let count = params.len();
    match page.execute(SetCookiesParams::new(params)).await {
        Ok(_) => {
            info!("cookies: 💉 injected {} stored cookies", count);
            count
        }
        Err(e) => {
            warn!("cookies: injection failed: {}", e);
            0
        }
    }
}
