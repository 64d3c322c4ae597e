//! Live-DOM probes shared by the login, dispatch and orchestration flows.
//!
//! All of these evaluate a small script against the page and swallow
//! evaluation errors into "not found": a probe is a question, and a page
//! that cannot answer is treated the same as a page that answers no.

use std::time::Duration;

use chromiumoxide::Page;

/// Cadence for re-probing waits.
pub const PROBE_INTERVAL_MS: u64 = 500;

/// URL as the page itself sees it, after any client-side redirects.
pub async fn current_url(page: &Page) -> String {
    page.evaluate("location.href")
        .await
        .ok()
        .and_then(|h| h.into_value::<String>().ok())
        .unwrap_or_default()
}

/// First candidate with at least one match in the live DOM. Invalid
/// selectors are skipped rather than aborting the scan.
pub async fn first_present<'a, S: AsRef<str>>(
    page: &Page,
    candidates: &'a [S],
) -> Option<&'a str> {
    let sels: Vec<&str> = candidates.iter().map(|s| s.as_ref()).collect();
    let encoded = serde_json::to_string(&sels).ok()?;
    let js = format!(
        r#"(function() {{
            const sels = {encoded};
            for (let i = 0; i < sels.length; i++) {{
                try {{ if (document.querySelector(sels[i])) return i; }} catch (e) {{}}
            }}
            return -1;
        }})()"#
    );
    let idx = page
        .evaluate(js)
        .await
        .ok()
        .and_then(|h| h.into_value::<i64>().ok())
        .unwrap_or(-1);
    usize::try_from(idx)
        .ok()
        .and_then(|i| candidates.get(i))
        .map(|s| s.as_ref())
}

/// Trimmed text of the first *visible* match, skipping the empty banners
/// that templates leave in the DOM permanently.
pub async fn first_text<S: AsRef<str>>(page: &Page, candidates: &[S]) -> Option<String> {
    let sels: Vec<&str> = candidates.iter().map(|s| s.as_ref()).collect();
    let encoded = serde_json::to_string(&sels).ok()?;
    let js = format!(
        r#"(function() {{
            const sels = {encoded};
            for (const sel of sels) {{
                try {{
                    for (const el of document.querySelectorAll(sel)) {{
                        if (el.offsetParent === null) continue;
                        const text = (el.innerText || '').trim();
                        if (text) return text;
                    }}
                }} catch (e) {{}}
            }}
            return null;
        }})()"#
    );
    page.evaluate(js)
        .await
        .ok()
        .and_then(|h| h.into_value::<Option<String>>().ok())
        .flatten()
}

/// Re-probe on a fixed cadence until a candidate matches or the probe
/// budget runs out.
pub async fn wait_for_first<'a, S: AsRef<str>>(
    page: &Page,
    candidates: &'a [S],
    probes: u32,
) -> Option<&'a str> {
    for _ in 0..probes.max(1) {
        if let Some(sel) = first_present(page, candidates).await {
            return Some(sel);
        }
        tokio::time::sleep(Duration::from_millis(PROBE_INTERVAL_MS)).await;
    }
    None
}
