//! Fingerprint and timing randomization.
//!
//! The target platform scores login attempts on input timing, so the typing
//! and pointer models here are not cosmetic — they are part of the login
//! contract. All timing decisions go through [`PacingPolicy`] so tests can
//! swap in [`InstantPacing`] and exercise the same control flow with zero
//! real delay.

pub mod typing;

use rand::prelude::*;

/// One coherent browser identity: UA string, matching client-hint headers,
/// and a viewport that fits the claimed device.
#[derive(Debug, Clone)]
pub struct FingerprintProfile {
    pub user_agent: String,
    pub sec_ch_ua: String,
    pub sec_ch_ua_mobile: String,
    pub sec_ch_ua_platform: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl FingerprintProfile {
    /// Platform label for the spoofed `navigator.userAgentData`, derived from
    /// the client-hint platform so the two can never disagree.
    pub fn ua_data_platform(&self) -> String {
        self.sec_ch_ua_platform.trim_matches('"').to_string()
    }
}

/// Desktop-only pool. The inbox UI is a desktop layout; claiming a phone
/// would hand detection an easy inconsistency.
pub fn random_profile() -> FingerprintProfile {
    let mut rng = rand::rng();
    let profiles = vec![
        // Chrome 131 on Windows 10
        FingerprintProfile {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string(),
            sec_ch_ua: r#""Chromium";v="131", "Not_A Brand";v="24", "Google Chrome";v="131""#.to_string(),
            sec_ch_ua_mobile: "?0".to_string(),
            sec_ch_ua_platform: "\"Windows\"".to_string(),
            viewport_width: 1920,
            viewport_height: 1080,
        },
        // Chrome 131 on macOS
        FingerprintProfile {
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string(),
            sec_ch_ua: r#""Chromium";v="131", "Not_A Brand";v="24", "Google Chrome";v="131""#.to_string(),
            sec_ch_ua_mobile: "?0".to_string(),
            sec_ch_ua_platform: "\"macOS\"".to_string(),
            viewport_width: 1440,
            viewport_height: 900,
        },
        // Edge 131 on Windows 11
        FingerprintProfile {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0".to_string(),
            sec_ch_ua: r#""Chromium";v="131", "Not_A Brand";v="24", "Microsoft Edge";v="131""#.to_string(),
            sec_ch_ua_mobile: "?0".to_string(),
            sec_ch_ua_platform: "\"Windows\"".to_string(),
            viewport_width: 1920,
            viewport_height: 1080,
        },
        // Chrome 130 on Linux
        FingerprintProfile {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36".to_string(),
            sec_ch_ua: r#""Chromium";v="130", "Not_A Brand";v="24", "Google Chrome";v="130""#.to_string(),
            sec_ch_ua_mobile: "?0".to_string(),
            sec_ch_ua_platform: "\"Linux\"".to_string(),
            viewport_width: 1920,
            viewport_height: 1080,
        },
    ];
    let index = rng.random_range(0..profiles.len());
    profiles[index].clone()
}

/// Stealth bootstrap injected before every page load.
///
/// The `userAgentData` block is rendered from the active profile so the
/// spoofed client hints always agree with the HTTP-level headers.
pub fn init_script(profile: &FingerprintProfile) -> String {
    let platform = profile.ua_data_platform();
    format!(
        r#"
// Navigator hardening — before anything else on the page runs.
(() => {{
    try {{
        const proto = Navigator.prototype;
        try {{
            Object.defineProperty(proto, 'webdriver', {{
                get: () => undefined,
                configurable: true,
            }});
        }} catch (e) {{}}
        try {{ delete navigator.webdriver; }} catch (e) {{}}
        try {{
            Object.defineProperty(proto, 'languages', {{
                get: () => ['en-US', 'en'],
                configurable: true,
            }});
        }} catch (e) {{}}
        try {{
            Object.defineProperty(proto, 'plugins', {{
                get: () => [1, 2, 3, 4, 5],
                configurable: true,
            }});
        }} catch (e) {{}}
    }} catch (e) {{}}
}})();

// Chrome runtime stub (CDP presence checks).
if (!window.chrome) {{ window.chrome = {{}}; }}
if (!window.chrome.runtime) {{
    window.chrome.runtime = {{
        connect: function() {{ return {{ onDisconnect: {{ addListener: function() {{}} }} }}; }},
        sendMessage: function() {{}},
    }};
}}

// Notification-permission probe consistency.
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {{
    window.navigator.permissions.query = (parameters) => (
        parameters.name === 'notifications'
            ? Promise.resolve({{ state: Notification.permission }})
            : originalQuery(parameters)
    );
}}

// Automation framework markers.
delete window.__playwright;
delete window.__puppeteer;
delete window.__selenium;
delete window.callPhantom;
delete window._phantom;

// Client hints agreeing with the profile headers.
if (navigator.userAgentData) {{
    Object.defineProperty(navigator, 'userAgentData', {{
        get: () => ({{
            brands: [
                {{ brand: 'Chromium', version: '131' }},
                {{ brand: 'Google Chrome', version: '131' }},
                {{ brand: 'Not_A Brand', version: '24' }}
            ],
            mobile: false,
            platform: '{platform}'
        }})
    }});
}}
"#
    )
}

// ── Pacing policy ───────────────────────────────────────────────────────────

/// Timing model for everything that touches the page: per-character key
/// delays, thinking pauses, typo-correction odds, pointer path pacing and
/// generic settle waits.
pub trait PacingPolicy: Send + Sync {
    /// Delay before the next typed character.
    fn key_delay_ms(&self) -> u64;
    /// Occasional longer pause, as if re-reading the field. `None` = keep typing.
    fn thinking_pause_ms(&self) -> Option<u64>;
    /// Whether to fumble this character and correct it with backspace.
    fn should_backtrack(&self) -> bool;
    /// Number of intermediate waypoints in a pointer path.
    fn pointer_steps(&self) -> usize;
    /// Delay between pointer waypoints.
    fn pointer_step_delay_ms(&self) -> u64;
    /// A settle wait drawn from the given window.
    fn settle_ms(&self, min_ms: u64, max_ms: u64) -> u64;
}

/// Production pacing. Numbers sit inside observed human ranges; the
/// backtrack probability is roughly one fumble per fifty characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct HumanPacing;

impl PacingPolicy for HumanPacing {
    fn key_delay_ms(&self) -> u64 {
        let mut rng = rand::rng();
        rng.random_range(80..=240)
    }

    fn thinking_pause_ms(&self) -> Option<u64> {
        let mut rng = rand::rng();
        if rng.random_range(0..100) < 7 {
            Some(rng.random_range(400..=1200))
        } else {
            None
        }
    }

    fn should_backtrack(&self) -> bool {
        let mut rng = rand::rng();
        rng.random_range(0..100) < 2
    }

    fn pointer_steps(&self) -> usize {
        let mut rng = rand::rng();
        rng.random_range(4..=8)
    }

    fn pointer_step_delay_ms(&self) -> u64 {
        let mut rng = rand::rng();
        rng.random_range(20..=80)
    }

    fn settle_ms(&self, min_ms: u64, max_ms: u64) -> u64 {
        let mut rng = rand::rng();
        rng.random_range(min_ms..=max_ms.max(min_ms))
    }
}

/// Zero-delay policy for tests: same control flow, no waiting, no fumbles.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstantPacing;

impl PacingPolicy for InstantPacing {
    fn key_delay_ms(&self) -> u64 {
        0
    }

    fn thinking_pause_ms(&self) -> Option<u64> {
        None
    }

    fn should_backtrack(&self) -> bool {
        false
    }

    fn pointer_steps(&self) -> usize {
        2
    }

    fn pointer_step_delay_ms(&self) -> u64 {
        0
    }

    fn settle_ms(&self, _min_ms: u64, _max_ms: u64) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_are_desktop_and_internally_consistent() {
        for _ in 0..20 {
            let p = random_profile();
            assert!(p.user_agent.contains("Mozilla"));
            assert_eq!(p.sec_ch_ua_mobile, "?0");
            assert!(p.viewport_width >= 1280);
            assert!(!p.ua_data_platform().contains('"'));
        }
    }

    #[test]
    fn init_script_embeds_the_profile_platform() {
        let p = random_profile();
        let script = init_script(&p);
        assert!(script.contains(&format!("platform: '{}'", p.ua_data_platform())));
        assert!(script.contains("webdriver"));
    }

    #[test]
    fn human_key_delays_stay_in_range() {
        let pacing = HumanPacing;
        for _ in 0..200 {
            let d = pacing.key_delay_ms();
            assert!((80..=240).contains(&d));
        }
    }

    #[test]
    fn backtrack_rate_is_a_few_percent() {
        let pacing = HumanPacing;
        let fumbles = (0..5000).filter(|_| pacing.should_backtrack()).count();
        // ~2% of 5000 = 100; bounds are wide enough to never flake.
        assert!(fumbles >= 25, "fumble rate collapsed: {fumbles}");
        assert!(fumbles <= 250, "fumble rate exploded: {fumbles}");
    }

    #[test]
    fn instant_pacing_never_waits_or_fumbles() {
        let pacing = InstantPacing;
        assert_eq!(pacing.key_delay_ms(), 0);
        assert_eq!(pacing.settle_ms(1500, 2500), 0);
        assert!(pacing.thinking_pause_ms().is_none());
        assert!(!(0..1000).any(|_| pacing.should_backtrack()));
    }
}
