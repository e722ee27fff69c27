//! `FeedPage`: one browser tab with the Strava-specific behavior on top of
//! named CDP primitives. No open-ended forwarding to the underlying page;
//! every primitive the harvest loop needs is an explicit method here.

use crate::archive::{AssetFetcher, FetchedAsset};
use crate::config::DelayPolicy;
use crate::harvest::{FeedEntry, FeedSurface};
use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chromiumoxide::cdp::browser_protocol::page::ReloadParams;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Authenticated landing page; its URL marker doubles as the login signature.
pub const DASHBOARD_URL: &str = "https://www.strava.com/dashboard";
/// Login page with the auth-provider buttons.
pub const LOGIN_URL: &str = "https://www.strava.com/login";

/// Snapshot of the feed: every entry with its kudos controls (owner resolved
/// per control for group activities) and the map image source when the entry
/// has exactly one.
const FEED_SNAPSHOT_JS: &str = r#"
(() => {
    const out = [];
    for (const entry of document.querySelectorAll("div[data-testid='web-feed-entry']")) {
        const buttons = Array.from(entry.querySelectorAll("button[data-testid='kudos_button']"));
        const primary = entry.querySelector("a[data-testid='owners-name']");
        const controls = buttons.map(btn => {
            let label = primary;
            if (buttons.length > 1) {
                // Group activity: each control belongs to the nearest
                // ancestor list item that carries an entry header.
                let li = btn.closest('li');
                while (li && !li.querySelector("[data-testid='entry-header']")) {
                    li = li.parentElement ? li.parentElement.closest('li') : null;
                }
                label = li ? li.querySelector("a[data-testid='owners-name']") : null;
            }
            return {
                owner: label ? label.innerText.trim() : '',
                filled: !btn.querySelector("svg[data-testid='unfilled_kudos']"),
            };
        });
        const maps = entry.querySelectorAll("img[data-testid='map']");
        const src = maps.length === 1 ? maps[0].getAttribute('src') : null;
        out.push({ controls: controls, map_src: src || null });
    }
    return JSON.stringify(out);
})()
"#;

/// Click control `__CONTROL__` of entry `__ENTRY__`; false when either index
/// no longer resolves (the live page mutated since the snapshot).
const CLICK_CONTROL_JS: &str = r#"
(() => {
    const entry = document.querySelectorAll("div[data-testid='web-feed-entry']")[__ENTRY__];
    if (!entry) return false;
    const btn = entry.querySelectorAll("button[data-testid='kudos_button']")[__CONTROL__];
    if (!btn) return false;
    btn.click();
    return true;
})()
"#;

const CONSENT_PRESENT_JS: &str =
    "!!document.querySelector('#CybotCookiebotDialogBodyButtonsWrapper')";

const CONSENT_ACCEPT_JS: &str = r#"
(() => {
    const wrapper = document.querySelector('#CybotCookiebotDialogBodyButtonsWrapper');
    if (!wrapper) return false;
    const btn = wrapper.querySelector('#CybotCookiebotDialogBodyLevelButtonLevelOptinAllowAll');
    if (!btn) return false;
    btn.click();
    return true;
})()
"#;

/// Click the first visible auth-provider button; pages render hidden variants
/// that must be ignored.
const LOGIN_CLICK_JS: &str = r#"
(() => {
    const buttons = Array.from(document.querySelectorAll('button[data-testid="google_auth_btn"]'));
    const visible = buttons.find(b => b.offsetParent !== null);
    if (visible) visible.click();
    return JSON.stringify({ found: buttons.length, clicked: !!visible });
})()
"#;

/// Fetch `__KUDOBOT_SRC__` inside the page so the request shares the
/// authenticated cookie jar; body is returned base64-encoded.
const FETCH_ASSET_JS: &str = r#"
(async () => {
    try {
        const resp = await fetch(__KUDOBOT_SRC__, { credentials: 'include' });
        const buf = new Uint8Array(await resp.arrayBuffer());
        let binary = '';
        const chunk = 0x8000;
        for (let i = 0; i < buf.length; i += chunk) {
            binary += String.fromCharCode.apply(null, buf.subarray(i, i + chunk));
        }
        return JSON.stringify({
            status: resp.status,
            content_type: resp.headers.get('content-type'),
            body: btoa(binary),
        });
    } catch (e) {
        return JSON.stringify({ status: 0, content_type: null, body: '' });
    }
})()
"#;

/// Probe the first element matching `__KUDOBOT_SELECTOR__` for its vertical
/// extent relative to the viewport.
const VIEWPORT_PROBE_JS: &str = r#"
(() => {
    const el = document.querySelector(__KUDOBOT_SELECTOR__);
    if (!el) return JSON.stringify({ found: false, top: 0, bottom: 0, inner_height: 0 });
    const rect = el.getBoundingClientRect();
    return JSON.stringify({
        found: true,
        top: rect.top,
        bottom: rect.bottom,
        inner_height: window.innerHeight,
    });
})()
"#;

#[derive(Deserialize)]
struct LoginProbe {
    found: usize,
    clicked: bool,
}

#[derive(Deserialize)]
struct RawFetch {
    status: u16,
    content_type: Option<String>,
    body: String,
}

#[derive(Deserialize)]
struct ViewportProbe {
    found: bool,
    top: f64,
    bottom: f64,
    inner_height: f64,
}

/// Parse the feed-snapshot JSON produced by [`FEED_SNAPSHOT_JS`].
pub fn parse_snapshot(json: &str) -> Result<Vec<FeedEntry>> {
    serde_json::from_str(json).map_err(|e| Error::Page(format!("snapshot parse error: {e}")))
}

/// Whether an element spanning `top..bottom` intersects a viewport of the
/// given height vertically.
pub fn vertically_visible(top: f64, bottom: f64, viewport_height: f64) -> bool {
    !(bottom < 0.0 || top > viewport_height)
}

/// One tab against the Strava feed.
pub struct FeedPage {
    page: Page,
    delays: DelayPolicy,
}

impl FeedPage {
    pub(crate) fn new(page: Page, delays: DelayPolicy) -> Self {
        Self { page, delays }
    }

    /// Navigate to the dashboard and let it settle.
    pub async fn goto_dashboard(&self) -> Result<()> {
        self.goto(DASHBOARD_URL).await
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        // Heavy pages can keep loading past the commit; bounded wait, then
        // the settle delay does the rest.
        let _ = tokio::time::timeout(Duration::from_secs(30), self.page.wait_for_navigation()).await;
        tokio::time::sleep(self.delays.post_navigation).await;
        Ok(())
    }

    /// Reload the current page and let it settle.
    pub async fn refresh(&self) -> Result<()> {
        self.page.execute(ReloadParams::builder().build()).await?;
        tokio::time::sleep(self.delays.post_navigation).await;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    /// Whether the current URL carries the authenticated-landing marker.
    pub async fn is_on_dashboard_page(&self) -> Result<bool> {
        Ok(self.current_url().await?.contains("dashboard"))
    }

    /// Whether the current URL carries the login marker.
    pub async fn is_on_login_page(&self) -> Result<bool> {
        Ok(self.current_url().await?.contains("login"))
    }

    /// Evaluate JS that returns a JSON string, deserializing the payload.
    async fn eval_json<T: DeserializeOwned>(&self, js: &str) -> Result<T> {
        let json: String = self.eval(js).await?;
        serde_json::from_str(&json).map_err(|e| Error::Page(format!("eval parse error: {e}")))
    }

    /// Evaluate JS and deserialize the returned value directly.
    async fn eval<T: DeserializeOwned>(&self, js: &str) -> Result<T> {
        let params = EvaluateParams::builder()
            .expression(js)
            .await_promise(true)
            .build()
            .map_err(Error::Page)?;
        let result = self.page.evaluate(params).await?;
        result
            .into_value::<T>()
            .map_err(|e| Error::Page(format!("eval result error: {e}")))
    }

    /// Evaluate JS for its side effect only.
    async fn exec(&self, js: &str) -> Result<()> {
        self.page.evaluate(js).await?;
        Ok(())
    }

    /// Dismiss the cookie consent dialog if it shows up within the bounded
    /// wait. Its absence is a normal outcome, never an error.
    pub async fn accept_cookies(&self) -> Result<()> {
        let deadline = Instant::now() + self.delays.consent_timeout;
        loop {
            let present: bool = self.eval(CONSENT_PRESENT_JS).await?;
            if present {
                let clicked: bool = self.eval(CONSENT_ACCEPT_JS).await?;
                if clicked {
                    info!("Accepted cookie consent");
                } else {
                    info!("Cookie banner found but accept button not found");
                }
                return Ok(());
            }
            if Instant::now() >= deadline {
                info!("No cookie banner found");
                return Ok(());
            }
            tokio::time::sleep(self.delays.consent_poll).await;
        }
    }

    /// Bring the page to the authenticated state, or as close as automation
    /// can: navigate to login if needed, click the first visible provider
    /// button, and when the dashboard does not follow, hold a bounded window
    /// open for a human to finish (2FA, captcha). Always terminates; the
    /// caller proceeds optimistically either way.
    pub async fn ensure_logged_in(&self) -> Result<()> {
        if !self.is_on_login_page().await? {
            self.goto(LOGIN_URL).await?;
        }

        let probe: LoginProbe = self.eval_json(LOGIN_CLICK_JS).await?;
        debug!("Found {} login buttons", probe.found);
        if probe.clicked {
            info!("Clicked login provider button");
        }
        tokio::time::sleep(self.delays.login_settle).await;

        if !self.is_on_dashboard_page().await? {
            info!("Do a manual login.");
            tokio::time::sleep(self.delays.manual_login_wait).await;
        } else {
            info!("On dashboard page.");
        }
        Ok(())
    }

    /// Whether the first element matching `selector` vertically intersects
    /// the viewport.
    pub async fn element_in_viewport(&self, selector: &str) -> Result<bool> {
        let quoted = serde_json::to_string(selector)
            .map_err(|e| Error::Page(format!("selector escape error: {e}")))?;
        let js = VIEWPORT_PROBE_JS.replace("__KUDOBOT_SELECTOR__", &quoted);
        let probe: ViewportProbe = self.eval_json(&js).await?;
        Ok(probe.found && vertically_visible(probe.top, probe.bottom, probe.inner_height))
    }
}

impl FeedSurface for FeedPage {
    async fn expand_once(&self) -> Result<()> {
        self.exec("window.scrollTo(0, document.body.scrollHeight)").await?;
        tokio::time::sleep(self.delays.scroll_settle).await;

        // Nudge back up to trip "scroll near top" lazy-load triggers, then
        // give network-fetched content time to render.
        self.exec("window.scrollBy(0, -200)").await?;
        tokio::time::sleep(self.delays.render_settle).await;
        Ok(())
    }

    async fn snapshot(&self) -> Result<Vec<FeedEntry>> {
        let json: String = self.eval(FEED_SNAPSHOT_JS).await?;
        parse_snapshot(&json)
    }

    async fn click_control(&self, entry: usize, control: usize) -> Result<bool> {
        let js = CLICK_CONTROL_JS
            .replace("__ENTRY__", &entry.to_string())
            .replace("__CONTROL__", &control.to_string());
        self.eval(&js).await
    }
}

impl AssetFetcher for FeedPage {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset> {
        let quoted = serde_json::to_string(url)
            .map_err(|e| Error::Page(format!("url escape error: {e}")))?;
        let js = FETCH_ASSET_JS.replace("__KUDOBOT_SRC__", &quoted);
        let raw: RawFetch = self.eval_json(&js).await?;
        let body = BASE64
            .decode(&raw.body)
            .map_err(|e| Error::Page(format!("asset body decode error: {e}")))?;
        Ok(FetchedAsset {
            status: raw.status,
            content_type: raw.content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertically_visible_inside() {
        assert!(vertically_visible(100.0, 300.0, 900.0));
    }

    #[test]
    fn test_vertically_visible_partially_above() {
        assert!(vertically_visible(-50.0, 20.0, 900.0));
    }

    #[test]
    fn test_vertically_not_visible_above_or_below() {
        assert!(!vertically_visible(-300.0, -10.0, 900.0));
        assert!(!vertically_visible(950.0, 1100.0, 900.0));
    }

    #[test]
    fn test_parse_snapshot_entries() {
        let json = r#"[
            {"controls": [{"owner": "Jane Doe", "filled": false}], "map_src": null},
            {"controls": [
                {"owner": "Alice Smith", "filled": false},
                {"owner": "Bob Jones", "filled": true}
            ], "map_src": "https://maps.example.com/xyz123.png"},
            {"controls": [], "map_src": null}
        ]"#;

        let entries = parse_snapshot(json).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].controls[0].owner, "Jane Doe");
        assert!(!entries[0].controls[0].filled);
        assert_eq!(entries[1].controls.len(), 2);
        assert!(entries[1].controls[1].filled);
        assert_eq!(
            entries[1].map_src.as_deref(),
            Some("https://maps.example.com/xyz123.png")
        );
        assert!(entries[2].controls.is_empty());
    }

    #[test]
    fn test_parse_snapshot_rejects_malformed_payload() {
        assert!(parse_snapshot("not json").is_err());
        assert!(parse_snapshot(r#"{"controls": []}"#).is_err());
    }
}
