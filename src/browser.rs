//! Browser session lifecycle: launch Chrome with a persistent profile, hand
//! out configured tabs, and tear the whole thing down on close.

use crate::config::DelayPolicy;
use crate::page::FeedPage;
use crate::{Error, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetGeolocationOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::handler::viewport::Viewport;
use futures::StreamExt;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const VIEWPORT_WIDTH: u32 = 1440;
const VIEWPORT_HEIGHT: u32 = 900;

const TIMEZONE: &str = "Europe/Vilnius";
const GEO_LATITUDE: f64 = 54.6872;
const GEO_LONGITUDE: f64 = 25.2797;

/// How to launch the browser.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Run without a visible window. Manual login fallback needs a head, so
    /// this is opt-in.
    pub headless: bool,
    /// Profile directory holding cookies and local storage across runs.
    pub state_dir: PathBuf,
}

/// A launched browser with its CDP event pump. Owned by the caller; drop or
/// [`close`](Self::close) ends the session.
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    /// Launch Chrome against the persistent profile in `state_dir`.
    pub async fn launch(options: &SessionOptions) -> Result<Self> {
        if options.state_dir.is_dir() {
            info!("Found saved authentication state");
        } else {
            info!("No saved authentication state found - will save after first login");
        }

        let config = build_config(options)?;
        let (browser, mut handler) = Browser::launch(config).await?;
        debug!("Browser launched");

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self { browser, handler })
    }

    /// Open a fresh tab with the timezone and geolocation overrides applied,
    /// wrapped for feed work.
    pub async fn new_page(&self, delays: DelayPolicy) -> Result<FeedPage> {
        let page = self.browser.new_page("about:blank").await?;

        page.execute(SetTimezoneOverrideParams::new(TIMEZONE)).await?;
        let geo = SetGeolocationOverrideParams::builder()
            .latitude(GEO_LATITUDE)
            .longitude(GEO_LONGITUDE)
            .accuracy(100.0)
            .build();
        page.execute(geo).await?;

        Ok(FeedPage::new(page, delays))
    }

    /// Shut the browser down and stop the event pump.
    pub async fn close(mut self) -> Result<()> {
        self.browser.close().await?;
        let _ = self.browser.wait().await;
        self.handler.abort();
        info!("Browser closed");
        Ok(())
    }
}

fn build_config(options: &SessionOptions) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        .user_data_dir(&options.state_dir)
        .viewport(Viewport {
            width: VIEWPORT_WIDTH,
            height: VIEWPORT_HEIGHT,
            ..Default::default()
        })
        .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-dev-shm-usage")
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--mute-audio")
        .arg("--lang=en-US")
        .arg(format!("--user-agent={USER_AGENT}"));

    if !options.headless {
        builder = builder.with_head();
    }

    builder.build().map_err(Error::Config)
}
