//! # kudobot
//!
//! Automates one repetitive interaction on Strava: giving kudos on the
//! activity feed. Drives a real Chrome session with a persistent profile so
//! the login survives restarts, expands the lazily-rendered feed a fixed
//! number of times, then makes a single scan-and-act pass over every visible
//! entry: clicking each not-yet-given kudos control unless its owner matches
//! a skip list, and optionally archiving the activity map image per entry.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kudobot::{BrowserSession, HarvestOptions, SessionOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> kudobot::Result<()> {
//! let config = kudobot::Config::from_env()?;
//! let session = BrowserSession::launch(&SessionOptions {
//!     headless: false,
//!     state_dir: config.state_dir.clone(),
//! })
//! .await?;
//!
//! let page = session.new_page(config.delays).await?;
//! page.goto_dashboard().await?;
//! page.accept_cookies().await?;
//! page.ensure_logged_in().await?;
//!
//! let report = kudobot::run_harvest(&page, &HarvestOptions::from_config(&config)).await?;
//! println!("clicked {} controls", report.clicked);
//!
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod browser;
pub mod config;
pub mod harvest;
pub mod page;

pub use archive::{archive_map, AssetFetcher, FetchedAsset};
pub use browser::{BrowserSession, SessionOptions};
pub use config::{Config, DelayPolicy, SkipSet};
pub use harvest::{
    plan_control, plan_entry, run_harvest, ActionControl, ControlDecision, FeedEntry, FeedSurface,
    HarvestOptions, HarvestReport,
};
pub use page::FeedPage;

/// Result type for kudobot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the browser or persisting assets.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("browser error: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),

    #[error("page error: {0}")]
    Page(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
