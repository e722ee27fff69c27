//! Environment-driven configuration, the skip list, and the delay policy.

use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Case-insensitive substring patterns for owners whose activities are never
/// acted on. Parsed from a comma-separated string; empty segments are dropped.
#[derive(Debug, Clone, Default)]
pub struct SkipSet {
    patterns: Vec<String>,
}

impl SkipSet {
    /// Parse from a comma-separated string like `"john, doe"`.
    pub fn parse(raw: &str) -> Self {
        Self {
            patterns: raw
                .split(',')
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Build from individual patterns (mostly for tests).
    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Whether any pattern is a case-insensitive substring of `owner`.
    pub fn matches(&self, owner: &str) -> bool {
        let owner = owner.to_lowercase();
        self.patterns.iter().any(|p| owner.contains(p))
    }

    /// Number of patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the set has no patterns.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Named settle delays used against the live page.
///
/// The target renders asynchronously with no done-signal exposed over CDP, so
/// the flow relies on bounded waits. Every wait is named here rather than
/// scattered as magic sleeps; tests run with [`DelayPolicy::none`].
#[derive(Debug, Clone, Copy)]
pub struct DelayPolicy {
    /// How long to keep polling for the cookie consent dialog.
    pub consent_timeout: Duration,
    /// Poll interval while waiting for the consent dialog.
    pub consent_poll: Duration,
    /// Settle after a navigation.
    pub post_navigation: Duration,
    /// Settle after clicking the login provider button.
    pub login_settle: Duration,
    /// Window granted for a human to finish login out-of-band (2FA, captcha).
    pub manual_login_wait: Duration,
    /// Settle after scrolling to the bottom of the page.
    pub scroll_settle: Duration,
    /// Longer settle after the small upward scroll, while lazy content renders.
    pub render_settle: Duration,
    /// Pause between feed entries during scan-and-act.
    pub entry_pause: Duration,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self {
            consent_timeout: Duration::from_secs(3),
            consent_poll: Duration::from_millis(250),
            post_navigation: Duration::from_secs(1),
            login_settle: Duration::from_secs(2),
            manual_login_wait: Duration::from_secs(50),
            scroll_settle: Duration::from_secs(3),
            render_settle: Duration::from_secs(12),
            entry_pause: Duration::from_secs(3),
        }
    }
}

impl DelayPolicy {
    /// All delays zeroed. For tests.
    pub fn none() -> Self {
        Self {
            consent_timeout: Duration::ZERO,
            consent_poll: Duration::ZERO,
            post_navigation: Duration::ZERO,
            login_settle: Duration::ZERO,
            manual_login_wait: Duration::ZERO,
            scroll_settle: Duration::ZERO,
            render_settle: Duration::ZERO,
            entry_pause: Duration::ZERO,
        }
    }
}

/// Runtime configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of feed expansions before the scan-and-act pass.
    pub expansions: u32,
    /// Owners to never give kudos to.
    pub skip: SkipSet,
    /// Directory for archived activity map images, if archiving is enabled.
    pub map_dir: Option<PathBuf>,
    /// Sleep between passes in the repeating variant.
    pub interval: Duration,
    /// Persistent browser profile directory.
    pub state_dir: PathBuf,
    /// Settle delays against the live page.
    pub delays: DelayPolicy,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `NUMBER_OF_SCROLLS_TO_END` (default 5), `ATHLETES_TO_SKIP`
    /// (comma-separated), `SAVE_MAP_PATH`, `RUN_INTERVAL_SECONDS`
    /// (default 3600), `BROWSER_STATE_DIR` (default `browser-state`).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through a lookup function. Lets tests supply
    /// variables without touching process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let expansions = match lookup("NUMBER_OF_SCROLLS_TO_END") {
            Some(raw) => raw.trim().parse::<u32>().map_err(|_| {
                Error::Config(format!("NUMBER_OF_SCROLLS_TO_END: invalid integer '{raw}'"))
            })?,
            None => 5,
        };

        let skip = lookup("ATHLETES_TO_SKIP")
            .map(|raw| SkipSet::parse(&raw))
            .unwrap_or_default();

        let map_dir = lookup("SAVE_MAP_PATH")
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(PathBuf::from);

        let interval = match lookup("RUN_INTERVAL_SECONDS") {
            Some(raw) => {
                let secs = raw.trim().parse::<u64>().map_err(|_| {
                    Error::Config(format!("RUN_INTERVAL_SECONDS: invalid integer '{raw}'"))
                })?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(3600),
        };

        let state_dir = lookup("BROWSER_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("browser-state"));

        Ok(Self {
            expansions,
            skip,
            map_dir,
            interval,
            state_dir,
            delays: DelayPolicy::default(),
        })
    }
}
