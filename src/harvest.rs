//! The feed-harvest loop: expand the feed a fixed number of times, then make
//! exactly one scan-and-act pass over every entry currently in the DOM.
//!
//! Expansion and action are deliberately decoupled into "expand N times, then
//! act once" rather than "act after each expansion": the action pass must see
//! the final settled feed state, because a control's position can shift as new
//! siblings are inserted above it mid-scroll. Reordering this risks acting
//! twice on one item or missing items entirely.
//!
//! The loop is generic over [`FeedSurface`] so the decision logic runs under
//! test against a scripted surface, with no browser involved.

use crate::archive::{archive_map, AssetFetcher};
use crate::config::SkipSet;
use crate::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One rendered activity card, read fresh from the live DOM each scan.
///
/// Entries carry no persisted identity; the same underlying activity may be
/// re-read across scans and must be skippable once acted on, which the
/// `filled` state of its controls provides.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct FeedEntry {
    /// Kudos controls in the entry, in DOM order. Group activities have one
    /// per athlete; non-activity cards have none.
    pub controls: Vec<ActionControl>,
    /// Source URL of the entry's map image, when the entry has exactly one.
    pub map_src: Option<String>,
}

/// One clickable kudos affordance with its resolved owner.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ActionControl {
    /// Owner display name; empty when the owner label could not be resolved.
    pub owner: String,
    /// Whether the control is already in the acknowledged visual state
    /// (the unfilled marker is absent).
    pub filled: bool,
}

/// The page primitives the harvest loop needs, named explicitly.
#[allow(async_fn_in_trait)]
pub trait FeedSurface {
    /// Reveal more of the feed: scroll to the bottom, settle, scroll back up
    /// slightly, settle again. Side effect only.
    async fn expand_once(&self) -> Result<()>;

    /// Read every feed entry currently present in the DOM, top to bottom.
    async fn snapshot(&self) -> Result<Vec<FeedEntry>>;

    /// Click control `control` of entry `entry`. Returns `false` when the
    /// element is no longer there (the live page mutated under us).
    async fn click_control(&self, entry: usize, control: usize) -> Result<bool>;
}

/// Options for one harvest run.
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    /// Number of feed expansions before the scan-and-act pass.
    pub expansions: u32,
    /// Owners to never act on.
    pub skip: SkipSet,
    /// Where to archive map images; `None` disables archiving.
    pub map_dir: Option<PathBuf>,
    /// Pause after each entry, to stay under the target's abuse heuristics.
    pub entry_pause: Duration,
}

impl HarvestOptions {
    /// Build from loaded configuration.
    pub fn from_config(config: &crate::Config) -> Self {
        Self {
            expansions: config.expansions,
            skip: config.skip.clone(),
            map_dir: config.map_dir.clone(),
            entry_pause: config.delays.entry_pause,
        }
    }
}

/// Counters from one scan-and-act pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarvestReport {
    /// Feed entries seen in the pass.
    pub entries: usize,
    /// Controls clicked.
    pub clicked: usize,
    /// Controls already in the acknowledged state.
    pub already_acted: usize,
    /// Controls skipped because their owner matched the skip set.
    pub skipped: usize,
    /// Map images newly archived.
    pub maps_archived: usize,
}

/// What to do with a single control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlDecision {
    /// Not yet acted and owner not excluded: click it.
    Click,
    /// Already in the acknowledged state: leave it alone.
    AlreadyActed,
    /// Owner matches the skip set: leave it alone.
    Skip,
}

/// Classify one control. The filled marker wins over everything: an
/// already-acted control is never clicked regardless of the skip set.
pub fn plan_control(control: &ActionControl, skip: &SkipSet) -> ControlDecision {
    if control.filled {
        ControlDecision::AlreadyActed
    } else if skip.matches(&control.owner) {
        ControlDecision::Skip
    } else {
        ControlDecision::Click
    }
}

/// Classify every control of an entry, in order.
pub fn plan_entry(entry: &FeedEntry, skip: &SkipSet) -> Vec<ControlDecision> {
    entry
        .controls
        .iter()
        .map(|control| plan_control(control, skip))
        .collect()
}

/// Run one full harvest: all expansions first, then a single scan-and-act
/// pass over the settled feed.
pub async fn run_harvest<S>(surface: &S, opts: &HarvestOptions) -> Result<HarvestReport>
where
    S: FeedSurface + AssetFetcher,
{
    for i in 0..opts.expansions {
        info!("Scrolling to the end {}/{}", i + 1, opts.expansions);
        surface.expand_once().await?;
    }

    scan_and_act(surface, opts).await
}

/// One pass over every entry currently in the DOM: archive the map first
/// (so the archive captures the item even when the action is skipped), then
/// act on each control at most once.
pub async fn scan_and_act<S>(surface: &S, opts: &HarvestOptions) -> Result<HarvestReport>
where
    S: FeedSurface + AssetFetcher,
{
    let entries = surface.snapshot().await?;
    debug!("Feed entries count {}", entries.len());

    let mut report = HarvestReport {
        entries: entries.len(),
        ..Default::default()
    };

    for (i, entry) in entries.iter().enumerate() {
        if let (Some(dir), Some(src)) = (&opts.map_dir, &entry.map_src) {
            if archive_map(surface, src, dir).await?.is_some() {
                report.maps_archived += 1;
            }
        }

        info!("Kudos buttons count {}", entry.controls.len());

        for (j, control) in entry.controls.iter().enumerate() {
            if control.owner.is_empty() && !control.filled {
                // Owner label missing from the DOM. Skip patterns cannot
                // match an unknown name, so the control stays clickable.
                warn!("Owner name missing for entry {} control {}", i, j);
            }
            info!("Owner: {}", control.owner);

            match plan_control(control, &opts.skip) {
                ControlDecision::AlreadyActed => {
                    info!("-> Already clicked.");
                    report.already_acted += 1;
                }
                ControlDecision::Skip => {
                    info!("-> Skipping.");
                    report.skipped += 1;
                }
                ControlDecision::Click => {
                    if surface.click_control(i, j).await? {
                        info!("-> Clicked.");
                        report.clicked += 1;
                    } else {
                        warn!("Control vanished before click: entry {} control {}", i, j);
                    }
                }
            }
        }

        if !opts.entry_pause.is_zero() {
            tokio::time::sleep(opts.entry_pause).await;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::FetchedAsset;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Op {
        Expand,
        Snapshot,
        Click(usize, usize),
        Fetch(String),
    }

    /// Scripted surface: serves a fixed snapshot and records every operation.
    struct ScriptedSurface {
        entries: Vec<FeedEntry>,
        ops: Mutex<Vec<Op>>,
    }

    impl ScriptedSurface {
        fn new(entries: Vec<FeedEntry>) -> Self {
            Self {
                entries,
                ops: Mutex::new(Vec::new()),
            }
        }

        fn ops(&self) -> Vec<Op> {
            self.ops.lock().unwrap().clone()
        }

        fn clicks(&self) -> Vec<(usize, usize)> {
            self.ops()
                .into_iter()
                .filter_map(|op| match op {
                    Op::Click(i, j) => Some((i, j)),
                    _ => None,
                })
                .collect()
        }

        fn fetches(&self) -> usize {
            self.ops()
                .iter()
                .filter(|op| matches!(op, Op::Fetch(_)))
                .count()
        }
    }

    impl FeedSurface for ScriptedSurface {
        async fn expand_once(&self) -> Result<()> {
            self.ops.lock().unwrap().push(Op::Expand);
            Ok(())
        }

        async fn snapshot(&self) -> Result<Vec<FeedEntry>> {
            self.ops.lock().unwrap().push(Op::Snapshot);
            Ok(self.entries.clone())
        }

        async fn click_control(&self, entry: usize, control: usize) -> Result<bool> {
            self.ops.lock().unwrap().push(Op::Click(entry, control));
            Ok(true)
        }
    }

    impl AssetFetcher for ScriptedSurface {
        async fn fetch(&self, url: &str) -> Result<FetchedAsset> {
            self.ops.lock().unwrap().push(Op::Fetch(url.to_string()));
            Ok(FetchedAsset {
                status: 200,
                content_type: Some("image/png".into()),
                body: vec![0x89, 0x50, 0x4e, 0x47],
            })
        }
    }

    fn control(owner: &str, filled: bool) -> ActionControl {
        ActionControl {
            owner: owner.to_string(),
            filled,
        }
    }

    fn entry(controls: Vec<ActionControl>) -> FeedEntry {
        FeedEntry {
            controls,
            map_src: None,
        }
    }

    fn opts(skip: SkipSet) -> HarvestOptions {
        HarvestOptions {
            expansions: 0,
            skip,
            map_dir: None,
            entry_pause: Duration::ZERO,
        }
    }

    #[test]
    fn test_plan_filled_control_never_clicked() {
        // The filled marker wins even when the skip set is empty or matching.
        let c = control("Jane Doe", true);
        assert_eq!(
            plan_control(&c, &SkipSet::default()),
            ControlDecision::AlreadyActed
        );
        assert_eq!(
            plan_control(&c, &SkipSet::parse("jane")),
            ControlDecision::AlreadyActed
        );
    }

    #[test]
    fn test_plan_skip_pattern_wins_over_unfilled() {
        let c = control("Bob Jones", false);
        assert_eq!(plan_control(&c, &SkipSet::parse("bob")), ControlDecision::Skip);
        assert_eq!(plan_control(&c, &SkipSet::parse("JONES")), ControlDecision::Skip);
    }

    #[test]
    fn test_plan_unfilled_unmatched_is_clicked() {
        let c = control("Jane Doe", false);
        assert_eq!(
            plan_control(&c, &SkipSet::parse("bob")),
            ControlDecision::Click
        );
    }

    #[test]
    fn test_plan_missing_owner_stays_clickable() {
        // An unresolvable owner cannot match a skip pattern; acting is the
        // loop's default.
        let c = control("", false);
        assert_eq!(
            plan_control(&c, &SkipSet::parse("bob,eve")),
            ControlDecision::Click
        );
    }

    #[test]
    fn test_plan_entry_multi_control() {
        let e = entry(vec![
            control("Alice Smith", false),
            control("Bob Jones", false),
        ]);
        let decisions = plan_entry(&e, &SkipSet::parse("bob"));
        assert_eq!(decisions, vec![ControlDecision::Click, ControlDecision::Skip]);
    }

    #[tokio::test]
    async fn test_all_expansions_precede_any_click() {
        let surface = ScriptedSurface::new(vec![
            entry(vec![control("Jane Doe", false)]),
            entry(vec![control("John Roe", false)]),
        ]);
        let options = HarvestOptions {
            expansions: 3,
            ..opts(SkipSet::default())
        };

        run_harvest(&surface, &options).await.unwrap();

        let ops = surface.ops();
        let last_expand = ops.iter().rposition(|op| *op == Op::Expand).unwrap();
        let first_click = ops
            .iter()
            .position(|op| matches!(op, Op::Click(_, _)))
            .unwrap();
        assert_eq!(ops.iter().filter(|op| **op == Op::Expand).count(), 3);
        assert!(last_expand < first_click);
    }

    #[tokio::test]
    async fn test_filled_entry_gets_zero_clicks() {
        let surface = ScriptedSurface::new(vec![entry(vec![control("Jane Doe", true)])]);

        let report = scan_and_act(&surface, &opts(SkipSet::default())).await.unwrap();

        assert!(surface.clicks().is_empty());
        assert_eq!(report.already_acted, 1);
        assert_eq!(report.clicked, 0);
    }

    #[tokio::test]
    async fn test_multi_control_entry_clicks_only_unskipped_owner() {
        let surface = ScriptedSurface::new(vec![entry(vec![
            control("Alice Smith", false),
            control("Bob Jones", false),
        ])]);

        let report = scan_and_act(&surface, &opts(SkipSet::parse("bob")))
            .await
            .unwrap();

        assert_eq!(surface.clicks(), vec![(0, 0)]);
        assert_eq!(report.clicked, 1);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_skipped_owner_never_clicked_even_when_unfilled() {
        let surface = ScriptedSurface::new(vec![
            entry(vec![control("Bob Jones", false)]),
            entry(vec![control("Bob Jones", true)]),
        ]);

        let report = scan_and_act(&surface, &opts(SkipSet::parse("bob")))
            .await
            .unwrap();

        assert!(surface.clicks().is_empty());
        assert_eq!(report.skipped, 1);
        assert_eq!(report.already_acted, 1);
    }

    #[tokio::test]
    async fn test_entry_without_controls_contributes_nothing() {
        let surface = ScriptedSurface::new(vec![entry(vec![]), entry(vec![control("A", false)])]);

        let report = scan_and_act(&surface, &opts(SkipSet::default())).await.unwrap();

        assert_eq!(report.entries, 2);
        assert_eq!(report.clicked, 1);
        assert_eq!(surface.clicks(), vec![(1, 0)]);
    }

    #[tokio::test]
    async fn test_missing_owner_control_clicked_without_error() {
        let surface = ScriptedSurface::new(vec![entry(vec![control("", false)])]);

        let report = scan_and_act(&surface, &opts(SkipSet::parse("bob")))
            .await
            .unwrap();

        assert_eq!(report.clicked, 1);
        assert_eq!(surface.clicks(), vec![(0, 0)]);
    }

    #[tokio::test]
    async fn test_scenario_three_entries_with_map_archive() {
        // Entry 1: single unfilled control, empty skip set -> clicked.
        // Entry 2: single filled control -> not clicked, no error.
        // Entry 3: no controls, one map image -> archived; a second run
        // fetches nothing new.
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            entry(vec![control("Jane Doe", false)]),
            entry(vec![control("John Roe", true)]),
            FeedEntry {
                controls: vec![],
                map_src: Some("https://maps.example.com/activity/xyz123.png".into()),
            },
        ];
        let surface = ScriptedSurface::new(entries.clone());
        let options = HarvestOptions {
            map_dir: Some(dir.path().to_path_buf()),
            ..opts(SkipSet::default())
        };

        let report = scan_and_act(&surface, &options).await.unwrap();

        assert_eq!(report.clicked, 1);
        assert_eq!(report.already_acted, 1);
        assert_eq!(report.maps_archived, 1);
        assert_eq!(surface.clicks(), vec![(0, 0)]);
        assert_eq!(surface.fetches(), 1);
        let archived = dir.path().join("xyz123.png");
        assert_eq!(std::fs::read(&archived).unwrap(), vec![0x89, 0x50, 0x4e, 0x47]);

        // Second pass over the same feed: the unfilled control was clicked on
        // the target, so the fresh snapshot would report it filled; the map is
        // already on disk, so no further fetch happens.
        let second = ScriptedSurface::new(vec![
            entry(vec![control("Jane Doe", true)]),
            entry(vec![control("John Roe", true)]),
            entries[2].clone(),
        ]);
        let report = scan_and_act(&second, &options).await.unwrap();
        assert_eq!(report.clicked, 0);
        assert_eq!(report.maps_archived, 0);
        assert_eq!(second.fetches(), 0);
    }

    #[tokio::test]
    async fn test_expansions_run_even_with_empty_feed() {
        // Expansion is unconditional; it never checks whether content appeared.
        let surface = ScriptedSurface::new(vec![]);
        let options = HarvestOptions {
            expansions: 2,
            ..opts(SkipSet::default())
        };

        let report = run_harvest(&surface, &options).await.unwrap();

        assert_eq!(report.entries, 0);
        assert_eq!(surface.ops(), vec![Op::Expand, Op::Expand, Op::Snapshot]);
    }
}
