use anyhow::Context;
use clap::Parser;
use kudobot::{
    BrowserSession, Config, FeedPage, HarvestOptions, SessionOptions,
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "kudobot")]
#[command(about = "Strava feed bot: give kudos, archive activity maps")]
#[command(version)]
struct Cli {
    /// Run the browser without a window (manual login fallback needs one)
    #[arg(long)]
    headless: bool,

    /// Keep running, one pass per interval, instead of a single pass
    #[arg(long)]
    repeat: bool,

    /// Verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let config = Config::from_env().context("invalid environment configuration")?;

    info!("Scrolls per pass: {}", config.expansions);
    if config.skip.is_empty() {
        info!("No athletes to skip");
    } else {
        info!("Athletes to skip: {}", config.skip.len());
    }
    match config.map_dir {
        Some(ref dir) => info!("Saving maps to {}", dir.display()),
        None => info!("Map archiving disabled"),
    }

    let session = BrowserSession::launch(&SessionOptions {
        headless: cli.headless,
        state_dir: config.state_dir.clone(),
    })
    .await
    .context("failed to launch browser")?;

    let result = tokio::select! {
        r = run(&session, &config, cli.repeat) => r,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    if let Err(e) = session.close().await {
        warn!("Browser close error: {e}");
    }

    result
}

async fn run(session: &BrowserSession, config: &Config, repeat: bool) -> anyhow::Result<()> {
    let page = session.new_page(config.delays).await?;
    page.goto_dashboard().await?;
    page.accept_cookies().await?;
    page.ensure_logged_in().await?;

    let options = HarvestOptions::from_config(config);
    loop {
        let report = run_pass(&page, &options).await?;
        info!(
            "Pass done: {} entries, {} clicked, {} already clicked, {} skipped, {} maps saved",
            report.entries, report.clicked, report.already_acted, report.skipped,
            report.maps_archived,
        );

        if !repeat {
            return Ok(());
        }

        info!("Sleeping {}s until next pass", config.interval.as_secs());
        tokio::time::sleep(config.interval).await;
        page.refresh().await?;
    }
}

async fn run_pass(
    page: &FeedPage,
    options: &HarvestOptions,
) -> anyhow::Result<kudobot::HarvestReport> {
    kudobot::run_harvest(page, options)
        .await
        .context("harvest pass failed")
}
