//! `racefeed watch`: follow a live feed in the terminal.
//!
//! Both views are seeded from the one-shot endpoint, which also supplies the
//! race heading. With `--driver`, the view then follows that driver's stream.
//! Without it, every driver of the race is merged into a table seeded with
//! placeholders for the roster.

use std::sync::Arc;

use clap::Args;
use console::{style, Term};
use racefeed::config::ConfigFile;
use racefeed::{
    subscribe_all, subscribe_driver, ConsumerError, Driver, DriverSummary, DriverView, FeedClient,
    Race, Reconciler, Roster, Subscription, TirePosition,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::common::{feed_client, runtime, shutdown_on_ctrl_c};
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Follow a single driver instead of the whole field
    #[arg(long)]
    pub driver: Option<String>,

    /// API root of the feed server (default: [client] url)
    #[arg(long)]
    pub url: Option<String>,

    /// Known driver name shown before any data arrives; repeat for each
    /// driver (default: [roster] drivers)
    #[arg(long = "roster", value_name = "NAME")]
    pub roster: Vec<String>,
}

pub fn run(args: WatchArgs, config: ConfigFile) -> Result<(), CliError> {
    let client = Arc::new(feed_client(args.url, &config)?);
    let roster = if args.roster.is_empty() {
        config.roster
    } else {
        Roster::new(args.roster)
    };

    runtime()?.block_on(async move {
        let shutdown = shutdown_on_ctrl_c();
        match args.driver {
            Some(name) => watch_driver(client, name, shutdown).await,
            None => watch_all(client, roster, shutdown).await,
        }
    })
}

/// Most recent race from the one-shot endpoint, or `None` if there is none yet.
async fn seed_race(client: &FeedClient, driver: Option<&str>) -> Result<Option<Race>, CliError> {
    match client.fetch_races(driver).await {
        Ok(races) => Ok(races.into_iter().next()),
        Err(ConsumerError::NoRace) => {
            info!(driver = ?driver, "No race yet, waiting for the stream");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

async fn watch_driver(
    client: Arc<FeedClient>,
    name: String,
    shutdown: CancellationToken,
) -> Result<(), CliError> {
    let term = Term::stdout();
    let mut view = DriverView::new(name.clone());

    let race = seed_race(&client, Some(name.as_str())).await?;
    let heading = race_heading(race.as_ref());
    match race.as_ref().and_then(|r| r.driver(&name)) {
        Some(driver) => {
            view.apply(driver.clone());
        }
        None => info!(driver = %name, "Driver not in the race yet"),
    }
    redraw(&term, &format_driver_view(&heading, &view))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = subscribe_driver(client, name, move |driver| {
        let _ = tx.send(driver);
    });

    let result = pump(&mut rx, &subscription, &shutdown, |driver| {
        if view.apply(driver) {
            redraw(&term, &format_driver_view(&heading, &view))?;
        }
        Ok(())
    })
    .await;

    subscription.unsubscribe();
    result
}

async fn watch_all(
    client: Arc<FeedClient>,
    roster: Roster,
    shutdown: CancellationToken,
) -> Result<(), CliError> {
    let term = Term::stdout();
    let mut reconciler = Reconciler::new(&roster);

    let race = seed_race(&client, None).await?;
    if let Some(race) = &race {
        reconciler.apply(&race.drivers);
    }
    let heading = race_heading(race.as_ref());
    redraw(&term, &format_table(&heading, &reconciler))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = subscribe_all(client, move |drivers| {
        let _ = tx.send(drivers);
    });

    let result = pump(&mut rx, &subscription, &shutdown, |drivers| {
        reconciler.apply(&drivers);
        redraw(&term, &format_table(&heading, &reconciler))
    })
    .await;

    subscription.unsubscribe();
    result
}

/// Feed queued updates to `on_update` until shutdown or the feed closes.
///
/// Updates already queued when the feed closes are still handed over, so the
/// last frame the server sent is always drawn.
async fn pump<T, F>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    subscription: &Subscription,
    shutdown: &CancellationToken,
    mut on_update: F,
) -> Result<(), CliError>
where
    F: FnMut(T) -> Result<(), CliError>,
{
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            Some(update) = rx.recv() => on_update(update)?,
            _ = subscription.closed() => {
                warn!("Feed closed by the server");
                return Ok(());
            }
        }
    }
}

fn redraw(term: &Term, text: &str) -> Result<(), CliError> {
    if term.is_term() {
        term.clear_screen()?;
    }
    term.write_line(text)?;
    Ok(())
}

// =============================================================================
// Formatting
// =============================================================================

fn race_heading(race: Option<&Race>) -> String {
    match race {
        Some(race) => match race.started_at_utc() {
            Some(started) => format!(
                "Race {}, started {}",
                race.id,
                started.format("%H:%M:%S UTC")
            ),
            None => format!("Race {}", race.id),
        },
        None => "Waiting for a race".to_string(),
    }
}

fn format_table(heading: &str, reconciler: &Reconciler) -> String {
    let mut lines = vec![
        format!(
            "{} {}/{} drivers reporting",
            style("Live timing").cyan().bold(),
            reconciler.reporting(),
            reconciler.len()
        ),
        heading.to_string(),
        String::new(),
        format!(
            "{:<22} {:<16} {:>4} {:>6} {:>8} {:>6} {:>6} {:>6} {:>6} {:>7}",
            "DRIVER", "TEAM", "LAP", "CORNER", "TIME", "FL", "FR", "RL", "RR", "RPM"
        ),
    ];

    for summary in reconciler.summaries() {
        let row = format_row(summary);
        if summary.has_data() {
            lines.push(row);
        } else {
            lines.push(style(row).dim().to_string());
        }
    }
    lines.join("\n")
}

fn format_row(summary: &DriverSummary) -> String {
    let Some(corner) = &summary.last_corner else {
        return format!(
            "{:<22} {:<16} {:>4} {:>6} {:>8} {:>6} {:>6} {:>6} {:>6} {:>7}",
            summary.name, summary.team, "-", "-", "-", "-", "-", "-", "-", "-"
        );
    };

    let temps: Vec<String> = TirePosition::ALL
        .iter()
        .map(|p| reading(corner.tire.temperature(*p), 0))
        .collect();

    format!(
        "{:<22} {:<16} {:>4} {:>6} {:>8.3} {:>6} {:>6} {:>6} {:>6} {:>7.0}",
        summary.name,
        summary.team,
        summary.lap_label,
        corner.corner_index,
        corner.lap_time_seconds,
        temps[0],
        temps[1],
        temps[2],
        temps[3],
        corner.tire.rpm
    )
}

fn format_driver_view(heading: &str, view: &DriverView) -> String {
    let samples = view.driver().map_or(0, Driver::sample_count);
    format_driver(heading, &view.summary(), samples)
}

fn format_driver(heading: &str, summary: &DriverSummary, samples: usize) -> String {
    let name = style(&summary.name).cyan().bold();
    let title = if summary.team.is_empty() {
        format!("{}  {}", name, heading)
    } else {
        format!("{} ({})  {}", name, summary.team, heading)
    };

    let Some(corner) = &summary.last_corner else {
        return format!("{}\n\nWaiting for telemetry...", title);
    };

    let mut lines = vec![
        title,
        String::new(),
        format!("Lap:      {}", summary.lap_label),
        format!("Corner:   {}", corner.corner_index),
        format!("Time:     {:.3} s", corner.lap_time_seconds),
        format!("RPM:      {:.0}", corner.tire.rpm),
        format!("Samples:  {}", samples),
        String::new(),
        "Tire      Temp (C)  Pressure (psi)".to_string(),
    ];
    for position in TirePosition::ALL {
        lines.push(format!(
            "{:<9} {:>8} {:>15}",
            position.short_label(),
            reading(corner.tire.temperature(position), 1),
            reading(corner.tire.pressure(position), 1)
        ));
    }
    lines.join("\n")
}

fn reading(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "-".to_string(),
    }
}
