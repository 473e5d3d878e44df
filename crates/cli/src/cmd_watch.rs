//! `deskpulse watch <channel>`: keep a local copy of one collection live
//! and print each change as it lands.

use std::sync::Arc;

use console::style;
use deskpulse_client::{LocalCollection, Notifier, RealtimeHub, SubscribeOptions};
use deskpulse_protocol::Channel;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::render::{self, Render};
use crate::OutputFormat;

pub struct WatchOptions {
    pub notify: bool,
    pub role: Option<String>,
    pub format: OutputFormat,
}

/// Prints notifications as highlighted terminal lines.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, channel: Channel, text: &str) {
        println!(
            "{} {} {}",
            style("●").magenta().bold(),
            style(channel.as_str()).dim(),
            style(text).bold()
        );
    }
}

pub async fn run<R: Render>(hub: Arc<RealtimeHub>, options: WatchOptions) -> anyhow::Result<()> {
    let mut local = match hub.fetch_all::<R>().await {
        Ok(records) => LocalCollection::from_records(records),
        Err(e) => {
            warn!(
                component = "cli",
                event = "cli.watch.initial_fetch_failed",
                channel = %R::CHANNEL,
                error = %e,
            );
            eprintln!(
                "{} initial load failed ({e}); starting empty",
                style("warning:").yellow().bold()
            );
            LocalCollection::new()
        }
    };

    if options.format == OutputFormat::Table {
        println!("{}", render::table(local.records()));
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = hub.subscribe(
        SubscribeOptions::<R>::new()
            .notifications(options.notify)
            .role_filter(options.role)
            .forward_to(tx),
    )?;

    info!(
        component = "cli",
        event = "cli.watch.started",
        channel = %R::CHANNEL,
        rows = local.len(),
    );
    eprintln!(
        "{} {} ({} rows). Ctrl-C to stop.",
        style("watching").green().bold(),
        R::CHANNEL,
        local.len()
    );

    let mut last_error: Option<String> = None;
    let mut status_tick = tokio::time::interval(std::time::Duration::from_secs(1));

    loop {
        tokio::select! {
            delivery = rx.recv() => {
                let Some(delivery) = delivery else { break };
                let shown = delivery.clone();
                let outcome = local.apply(delivery);
                match options.format {
                    OutputFormat::Table => {
                        println!("{}", render::change_line(&shown, outcome, local.len()));
                    }
                    OutputFormat::Json => println!("{}", render::change_json(&shown)),
                }
            }
            _ = status_tick.tick() => {
                let error = subscription.error();
                if error != last_error {
                    if let Some(e) = &error {
                        eprintln!("{} {e}", style("connection:").red());
                    }
                    last_error = error;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    subscription.unsubscribe();
    subscription.disconnect();
    eprintln!("{} {} rows", style("stopped").dim(), local.len());
    Ok(())
}
