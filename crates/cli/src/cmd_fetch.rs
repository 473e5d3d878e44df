//! `deskpulse fetch <channel>`: print the hydrated collection once.

use deskpulse_client::RealtimeHub;

use crate::render::{self, Render};
use crate::OutputFormat;

pub async fn run<R: Render>(hub: &RealtimeHub, format: OutputFormat) -> anyhow::Result<()> {
    let records = hub.fetch_all::<R>().await?;
    match format {
        OutputFormat::Table => {
            println!("{}", render::table(&records));
            println!("{} {}", records.len(), R::CHANNEL);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
    }
    Ok(())
}
