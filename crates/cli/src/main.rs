//! DeskPulse CLI
//!
//! Terminal consumer of the realtime client: watch a dashboard channel live,
//! fetch a collection once, or print shell completions.

mod cmd_fetch;
mod cmd_watch;
mod logging;
mod paths;
mod render;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use deskpulse_client::RealtimeHub;
use deskpulse_protocol::{
    ActivityEntry, ActivityLogEntry, Channel, Client, Event, Member, Ticket,
};
use tracing::info;

use crate::cmd_watch::{ConsoleNotifier, WatchOptions};
use crate::settings::{FileSettings, FlagOverrides};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "deskpulse", version, about = "Watch DeskPulse dashboard channels live")]
struct Cli {
    /// Data directory (default: $DESKPULSE_DATA_DIR or ~/.deskpulse)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Dashboard origin, e.g. https://desk.example.com
    #[arg(long, global = true)]
    origin: Option<String>,

    /// Member id for member-scoped lists (default: all)
    #[arg(long, global = true)]
    member: Option<String>,

    /// Status for ticket and event lists (default: all)
    #[arg(long, global = true)]
    status: Option<String>,

    /// Mirror log lines to stderr (-v warn, -vv info, -vvv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream live changes for a channel
    Watch {
        #[arg(value_parser = parse_channel)]
        channel: Channel,

        /// Print a notification line for every created record
        #[arg(long)]
        notify: bool,

        /// Only show tickets for this role (name or id)
        #[arg(long)]
        role: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Print a channel's full collection
    Fetch {
        #[arg(value_parser = parse_channel)]
        channel: Channel,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Generate shell completions
    Completions { shell: clap_complete::Shell },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

fn parse_channel(value: &str) -> Result<Channel, String> {
    value.parse()
}

/// Bind a record type alias for the channel, then evaluate the body.
macro_rules! with_record_type {
    ($channel:expr, $record:ident => $body:expr) => {
        match $channel {
            Channel::Activities => {
                type $record = ActivityEntry;
                $body
            }
            Channel::Tickets => {
                type $record = Ticket;
                $body
            }
            Channel::Events => {
                type $record = Event;
                $body
            }
            Channel::Members => {
                type $record = Member;
                $body
            }
            Channel::Clients => {
                type $record = Client;
                $body
            }
            Channel::ActivityLogs => {
                type $record = ActivityLogEntry;
                $body
            }
        }
    };
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "deskpulse", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = paths::init_data_dir(cli.data_dir.as_deref())?;
    let log_settings = logging::LogSettings::resolve(cli.verbose, |key| std::env::var(key).ok());
    let logging = logging::init_logging(&paths::log_dir()?, &log_settings)?;

    let file = FileSettings::load(&paths::config_path()?)?;
    let flags = FlagOverrides {
        origin: cli.origin,
        member: cli.member,
        status: cli.status,
    };
    let config = settings::resolve(&file, &flags, |key| std::env::var(key).ok());

    info!(
        component = "cli",
        event = "cli.started",
        version = VERSION,
        run_id = %logging.run_id,
        data_dir = %data_dir.display(),
        log_path = %logging.log_path.display(),
        origin = %config.origin,
        member_scope = %config.member_scope,
        status_scope = %config.status_scope,
    );

    let hub = RealtimeHub::builder(config)
        .notifier(Arc::new(ConsoleNotifier))
        .build()?;
    let hub = RealtimeHub::install_global(Arc::new(hub));

    match cli.command {
        Command::Watch {
            channel,
            notify,
            role,
            format,
        } => {
            let options = WatchOptions {
                notify,
                role,
                format,
            };
            with_record_type!(channel, R => cmd_watch::run::<R>(hub.clone(), options).await)?;
        }
        Command::Fetch { channel, format } => {
            with_record_type!(channel, R => cmd_fetch::run::<R>(&hub, format).await)?;
        }
        Command::Completions { .. } => {}
    }

    hub.disconnect_all();
    Ok(())
}
