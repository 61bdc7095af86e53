//! Command-line front end for the sluice mail gate
//!
//! - `send` delivers a message now, or spools it when `--deferrable` is given
//!   outside every delivery window
//! - `flush` delivers whatever is spooled, if a window is open
//! - `serve` flushes periodically until interrupted
//! - `queue` inspects and edits the spool

#[cfg(not(unix))]
compile_error!("Only unix is currently supported");

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sluice::{CONFIG_ENV, Sluice, find_config_file};
use sluice_common::{Message, logging};
use sluice_gate::{DeliveryError, DeliveryMode, DeliveryReceipt};
use sluice_spool::{SpoolError, SpoolHandle};

/// Hold outbound mail until a delivery window opens
#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(version)]
struct Cli {
    /// Configuration file (overrides `SLUICE_CONFIG` and the default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a message
    Send {
        #[arg(long)]
        from: String,

        /// One or more recipients
        #[arg(long, required = true, num_args = 1..)]
        to: Vec<String>,

        #[arg(long)]
        subject: String,

        #[arg(long)]
        body: String,

        /// Spool the message instead if no delivery window is open
        #[arg(long)]
        deferrable: bool,
    },
    /// Deliver spooled messages if a delivery window is open
    Flush,
    /// Flush on a timer until interrupted
    Serve,
    /// Inspect the spool
    Queue {
        #[command(subcommand)]
        action: Option<QueueAction>,
    },
}

#[derive(Subcommand, Debug, Default)]
enum QueueAction {
    /// List spooled messages, oldest first
    #[default]
    List,
    /// Print the number of spooled messages
    Count,
    /// Drop a message from the spool without delivering it
    Remove {
        /// Handle as printed by `queue list`
        handle: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let config_path = match cli.config {
        Some(path) => path,
        None => find_config_file(std::env::var(CONFIG_ENV).ok().as_deref())?,
    };
    let config = Sluice::load(&config_path)?;

    match cli.command {
        Commands::Send {
            from,
            to,
            subject,
            body,
            deferrable,
        } => cmd_send(config, from, to, subject, body, deferrable).await,
        Commands::Flush => cmd_flush(config).await,
        Commands::Serve => config.run().await,
        Commands::Queue { action } => cmd_queue(config, action.unwrap_or_default()).await,
    }
}

async fn cmd_send(
    config: Sluice,
    from: String,
    to: Vec<String>,
    subject: String,
    body: String,
    deferrable: bool,
) -> anyhow::Result<()> {
    let builder = Message::builder().from(from).subject(subject).body(body);
    let message = match <[String; 1]>::try_from(to) {
        Ok([single]) => builder.to(single),
        Err(many) => builder.to_list(many),
    }
    .build()?;

    let mode = if deferrable {
        DeliveryMode::Deferrable
    } else {
        DeliveryMode::Direct
    };

    match config.gate().await?.send(&message, mode).await? {
        DeliveryReceipt::Delivered(receipt) => println!("Delivered {}: {receipt}", message.id()),
        DeliveryReceipt::Queued(handle) => println!("Queued {} as {handle}", message.id()),
    }

    Ok(())
}

async fn cmd_flush(config: Sluice) -> anyhow::Result<()> {
    let gate = config.gate().await?;

    if !gate.is_open() {
        println!("Outside delivery windows {}, nothing flushed", gate.windows());
        return Ok(());
    }

    let report = match gate.flush().await {
        Ok(report) => report,
        Err(DeliveryError::Spool(SpoolError::Busy(path))) => {
            println!("A flush is already running over {path}, nothing flushed");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    println!("{report}");

    Ok(())
}

async fn cmd_queue(config: Sluice, action: QueueAction) -> anyhow::Result<()> {
    let spool = config.spool.open().await?;

    match action {
        QueueAction::List => {
            let handles = spool.handles().await?;
            if handles.is_empty() {
                println!("Spool is empty");
                return Ok(());
            }

            for handle in handles {
                match spool.read(&handle).await {
                    Ok(entry) => {
                        let queued_at = chrono::DateTime::<chrono::Local>::from(entry.enqueued_at);
                        println!(
                            "{handle}  {}  {} -> {}  {}",
                            queued_at.format("%Y-%m-%d %H:%M:%S"),
                            entry.message.sender(),
                            entry.message.recipients(),
                            entry.message.subject()
                        );
                    }
                    Err(SpoolError::NotFound(_)) => {}
                    Err(e) => println!("{handle}  <unreadable: {e}>"),
                }
            }
        }
        QueueAction::Count => println!("{}", spool.len().await?),
        QueueAction::Remove { handle } => {
            let handle: SpoolHandle = handle.parse().map_err(anyhow::Error::msg)?;
            spool.remove(&handle).await?;
            println!("Removed {handle}");
        }
    }

    Ok(())
}
