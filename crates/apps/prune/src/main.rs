//! Prune - find the senders filling up a Gmail mailbox
//!
//! Mirrors message metadata locally, ranks senders by the space their
//! messages take, and trashes everything from a chosen sender.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use mail::{
    GmailAuth, GmailClient, GmailCredentials, MailboxSession, SyncAction, SyncSettings,
    database_path,
};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Directory holding the mailbox databases
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bring the local mirror up to date
    Sync,
    /// Show mirror size and sync cursor
    Status,
    /// List senders by total message size
    Senders {
        /// Number of senders to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Move every message from a sender to the trash
    Delete {
        /// Sender email address, exactly as listed by `senders`
        #[arg(long)]
        sender: String,
        /// Actually trash the messages; without it only a summary is shown
        #[arg(long)]
        yes: bool,
    },
    /// Forget the stored Gmail authorization
    Logout,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    config::init().context("Failed to initialize config directory")?;

    let credentials = GmailCredentials::load()?;
    let auth = GmailAuth::new(credentials)?;

    if let Command::Logout = cli.command {
        auth.logout()?;
        println!("Logged out");
        return Ok(());
    }

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => config::data_dir().context("Could not determine data directory")?,
    };
    let options = SyncSettings::load()?.to_options();
    let client = GmailClient::new(Arc::new(auth));
    let session = MailboxSession::connect(Arc::new(client), &data_dir, options)?;

    match cli.command {
        Command::Sync => {
            let _lock = PassLock::acquire(&database_path(&data_dir, session.account()))?;
            let stats = session.sync()?;
            println!(
                "{} sync: {} new, {} removed, {} refreshed, {} skipped, {} failed ({} ms)",
                stats.mode,
                stats.messages_stored,
                stats.messages_removed,
                stats.messages_refreshed,
                stats.messages_skipped,
                stats.abandoned,
                stats.duration_ms
            );
        }
        Command::Status => print_status(&session)?,
        Command::Senders { limit, json } => {
            let senders = session.senders_by_size()?;
            let shown = &senders[..senders.len().min(limit)];
            if json {
                println!("{}", serde_json::to_string_pretty(shown)?);
            } else {
                for sender in shown {
                    println!(
                        "{:>10}  {:>6}  {}",
                        format_size(sender.total_size),
                        sender.count,
                        sender.sender
                    );
                }
            }
        }
        Command::Delete { sender, yes } => {
            let aggregates = session.aggregate_by_sender()?;
            let Some(aggregate) = aggregates.get(&sender) else {
                println!("No stored messages from {sender}");
                return Ok(());
            };

            if !yes {
                println!(
                    "Would trash {} messages ({}) from {}. Re-run with --yes to proceed.",
                    aggregate.count,
                    format_size(aggregate.total_size),
                    sender
                );
                return Ok(());
            }

            let _lock = PassLock::acquire(&database_path(&data_dir, session.account()))?;
            let report = session.delete_messages(&aggregate.message_ids)?;
            println!("Trashed {} messages from {}", report.removed.len(), sender);
            if !report.is_complete() {
                for (id, err) in &report.failed {
                    error!("Message {} not trashed: {}", id, err);
                }
                anyhow::bail!("{} messages could not be trashed", report.failed.len());
            }
        }
        Command::Logout => unreachable!("handled before connecting"),
    }

    Ok(())
}

fn print_status(session: &MailboxSession) -> Result<()> {
    println!("Account:  {}", session.account());
    println!("Messages: {}", session.message_count()?);

    match session.sync_state()? {
        Some(state) => {
            println!(
                "Cursor:   history {} (synced {})",
                state.history_id,
                state
                    .last_sync_at
                    .with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M")
            );
            if !state.is_recent() {
                warn!("Last sync is over a week old; the next pass will likely need a full fetch");
            }
        }
        None => println!("Cursor:   none"),
    }

    match session.sync_action()? {
        SyncAction::FullFetch => println!("Next:     full sync"),
        SyncAction::HistoryReplay { history_id } => {
            println!("Next:     incremental sync from history {history_id}")
        }
    }
    Ok(())
}

/// Exclusive marker held while a pass mutates the mirror
///
/// Created next to the database and removed on drop. A stale file left by
/// a crashed run has to be deleted by hand.
struct PassLock {
    path: PathBuf,
}

impl PassLock {
    fn acquire(db_path: &Path) -> Result<Self> {
        let mut path = db_path.as_os_str().to_owned();
        path.push(".lock");
        let path = PathBuf::from(path);

        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| {
                format!(
                    "Another prune run holds {} (delete it if no run is active)",
                    path.display()
                )
            })?;
        info!("Acquired {}", path.display());
        Ok(Self { path })
    }
}

impl Drop for PassLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn format_size(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
