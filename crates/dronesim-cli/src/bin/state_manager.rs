//! Manage saved drone state files.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use dronesim_cli::state_dir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_BACKUP_FILE: &str = "drone_states_backup.json";
const DEFAULT_MAX_AGE_DAYS: u32 = 7;

/// List, clean, export and import drone state files
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// State directory (default: $DRONESIM_STATE_DIR or the current directory)
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Show every saved state
    List,
    /// Delete every state file
    CleanAll {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Delete states saved more than DAYS ago
    CleanOld {
        #[arg(default_value_t = DEFAULT_MAX_AGE_DAYS)]
        days: u32,
    },
    /// Write all states to a backup file
    Export {
        #[arg(default_value = DEFAULT_BACKUP_FILE)]
        file: PathBuf,
    },
    /// Restore states from a backup file
    Import {
        #[arg(default_value = DEFAULT_BACKUP_FILE)]
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("dronesim_cli={level}").parse()?),
        )
        .init();

    let dir = args
        .dir
        .or_else(|| std::env::var_os("DRONESIM_STATE_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));

    match args.command {
        Action::List => list(&dir),
        Action::CleanAll { yes } => clean_all(&dir, yes),
        Action::CleanOld { days } => {
            let days = if days == 0 { DEFAULT_MAX_AGE_DAYS } else { days };
            let removed = state_dir::clean_old(&dir, Duration::days(days.into()), Utc::now())?;
            for path in &removed {
                println!("Deleted {}", path.display());
            }
            if removed.is_empty() {
                println!("No state files older than {} days", days);
            } else {
                println!("Deleted {} stale state files", removed.len());
            }
            Ok(())
        }
        Action::Export { file } => {
            let backup = state_dir::export(&dir, Utc::now())?;
            if backup.states.is_empty() {
                println!("No state files in {}", dir.display());
                return Ok(());
            }
            state_dir::write_backup(&file, &backup)?;
            println!("Exported {} states to {}", backup.states.len(), file.display());
            Ok(())
        }
        Action::Import { file } => {
            let backup = state_dir::read_backup(&file)?;
            let written = state_dir::import(&dir, &backup)?;
            for path in &written {
                println!("Imported {}", path.display());
            }
            println!("Imported {} of {} states", written.len(), backup.states.len());
            Ok(())
        }
    }
}

fn list(dir: &std::path::Path) -> Result<()> {
    let entries = state_dir::list(dir)?;
    if entries.is_empty() {
        println!("No state files in {}", dir.display());
        return Ok(());
    }

    println!("{} state files in {}:\n", entries.len(), dir.display());
    for entry in entries {
        println!("{}", entry.file_name);
        match entry.record {
            Ok(record) => {
                let state = &record.state;
                println!("  drone:    {}", record.drone_id);
                println!("  saved:    {}", record.saved_at.to_rfc3339());
                println!(
                    "  position: ({:.6}, {:.6}) at {:.1} m",
                    state.position.lat, state.position.lon, state.position.alt
                );
                println!("  battery:  {:.1}%", state.battery);
                println!(
                    "  state:    {}{}",
                    state.flight_state,
                    if state.armed { " (armed)" } else { "" }
                );
            }
            Err(err) => println!("  unreadable: {}", err),
        }
        println!();
    }
    Ok(())
}

fn clean_all(dir: &std::path::Path, yes: bool) -> Result<()> {
    let count = state_dir::state_files(dir)?.len();
    if count == 0 {
        println!("No state files in {}", dir.display());
        return Ok(());
    }

    if !yes {
        print!("Delete all {} state files in {}? (y/N): ", count, dir.display());
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled");
            return Ok(());
        }
    }

    let removed = state_dir::clean_all(dir)?;
    println!("Deleted {} state files", removed.len());
    Ok(())
}
