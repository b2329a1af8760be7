//! # timemap
//!
//! A terminal planner that organizes tasks into *threads* (areas of life such
//! as "Work" or "Health") and keeps finished work as history.
//!
//! ## Features
//!
//! *   **Three task shapes**: plain tasks, fixed-time events, and assignments
//!     that have to fit before a deadline.
//! *   **Repetition**: any task can repeat with a period and carry
//!     per-period occurrences (appointments or deadlines).
//! *   **History**: finished and expired tasks move out of the working set
//!     into append-only history on every command.
//! *   **Urgency-based Sorting**: listings put the closest, most important
//!     work first.
//!
//! ## Usage
//!
//! ```bash
//! # Plain task in the Work thread
//! timemap add "Write report" --thread Work --importance 7
//!
//! # Fixed event
//! timemap add "Dentist" --thread Health --event --start "2025-12-01 09:00" --end "2025-12-01 10:00"
//!
//! # Assignment due Friday, expected to take 3 hours
//! timemap add "Tax return" --thread Admin --deadline 2025-12-05 --hours 3
//!
//! # List pending work, or one thread's history
//! timemap list
//! timemap list --thread Work --history
//!
//! # Complete / move / re-prioritize (ids accept a unique prefix)
//! timemap complete 3f2a
//! timemap move 3f2a "2025-12-02 14:00"
//! timemap importance 3f2a 9
//! ```
//!
//! ## Data Storage
//!
//! Threads are stored as JSON under your local data directory:
//! *   Linux: `~/.local/share/timemap/threads/{future,past}/<thread>.json`
//! *   macOS: `~/Library/Application Support/timemap/...`
//! *   Windows: `%APPDATA%\timemap\...`
//!
//! You can override the root with `--root` or the `TIMEMAP_ROOT` environment
//! variable. Times without an offset are read as UTC.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use timemap::commands::*;
use timemap::models::DEFAULT_IMPORTANCE;
use timemap::storage::{StateManager, StoreConfig};

#[derive(Parser)]
#[command(name = "timemap")]
#[command(about = "Tasks organized into threads of life", long_about = None)]
struct Cli {
    /// Store root (defaults to $TIMEMAP_ROOT or the user data directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new task
    Add {
        /// Task name (quoted if it has spaces)
        name: String,
        /// Thread the task belongs to (created if missing)
        #[arg(short, long, default_value = "General")]
        thread: String,
        /// Start time, YYYY-MM-DD [HH:MM[:SS]] [±HHMM]
        #[arg(short, long)]
        start: Option<String>,
        /// End time
        #[arg(short, long)]
        end: Option<String>,
        /// Deadline; makes the task an assignment
        #[arg(short, long)]
        deadline: Option<String>,
        /// Expected duration of an assignment in hours, e.g. 1.5
        #[arg(short = 'H', long)]
        hours: Option<f64>,
        /// Importance from 0 to 10 (defaults to the thread's)
        #[arg(short, long)]
        importance: Option<f64>,
        /// Make a fixed-time event (needs --start and --end)
        #[arg(long)]
        event: bool,
        /// Repeat every N hours
        #[arg(short, long)]
        repeat: Option<f64>,
    },
    /// List pending tasks sorted by urgency
    List {
        /// Only this thread
        #[arg(short, long)]
        thread: Option<String>,
        /// Show history instead of pending work
        #[arg(long)]
        history: bool,
    },
    /// Mark a task as complete
    Complete {
        id: String,
    },
    /// Remove a task from the working set
    Remove {
        id: String,
    },
    /// Change a task's start (and optionally end) time
    Move {
        id: String,
        start: String,
        #[arg(short, long)]
        end: Option<String>,
    },
    /// Set a task's importance (0-10)
    Importance {
        id: String,
        value: f64,
    },
    /// Make a task repeat, or stop it repeating
    #[command(group(ArgGroup::new("mode").required(true).args(["every", "off"])))]
    Repeat {
        id: String,
        /// Period in hours
        #[arg(short, long)]
        every: Option<f64>,
        /// Stop repeating
        #[arg(long)]
        off: bool,
    },
    /// Manage occurrences (appointments / deadlines) of a task
    Occurrence {
        #[command(subcommand)]
        command: OccurrenceCommands,
    },
    /// Manage threads
    Thread {
        #[command(subcommand)]
        command: ThreadCommands,
    },
    /// Save and reload, moving finished work into history
    Refresh,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, powershell, elvish)
        shell: String,
    },
}

#[derive(Subcommand)]
enum OccurrenceCommands {
    /// Add an occurrence
    Add {
        id: String,
        when: String,
        /// Length in minutes; records a time chunk instead of an instant
        #[arg(short, long)]
        minutes: Option<i64>,
    },
    /// Remove the occurrences at a time
    Remove {
        id: String,
        when: String,
    },
}

#[derive(Subcommand)]
enum ThreadCommands {
    /// Add a new thread
    Add {
        name: String,
        /// Default importance of its tasks
        #[arg(short, long, default_value_t = DEFAULT_IMPORTANCE)]
        importance: f64,
    },
    /// List threads
    List,
    /// Remove a thread (its history is kept)
    Remove {
        name: String,
    },
}

fn run(cli: Cli) -> timemap::Result<()> {
    let command = cli.command.unwrap_or(Commands::List { thread: None, history: false });
    if let Commands::Completions { shell } = &command {
        let shell_enum = match shell.as_str() {
            "bash" => Shell::Bash,
            "zsh" => Shell::Zsh,
            "fish" => Shell::Fish,
            "powershell" => Shell::PowerShell,
            "elvish" => Shell::Elvish,
            _ => {
                eprintln!("Unsupported shell: {}", shell);
                return Ok(());
            }
        };
        let mut cmd = Cli::command();
        generate(shell_enum, &mut cmd, "timemap", &mut io::stdout());
        return Ok(());
    }

    let config = match cli.root {
        Some(root) => StoreConfig::new(root),
        None => StoreConfig::from_env(),
    };
    let mut manager = StateManager::open(config)?;
    let loaded = manager.load()?;
    for e in &loaded.corrupt {
        eprintln!("Warning: {e}");
    }

    match command {
        Commands::Add { name, thread, start, end, deadline, hours, importance, event, repeat } => {
            let new = NewTask { name, thread, start, end, deadline, hours, importance, event, repeat_hours: repeat };
            cmd_add(&mut manager, new, false).map(|_| ())
        }
        Commands::List { thread, history } => cmd_list(&manager, thread.as_deref(), history),
        Commands::Complete { id } => cmd_complete(&mut manager, &id, false),
        Commands::Remove { id } => cmd_remove(&mut manager, &id, false),
        Commands::Move { id, start, end } => cmd_move(&mut manager, &id, &start, end, false),
        Commands::Importance { id, value } => cmd_importance(&mut manager, &id, value, false),
        Commands::Repeat { id, every, .. } => cmd_repeat(&mut manager, &id, every, false),
        Commands::Occurrence { command } => match command {
            OccurrenceCommands::Add { id, when, minutes } => cmd_occurrence_add(&mut manager, &id, &when, minutes, false),
            OccurrenceCommands::Remove { id, when } => cmd_occurrence_remove(&mut manager, &id, &when, false),
        },
        Commands::Thread { command } => match command {
            ThreadCommands::Add { name, importance } => cmd_thread_add(&mut manager, name, importance, false),
            ThreadCommands::List => {
                cmd_thread_list(&manager);
                Ok(())
            }
            ThreadCommands::Remove { name } => cmd_thread_remove(&mut manager, &name, false),
        },
        Commands::Refresh => cmd_refresh(&mut manager, false).map(|_| ()),
        Commands::Completions { .. } => Ok(()),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_repeat_needs_a_mode() {
        assert!(Cli::try_parse_from(["timemap", "repeat", "3f2a"]).is_err());
        assert!(Cli::try_parse_from(["timemap", "repeat", "3f2a", "--every", "24", "--off"]).is_err());

        let cli = Cli::try_parse_from(["timemap", "repeat", "3f2a", "--every", "24"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Repeat { every: Some(h), off: false, .. }) if h == 24.0));
        let cli = Cli::try_parse_from(["timemap", "repeat", "3f2a", "--off"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Repeat { every: None, off: true, .. })));
    }
}
