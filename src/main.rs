//! HomeVault CLI - Snapshot and restore your personal files and settings
//!
//! The same binary serves two roles: the backup framework invokes
//! `hv export` / `hv import` with explicit home and backup directories,
//! and the user curates the manifest with the remaining commands.
//!
//! Usage:
//!   hv export --home <DIR> --dir <DIR>  - copy files and config snapshot out
//!   hv import --home <DIR> --dir <DIR>  - restore files and config
//!   hv add <KIND> <PATH>...             - add apps/paths/config entries
//!   hv list | status | apps             - inspect the manifest
//!   hv watch                            - follow external manifest edits

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use homevault::{
    apps,
    confstore::DconfStore,
    livesync::LiveSync,
    manifest::{Item, Manifest},
    paths::HomeDir,
    snapshot::{self, Action},
};
use std::path::PathBuf;
use std::time::Duration;

/// HomeVault - Snapshot and restore your personal files and settings
#[derive(Parser)]
#[command(name = "hv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy the backed-up files and a config snapshot into a backup root
    Export {
        /// Home directory to back up
        #[arg(long)]
        home: PathBuf,

        /// Backup root directory
        #[arg(long)]
        dir: PathBuf,
    },

    /// Restore files and config from a backup root (alias: restore)
    #[command(alias = "restore")]
    Import {
        /// Home directory to restore into
        #[arg(long)]
        home: PathBuf,

        /// Backup root directory
        #[arg(long)]
        dir: PathBuf,
    },

    /// Add items to the backup manifest
    Add {
        /// What the paths name
        kind: ItemKind,

        /// Desktop files, filesystem paths or config entries
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Remove the item at the given position
    Remove {
        /// Item index as shown by `hv list`
        index: usize,
    },

    /// Move an item to a new position
    Move {
        /// Current index
        from: usize,

        /// New index
        to: usize,
    },

    /// Show the manifest items
    List,

    /// Show manifest location, derived lists and last run times
    Status,

    /// List installed applications that declare backup data
    Apps,

    /// Follow the manifest file and report external edits
    Watch,
}

#[derive(Clone, Copy, ValueEnum)]
enum ItemKind {
    /// An application desktop file
    App,
    /// A filesystem path under home
    Path,
    /// A config key (`/a/b`) or group (`/a/b/`)
    Config,
}

impl ItemKind {
    fn as_str(self) -> &'static str {
        match self {
            ItemKind::App => "app",
            ItemKind::Path => "path",
            ItemKind::Config => "config",
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("homevault={}", log_level).parse().unwrap()),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Export { home, dir } => cmd_run(Action::Export, home, dir),
        Commands::Import { home, dir } => cmd_run(Action::Import, home, dir),
        Commands::Add { kind, paths } => cmd_add(kind, paths),
        Commands::Remove { index } => cmd_remove(index),
        Commands::Move { from, to } => cmd_move(from, to),
        Commands::List => cmd_list(),
        Commands::Status => cmd_status(),
        Commands::Apps => cmd_apps(),
        Commands::Watch => cmd_watch(),
    }
}

// ============ BACKUP RUN ============

fn cmd_run(action: Action, home: PathBuf, dir: PathBuf) -> Result<()> {
    let store = DconfStore::new();
    snapshot::run(action, &home, &dir, &store)?;
    let done = match action {
        Action::Export => "Backup complete!",
        Action::Import => "Restore complete!",
    };
    println!("{}", done.green().bold());
    Ok(())
}

// ============ MANIFEST EDITING ============

fn cmd_add(kind: ItemKind, paths: Vec<String>) -> Result<()> {
    let home = HomeDir::current();
    let file = Manifest::default_file();
    let mut manifest = Manifest::load(&file, &home)?;

    let mut added = 0;
    for path in &paths {
        match Item::create(kind.as_str(), path, &home) {
            Some(item) => {
                println!("  {} {}", "✓".green(), item.display_name(&home));
                manifest.push(item);
                added += 1;
            }
            None => {
                println!("  {} {}", "✗".red(), path);
            }
        }
    }

    if added > 0 {
        manifest.save(&file)?;
    }
    println!(
        "{} {} item(s) added",
        "Done:".green(),
        added.to_string().cyan()
    );
    Ok(())
}

fn cmd_remove(index: usize) -> Result<()> {
    let home = HomeDir::current();
    let file = Manifest::default_file();
    let mut manifest = Manifest::load(&file, &home)?;

    match manifest.remove_at(index) {
        Some(item) => {
            manifest.save(&file)?;
            println!("  {} Removed {}", "✓".green(), item.display_name(&home));
            Ok(())
        }
        None => bail!("No item at index {}", index),
    }
}

fn cmd_move(from: usize, to: usize) -> Result<()> {
    let home = HomeDir::current();
    let file = Manifest::default_file();
    let mut manifest = Manifest::load(&file, &home)?;

    if !manifest.move_item(from, to) {
        bail!("Cannot move {} -> {}", from, to);
    }
    manifest.save(&file)?;
    println!("  {} Moved {} -> {}", "✓".green(), from, to);
    Ok(())
}

// ============ INSPECTION ============

fn cmd_list() -> Result<()> {
    let home = HomeDir::current();
    let manifest = Manifest::load(&Manifest::default_file(), &home)?;

    if manifest.is_empty() {
        println!("{}", "The backup manifest is empty.".yellow());
        println!("Add something with {}.", "hv add path ~/Documents".cyan());
        return Ok(());
    }

    for (idx, item) in manifest.items().iter().enumerate() {
        println!(
            "  {}. [{}] {}",
            idx.to_string().cyan(),
            item.kind().dimmed(),
            item.display_name(&home).bold()
        );
    }
    Ok(())
}

fn cmd_status() -> Result<()> {
    let home = HomeDir::current();
    let file = Manifest::default_file();
    let manifest = Manifest::load(&file, &home)?;

    println!("{}", "HomeVault Status".cyan().bold());
    println!("  Manifest: {}", file.display().to_string().dimmed());
    println!("  Items: {}", manifest.len().to_string().cyan());

    let fmt = |t: Option<chrono::DateTime<chrono::Utc>>| match t {
        Some(t) => t.to_rfc3339(),
        None => "never".to_string(),
    };
    println!("  Last backup: {}", fmt(manifest.last_backup()).cyan());
    println!("  Last restore: {}", fmt(manifest.last_restore()).cyan());

    let files = manifest.file_list(&home, None);
    if !files.is_empty() {
        println!("\n{}", "Files:".cyan());
        for entry in &files {
            println!("  {}", home.beautify(entry));
        }
    }
    let config = manifest.config_list(None);
    if !config.is_empty() {
        println!("\n{}", "Config entries:".cyan());
        for entry in &config {
            println!("  {}", entry);
        }
    }
    Ok(())
}

fn cmd_apps() -> Result<()> {
    let home = HomeDir::current();
    let apps = apps::scan_applications(&home).context("Cannot scan applications")?;

    if apps.is_empty() {
        println!("{}", "No applications declare backup data.".yellow());
        return Ok(());
    }

    println!(
        "{} {} application(s) with backup data:\n",
        "Found".green(),
        apps.len().to_string().green().bold()
    );
    for (path, info) in &apps {
        println!("  {}", info.name.white().bold());
        println!("     {}", path.display().to_string().dimmed());
        for entry in &info.backup_paths {
            println!("     {}", home.beautify(entry));
        }
        for entry in &info.backup_config {
            println!("     {}", entry);
        }
    }
    Ok(())
}

// ============ LIVE SESSION ============

fn cmd_watch() -> Result<()> {
    let home = HomeDir::current();
    let file = Manifest::default_file();
    let mut sync = LiveSync::open(file.clone(), home)?;

    println!(
        "{} {} ({} items)",
        "Watching".cyan().bold(),
        file.display(),
        sync.manifest().len().to_string().cyan()
    );
    println!("{}", "Press Ctrl-C to stop.".dimmed());

    loop {
        if let Some(diff) = sync.poll() {
            if diff.items {
                println!(
                    "  {} items changed, now {}",
                    "→".cyan(),
                    sync.manifest().len().to_string().cyan()
                );
            }
            if diff.last_backup {
                println!("  {} last backup time changed", "→".cyan());
            }
            if diff.last_restore {
                println!("  {} last restore time changed", "→".cyan());
            }
        }
        std::thread::sleep(Duration::from_millis(200));
    }
}
