//! EternalMM - DOOM Eternal mod manager
//!
//! Command-line entry point. It initializes:
//! - Logging infrastructure (daily file rotation + optional console output)
//! - Manager configuration ([`ConfigManager`])
//! - State management ([`StateManager`]) and the [`ModRepository`]
//!
//! Every command starts from a fresh scan of `Mods` and `DisabledMods`.
//! Blocking filesystem work runs on tokio's blocking pool; `watch` keeps a
//! [`ChangeReconciler`] running until Ctrl+C.

use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use eternalmm::config::InjectorSettingsFile;
use eternalmm::models::ActivationState;
use eternalmm::{
    APP_NAME, BackupManager, BatchReport, ChangeReconciler, CollisionPolicy, ConfigManager,
    FsWatcher, GameLayout, ModEntry, ModMetadata, ModRepository, ModResult, StateChange,
    StateManager, VERSION,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Manage DOOM Eternal mods and their online safety
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// DOOM Eternal installation folder (overrides the configuration file)
    #[arg(short, long, global = true)]
    game_folder: Option<Utf8PathBuf>,

    /// Directory holding EternalModManager.yaml
    #[arg(long, global = true, default_value = ".")]
    config_dir: Utf8PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Create Mods/DisabledMods if they are missing
    #[arg(long, global = true)]
    create_missing: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lists mods in both directories
    List {
        /// Show descriptor details
        #[arg(short, long)]
        details: bool,
    },
    /// Shows the descriptor of one mod
    Info { name: String },
    /// Moves mods into the Mods directory
    Enable {
        names: Vec<String>,
        /// Replace files with the same name in the destination
        #[arg(short, long)]
        overwrite: bool,
    },
    /// Moves mods into the DisabledMods directory
    Disable {
        names: Vec<String>,
        #[arg(short, long)]
        overwrite: bool,
    },
    /// Enables all given mods if any is disabled, otherwise disables them
    Toggle {
        names: Vec<String>,
        #[arg(short, long)]
        overwrite: bool,
    },
    EnableAll {
        #[arg(short, long)]
        overwrite: bool,
    },
    DisableAll {
        #[arg(short, long)]
        overwrite: bool,
    },
    /// Moves .zip files into the Mods directory
    Install {
        paths: Vec<Utf8PathBuf>,
        #[arg(short, long)]
        overwrite: bool,
    },
    /// Deletes mods permanently
    Delete { names: Vec<String> },
    /// Copies the injector's game-file backups back over the originals
    RestoreBackups,
    /// Deletes the injector's game-file backups
    ResetBackups,
    /// Shows or changes the injector's online-safe setting
    OnlineSafe { state: Option<Toggle> },
    /// Prints an EternalMod.json template
    Template,
    /// Keeps the listing current until Ctrl+C
    Watch,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Toggle {
    On,
    Off,
}

fn policy(overwrite: bool) -> CollisionPolicy {
    if overwrite {
        CollisionPolicy::Overwrite
    } else {
        CollisionPolicy::Skip
    }
}

/// Run repository work on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> ModResult<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f)
        .await
        .context("Background task failed")??)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    if matches!(args.command, Command::Template) {
        println!("{}", ModMetadata::template_json());
        return Ok(ExitCode::SUCCESS);
    }

    let config_manager = ConfigManager::new(&args.config_dir)?;
    let mut config = config_manager.load_manager_config()?;
    if let Some(game_folder) = &args.game_folder {
        config.game_folder = game_folder.to_string();
    }
    config.debug_mode |= args.debug;

    let _guard = eternalmm::logging::setup_logging(&config)?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    if config.game_folder.is_empty() {
        bail!(
            "No game folder configured; pass --game-folder or set game_folder in {}",
            config_manager.config_path()
        );
    }

    let layout = GameLayout::new(&config.game_folder);
    let state = StateManager::new();
    let repo = Arc::new(ModRepository::for_game(layout.clone(), state.clone()));

    if let Err(e) = repo.check_directories() {
        if !args.create_missing {
            return Err(e).context("Run again with --create-missing to create the mod directories");
        }
        for dir in repo.create_missing_directories()? {
            println!("Created {}", dir);
        }
    }

    let settings = InjectorSettingsFile::for_game(&layout);
    if let Err(e) = repo.sync_online_safe(&settings) {
        tracing::warn!("Could not read injector settings: {}", e);
    }

    let scan_repo = Arc::clone(&repo);
    let summary = blocking(move || scan_repo.rescan()).await?;
    tracing::debug!(
        "Initial scan: {} mods, {} classified",
        summary.total,
        summary.classified
    );

    let outcome = run(args.command, &repo, &layout, &settings, config.busy_retry_ms).await;

    state.metrics().log_summary();
    outcome
}

async fn run(
    command: Command,
    repo: &Arc<ModRepository>,
    layout: &GameLayout,
    settings: &InjectorSettingsFile,
    busy_retry_ms: u64,
) -> Result<ExitCode> {
    let state = repo.state().clone();

    let report = match command {
        Command::List { details } => {
            print_listing(&state, details);
            return Ok(ExitCode::SUCCESS);
        }
        Command::Info { name } => {
            let Some(entry) = state.read(|s| s.find_by_name(&name).cloned()) else {
                bail!("No mod named {}", name);
            };
            print_details(&entry);
            return Ok(ExitCode::SUCCESS);
        }
        Command::Enable { names, overwrite } => {
            let items = resolve(&state, &names);
            warn_collisions(repo, &items, ActivationState::Active, overwrite);
            let repo = Arc::clone(repo);
            blocking(move || repo.activate(&items, policy(overwrite))).await?
        }
        Command::Disable { names, overwrite } => {
            let items = resolve(&state, &names);
            warn_collisions(repo, &items, ActivationState::Inactive, overwrite);
            let repo = Arc::clone(repo);
            blocking(move || repo.deactivate(&items, policy(overwrite))).await?
        }
        Command::Toggle { names, overwrite } => {
            let items = resolve(&state, &names);
            let repo = Arc::clone(repo);
            blocking(move || repo.toggle(&items, policy(overwrite))).await?
        }
        Command::EnableAll { overwrite } => {
            let repo = Arc::clone(repo);
            blocking(move || repo.set_all(ActivationState::Active, policy(overwrite))).await?
        }
        Command::DisableAll { overwrite } => {
            let repo = Arc::clone(repo);
            blocking(move || repo.set_all(ActivationState::Inactive, policy(overwrite))).await?
        }
        Command::Install { paths, overwrite } => {
            let repo = Arc::clone(repo);
            blocking(move || repo.install(&paths, policy(overwrite))).await?
        }
        Command::Delete { names } => {
            let items = resolve(&state, &names);
            let repo = Arc::clone(repo);
            blocking(move || repo.delete(&items)).await?
        }
        Command::RestoreBackups => {
            let manager = BackupManager::new(layout.clone(), state.clone());
            blocking(move || manager.restore()).await?
        }
        Command::ResetBackups => {
            let manager = BackupManager::new(layout.clone(), state.clone());
            blocking(move || manager.reset()).await?
        }
        Command::OnlineSafe { state: toggle } => {
            if let Some(toggle) = toggle {
                repo.set_online_safe(settings, matches!(toggle, Toggle::On), settings.path())
                    .context("Failed to update the injector settings")?;
            }
            let enabled = state.read(|s| s.online_safe_only);
            println!(
                "Online-safe mods only: {}",
                if enabled { "on" } else { "off" }
            );
            return Ok(ExitCode::SUCCESS);
        }
        Command::Watch => {
            watch(repo, layout, Duration::from_millis(busy_retry_ms)).await?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Template => {
            println!("{}", ModMetadata::template_json());
            return Ok(ExitCode::SUCCESS);
        }
    };

    Ok(print_report(&report))
}

/// Map user-supplied names to archive paths, reporting unknown names.
fn resolve(state: &StateManager, names: &[String]) -> Vec<Utf8PathBuf> {
    names
        .iter()
        .filter_map(|name| {
            let found = state.read(|s| s.find_by_name(name).map(|e| e.identity.clone()));
            if found.is_none() {
                eprintln!("No mod named {}", name);
            }
            found
        })
        .collect()
}

fn warn_collisions(
    repo: &ModRepository,
    items: &[Utf8PathBuf],
    target: ActivationState,
    overwrite: bool,
) {
    if overwrite {
        return;
    }
    for collision in repo.collisions(items, target) {
        eprintln!(
            "{} already exists; use --overwrite to replace it",
            collision
        );
    }
}

fn print_listing(state: &StateManager, details: bool) {
    let snapshot = state.snapshot();
    for entry in snapshot.entries.iter() {
        let marker = if entry.will_load(snapshot.online_safe_only) {
            "*"
        } else {
            " "
        };
        let validity = if entry.valid { "" } else { " (unreadable)" };
        println!(
            "{} [{}] {:<40} {}{}",
            marker,
            if entry.is_active() { "on " } else { "off" },
            entry.title(),
            entry.multiplayer_safe,
            validity
        );
        if details {
            print_details(entry);
        }
    }
    println!(
        "{} enabled, {} disabled, online-safe only: {}",
        snapshot.active_count(),
        snapshot.inactive_count(),
        snapshot.online_safe_only
    );
}

fn print_details(entry: &ModEntry) {
    let metadata = entry.metadata.clone().unwrap_or_default();
    println!("    File:             {}", entry.identity);
    println!("    Name:             {}", entry.title());
    println!("    Author:           {}", metadata.author);
    println!("    Description:      {}", metadata.description_display());
    println!("    Version:          {}", metadata.version_display());
    println!("    Load priority:    {}", metadata.load_priority);
    println!(
        "    Required version: {}",
        metadata.required_version_display()
    );
    println!("    Online play:      {}", entry.multiplayer_safe);
}

fn print_report(report: &BatchReport) -> ExitCode {
    if report.is_clean() {
        println!("{}", report.summary());
        ExitCode::SUCCESS
    } else {
        eprintln!("{}", report);
        ExitCode::FAILURE
    }
}

async fn watch(repo: &Arc<ModRepository>, layout: &GameLayout, retry_delay: Duration) -> Result<()> {
    let state = repo.state().clone();
    let mut changes = state.subscribe();
    let (handle, task) = ChangeReconciler::spawn(Arc::clone(repo), retry_delay);
    let watcher = FsWatcher::start(layout, handle.clone())?;

    println!("Watching {} directories, press Ctrl+C to stop", watcher.watched().len());
    print_listing(&state, false);

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
                if state.can_shutdown() {
                    break;
                }
                eprintln!("A backup operation is still running, waiting for it to finish");
            }
            change = changes.recv() => match change {
                Ok(StateChange::RepositoryRescanned { .. }) => print_listing(&state, false),
                Ok(change) => tracing::debug!("{:?}", change),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} state changes", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    drop(watcher);
    handle.shutdown();
    task.await.context("Reconciler task failed")?;
    Ok(())
}
