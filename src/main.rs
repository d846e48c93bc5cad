mod config;
mod emit;
mod library;
mod logging;
mod naming;
mod path_validator;
mod sync;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};

use crate::{
    config::{Config, Overrides},
    emit::{
        DryRunSink, EmitOptions, EmitReport, FilesystemSink, Layout, OutputSink, PlaylistEmitter,
        clean_output_directory, list_playlist_files,
    },
    library::{LibraryExport, PlaylistForest},
    logging::setup_logging,
    naming::{NameSanitizer, UniqueNameResolver},
    path_validator::PathValidator,
    sync::{MountedShare, SyncSummary, sync_missing},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, env = "PLAYLIST_MIRROR_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Console log level (default: info)
    #[arg(long, default_value = "info", global = true, env = "LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// File log level (default: debug)
    #[arg(long, default_value = "debug", global = true)]
    log_file_level: log::LevelFilter,

    /// Path to log file
    #[arg(long, env = "PLAYLIST_MIRROR_LOG_FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Directory all referenced media files must live under
    #[arg(long, value_parser = is_directory, env = "CRATES_ROOT", global = true)]
    crates_root: Option<PathBuf>,

    /// JSON export of the playlist library
    #[arg(long, global = true)]
    library_export: Option<PathBuf>,

    /// Library root on the playback host, used in playlist entries
    #[arg(long, env = "DESTINATION_ROOT", global = true)]
    destination_root: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

fn is_directory(s: &str) -> Result<PathBuf, String> {
    let p: PathBuf = s.into();
    if p.is_dir() {
        Ok(p)
    } else {
        Err(format!("`{}` is not an existing directory", s))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write one .m3u file per playlist into the output directory
    CreatePlaylists {
        /// Where the playlist tree is written (replaced on every run)
        #[arg(short, long, env = "OUTPUT_DIR")]
        output_dir: Option<PathBuf>,

        /// Put every playlist directly in the output directory
        #[arg(long)]
        flat: bool,

        /// Log what would be written without touching the disk
        #[arg(long)]
        dry_run: bool,
    },
    /// Copy tracks referenced by playlists to the mounted playback library
    SyncFiles {
        /// Mounted playback library
        #[arg(short, long, value_parser = is_directory)]
        mount_dir: Option<PathBuf>,

        /// Only report missing files
        #[arg(long)]
        check_only: bool,
    },
    /// Create playlists, then sync the referenced tracks
    FullMigration {
        #[arg(short, long, env = "OUTPUT_DIR")]
        output_dir: Option<PathBuf>,

        #[arg(long)]
        flat: bool,

        /// Mounted playback library
        #[arg(short, long, value_parser = is_directory)]
        mount_dir: Option<PathBuf>,

        /// Skip copying files after the playlists are written
        #[arg(long)]
        skip_sync: bool,
    },
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
    /// Report problems with the current config
    Check,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    setup_logging(args.log_level, args.log_file.clone(), args.log_file_level)?;

    log::debug!("Playlist mirror starting");

    let mut overrides = Overrides {
        crates_root: args.crates_root,
        library_export: args.library_export,
        destination_root: args.destination_root,
        ..Default::default()
    };

    let config_commands = match args.command {
        Commands::Config(config_commands) => config_commands,
        command => {
            let (output_dir, mount_dir) = match &command {
                Commands::CreatePlaylists { output_dir, .. } => (output_dir.clone(), None),
                Commands::SyncFiles { mount_dir, .. } => (None, mount_dir.clone()),
                Commands::FullMigration {
                    output_dir,
                    mount_dir,
                    ..
                } => (output_dir.clone(), mount_dir.clone()),
                Commands::Config(_) => (None, None),
            };
            overrides.output_dir = output_dir;
            overrides.mount_dir = mount_dir;

            let config = load_config(args.config.as_deref(), overrides)?;
            config.ensure_usable()?;
            return run(command, &config);
        }
    };

    match config_commands {
        ConfigCommands::CreateDefault => {
            log::debug!("Creating default config");
            let path = Config::create_default()?;
            log::info!("Default config created at {}", path.display());
        }
        ConfigCommands::Path => match Config::config_path() {
            Some(path) => println!("{}", path.display()),
            None => println!("No default config path found"),
        },
        ConfigCommands::Check => {
            let config = load_config(args.config.as_deref(), overrides)?;
            let problems = config.check();
            if problems.is_empty() {
                println!("Config OK");
            } else {
                for problem in &problems {
                    println!("- {}", problem);
                }
                return Err(eyre!("Config has {} problem(s)", problems.len()));
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<Config> {
    log::debug!("Loading configuration");
    let mut config = match path {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
    .with_context(|| "Failed to load playlist-mirror config")?;
    config.apply(overrides);
    Ok(config)
}

fn run(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::CreatePlaylists { flat, dry_run, .. } => {
            create_playlists(config, layout_for(config, flat), dry_run)?;
        }
        Commands::SyncFiles { check_only, .. } => {
            let report = emit_playlists(config, config.layout, Output::DryRun)?;
            sync_files(config, &report, check_only)?;
        }
        Commands::FullMigration {
            flat, skip_sync, ..
        } => {
            let report = create_playlists(config, layout_for(config, flat), false)?;
            if skip_sync {
                log::info!("Skipping file sync");
            } else {
                sync_files(config, &report, false)?;
            }
        }
        Commands::Config(_) => {}
    }
    Ok(())
}

fn layout_for(config: &Config, flat: bool) -> Layout {
    if flat { Layout::Flat } else { config.layout }
}

fn load_forest(config: &Config) -> Result<PlaylistForest> {
    let export_path = config.library_export_path();
    log::info!("Reading library export {}", export_path.display());
    let export = LibraryExport::from_file(&export_path)?;
    let (forest, stats) = export.into_forest();

    if stats.deleted_playlists > 0 || stats.deleted_tracks > 0 {
        log::info!(
            "Skipped {} deleted playlists and {} deleted tracks",
            stats.deleted_playlists,
            stats.deleted_tracks
        );
    }
    if stats.detached_playlists > 0 {
        log::warn!(
            "Dropped {} playlists not attached to a root",
            stats.detached_playlists
        );
    }
    if stats.missing_tracks > 0 {
        log::warn!("Skipped {} unknown track references", stats.missing_tracks);
    }
    log::info!(
        "Loaded {} playlists with {} track entries",
        forest.len(),
        forest.track_count()
    );
    Ok(forest)
}

enum Output {
    Disk,
    DryRun,
}

/// Load the library, validate every track and name every playlist. `Disk`
/// replaces the output directory; `DryRun` only records what would be
/// written.
fn emit_playlists(config: &Config, layout: Layout, output: Output) -> Result<EmitReport> {
    let forest = load_forest(config)?;
    if forest.is_empty() {
        log::warn!("Library export contains no playlists");
    }

    let crates_root = config.crates_root_path();
    let validator = PathValidator::local(
        &crates_root,
        &config.destination_root,
        config.case_insensitive_paths,
    )
    .wrap_err(format!(
        "Failed to resolve crates root {}",
        crates_root.display()
    ))?;
    log::info!(
        "Rewriting tracks under {} to {}",
        validator.source_root().display(),
        validator.destination_root()
    );

    let resolver = UniqueNameResolver::new(
        NameSanitizer::new(config.max_name_bytes),
        config.case_insensitive_names,
        config.collision_bound,
    );
    let output_dir = config.output_dir_path();
    let mut options = EmitOptions::new(layout, &output_dir);
    options.flat_separator = config.flat_separator.clone();
    let emitter = PlaylistEmitter::new(&validator, resolver, options);

    let report = match output {
        Output::DryRun => {
            let mut sink = DryRunSink::default();
            let report = emit_into(emitter, &forest, &mut sink)?;
            log::debug!(
                "Dry run recorded {} directories and {} playlist files",
                sink.directories.len(),
                sink.files.len()
            );
            report
        }
        Output::Disk => {
            clean_output_directory(&output_dir, &[validator.source_root()])?;
            let report = emit_into(emitter, &forest, &mut FilesystemSink)?;
            let on_disk = list_playlist_files(&output_dir);
            for file in &on_disk {
                log::debug!("Wrote {}", file.display());
            }
            if on_disk.len() != report.playlists.len() {
                log::warn!(
                    "Expected {} playlist files in {}, found {}",
                    report.playlists.len(),
                    output_dir.display(),
                    on_disk.len()
                );
            }
            report
        }
    };

    for rejection in &report.rejections {
        log::warn!(
            "Rejected {} in '{}': {} ({})",
            rejection.path,
            rejection.playlist,
            rejection.reason,
            rejection.detail
        );
    }
    for raw in &report.fallback_names {
        log::warn!("'{}' had no usable characters, used a fallback name", raw);
    }
    Ok(report)
}

fn create_playlists(config: &Config, layout: Layout, dry_run: bool) -> Result<EmitReport> {
    let output = if dry_run { Output::DryRun } else { Output::Disk };
    let report = emit_playlists(config, layout, output)?;
    println!(
        "{} {} playlists with {} tracks in {} ({} rejected paths)",
        if dry_run { "Would create" } else { "Created" },
        report.playlists.len(),
        report.track_count(),
        config.output_dir_path().display(),
        report.rejections.len()
    );
    Ok(report)
}

fn emit_into<S: OutputSink>(
    emitter: PlaylistEmitter<'_, path_validator::LocalFilesystem>,
    forest: &PlaylistForest,
    sink: &mut S,
) -> Result<EmitReport> {
    emitter
        .emit(forest, sink)
        .wrap_err("Failed to write playlists")
}

fn sync_files(config: &Config, report: &EmitReport, check_only: bool) -> Result<SyncSummary> {
    let mount_dir = config
        .mount_dir_path()
        .ok_or(eyre!("No sync mount_dir configured (set [sync] mount_dir or pass --mount-dir)"))?;
    if !mount_dir.is_dir() {
        return Err(eyre!(
            "Sync mount {} is not a directory",
            mount_dir.display()
        ));
    }

    let plan = report.sync_plan();
    log::info!(
        "Checking {} files against {}",
        plan.len(),
        mount_dir.display()
    );
    let summary = sync_missing(&plan, &MountedShare::new(mount_dir), check_only);
    println!(
        "Checked {} files: {} missing, {} synced, {} failed, {} missing locally",
        summary.checked, summary.missing, summary.synced, summary.failed, summary.missing_locally
    );
    Ok(summary)
}
