use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use drive_index::commands::App;
use drive_index::config::Config;
use drive_index::logging;
use drive_index::scanner::{DEFAULT_FLUSH_EVERY, DEFAULT_MAX_WORKERS, ScanOptions};
use drive_index::server::{ServeOptions, serve};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Index a Drive hierarchy into SQLite and mirror category views back to Drive.
#[derive(Parser, Debug)]
#[command(name = "drive-index", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Create the database tables
    InitDb,

    /// Scan the trees below the seed folders into a JSON file
    Fetch {
        /// File with one folder id per line
        seeds_file: PathBuf,
        #[arg(long, default_value = "files.json")]
        json_file: PathBuf,
        #[arg(long, default_value_t = DEFAULT_MAX_WORKERS)]
        max_workers: usize,
        /// Records buffered before each write to the JSON file
        #[arg(long, default_value_t = DEFAULT_FLUSH_EVERY)]
        flush_every: usize,
        /// Also walk up to the parents of every visited node
        #[arg(long)]
        search_parent: bool,
    },

    /// Replace the indexed files with the content of a scan file
    Ingest { json_file: PathBuf },

    /// Bring the remote category mirror in line with the database
    Reconcile,

    /// Run fetch, ingest and reconcile periodically until interrupted
    Serve {
        #[arg(long)]
        seeds_file: Option<PathBuf>,
        #[arg(long)]
        scan_file: Option<PathBuf>,
        /// Seconds between cycles
        #[arg(long)]
        scan_interval: Option<u64>,
    },

    /// Use an existing folder as the mirror root
    SetRootFolder {
        root_folder_id: String,
        /// Replace the current root and drop the recorded mirror
        #[arg(long)]
        force: bool,
    },

    /// Create a new folder and use it as the mirror root
    CreateRootFolder {
        root_folder_name: String,
        /// Parent folder id for the new root
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        force: bool,
    },

    /// Load a category type from its JSON configuration
    LoadCategoryType { input_file: PathBuf },

    /// Delete a category type with its categories and mirror
    DeleteCategoryType { category_type_name: String },

    /// Write an alias template from the child folders of the listed folder ids
    GenAliasesForFile {
        input_file: PathBuf,
        #[arg(long, default_value = "category_aliases.json")]
        output_file: PathBuf,
    },

    /// Write an alias template from the folders linked to a category type
    GenAliasesForCategoryType {
        category_type_name: String,
        #[arg(long, default_value = "category_aliases.json")]
        output_file: PathBuf,
        /// File with extra folder names, one per line
        #[arg(long)]
        extra_aliases: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let _guard = logging::init(&config.log_filter, &config.log_file);

    let result = run(cli.command, config).await;
    if let Err(err) = &result {
        error!(error = %format!("{err:#}"), "command failed");
    }
    result
}

async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    let app = App::open(config).await?;
    let shutdown = CancellationToken::new();
    spawn_ctrl_c(shutdown.clone());

    match command {
        Command::InitDb => app.init_db().await?,
        Command::Fetch {
            seeds_file,
            json_file,
            max_workers,
            flush_every,
            search_parent,
        } => {
            let options = ScanOptions {
                max_workers,
                flush_every,
                search_parent,
                ..ScanOptions::default()
            };
            app.fetch(&seeds_file, &json_file, options, shutdown).await?;
        }
        Command::Ingest { json_file } => {
            let files = app.ingest(&json_file).await?;
            info!(files, "ingest finished");
        }
        Command::Reconcile => {
            let report = app.reconcile().await?;
            info!(
                created_folders = report.created_folders,
                created_shortcuts = report.created_shortcuts,
                deleted = report.deleted_remote,
                failures = report.failures,
                "reconcile finished"
            );
        }
        Command::Serve {
            seeds_file,
            scan_file,
            scan_interval,
        } => {
            let options = ServeOptions {
                seeds_file: seeds_file.unwrap_or_else(|| app.config.seeds_file.clone()),
                scan_file: scan_file.unwrap_or_else(|| app.config.scan_file.clone()),
                interval: scan_interval
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs)
                    .unwrap_or(app.config.scan_interval),
                scan: ScanOptions {
                    max_workers: app.config.max_workers,
                    flush_every: app.config.flush_every,
                    search_parent: app.config.search_parent,
                    ..ScanOptions::default()
                },
            };
            serve(&app, options, shutdown).await?;
        }
        Command::SetRootFolder {
            root_folder_id,
            force,
        } => app.set_root_folder(&root_folder_id, force).await?,
        Command::CreateRootFolder {
            root_folder_name,
            location,
            force,
        } => {
            app.create_root_folder(&root_folder_name, location.as_deref(), force)
                .await?
        }
        Command::LoadCategoryType { input_file } => {
            app.load_category_type(&input_file).await?;
        }
        Command::DeleteCategoryType { category_type_name } => {
            app.delete_category_type(&category_type_name).await?
        }
        Command::GenAliasesForFile {
            input_file,
            output_file,
        } => app.gen_aliases_for_file(&input_file, &output_file).await?,
        Command::GenAliasesForCategoryType {
            category_type_name,
            output_file,
            extra_aliases,
        } => {
            app.gen_aliases_for_category_type(
                &category_type_name,
                &output_file,
                extra_aliases.as_deref(),
            )
            .await?
        }
    }
    Ok(())
}

fn spawn_ctrl_c(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            shutdown.cancel();
        }
    });
}
