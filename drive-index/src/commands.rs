use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use drive_core::DriveClient;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::categories::{CategoryService, LoadReport, write_alias_template};
use crate::config::Config;
use crate::ingest::IngestPipeline;
use crate::integrity::{self, IntegrityLevel};
use crate::interchange::{read_id_lines, read_name_lines};
use crate::model::{MirrorInput, MirrorLevel, MirrorNode, Node};
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::remote::ResilientRemote;
use crate::scanner::{ScanOptions, ScanReport, Scanner};
use crate::store::{LocalStore, StoreError};

#[derive(Debug, Error)]
pub enum RootError {
    #[error("root folder already set to {0}, use --force to replace it")]
    AlreadySet(String),
    #[error("folder {0} is not available")]
    NotFound(String),
    #[error("{0} is not a folder")]
    NotAFolder(String),
    #[error("could not create root folder '{0}'")]
    CreateFailed(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Records an existing remote folder as the level-0 mirror root. Any previous mirror rows
/// are dropped.
pub async fn set_root_folder(
    store: &LocalStore,
    remote: &ResilientRemote,
    folder_id: &str,
    force: bool,
) -> Result<MirrorNode, RootError> {
    ensure_replaceable(store, force).await?;
    let node = remote
        .get(folder_id)
        .await
        .ok_or_else(|| RootError::NotFound(folder_id.to_string()))?;
    if !node.is_folder() {
        return Err(RootError::NotAFolder(folder_id.to_string()));
    }
    record_root(store, &node).await
}

/// Creates a fresh remote folder (under `location` when given) and records it as root.
pub async fn create_root_folder(
    store: &LocalStore,
    remote: &ResilientRemote,
    name: &str,
    location: Option<&str>,
    force: bool,
) -> Result<MirrorNode, RootError> {
    ensure_replaceable(store, force).await?;
    let node = remote
        .create_folder(name, location)
        .await
        .ok_or_else(|| RootError::CreateFailed(name.to_string()))?;
    record_root(store, &node).await
}

async fn ensure_replaceable(store: &LocalStore, force: bool) -> Result<(), RootError> {
    match store.root_mirror().await? {
        Some(current) if !force => Err(RootError::AlreadySet(current.drive_file_id)),
        _ => Ok(()),
    }
}

async fn record_root(store: &LocalStore, node: &Node) -> Result<MirrorNode, RootError> {
    let cleared = store.clear_mirror().await?;
    if cleared > 0 {
        warn!(rows = cleared, "previous mirror rows dropped");
    }
    let root = store
        .add_mirror_node(&MirrorInput::created(
            node,
            node.parent_id.as_deref(),
            None,
            MirrorLevel::Root,
        ))
        .await?;
    info!(id = %root.drive_file_id, name = %root.name, "root folder recorded");
    Ok(root)
}

/// Shared state for every command: configuration plus an open store.
pub struct App {
    pub config: Config,
    pub store: LocalStore,
}

impl App {
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let store = LocalStore::open(&config.database_path)
            .await
            .with_context(|| format!("failed to open {}", config.database_path.display()))?;
        Ok(Self { config, store })
    }

    pub async fn remote(&self) -> anyhow::Result<ResilientRemote> {
        let token = self.config.access_token().await?;
        let client = match &self.config.api_base {
            Some(base) => DriveClient::with_base_url(base, token),
            None => DriveClient::new(token),
        }
        .context("failed to build Drive client")?;
        Ok(ResilientRemote::new(Arc::new(client)))
    }

    pub async fn require(&self, level: IntegrityLevel) -> anyhow::Result<()> {
        integrity::check(&self.store, level)
            .await
            .with_context(|| format!("store is not ready ({level:?})"))
    }

    pub async fn init_db(&self) -> anyhow::Result<()> {
        self.store.init().await.context("migrations failed")?;
        info!(path = %self.config.database_path.display(), "database initialised");
        Ok(())
    }

    pub async fn fetch(
        &self,
        seeds_file: &Path,
        output: &Path,
        options: ScanOptions,
        cancel: CancellationToken,
    ) -> anyhow::Result<ScanReport> {
        let seeds = read_id_lines(seeds_file).await?;
        info!(
            seeds = seeds.len(),
            output = %output.display(),
            workers = options.max_workers,
            flush_every = options.flush_every,
            search_parent = options.search_parent,
            "starting scan"
        );
        let scanner = Scanner::new(self.remote().await?, options).with_cancellation(cancel);
        let report = scanner.scan(&seeds, output).await?;
        info!(
            visited = report.visited,
            written = report.written,
            flushes = report.flushes,
            "scan finished"
        );
        Ok(report)
    }

    pub async fn ingest(&self, path: &Path) -> anyhow::Result<u64> {
        self.require(IntegrityLevel::Base).await?;
        let files = IngestPipeline::new(self.store.clone())
            .ingest_file(path)
            .await
            .with_context(|| format!("ingest of {} failed", path.display()))?;
        Ok(files)
    }

    pub async fn reconcile(&self) -> anyhow::Result<ReconcileReport> {
        self.require(IntegrityLevel::RootOnly).await?;
        let report = Reconciler::new(self.store.clone(), self.remote().await?)
            .reconcile_all()
            .await?;
        Ok(report)
    }

    pub async fn set_root_folder(&self, folder_id: &str, force: bool) -> anyhow::Result<()> {
        self.require(IntegrityLevel::Structure).await?;
        set_root_folder(&self.store, &self.remote().await?, folder_id, force).await?;
        Ok(())
    }

    pub async fn create_root_folder(
        &self,
        name: &str,
        location: Option<&str>,
        force: bool,
    ) -> anyhow::Result<()> {
        self.require(IntegrityLevel::Structure).await?;
        create_root_folder(&self.store, &self.remote().await?, name, location, force).await?;
        Ok(())
    }

    pub async fn load_category_type(&self, path: &Path) -> anyhow::Result<LoadReport> {
        self.require(IntegrityLevel::Structure).await?;
        let report = CategoryService::new(self.store.clone())
            .load_category_type_file(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))?;
        Ok(report)
    }

    pub async fn delete_category_type(&self, name: &str) -> anyhow::Result<()> {
        self.require(IntegrityLevel::Structure).await?;
        self.require(IntegrityLevel::CategoryOnly).await?;
        CategoryService::new(self.store.clone())
            .delete_category_type(name)
            .await?;
        Ok(())
    }

    pub async fn gen_aliases_for_file(&self, ids_file: &Path, output: &Path) -> anyhow::Result<()> {
        self.require(IntegrityLevel::Files).await?;
        let ids = read_id_lines(ids_file).await?;
        if ids.is_empty() {
            anyhow::bail!("no folder ids in {}", ids_file.display());
        }
        let names = CategoryService::new(self.store.clone())
            .suggest_aliases(Some(&ids))
            .await?;
        write_alias_template(&names, output).await?;
        Ok(())
    }

    pub async fn gen_aliases_for_category_type(
        &self,
        name: &str,
        output: &Path,
        extra_aliases: Option<&Path>,
    ) -> anyhow::Result<()> {
        self.require(IntegrityLevel::Files).await?;
        let extra = match extra_aliases {
            Some(path) => read_name_lines(path).await?,
            None => Vec::new(),
        };
        let names = CategoryService::new(self.store.clone())
            .suggest_aliases_for_type(name, &extra)
            .await?;
        if names.is_empty() {
            anyhow::bail!("no folders found for category type '{name}'");
        }
        write_alias_template(&names, output).await?;
        Ok(())
    }
}
