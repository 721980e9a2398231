use thiserror::Error;
use tracing::{debug, error};

use crate::store::{FileQuery, FileTable, LocalStore};

/// Preconditions a command can require before touching the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityLevel {
    /// The store answers queries.
    Base,
    /// Every table exists.
    Structure,
    /// At least one category type is configured.
    CategoryOnly,
    /// A level-0 mirror root is recorded.
    RootOnly,
    /// At least one file is indexed.
    Files,
    /// Structure, category types and a root.
    Full,
}

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("store is unreachable: {0}")]
    Unreachable(String),
    #[error("missing tables: {}", .0.join(", "))]
    MissingTables(Vec<String>),
    #[error("no category types configured, load one with load-category-type")]
    NoCategoryTypes,
    #[error("no mirror root recorded, run set-root-folder or create-root-folder")]
    MissingRoot,
    #[error("no files indexed, run fetch and ingest first")]
    NoFiles,
}

pub async fn check(store: &LocalStore, level: IntegrityLevel) -> Result<(), IntegrityError> {
    let result = run(store, level).await;
    match &result {
        Ok(()) => debug!(?level, "integrity check passed"),
        Err(err) => error!(?level, error = %err, "integrity check failed"),
    }
    result
}

async fn run(store: &LocalStore, level: IntegrityLevel) -> Result<(), IntegrityError> {
    reachable(store).await?;
    match level {
        IntegrityLevel::Base => Ok(()),
        IntegrityLevel::Structure => structure(store).await,
        IntegrityLevel::CategoryOnly => category_types(store).await,
        IntegrityLevel::RootOnly => root(store).await,
        IntegrityLevel::Files => files(store).await,
        IntegrityLevel::Full => {
            structure(store).await?;
            category_types(store).await?;
            root(store).await
        }
    }
}

async fn reachable(store: &LocalStore) -> Result<(), IntegrityError> {
    store
        .ping()
        .await
        .map_err(|err| IntegrityError::Unreachable(err.to_string()))
}

async fn structure(store: &LocalStore) -> Result<(), IntegrityError> {
    let missing = store
        .missing_tables()
        .await
        .map_err(|err| IntegrityError::Unreachable(err.to_string()))?;
    if missing.is_empty() {
        Ok(())
    } else {
        Err(IntegrityError::MissingTables(missing))
    }
}

async fn category_types(store: &LocalStore) -> Result<(), IntegrityError> {
    let types = store
        .list_category_types()
        .await
        .map_err(|err| IntegrityError::Unreachable(err.to_string()))?;
    if types.is_empty() {
        Err(IntegrityError::NoCategoryTypes)
    } else {
        Ok(())
    }
}

async fn root(store: &LocalStore) -> Result<(), IntegrityError> {
    match store.root_mirror().await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(IntegrityError::MissingRoot),
        Err(err) => Err(IntegrityError::Unreachable(err.to_string())),
    }
}

async fn files(store: &LocalStore) -> Result<(), IntegrityError> {
    let count = store
        .count_files(FileTable::Primary, FileQuery::everything())
        .await
        .map_err(|err| IntegrityError::Unreachable(err.to_string()))?;
    if count > 0 {
        Ok(())
    } else {
        Err(IntegrityError::NoFiles)
    }
}
