use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::aggregator::{AggregateError, CategoryAggregator};
use crate::interchange::{InterchangeError, read_json};
use crate::model::Node;
use crate::store::{FileTable, LocalStore, StoreError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("aggregation failed: {0}")]
    Aggregate(#[from] AggregateError),
    #[error("cannot read scan file: {0}")]
    Input(#[from] InterchangeError),
}

/// Loads a scan into staging, aggregates it there, then swaps it in as authoritative.
pub struct IngestPipeline {
    store: LocalStore,
    aggregator: CategoryAggregator,
}

impl IngestPipeline {
    pub fn new(store: LocalStore) -> Self {
        Self {
            aggregator: CategoryAggregator::new(store.clone()),
            store,
        }
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<u64, IngestError> {
        let records: Vec<Node> = read_json(path).await?;
        info!(path = %path.display(), records = records.len(), "loaded scan file");
        self.ingest(&records).await
    }

    /// Returns the number of distinct records now in the authoritative table.
    pub async fn ingest(&self, records: &[Node]) -> Result<u64, IngestError> {
        self.store.clear_staging().await?;
        let staged = self.store.insert_files(FileTable::Staging, records).await?;
        info!(
            staged,
            duplicates = records.len() as u64 - staged,
            "staged scan records"
        );

        for category_type in self.store.list_category_types().await? {
            self.aggregator
                .aggregate(&category_type, FileTable::Staging)
                .await?;
        }

        self.store.swap_staging().await?;
        info!(files = staged, "ingest committed");
        Ok(staged)
    }
}
