mod backoff;
mod drive;
#[cfg(test)]
pub(crate) mod memory;
mod resilient;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Node;

pub use backoff::Backoff;
pub use resilient::{ResilientRemote, RetryPolicy};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote object not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("transient remote failure: {0}")]
    Transient(String),
    #[error("remote failure: {0}")]
    Fatal(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChildPage {
    pub nodes: Vec<Node>,
    pub next_page_token: Option<String>,
}

/// Capability over the remote hierarchy the index is built from and mirrored into.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Node, RemoteError>;

    async fn list_children(
        &self,
        id: &str,
        page_token: Option<&str>,
    ) -> Result<ChildPage, RemoteError>;

    async fn create_folder(&self, name: &str, parent_id: Option<&str>)
    -> Result<Node, RemoteError>;

    async fn create_shortcut(
        &self,
        name: &str,
        target_id: &str,
        parent_id: Option<&str>,
    ) -> Result<Node, RemoteError>;

    async fn delete(&self, id: &str) -> Result<(), RemoteError>;
}
