use async_trait::async_trait;
use drive_core::{ApiErrorClass, DriveClient, DriveError, DriveFile};

use super::{ChildPage, RemoteError, RemoteStore};
use crate::model::Node;

#[async_trait]
impl RemoteStore for DriveClient {
    async fn get(&self, id: &str) -> Result<Node, RemoteError> {
        let file = self.get_file(id).await.map_err(remote_error)?;
        Ok(node_from_drive_file(file))
    }

    async fn list_children(
        &self,
        id: &str,
        page_token: Option<&str>,
    ) -> Result<ChildPage, RemoteError> {
        let list = DriveClient::list_children(self, id, page_token)
            .await
            .map_err(remote_error)?;
        Ok(ChildPage {
            nodes: list.files.into_iter().map(node_from_drive_file).collect(),
            next_page_token: list.next_page_token.filter(|token| !token.is_empty()),
        })
    }

    async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<Node, RemoteError> {
        let file = DriveClient::create_folder(self, name, parent_id)
            .await
            .map_err(remote_error)?;
        Ok(node_from_drive_file(file))
    }

    async fn create_shortcut(
        &self,
        name: &str,
        target_id: &str,
        parent_id: Option<&str>,
    ) -> Result<Node, RemoteError> {
        let file = DriveClient::create_shortcut(self, name, target_id, parent_id)
            .await
            .map_err(remote_error)?;
        Ok(node_from_drive_file(file))
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        self.delete_file(id).await.map_err(remote_error)
    }
}

pub(crate) fn node_from_drive_file(file: DriveFile) -> Node {
    Node {
        parent_id: file.parent_id().map(str::to_string),
        owner: file.owner_email().map(str::to_string),
        size: file.size_bytes(),
        shortcut_target_id: file.shortcut_target_id().map(str::to_string),
        id: file.id,
        name: file.name,
        mime_type: file.mime_type,
        created_time: file.created_time,
        modified_time: file.modified_time,
        md5_checksum: file.md5_checksum,
    }
}

fn remote_error(err: DriveError) -> RemoteError {
    let message = err.to_string();
    match err.classification() {
        Some(ApiErrorClass::NotFound) => RemoteError::NotFound(message),
        Some(ApiErrorClass::PermissionDenied | ApiErrorClass::Auth) => {
            RemoteError::PermissionDenied(message)
        }
        _ if err.is_retryable() => RemoteError::Transient(message),
        _ => RemoteError::Fatal(message),
    }
}
