use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use drive_core::{FOLDER_MIME_TYPE, SHORTCUT_MIME_TYPE};

use super::{ChildPage, RemoteError, RemoteStore};
use crate::model::Node;

#[derive(Debug, Clone, Copy)]
pub(crate) enum FailureKind {
    NotFound,
    PermissionDenied,
    Transient,
}

#[derive(Default)]
struct MemoryState {
    nodes: Vec<Node>,
    failures: HashMap<String, (FailureKind, usize)>,
    get_calls: HashMap<String, usize>,
    next_id: u64,
    created: Vec<Node>,
    deleted: Vec<String>,
}

/// In-process drive used by tests. Children are listed in insertion order, two per page.
pub(crate) struct MemoryRemote {
    state: Mutex<MemoryState>,
    page_size: usize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            page_size: 2,
        }
    }

    pub fn insert(&self, node: Node) {
        let mut state = self.state.lock().unwrap();
        state.nodes.retain(|n| n.id != node.id);
        state.nodes.push(node);
    }

    pub fn fail(&self, id: &str, kind: FailureKind, times: usize) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(id.to_string(), (kind, times));
    }

    pub fn get_calls(&self, id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.get_calls.get(id).copied().unwrap_or(0)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().unwrap().nodes.iter().any(|n| n.id == id)
    }

    pub fn node(&self, id: &str) -> Option<Node> {
        let state = self.state.lock().unwrap();
        state.nodes.iter().find(|n| n.id == id).cloned()
    }

    pub fn children(&self, id: &str) -> Vec<Node> {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .iter()
            .filter(|n| n.parent_id.as_deref() == Some(id))
            .cloned()
            .collect()
    }

    pub fn created(&self) -> Vec<Node> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn reset_counters(&self) {
        let mut state = self.state.lock().unwrap();
        state.created.clear();
        state.deleted.clear();
        state.get_calls.clear();
    }

    fn check_failure(state: &mut MemoryState, id: &str) -> Result<(), RemoteError> {
        let Some((kind, remaining)) = state.failures.get_mut(id) else {
            return Ok(());
        };
        if *remaining == 0 {
            return Ok(());
        }
        *remaining -= 1;
        Err(match kind {
            FailureKind::NotFound => RemoteError::NotFound(id.to_string()),
            FailureKind::PermissionDenied => RemoteError::PermissionDenied(id.to_string()),
            FailureKind::Transient => RemoteError::Transient(id.to_string()),
        })
    }

    fn create(&self, name: &str, mime_type: &str, target: Option<&str>, parent: Option<&str>) -> Node {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let node = Node {
            id: format!("created-{}", state.next_id),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            parent_id: parent.map(str::to_string),
            owner: None,
            created_time: Some("2024-05-01T12:00:00.000Z".to_string()),
            modified_time: None,
            size: None,
            shortcut_target_id: target.map(str::to_string),
            md5_checksum: None,
        };
        state.nodes.push(node.clone());
        state.created.push(node.clone());
        node
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn get(&self, id: &str) -> Result<Node, RemoteError> {
        let mut state = self.state.lock().unwrap();
        *state.get_calls.entry(id.to_string()).or_default() += 1;
        Self::check_failure(&mut state, id)?;
        state
            .nodes
            .iter()
            .find(|n| n.id == id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    async fn list_children(
        &self,
        id: &str,
        page_token: Option<&str>,
    ) -> Result<ChildPage, RemoteError> {
        let mut state = self.state.lock().unwrap();
        Self::check_failure(&mut state, id)?;
        let offset: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let children: Vec<Node> = state
            .nodes
            .iter()
            .filter(|n| n.parent_id.as_deref() == Some(id))
            .cloned()
            .collect();
        let end = (offset + self.page_size).min(children.len());
        let nodes = children.get(offset..end).unwrap_or_default().to_vec();
        let next_page_token = (end < children.len()).then(|| end.to_string());
        Ok(ChildPage {
            nodes,
            next_page_token,
        })
    }

    async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<Node, RemoteError> {
        Ok(self.create(name, FOLDER_MIME_TYPE, None, parent_id))
    }

    async fn create_shortcut(
        &self,
        name: &str,
        target_id: &str,
        parent_id: Option<&str>,
    ) -> Result<Node, RemoteError> {
        Ok(self.create(name, SHORTCUT_MIME_TYPE, Some(target_id), parent_id))
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        Self::check_failure(&mut state, id)?;
        if !state.nodes.iter().any(|n| n.id == id) {
            return Err(RemoteError::NotFound(id.to_string()));
        }
        let mut doomed = vec![id.to_string()];
        let mut cursor = 0;
        while cursor < doomed.len() {
            let parent = doomed[cursor].clone();
            doomed.extend(
                state
                    .nodes
                    .iter()
                    .filter(|n| n.parent_id.as_deref() == Some(parent.as_str()))
                    .map(|n| n.id.clone()),
            );
            cursor += 1;
        }
        state.nodes.retain(|n| !doomed.contains(&n.id));
        state.deleted.push(id.to_string());
        Ok(())
    }
}

fn node(id: &str, name: &str, mime_type: &str, parent: Option<&str>) -> Node {
    Node {
        id: id.to_string(),
        name: name.to_string(),
        mime_type: mime_type.to_string(),
        parent_id: parent.map(str::to_string),
        owner: None,
        created_time: Some("2023-09-01T10:00:00.000Z".to_string()),
        modified_time: None,
        size: None,
        shortcut_target_id: None,
        md5_checksum: None,
    }
}

pub(crate) fn folder_node(id: &str, name: &str, parent: Option<&str>) -> Node {
    node(id, name, FOLDER_MIME_TYPE, parent)
}

pub(crate) fn file_node(id: &str, name: &str, parent: Option<&str>) -> Node {
    node(id, name, "text/plain", parent)
}

pub(crate) fn shortcut_node(id: &str, name: &str, parent: Option<&str>, target: &str) -> Node {
    let mut node = node(id, name, SHORTCUT_MIME_TYPE, parent);
    node.shortcut_target_id = Some(target.to_string());
    node
}
