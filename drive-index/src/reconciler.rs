//! Converges the remote category tree with the local categories.
//!
//! The tree has four levels: the root folder (0), one folder per category type (1), one
//! folder or shortcut per category (2) and one shortcut per member file (3). The
//! `drive_files` table mirrors what was created; it is consulted before every create and
//! updated after every successful remote call.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use tracing::{debug, error, info, warn};

use crate::model::{
    AggregationType, Category, CategoryType, FileRecord, MirrorInput, MirrorLevel, MirrorNode,
};
use crate::remote::ResilientRemote;
use crate::store::{FileQuery, LocalStore, StoreError};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("no root folder is configured")]
    MissingRoot,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created_folders: usize,
    pub created_shortcuts: usize,
    pub deleted_remote: usize,
    pub failures: usize,
}

impl ReconcileReport {
    pub fn remote_changes(&self) -> usize {
        self.created_folders + self.created_shortcuts + self.deleted_remote
    }
}

/// What a category should look like remotely.
struct DesiredCategory {
    /// Set when the category is materialised as a single level-2 shortcut.
    single_target: Option<String>,
    member_targets: HashSet<String>,
}

pub struct Reconciler {
    store: LocalStore,
    remote: ResilientRemote,
}

impl Reconciler {
    pub fn new(store: LocalStore, remote: ResilientRemote) -> Self {
        Self { store, remote }
    }

    pub async fn reconcile_all(&self) -> Result<ReconcileReport, ReconcileError> {
        let root = self
            .store
            .root_mirror()
            .await?
            .ok_or(ReconcileError::MissingRoot)?;
        let category_types = self.store.list_category_types().await?;
        let mut report = ReconcileReport::default();

        for category_type in &category_types {
            if let Err(err) = self
                .build_category_type(&root, category_type, &mut report)
                .await
            {
                error!(category_type = %category_type.name, error = %err, "failed to build category type");
                report.failures += 1;
            }
        }
        self.prune(&category_types, &mut report).await?;
        self.remove_untracked(&root, &mut report).await?;

        info!(
            created_folders = report.created_folders,
            created_shortcuts = report.created_shortcuts,
            deleted = report.deleted_remote,
            failures = report.failures,
            "reconciliation finished"
        );
        Ok(report)
    }

    async fn build_category_type(
        &self,
        root: &MirrorNode,
        category_type: &CategoryType,
        report: &mut ReconcileReport,
    ) -> Result<(), StoreError> {
        let existing = self
            .store
            .mirror_nodes(MirrorLevel::TypeFolder, Some(category_type.id), None)
            .await?;
        let type_folder = match existing.into_iter().next() {
            Some(folder) => folder.drive_file_id,
            None => {
                let Some(folder) = self
                    .remote
                    .create_folder(&category_type.name, Some(root.drive_file_id.as_str()))
                    .await
                else {
                    error!(category_type = %category_type.name, "could not create category type folder");
                    report.failures += 1;
                    return Ok(());
                };
                self.store
                    .add_mirror_node(&MirrorInput::created(
                        &folder,
                        Some(root.drive_file_id.as_str()),
                        Some(category_type.id),
                        MirrorLevel::TypeFolder,
                    ))
                    .await?;
                report.created_folders += 1;
                folder.id
            }
        };

        let categories = self.store.list_categories(category_type.id).await?;
        if categories.is_empty() {
            warn!(category_type = %category_type.name, "category type has no categories");
            return Ok(());
        }
        for category in &categories {
            if let Err(err) = self
                .build_category(category_type, category, &type_folder, report)
                .await
            {
                error!(category = %category.canonical_name, error = %err, "failed to build category");
                report.failures += 1;
            }
        }
        Ok(())
    }

    async fn build_category(
        &self,
        category_type: &CategoryType,
        category: &Category,
        type_folder: &str,
        report: &mut ReconcileReport,
    ) -> Result<(), StoreError> {
        let members = self
            .store
            .category_members(category.id, FileQuery::default())
            .await?;
        let level2 = self
            .store
            .mirror_nodes(MirrorLevel::Category, Some(category_type.id), None)
            .await?;

        if category_type.aggregation_type == AggregationType::Shortcut && members.len() == 1 {
            let member = &members[0];
            let target = member.shortcut_target();
            if level2
                .iter()
                .any(|node| node.shortcut_target_id.as_deref() == Some(target))
            {
                return Ok(());
            }
            if let Some(shortcut) = self
                .remote
                .create_shortcut(&category.canonical_name, target, Some(type_folder))
                .await
            {
                self.store
                    .add_mirror_node(&MirrorInput {
                        shortcut_target_id: Some(target.to_string()),
                        ..MirrorInput::created(
                            &shortcut,
                            Some(type_folder),
                            Some(category_type.id),
                            MirrorLevel::Category,
                        )
                    })
                    .await?;
                report.created_shortcuts += 1;
            } else {
                report.failures += 1;
            }
            return Ok(());
        }

        let existing = level2.into_iter().find(|node| {
            node.name == category.canonical_name && node.shortcut_target_id.is_none()
        });
        let folder_id = match existing {
            Some(folder) => folder.drive_file_id,
            None => {
                let Some(folder) = self
                    .remote
                    .create_folder(&category.canonical_name, Some(type_folder))
                    .await
                else {
                    report.failures += 1;
                    return Ok(());
                };
                self.store
                    .add_mirror_node(&MirrorInput::created(
                        &folder,
                        Some(type_folder),
                        Some(category_type.id),
                        MirrorLevel::Category,
                    ))
                    .await?;
                report.created_folders += 1;
                folder.id
            }
        };

        let mut mirrored: HashSet<String> = self
            .store
            .mirror_nodes(MirrorLevel::Leaf, Some(category_type.id), Some(folder_id.as_str()))
            .await?
            .into_iter()
            .filter_map(|node| node.shortcut_target_id)
            .collect();
        for member in &members {
            let target = member.shortcut_target();
            if mirrored.contains(target) {
                continue;
            }
            let name = shortcut_name(member);
            let Some(shortcut) = self
                .remote
                .create_shortcut(&name, target, Some(folder_id.as_str()))
                .await
            else {
                report.failures += 1;
                continue;
            };
            self.store
                .add_mirror_node(&MirrorInput {
                    shortcut_target_id: Some(target.to_string()),
                    ..MirrorInput::created(
                        &shortcut,
                        Some(folder_id.as_str()),
                        Some(category_type.id),
                        MirrorLevel::Leaf,
                    )
                })
                .await?;
            mirrored.insert(target.to_string());
            report.created_shortcuts += 1;
            debug!(category = %category.canonical_name, name = %name, "created shortcut");
        }
        Ok(())
    }

    /// Deletes mirror rows that no longer correspond to a category member, leaves first.
    async fn prune(
        &self,
        category_types: &[CategoryType],
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        let mut live_types = HashSet::new();
        for category_type in category_types {
            live_types.insert(category_type.id);
            let desired = self.desired_categories(category_type).await?;

            let level2 = self
                .store
                .mirror_nodes(MirrorLevel::Category, Some(category_type.id), None)
                .await?;
            let live_folders: HashMap<&str, &str> = level2
                .iter()
                .filter(|node| {
                    node.shortcut_target_id.is_none()
                        && desired
                            .get(&node.name)
                            .is_some_and(|wanted| wanted.single_target.is_none())
                })
                .map(|node| (node.drive_file_id.as_str(), node.name.as_str()))
                .collect();

            let leaves = self
                .store
                .mirror_nodes(MirrorLevel::Leaf, Some(category_type.id), None)
                .await?;
            for leaf in &leaves {
                let keep = leaf
                    .parent_id
                    .as_deref()
                    .and_then(|parent| live_folders.get(parent))
                    .and_then(|name| desired.get(*name))
                    .zip(leaf.shortcut_target_id.as_deref())
                    .is_some_and(|(wanted, target)| wanted.member_targets.contains(target));
                if !keep {
                    self.remove(leaf, report).await?;
                }
            }

            for node in &level2 {
                let keep = match (desired.get(&node.name), node.shortcut_target_id.as_deref()) {
                    (None, _) => false,
                    (Some(wanted), Some(target)) => {
                        wanted.single_target.as_deref() == Some(target)
                    }
                    (Some(wanted), None) => wanted.single_target.is_none(),
                };
                if !keep {
                    self.remove(node, report).await?;
                }
            }
        }

        let type_folders: Vec<MirrorNode> = self
            .store
            .all_mirror_nodes()
            .await?
            .into_iter()
            .filter(|node| node.level == MirrorLevel::TypeFolder)
            .collect();
        for folder in &type_folders {
            let live = folder
                .category_type_id
                .is_some_and(|id| live_types.contains(&id));
            if live {
                continue;
            }
            let mut orphans = Vec::new();
            for level in [MirrorLevel::Leaf, MirrorLevel::Category] {
                orphans.extend(
                    self.store
                        .all_mirror_nodes()
                        .await?
                        .into_iter()
                        .filter(|node| {
                            node.level == level && node.category_type_id == folder.category_type_id
                        }),
                );
            }
            for orphan in &orphans {
                self.remove(orphan, report).await?;
            }
            self.remove(folder, report).await?;
        }
        Ok(())
    }

    async fn desired_categories(
        &self,
        category_type: &CategoryType,
    ) -> Result<HashMap<String, DesiredCategory>, StoreError> {
        let mut desired = HashMap::new();
        for category in self.store.list_categories(category_type.id).await? {
            let members = self
                .store
                .category_members(category.id, FileQuery::default())
                .await?;
            let member_targets: HashSet<String> = members
                .iter()
                .map(|member| member.shortcut_target().to_string())
                .collect();
            let single_target = (category_type.aggregation_type == AggregationType::Shortcut
                && members.len() == 1)
                .then(|| members[0].shortcut_target().to_string());
            desired.insert(
                category.canonical_name,
                DesiredCategory {
                    single_target,
                    member_targets,
                },
            );
        }
        Ok(desired)
    }

    /// Deletes remotely, then forgets the row. A failed remote delete keeps the row so the
    /// next run tries again.
    async fn remove(
        &self,
        node: &MirrorNode,
        report: &mut ReconcileReport,
    ) -> Result<(), StoreError> {
        if self.remote.delete(&node.drive_file_id).await {
            self.store.delete_mirror_node(node.id).await?;
            report.deleted_remote += 1;
            info!(name = %node.name, level = node.level.as_i64(), "removed mirror node");
        } else {
            warn!(name = %node.name, id = %node.drive_file_id, "could not delete mirror node");
            report.failures += 1;
        }
        Ok(())
    }

    /// Deletes remote objects under the root that the mirror does not know about.
    async fn remove_untracked(
        &self,
        root: &MirrorNode,
        report: &mut ReconcileReport,
    ) -> Result<(), StoreError> {
        let tracked: HashSet<String> = self
            .store
            .all_mirror_nodes()
            .await?
            .into_iter()
            .map(|node| node.drive_file_id)
            .collect();

        let mut frontier = vec![root.drive_file_id.clone()];
        // Levels 1 to 3 below the root.
        for _ in 0..3 {
            let mut next = Vec::new();
            for parent in &frontier {
                let Some(children) = self.remote.list_all_children(parent).await else {
                    warn!(parent = %parent, "could not list mirror folder");
                    continue;
                };
                for child in children {
                    if !tracked.contains(&child.id) {
                        if self.remote.delete(&child.id).await {
                            info!(name = %child.name, id = %child.id, "deleted untracked remote object");
                            report.deleted_remote += 1;
                        } else {
                            report.failures += 1;
                        }
                    } else if child.is_folder() {
                        next.push(child.id);
                    }
                }
            }
            frontier = next;
        }
        Ok(())
    }
}

/// Shortcut title for a member; folders carry their creation date.
fn shortcut_name(member: &FileRecord) -> String {
    if !member.is_folder() {
        return member.name.clone();
    }
    match member.created_time.as_deref().and_then(creation_date) {
        Some(date) => format!("{} ({date})", member.name),
        None => member.name.clone(),
    }
}

fn creation_date(timestamp: &str) -> Option<String> {
    let format = format_description!("[year]-[month]-[day]");
    match OffsetDateTime::parse(timestamp, &Rfc3339) {
        Ok(parsed) => parsed.date().format(&format).ok(),
        Err(_) => timestamp
            .split('T')
            .next()
            .filter(|date| !date.is_empty())
            .map(str::to_string),
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
