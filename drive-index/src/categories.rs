use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::aggregator::{AggregateError, CategoryAggregator};
use crate::interchange::{InterchangeError, read_json, write_json};
use crate::model::{AggregationType, CategoryType, FileRecord};
use crate::store::{FileQuery, FileTable, LocalStore, StoreError};

#[derive(Debug, Error)]
pub enum CategoryError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("aggregation failed: {0}")]
    Aggregate(#[from] AggregateError),
    #[error("cannot read category configuration: {0}")]
    Config(#[from] InterchangeError),
    #[error("category type '{name}' already uses '{existing}', not '{requested}'")]
    AggregationMismatch {
        name: String,
        existing: AggregationType,
        requested: AggregationType,
    },
    #[error("category type '{0}' not found")]
    NotFound(String),
    #[error("category type name is empty")]
    EmptyName,
}

/// On-disk description of one category type and its categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTypeConfig {
    pub category_type_name: String,
    pub aggregation_type: AggregationType,
    pub categories: Vec<CategoryConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryConfig {
    #[serde(default)]
    pub canonical_name: String,
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub categories: usize,
    pub aliases: usize,
    pub skipped: usize,
    pub links: u64,
}

/// Template written by the alias generators, ready to be edited into a
/// [`CategoryTypeConfig`].
#[derive(Debug, Serialize)]
struct AliasTemplate<'a> {
    category_type_name: &'static str,
    aggregation_type: &'static str,
    categories: [TemplateCategory; 1],
    unassigned_folders: &'a [String],
}

#[derive(Debug, Serialize)]
struct TemplateCategory {
    canonical_name: &'static str,
    aliases: [&'static str; 3],
}

#[derive(Clone)]
pub struct CategoryService {
    store: LocalStore,
    aggregator: CategoryAggregator,
}

impl CategoryService {
    pub fn new(store: LocalStore) -> Self {
        Self {
            aggregator: CategoryAggregator::new(store.clone()),
            store,
        }
    }

    pub async fn load_category_type_file(&self, path: &Path) -> Result<LoadReport, CategoryError> {
        let config: CategoryTypeConfig = read_json(path).await?;
        info!(
            path = %path.display(),
            category_type = %config.category_type_name,
            "loading category type"
        );
        self.load_category_type(&config).await
    }

    /// Replaces the categories and aliases of a type, creating the type when needed, then
    /// links the authoritative files.
    pub async fn load_category_type(
        &self,
        config: &CategoryTypeConfig,
    ) -> Result<LoadReport, CategoryError> {
        let name = config.category_type_name.trim();
        if name.is_empty() {
            return Err(CategoryError::EmptyName);
        }

        let category_type = match self.store.find_category_type(name).await? {
            Some(existing) if existing.aggregation_type != config.aggregation_type => {
                return Err(CategoryError::AggregationMismatch {
                    name: name.to_string(),
                    existing: existing.aggregation_type,
                    requested: config.aggregation_type,
                });
            }
            Some(existing) => existing,
            None => {
                info!(category_type = name, strategy = %config.aggregation_type, "creating category type");
                self.store
                    .create_category_type(name, config.aggregation_type)
                    .await?
            }
        };

        self.store
            .delete_categories_of_type(category_type.id)
            .await?;

        let mut report = LoadReport::default();
        for entry in &config.categories {
            let canonical = entry.canonical_name.trim();
            if canonical.is_empty() {
                warn!(category_type = name, "category without canonical_name, skipping");
                report.skipped += 1;
                continue;
            }
            let Some(aliases) = &entry.aliases else {
                warn!(category_type = name, category = canonical, "category without aliases, skipping");
                report.skipped += 1;
                continue;
            };

            let category = self
                .store
                .find_or_create_category(category_type.id, canonical)
                .await?;
            report.categories += 1;
            for alias in aliases {
                if alias.is_empty() {
                    warn!(category = canonical, "empty alias, skipping");
                    continue;
                }
                self.store.find_or_create_alias(category.id, alias).await?;
                report.aliases += 1;
                debug!(category = canonical, alias = %alias, "added alias");
            }
        }

        let aggregated = self
            .aggregator
            .aggregate(&category_type, FileTable::Primary)
            .await?;
        report.links = aggregated.links;
        info!(
            category_type = name,
            categories = report.categories,
            aliases = report.aliases,
            skipped = report.skipped,
            links = report.links,
            "category type loaded"
        );
        Ok(report)
    }

    pub async fn delete_category_type(&self, name: &str) -> Result<(), CategoryError> {
        let category_type = self
            .store
            .find_category_type(name)
            .await?
            .ok_or_else(|| CategoryError::NotFound(name.to_string()))?;
        self.store.delete_category_type(category_type.id).await?;
        info!(category_type = name, "category type deleted");
        Ok(())
    }

    pub async fn category_type(&self, name: &str) -> Result<CategoryType, CategoryError> {
        self.store
            .find_category_type(name)
            .await?
            .ok_or_else(|| CategoryError::NotFound(name.to_string()))
    }

    /// Sorted, unique names of candidate alias folders.
    ///
    /// `None` lists the root folders themselves. Otherwise the names of the folder children
    /// of the given parent folders are returned.
    pub async fn suggest_aliases(
        &self,
        parent_ids: Option<&[String]>,
    ) -> Result<Vec<String>, CategoryError> {
        let folders = match parent_ids {
            None => self.store.root_folders(FileTable::Primary).await?,
            Some([]) => {
                info!("no parent folders to scan, no aliases generated");
                return Ok(Vec::new());
            }
            Some(ids) => {
                let parents: Vec<String> = self
                    .store
                    .files_by_drive_ids(FileTable::Primary, ids, FileQuery::folders())
                    .await?
                    .into_iter()
                    .map(|folder| folder.drive_file_id)
                    .collect();
                self.store
                    .children_of(FileTable::Primary, &parents, FileQuery::folders())
                    .await?
            }
        };
        Ok(unique_names(folders))
    }

    /// Alias candidates below the folders already linked to a type, plus the folders named
    /// in `extra_folder_names`.
    pub async fn suggest_aliases_for_type(
        &self,
        name: &str,
        extra_folder_names: &[String],
    ) -> Result<Vec<String>, CategoryError> {
        let category_type = self.category_type(name).await?;
        let mut ids: BTreeSet<String> = self
            .store
            .folders_for_category_type(category_type.id)
            .await?
            .into_iter()
            .map(|folder| folder.drive_file_id)
            .collect();
        if !extra_folder_names.is_empty() {
            let extra = self
                .store
                .files_by_names(FileTable::Primary, extra_folder_names, FileQuery::folders())
                .await?;
            ids.extend(extra.into_iter().map(|folder| folder.drive_file_id));
        }
        if ids.is_empty() {
            warn!(category_type = name, "no folders linked to category type");
        }
        let ids: Vec<String> = ids.into_iter().collect();
        self.suggest_aliases(Some(&ids)).await
    }
}

fn unique_names(folders: Vec<FileRecord>) -> Vec<String> {
    folders
        .into_iter()
        .map(|folder| folder.name)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Writes an editable category configuration listing `names` as unassigned folders.
pub async fn write_alias_template(names: &[String], path: &Path) -> Result<(), CategoryError> {
    let template = AliasTemplate {
        category_type_name: "category_type_name",
        aggregation_type: "aggregation_type",
        categories: [TemplateCategory {
            canonical_name: "Example1",
            aliases: ["Example1", "example1", "example 1"],
        }],
        unassigned_folders: names,
    };
    write_json(path, &template).await?;
    info!(path = %path.display(), folders = names.len(), "alias template written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::{file_node, folder_node};
    use serde_json::{Value, json};

    async fn store() -> LocalStore {
        let store = LocalStore::in_memory().await.unwrap();
        store
            .insert_files(
                FileTable::Primary,
                &[
                    folder_node("sem1", "Semester 1", None),
                    folder_node("math", "Math", Some("sem1")),
                    file_node("alg", "Algebra.pdf", Some("math")),
                    folder_node("phys", "Physics", Some("sem1")),
                    folder_node("sem2", "Semester 2", None),
                    folder_node("math2", "Math", Some("sem2")),
                    folder_node("chem", "Chemistry", Some("sem2")),
                    file_node("notes", "notes.txt", Some("sem2")),
                ],
            )
            .await
            .unwrap();
        store
    }

    fn config(value: Value) -> CategoryTypeConfig {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn load_creates_type_and_links_files() {
        let store = store().await;
        let service = CategoryService::new(store.clone());

        let report = service
            .load_category_type(&config(json!({
                "category_type_name": "Subjects",
                "aggregation_type": "collection",
                "categories": [
                    {"canonical_name": "Math", "aliases": ["Math"]},
                    {"canonical_name": "", "aliases": ["Nope"]},
                    {"canonical_name": "Empty"}
                ]
            })))
            .await
            .unwrap();

        assert_eq!(report.categories, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.links, 1);
        let kind = store.find_category_type("Subjects").await.unwrap().unwrap();
        assert_eq!(kind.aggregation_type, AggregationType::Collection);
    }

    #[tokio::test]
    async fn reload_replaces_previous_categories() {
        let store = store().await;
        let service = CategoryService::new(store.clone());
        let first = config(json!({
            "category_type_name": "Subjects",
            "aggregation_type": "collection",
            "categories": [{"canonical_name": "Math", "aliases": ["Math"]}]
        }));
        service.load_category_type(&first).await.unwrap();

        let second = config(json!({
            "category_type_name": "Subjects",
            "aggregation_type": "collection",
            "categories": [{"canonical_name": "Sciences", "aliases": ["Physics", "Chemistry", ""]}]
        }));
        let report = service.load_category_type(&second).await.unwrap();

        assert_eq!(report.aliases, 2);
        let kind = store.find_category_type("Subjects").await.unwrap().unwrap();
        let names: Vec<String> = store
            .list_categories(kind.id)
            .await
            .unwrap()
            .into_iter()
            .map(|category| category.canonical_name)
            .collect();
        assert_eq!(names, vec!["Sciences"]);
    }

    #[tokio::test]
    async fn aggregation_type_must_match_existing_type() {
        let store = store().await;
        store
            .create_category_type("Subjects", AggregationType::Pattern)
            .await
            .unwrap();

        let err = CategoryService::new(store)
            .load_category_type(&config(json!({
                "category_type_name": "Subjects",
                "aggregation_type": "collection",
                "categories": []
            })))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CategoryError::AggregationMismatch {
                existing: AggregationType::Pattern,
                requested: AggregationType::Collection,
                ..
            }
        ));
    }

    #[test]
    fn unknown_aggregation_type_is_rejected() {
        let parsed = serde_json::from_value::<CategoryTypeConfig>(json!({
            "category_type_name": "Subjects",
            "aggregation_type": "bucket",
            "categories": []
        }));
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn empty_type_name_is_rejected() {
        let err = CategoryService::new(store().await)
            .load_category_type(&config(json!({
                "category_type_name": "  ",
                "aggregation_type": "shortcut",
                "categories": []
            })))
            .await
            .unwrap_err();
        assert!(matches!(err, CategoryError::EmptyName));
    }

    #[tokio::test]
    async fn deleting_unknown_type_fails() {
        let err = CategoryService::new(store().await)
            .delete_category_type("Ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, CategoryError::NotFound(name) if name == "Ghost"));
    }

    #[tokio::test]
    async fn suggestions_list_child_folder_names() {
        let service = CategoryService::new(store().await);

        let roots = service.suggest_aliases(None).await.unwrap();
        assert_eq!(roots, vec!["Semester 1", "Semester 2"]);

        let ids = vec!["sem1".to_string(), "sem2".to_string(), "alg".to_string()];
        let children = service.suggest_aliases(Some(&ids)).await.unwrap();
        assert_eq!(children, vec!["Chemistry", "Math", "Physics"]);

        assert!(service.suggest_aliases(Some(&[])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn suggestions_for_type_include_extra_folders() {
        let store = store().await;
        let service = CategoryService::new(store.clone());
        service
            .load_category_type(&config(json!({
                "category_type_name": "Semesters",
                "aggregation_type": "shortcut",
                "categories": [{"canonical_name": "First", "aliases": ["Semester 1"]}]
            })))
            .await
            .unwrap();

        let linked = service
            .suggest_aliases_for_type("Semesters", &[])
            .await
            .unwrap();
        assert_eq!(linked, vec!["Math", "Physics"]);

        let extended = service
            .suggest_aliases_for_type("Semesters", &["Semester 2".to_string()])
            .await
            .unwrap();
        assert_eq!(extended, vec!["Chemistry", "Math", "Physics"]);
    }

    #[tokio::test]
    async fn template_lists_unassigned_folders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");

        write_alias_template(&["Math".to_string(), "Physics".to_string()], &path)
            .await
            .unwrap();

        let written: Value = read_json(&path).await.unwrap();
        assert_eq!(written["category_type_name"], "category_type_name");
        assert_eq!(written["categories"][0]["aliases"][2], "example 1");
        assert_eq!(written["unassigned_folders"], json!(["Math", "Physics"]));
    }
}
