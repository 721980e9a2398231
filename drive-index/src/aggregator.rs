use regex::{Regex, RegexBuilder};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{AggregationType, Category, CategoryType, FileRecord};
use crate::store::{FileQuery, FileTable, LocalStore, StoreError};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateReport {
    pub categories: usize,
    pub skipped: usize,
    pub links: u64,
}

/// Links files to the categories of a type according to the type's strategy.
#[derive(Clone)]
pub struct CategoryAggregator {
    store: LocalStore,
}

impl CategoryAggregator {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub async fn aggregate(
        &self,
        category_type: &CategoryType,
        table: FileTable,
    ) -> Result<AggregateReport, AggregateError> {
        let mut report = AggregateReport::default();
        let categories = self.store.list_categories(category_type.id).await?;
        for category in &categories {
            let aliases: Vec<String> = self
                .store
                .list_aliases(category.id)
                .await?
                .into_iter()
                .map(|alias| alias.alias_name)
                .collect();
            if aliases.is_empty() {
                warn!(
                    category_type = %category_type.name,
                    category = %category.canonical_name,
                    "category has no aliases, skipping"
                );
                report.skipped += 1;
                continue;
            }

            let members = self
                .members(category_type.aggregation_type, category, &aliases, table)
                .await?;
            if members.is_empty() {
                info!(
                    category_type = %category_type.name,
                    category = %category.canonical_name,
                    "no files matched category"
                );
            }
            let ids: Vec<i64> = members.iter().map(|record| record.id).collect();
            report.links += self.store.link_files(table, category.id, &ids).await?;
            report.categories += 1;
            debug!(
                category = %category.canonical_name,
                members = ids.len(),
                "aggregated category"
            );
        }
        info!(
            category_type = %category_type.name,
            strategy = %category_type.aggregation_type,
            categories = report.categories,
            skipped = report.skipped,
            links = report.links,
            "aggregation finished"
        );
        Ok(report)
    }

    async fn members(
        &self,
        strategy: AggregationType,
        category: &Category,
        aliases: &[String],
        table: FileTable,
    ) -> Result<Vec<FileRecord>, AggregateError> {
        match strategy {
            AggregationType::Shortcut => {
                let candidates = self
                    .store
                    .files_by_names(table, aliases, FileQuery::default())
                    .await?;
                let (kept, discarded) = single_member(candidates);
                if !discarded.is_empty() {
                    let names: Vec<String> = discarded
                        .iter()
                        .map(|record| format!("{} ({})", record.name, record.drive_file_id))
                        .collect();
                    warn!(
                        category = %category.canonical_name,
                        discarded = ?names,
                        "several files match a shortcut category, keeping the first"
                    );
                }
                Ok(kept.into_iter().collect())
            }
            AggregationType::Collection => {
                let folders = self
                    .store
                    .files_by_names(table, aliases, FileQuery::folders())
                    .await?;
                let folder_ids: Vec<String> = folders
                    .into_iter()
                    .map(|folder| folder.drive_file_id)
                    .collect();
                Ok(self
                    .store
                    .children_of(table, &folder_ids, FileQuery::default())
                    .await?)
            }
            AggregationType::Pattern => {
                let patterns = compile_patterns(&category.canonical_name, aliases);
                Ok(self
                    .store
                    .files_matching_any(table, &patterns, FileQuery::default())
                    .await?)
            }
        }
    }
}

/// Keeps the first candidate (lowest id) and returns the rest as discarded.
pub fn single_member(mut candidates: Vec<FileRecord>) -> (Option<FileRecord>, Vec<FileRecord>) {
    candidates.sort_by_key(|record| record.id);
    let mut rest = candidates.into_iter();
    let first = rest.next();
    (first, rest.collect())
}

fn compile_patterns(category: &str, aliases: &[String]) -> Vec<Regex> {
    aliases
        .iter()
        .filter_map(|alias| match alias_pattern(alias) {
            Ok(pattern) => Some(pattern),
            Err(err) => {
                warn!(category, alias = %alias, error = %err, "invalid pattern alias, skipping");
                None
            }
        })
        .collect()
}

/// Turns an alias into a regex anchored at the start of the name.
///
/// `/body/flags` uses `body` as the pattern (only the `i` flag has an effect). A plain
/// string without metacharacters or anchors must match the whole name literally.
pub fn alias_pattern(alias: &str) -> Result<Regex, regex::Error> {
    let (body, case_insensitive) = match split_delimited(alias) {
        Some((body, flags)) => (body.to_string(), flags.contains('i')),
        None if is_plain(alias) => (format!("^{}$", regex::escape(alias)), false),
        None => (alias.to_string(), false),
    };
    RegexBuilder::new(&format!("^(?:{body})"))
        .case_insensitive(case_insensitive)
        .build()
}

fn split_delimited(alias: &str) -> Option<(&str, &str)> {
    let rest = alias.strip_prefix('/')?;
    let end = rest.rfind('/')?;
    let (body, flags) = (&rest[..end], &rest[end + 1..]);
    flags
        .chars()
        .all(|flag| matches!(flag, 'g' | 'm' | 'i'))
        .then_some((body, flags))
}

fn is_plain(alias: &str) -> bool {
    const META: &[char] = &[
        '.', '^', '$', '*', '+', '?', '{', '}', '[', ']', '\\', '|', '(', ')',
    ];
    !alias.contains(META)
}
