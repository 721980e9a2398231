mod categories;
mod files;
mod mirror;

use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool, migrate::Migrator};
use thiserror::Error;

use crate::model::{
    AggregationType, Category, CategoryAlias, CategoryType, FileRecord, MirrorLevel, MirrorNode,
};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub const TABLES: [&str; 8] = [
    "files",
    "files_temp",
    "category_types",
    "categories",
    "category_aliases",
    "file_categories",
    "file_categories_temp",
    "drive_files",
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("data directory is unavailable")]
    MissingDataDir,
    #[error("invalid aggregation type: {0}")]
    InvalidAggregationType(String),
    #[error("invalid mirror level: {0}")]
    InvalidLevel(i64),
    #[error("row not found after insert")]
    MissingRow,
}

/// Selects the authoritative tables or their staging twins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTable {
    Primary,
    Staging,
}

impl FileTable {
    pub(crate) fn files(&self) -> &'static str {
        match self {
            FileTable::Primary => "files",
            FileTable::Staging => "files_temp",
        }
    }

    pub(crate) fn links(&self) -> &'static str {
        match self {
            FileTable::Primary => "file_categories",
            FileTable::Staging => "file_categories_temp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileQuery {
    pub folder_only: bool,
    pub exclude_shortcuts: bool,
    pub active_only: bool,
}

impl Default for FileQuery {
    fn default() -> Self {
        Self {
            folder_only: false,
            exclude_shortcuts: true,
            active_only: true,
        }
    }
}

impl FileQuery {
    pub fn folders() -> Self {
        Self {
            folder_only: true,
            ..Self::default()
        }
    }

    pub fn everything() -> Self {
        Self {
            folder_only: false,
            exclude_shortcuts: false,
            active_only: false,
        }
    }

    /// SQL predicates over the file table aliased as `f`, each prefixed with `AND`.
    pub(crate) fn predicates(&self) -> String {
        let mut sql = String::new();
        if self.active_only {
            sql.push_str(" AND f.active = 1");
        }
        if self.folder_only {
            sql.push_str(" AND f.mime_type = 'application/vnd.google-apps.folder'");
        }
        if self.exclude_shortcuts {
            sql.push_str(" AND f.mime_type != 'application/vnd.google-apps.shortcut'");
        }
        sql
    }
}

#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Opens (creating if needed) the database file without touching the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn missing_tables(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(&self.pool)
            .await?;
        let mut present = Vec::with_capacity(rows.len());
        for row in rows {
            present.push(row.try_get::<String, _>("name")?);
        }
        Ok(TABLES
            .iter()
            .filter(|table| !present.iter().any(|name| name == *table))
            .map(|table| table.to_string())
            .collect())
    }
}

pub fn default_db_path() -> Result<PathBuf, StoreError> {
    let base = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    Ok(base.join("drive-index").join("index.db"))
}

const FILE_COLUMNS: &str = "f.id, f.drive_file_id, f.name, f.mime_type, f.parent_id, f.owner, \
     f.created_time, f.modified_time, f.size, f.shortcut_target_id, f.md5_checksum, f.active";

fn file_from_row(row: &SqliteRow) -> Result<FileRecord, StoreError> {
    Ok(FileRecord {
        id: row.try_get("id")?,
        drive_file_id: row.try_get("drive_file_id")?,
        name: row.try_get("name")?,
        mime_type: row.try_get("mime_type")?,
        parent_id: row.try_get("parent_id")?,
        owner: row.try_get("owner")?,
        created_time: row.try_get("created_time")?,
        modified_time: row.try_get("modified_time")?,
        size: row.try_get("size")?,
        shortcut_target_id: row.try_get("shortcut_target_id")?,
        md5_checksum: row.try_get("md5_checksum")?,
        active: row.try_get("active")?,
    })
}

fn category_type_from_row(row: &SqliteRow) -> Result<CategoryType, StoreError> {
    let aggregation: String = row.try_get("aggregation_type")?;
    Ok(CategoryType {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        aggregation_type: AggregationType::parse(&aggregation)
            .ok_or(StoreError::InvalidAggregationType(aggregation))?,
    })
}

fn category_from_row(row: &SqliteRow) -> Result<Category, StoreError> {
    Ok(Category {
        id: row.try_get("id")?,
        category_type_id: row.try_get("category_type_id")?,
        canonical_name: row.try_get("canonical_name")?,
    })
}

fn alias_from_row(row: &SqliteRow) -> Result<CategoryAlias, StoreError> {
    Ok(CategoryAlias {
        id: row.try_get("id")?,
        category_id: row.try_get("category_id")?,
        alias_name: row.try_get("alias_name")?,
    })
}

fn mirror_from_row(row: &SqliteRow) -> Result<MirrorNode, StoreError> {
    let level: i64 = row.try_get("level")?;
    Ok(MirrorNode {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        drive_file_id: row.try_get("drive_file_id")?,
        parent_id: row.try_get("parent_id")?,
        shortcut_target_id: row.try_get("shortcut_target_id")?,
        category_type_id: row.try_get("category_type_id")?,
        level: MirrorLevel::from_i64(level).ok_or(StoreError::InvalidLevel(level))?,
    })
}
