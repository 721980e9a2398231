use futures_util::TryStreamExt;
use regex::Regex;
use sqlx::{QueryBuilder, Row, Sqlite};

use super::{FILE_COLUMNS, FileQuery, FileTable, LocalStore, StoreError, file_from_row};
use crate::model::{FileRecord, Node};

// Keeps `IN (...)` lists well under SQLite's bound-parameter limit.
const IN_CHUNK: usize = 500;

impl LocalStore {
    /// Inserts records, skipping any whose `drive_file_id` is already present.
    /// Returns the number of rows actually inserted.
    pub async fn insert_files(&self, table: FileTable, nodes: &[Node]) -> Result<u64, StoreError> {
        let sql = format!(
            "INSERT OR IGNORE INTO {} (
                drive_file_id, name, mime_type, parent_id, owner,
                created_time, modified_time, size, shortcut_target_id, md5_checksum
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            table.files()
        );
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for node in nodes {
            let result = sqlx::query(&sql)
                .bind(&node.id)
                .bind(&node.name)
                .bind(&node.mime_type)
                .bind(&node.parent_id)
                .bind(&node.owner)
                .bind(&node.created_time)
                .bind(&node.modified_time)
                .bind(node.size)
                .bind(&node.shortcut_target_id)
                .bind(&node.md5_checksum)
                .execute(&mut *tx)
                .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn file_by_drive_id(
        &self,
        table: FileTable,
        drive_file_id: &str,
    ) -> Result<Option<FileRecord>, StoreError> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM {} f WHERE f.drive_file_id = ?1",
            table.files()
        );
        let row = sqlx::query(&sql)
            .bind(drive_file_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(file_from_row).transpose()
    }

    pub async fn list_files(
        &self,
        table: FileTable,
        query: FileQuery,
    ) -> Result<Vec<FileRecord>, StoreError> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM {} f WHERE 1 = 1{} ORDER BY f.id",
            table.files(),
            query.predicates()
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(file_from_row).collect()
    }

    pub async fn count_files(&self, table: FileTable, query: FileQuery) -> Result<i64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) AS total FROM {} f WHERE 1 = 1{}",
            table.files(),
            query.predicates()
        );
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.try_get("total")?)
    }

    /// Records whose name is one of `names`, in id order.
    pub async fn files_by_names(
        &self,
        table: FileTable,
        names: &[String],
        query: FileQuery,
    ) -> Result<Vec<FileRecord>, StoreError> {
        self.files_where_in(table, "name", names, query).await
    }

    pub async fn files_by_drive_ids(
        &self,
        table: FileTable,
        drive_file_ids: &[String],
        query: FileQuery,
    ) -> Result<Vec<FileRecord>, StoreError> {
        self.files_where_in(table, "drive_file_id", drive_file_ids, query)
            .await
    }

    /// Direct children of the given folders, one level only.
    pub async fn children_of(
        &self,
        table: FileTable,
        parent_ids: &[String],
        query: FileQuery,
    ) -> Result<Vec<FileRecord>, StoreError> {
        self.files_where_in(table, "parent_id", parent_ids, query)
            .await
    }

    /// Records whose name matches any of `patterns`. Rows are streamed and filtered here
    /// since SQLite has no regex operator.
    pub async fn files_matching_any(
        &self,
        table: FileTable,
        patterns: &[Regex],
        query: FileQuery,
    ) -> Result<Vec<FileRecord>, StoreError> {
        if patterns.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM {} f WHERE 1 = 1{} ORDER BY f.id",
            table.files(),
            query.predicates()
        );
        let mut rows = sqlx::query(&sql).fetch(&self.pool);
        let mut out = Vec::new();
        while let Some(row) = rows.try_next().await? {
            let name: String = row.try_get("name")?;
            if patterns.iter().any(|pattern| pattern.is_match(&name)) {
                out.push(file_from_row(&row)?);
            }
        }
        Ok(out)
    }

    /// Folders without a recorded parent.
    pub async fn root_folders(&self, table: FileTable) -> Result<Vec<FileRecord>, StoreError> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM {} f WHERE f.parent_id IS NULL{} ORDER BY f.id",
            table.files(),
            FileQuery::folders().predicates()
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(file_from_row).collect()
    }

    /// Soft-deletes records by surrogate id.
    pub async fn deactivate_files(&self, table: FileTable, ids: &[i64]) -> Result<u64, StoreError> {
        let mut updated = 0;
        for chunk in ids.chunks(IN_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("UPDATE {} SET active = 0 WHERE id IN (", table.files()));
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            updated += builder.build().execute(&self.pool).await?.rows_affected();
        }
        Ok(updated)
    }

    /// Linked, authoritative members of a category.
    pub async fn category_members(
        &self,
        category_id: i64,
        query: FileQuery,
    ) -> Result<Vec<FileRecord>, StoreError> {
        let sql = format!(
            "SELECT {FILE_COLUMNS}
             FROM files f
             JOIN file_categories l ON l.file_id = f.id
             WHERE l.category_id = ?1{}
             ORDER BY f.id",
            query.predicates()
        );
        let rows = sqlx::query(&sql)
            .bind(category_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(file_from_row).collect()
    }

    /// Folders linked to any category of the given type.
    pub async fn folders_for_category_type(
        &self,
        category_type_id: i64,
    ) -> Result<Vec<FileRecord>, StoreError> {
        let sql = format!(
            "SELECT DISTINCT {FILE_COLUMNS}
             FROM files f
             JOIN file_categories l ON l.file_id = f.id
             JOIN categories c ON c.id = l.category_id
             WHERE c.category_type_id = ?1{}
             ORDER BY f.name, f.id",
            FileQuery::folders().predicates()
        );
        let rows = sqlx::query(&sql)
            .bind(category_type_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(file_from_row).collect()
    }

    pub async fn link_files(
        &self,
        table: FileTable,
        category_id: i64,
        file_ids: &[i64],
    ) -> Result<u64, StoreError> {
        let sql = format!(
            "INSERT OR IGNORE INTO {} (file_id, category_id) VALUES (?1, ?2)",
            table.links()
        );
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for file_id in file_ids {
            inserted += sqlx::query(&sql)
                .bind(file_id)
                .bind(category_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// All `(file_id, category_id)` pairs of a link table.
    pub async fn links(&self, table: FileTable) -> Result<Vec<(i64, i64)>, StoreError> {
        let sql = format!(
            "SELECT file_id, category_id FROM {} ORDER BY file_id, category_id",
            table.links()
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push((row.try_get("file_id")?, row.try_get("category_id")?));
        }
        Ok(out)
    }

    pub async fn clear_staging(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM file_categories_temp")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM files_temp")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Replaces the authoritative files and links with the staged ones, ids included, and
    /// empties staging. Nothing changes unless every statement succeeds.
    pub async fn swap_staging(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM file_categories")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO file_categories (file_id, category_id)
             SELECT file_id, category_id FROM file_categories_temp",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM file_categories_temp")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM files").execute(&mut *tx).await?;
        sqlx::query(
            "INSERT INTO files (
                id, drive_file_id, name, mime_type, parent_id, owner,
                created_time, modified_time, size, shortcut_target_id, md5_checksum, active
            )
            SELECT
                id, drive_file_id, name, mime_type, parent_id, owner,
                created_time, modified_time, size, shortcut_target_id, md5_checksum, active
            FROM files_temp",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM files_temp")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn files_where_in(
        &self,
        table: FileTable,
        column: &str,
        values: &[String],
        query: FileQuery,
    ) -> Result<Vec<FileRecord>, StoreError> {
        let mut out = Vec::new();
        for chunk in values.chunks(IN_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "SELECT {FILE_COLUMNS} FROM {} f WHERE f.{column} IN (",
                table.files()
            ));
            let mut separated = builder.separated(", ");
            for value in chunk {
                separated.push_bind(value.as_str());
            }
            separated.push_unseparated(")");
            builder.push(query.predicates());
            let rows = builder.build().fetch_all(&self.pool).await?;
            for row in &rows {
                out.push(file_from_row(row)?);
            }
        }
        out.sort_by_key(|record: &FileRecord| record.id);
        out.dedup_by_key(|record| record.id);
        Ok(out)
    }
}
