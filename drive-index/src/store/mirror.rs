use sqlx::{QueryBuilder, Sqlite};

use super::{LocalStore, StoreError, mirror_from_row};
use crate::model::{MirrorInput, MirrorLevel, MirrorNode};

const MIRROR_SELECT: &str =
    "SELECT id, name, drive_file_id, parent_id, shortcut_target_id, category_type_id, level FROM drive_files";

impl LocalStore {
    pub async fn add_mirror_node(&self, input: &MirrorInput) -> Result<MirrorNode, StoreError> {
        let result = sqlx::query(
            "INSERT INTO drive_files (
                name, drive_file_id, parent_id, shortcut_target_id, category_type_id, level
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&input.name)
        .bind(&input.drive_file_id)
        .bind(&input.parent_id)
        .bind(&input.shortcut_target_id)
        .bind(input.category_type_id)
        .bind(input.level.as_i64())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&format!("{MIRROR_SELECT} WHERE id = ?1"))
            .bind(result.last_insert_rowid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(mirror_from_row)
            .transpose()?
            .ok_or(StoreError::MissingRow)
    }

    /// Mirror rows at `level`, optionally narrowed to a category type and a parent.
    pub async fn mirror_nodes(
        &self,
        level: MirrorLevel,
        category_type_id: Option<i64>,
        parent_id: Option<&str>,
    ) -> Result<Vec<MirrorNode>, StoreError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("{MIRROR_SELECT} WHERE level = "));
        builder.push_bind(level.as_i64());
        if let Some(category_type_id) = category_type_id {
            builder.push(" AND category_type_id = ");
            builder.push_bind(category_type_id);
        }
        if let Some(parent_id) = parent_id {
            builder.push(" AND parent_id = ");
            builder.push_bind(parent_id);
        }
        builder.push(" ORDER BY id");
        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(mirror_from_row).collect()
    }

    pub async fn all_mirror_nodes(&self) -> Result<Vec<MirrorNode>, StoreError> {
        let rows = sqlx::query(&format!("{MIRROR_SELECT} ORDER BY level, id"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(mirror_from_row).collect()
    }

    pub async fn root_mirror(&self) -> Result<Option<MirrorNode>, StoreError> {
        Ok(self
            .mirror_nodes(MirrorLevel::Root, None, None)
            .await?
            .into_iter()
            .next())
    }

    pub async fn delete_mirror_node(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM drive_files WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear_mirror(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM drive_files")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
