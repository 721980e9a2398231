use super::{
    LocalStore, StoreError, alias_from_row, category_from_row, category_type_from_row,
};
use crate::model::{AggregationType, Category, CategoryAlias, CategoryType};

impl LocalStore {
    pub async fn create_category_type(
        &self,
        name: &str,
        aggregation_type: AggregationType,
    ) -> Result<CategoryType, StoreError> {
        sqlx::query("INSERT INTO category_types (name, aggregation_type) VALUES (?1, ?2)")
            .bind(name)
            .bind(aggregation_type.as_str())
            .execute(&self.pool)
            .await?;
        self.find_category_type(name)
            .await?
            .ok_or(StoreError::MissingRow)
    }

    pub async fn find_category_type(&self, name: &str) -> Result<Option<CategoryType>, StoreError> {
        let row = sqlx::query("SELECT id, name, aggregation_type FROM category_types WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(category_type_from_row).transpose()
    }

    pub async fn list_category_types(&self) -> Result<Vec<CategoryType>, StoreError> {
        let rows = sqlx::query("SELECT id, name, aggregation_type FROM category_types ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(category_type_from_row).collect()
    }

    /// Removes a type together with its categories, aliases, links and mirror rows.
    pub async fn delete_category_type(&self, category_type_id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for links in ["file_categories", "file_categories_temp"] {
            sqlx::query(&format!(
                "DELETE FROM {links} WHERE category_id IN
                 (SELECT id FROM categories WHERE category_type_id = ?1)"
            ))
            .bind(category_type_id)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            "DELETE FROM category_aliases WHERE category_id IN
             (SELECT id FROM categories WHERE category_type_id = ?1)",
        )
        .bind(category_type_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM categories WHERE category_type_id = ?1")
            .bind(category_type_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM drive_files WHERE category_type_id = ?1")
            .bind(category_type_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM category_types WHERE id = ?1")
            .bind(category_type_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Drops every category of a type (with aliases and links) but keeps the type and its
    /// mirror rows.
    pub async fn delete_categories_of_type(&self, category_type_id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for table in ["file_categories", "file_categories_temp", "category_aliases"] {
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE category_id IN
                 (SELECT id FROM categories WHERE category_type_id = ?1)"
            ))
            .bind(category_type_id)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("DELETE FROM categories WHERE category_type_id = ?1")
            .bind(category_type_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn find_or_create_category(
        &self,
        category_type_id: i64,
        canonical_name: &str,
    ) -> Result<Category, StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO categories (category_type_id, canonical_name) VALUES (?1, ?2)",
        )
        .bind(category_type_id)
        .bind(canonical_name)
        .execute(&self.pool)
        .await?;
        let row = sqlx::query(
            "SELECT id, category_type_id, canonical_name FROM categories
             WHERE category_type_id = ?1 AND canonical_name = ?2",
        )
        .bind(category_type_id)
        .bind(canonical_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref()
            .map(category_from_row)
            .transpose()?
            .ok_or(StoreError::MissingRow)
    }

    pub async fn list_categories(&self, category_type_id: i64) -> Result<Vec<Category>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, category_type_id, canonical_name FROM categories
             WHERE category_type_id = ?1 ORDER BY id",
        )
        .bind(category_type_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(category_from_row).collect()
    }

    pub async fn find_or_create_alias(
        &self,
        category_id: i64,
        alias_name: &str,
    ) -> Result<CategoryAlias, StoreError> {
        sqlx::query("INSERT OR IGNORE INTO category_aliases (category_id, alias_name) VALUES (?1, ?2)")
            .bind(category_id)
            .bind(alias_name)
            .execute(&self.pool)
            .await?;
        let row = sqlx::query(
            "SELECT id, category_id, alias_name FROM category_aliases
             WHERE category_id = ?1 AND alias_name = ?2",
        )
        .bind(category_id)
        .bind(alias_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref()
            .map(alias_from_row)
            .transpose()?
            .ok_or(StoreError::MissingRow)
    }

    pub async fn list_aliases(&self, category_id: i64) -> Result<Vec<CategoryAlias>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, category_id, alias_name FROM category_aliases
             WHERE category_id = ?1 ORDER BY id",
        )
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(alias_from_row).collect()
    }
}
