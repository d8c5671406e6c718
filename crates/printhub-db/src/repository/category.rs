//! # Category Repository
//!
//! Printer categories ("kitchen", "receipts") and their member printers.
//!
//! ```text
//!   printer_categories ──group_id──► printer_groups     (ON DELETE SET NULL)
//!          │
//!          ├──◄ category_printers                        (ON DELETE CASCADE)
//!          └──◄ routing_rules                            (ON DELETE CASCADE)
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use printhub_core::{BalancingStrategy, GroupMember, PrinterCategory};

/// Category definition as submitted by an operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCategory {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub balancing_strategy: BalancingStrategy,
    #[serde(default)]
    pub members: Vec<GroupMember>,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    /// Detach from the explicit group (use the category's own members).
    #[serde(default)]
    pub clear_group: bool,
    #[serde(default)]
    pub balancing_strategy: Option<BalancingStrategy>,
}

#[derive(Debug, sqlx::FromRow)]
struct CategoryRow {
    id: String,
    name: String,
    description: Option<String>,
    group_id: Option<String>,
    balancing_strategy: BalancingStrategy,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct MemberRow {
    category_id: String,
    printer_name: String,
    priority: i64,
}

const CATEGORY_COLUMNS: &str = "id, name, description, group_id, balancing_strategy, created_at";

fn assemble(row: CategoryRow, members: Vec<GroupMember>) -> PrinterCategory {
    PrinterCategory {
        id: row.id,
        name: row.name,
        description: row.description,
        group_id: row.group_id,
        balancing_strategy: row.balancing_strategy,
        members,
        created_at: row.created_at,
    }
}

/// Repository for printer categories.
#[derive(Debug, Clone)]
pub struct CategoryRepository {
    pool: SqlitePool,
}

impl CategoryRepository {
    /// Creates a new CategoryRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CategoryRepository { pool }
    }

    /// All categories with their members, ordered by name.
    pub async fn list(&self) -> DbResult<Vec<PrinterCategory>> {
        let sql = format!("SELECT {} FROM printer_categories ORDER BY name", CATEGORY_COLUMNS);
        let rows = sqlx::query_as::<_, CategoryRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        let member_rows = sqlx::query_as::<_, MemberRow>(
            "SELECT category_id, printer_name, priority FROM category_printers \
             ORDER BY priority DESC, printer_name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut members: HashMap<String, Vec<GroupMember>> = HashMap::new();
        for m in member_rows {
            members
                .entry(m.category_id)
                .or_default()
                .push(GroupMember::new(m.printer_name, m.priority));
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let category_members = members.remove(&row.id).unwrap_or_default();
                assemble(row, category_members)
            })
            .collect())
    }

    pub async fn get(&self, id: &str) -> DbResult<PrinterCategory> {
        let sql = format!("SELECT {} FROM printer_categories WHERE id = ?1", CATEGORY_COLUMNS);
        let row = sqlx::query_as::<_, CategoryRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("PrinterCategory", id))?;

        let members = self.members_of(id).await?;
        Ok(assemble(row, members))
    }

    /// Looks a category up by id first, then by name.
    pub async fn find(&self, id_or_name: &str) -> DbResult<Option<PrinterCategory>> {
        let sql = format!(
            "SELECT {} FROM printer_categories WHERE id = ?1 OR name = ?1 \
             ORDER BY (id = ?1) DESC LIMIT 1",
            CATEGORY_COLUMNS
        );
        let row = sqlx::query_as::<_, CategoryRow>(&sql)
            .bind(id_or_name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let members = self.members_of(&row.id).await?;
                Ok(Some(assemble(row, members)))
            }
            None => Ok(None),
        }
    }

    async fn members_of(&self, id: &str) -> DbResult<Vec<GroupMember>> {
        let rows = sqlx::query_as::<_, MemberRow>(
            "SELECT category_id, printer_name, priority FROM category_printers \
             WHERE category_id = ?1 ORDER BY priority DESC, printer_name",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|m| GroupMember::new(m.printer_name, m.priority))
            .collect())
    }

    /// Creates a category and its member rows in one transaction.
    pub async fn create(&self, category: &NewCategory) -> DbResult<PrinterCategory> {
        let id = Uuid::new_v4().to_string();
        debug!(category_id = %id, name = %category.name, "Creating category");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        sqlx::query(
            "INSERT INTO printer_categories (id, name, description, group_id, balancing_strategy, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&id)
        .bind(&category.name)
        .bind(&category.description)
        .bind(&category.group_id)
        .bind(category.balancing_strategy)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        insert_members(&mut tx, &id, &category.members).await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        self.get(&id).await
    }

    pub async fn update(&self, id: &str, update: &CategoryUpdate) -> DbResult<PrinterCategory> {
        let result = sqlx::query(
            r#"
            UPDATE printer_categories SET
                name = COALESCE(?2, name),
                description = COALESCE(?3, description),
                group_id = CASE WHEN ?5 THEN NULL ELSE COALESCE(?4, group_id) END,
                balancing_strategy = COALESCE(?6, balancing_strategy)
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(&update.name)
        .bind(&update.description)
        .bind(&update.group_id)
        .bind(update.clear_group)
        .bind(update.balancing_strategy)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PrinterCategory", id));
        }
        self.get(id).await
    }

    /// Replaces the member list of a category.
    pub async fn set_members(&self, id: &str, members: &[GroupMember]) -> DbResult<PrinterCategory> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let exists: Option<String> =
            sqlx::query_scalar("SELECT id FROM printer_categories WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(DbError::not_found("PrinterCategory", id));
        }

        sqlx::query("DELETE FROM category_printers WHERE category_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_members(&mut tx, id, members).await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        self.get(id).await
    }

    /// Deletes a category together with its rules and member rows.
    pub async fn delete(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM printer_categories WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PrinterCategory", id));
        }
        Ok(())
    }
}

async fn insert_members(
    tx: &mut Transaction<'_, Sqlite>,
    category_id: &str,
    members: &[GroupMember],
) -> DbResult<()> {
    for member in members {
        sqlx::query(
            "INSERT INTO category_printers (category_id, printer_name, priority) VALUES (?1, ?2, ?3)",
        )
        .bind(category_id)
        .bind(&member.printer)
        .bind(member.priority)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::group::NewGroup;
    use crate::repository::printer::NewPrinter;

    async fn db() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.printers()
            .save(&NewPrinter {
                name: "P1".into(),
                description: None,
                connection: "memory://".into(),
                is_default: false,
                enabled: true,
            })
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_create_and_find_by_name() {
        let db = db().await;
        let created = db
            .categories()
            .create(&NewCategory {
                name: "kitchen".into(),
                members: vec![GroupMember::new("P1", 0)],
                ..Default::default()
            })
            .await
            .unwrap();

        let by_name = db.categories().find("kitchen").await.unwrap().unwrap();
        assert_eq!(by_name.id, created.id);
        assert_eq!(by_name.members.len(), 1);

        let by_id = db.categories().find(&created.id).await.unwrap().unwrap();
        assert_eq!(by_id.name, "kitchen");
        assert!(db.categories().find("bar").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deleting_group_detaches_category() {
        let db = db().await;
        let group = db
            .groups()
            .create(&NewGroup {
                name: "line".into(),
                balancing_strategy: BalancingStrategy::RoundRobin,
                active: true,
                members: vec![],
            })
            .await
            .unwrap();
        let category = db
            .categories()
            .create(&NewCategory {
                name: "kitchen".into(),
                group_id: Some(group.id.clone()),
                ..Default::default()
            })
            .await
            .unwrap();

        db.groups().delete(&group.id).await.unwrap();
        assert!(db.categories().get(&category.id).await.unwrap().group_id.is_none());
    }

    #[tokio::test]
    async fn test_update_clear_group() {
        let db = db().await;
        let group = db
            .groups()
            .create(&NewGroup {
                name: "line".into(),
                balancing_strategy: BalancingStrategy::RoundRobin,
                active: true,
                members: vec![],
            })
            .await
            .unwrap();
        let category = db
            .categories()
            .create(&NewCategory {
                name: "kitchen".into(),
                group_id: Some(group.id),
                ..Default::default()
            })
            .await
            .unwrap();

        let updated = db
            .categories()
            .update(
                &category.id,
                &CategoryUpdate {
                    clear_group: true,
                    description: Some("hot line".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.group_id.is_none());
        assert_eq!(updated.description.as_deref(), Some("hot line"));
        assert_eq!(updated.name, "kitchen");
    }
}
