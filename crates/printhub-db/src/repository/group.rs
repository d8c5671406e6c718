//! # Printer Group Repository
//!
//! Balancing groups and their member printers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use printhub_core::{BalancingStrategy, GroupMember, PrinterGroup};

/// Group definition as submitted by an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub balancing_strategy: BalancingStrategy,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub members: Vec<GroupMember>,
}

fn default_active() -> bool {
    true
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub balancing_strategy: Option<BalancingStrategy>,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, sqlx::FromRow)]
struct GroupRow {
    id: String,
    name: String,
    balancing_strategy: BalancingStrategy,
    active: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct MemberRow {
    group_id: String,
    printer_name: String,
    priority: i64,
}

fn assemble(row: GroupRow, members: Vec<GroupMember>) -> PrinterGroup {
    PrinterGroup {
        id: row.id,
        name: row.name,
        balancing_strategy: row.balancing_strategy,
        active: row.active,
        members,
        created_at: row.created_at,
    }
}

/// Repository for printer groups.
#[derive(Debug, Clone)]
pub struct GroupRepository {
    pool: SqlitePool,
}

impl GroupRepository {
    /// Creates a new GroupRepository.
    pub fn new(pool: SqlitePool) -> Self {
        GroupRepository { pool }
    }

    /// All groups with their members, ordered by name.
    pub async fn list(&self) -> DbResult<Vec<PrinterGroup>> {
        let rows = sqlx::query_as::<_, GroupRow>(
            "SELECT id, name, balancing_strategy, active, created_at FROM printer_groups ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let member_rows = sqlx::query_as::<_, MemberRow>(
            "SELECT group_id, printer_name, priority FROM group_printers \
             ORDER BY priority DESC, printer_name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut members: HashMap<String, Vec<GroupMember>> = HashMap::new();
        for m in member_rows {
            members
                .entry(m.group_id)
                .or_default()
                .push(GroupMember::new(m.printer_name, m.priority));
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let group_members = members.remove(&row.id).unwrap_or_default();
                assemble(row, group_members)
            })
            .collect())
    }

    pub async fn get(&self, id: &str) -> DbResult<PrinterGroup> {
        let row = sqlx::query_as::<_, GroupRow>(
            "SELECT id, name, balancing_strategy, active, created_at FROM printer_groups WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found("PrinterGroup", id))?;

        let members = sqlx::query_as::<_, MemberRow>(
            "SELECT group_id, printer_name, priority FROM group_printers WHERE group_id = ?1 \
             ORDER BY priority DESC, printer_name",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|m| GroupMember::new(m.printer_name, m.priority))
        .collect();

        Ok(assemble(row, members))
    }

    /// Creates a group and its member rows in one transaction.
    pub async fn create(&self, group: &NewGroup) -> DbResult<PrinterGroup> {
        let id = Uuid::new_v4().to_string();
        debug!(group_id = %id, name = %group.name, strategy = %group.balancing_strategy, "Creating group");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        sqlx::query(
            "INSERT INTO printer_groups (id, name, balancing_strategy, active, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&id)
        .bind(&group.name)
        .bind(group.balancing_strategy)
        .bind(group.active)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        insert_members(&mut tx, &id, &group.members).await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        self.get(&id).await
    }

    pub async fn update(&self, id: &str, update: &GroupUpdate) -> DbResult<PrinterGroup> {
        let result = sqlx::query(
            r#"
            UPDATE printer_groups SET
                name = COALESCE(?2, name),
                balancing_strategy = COALESCE(?3, balancing_strategy),
                active = COALESCE(?4, active)
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(&update.name)
        .bind(update.balancing_strategy)
        .bind(update.active)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PrinterGroup", id));
        }
        self.get(id).await
    }

    /// Replaces the member list of a group.
    pub async fn set_members(&self, id: &str, members: &[GroupMember]) -> DbResult<PrinterGroup> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM printer_groups WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(DbError::not_found("PrinterGroup", id));
        }

        sqlx::query("DELETE FROM group_printers WHERE group_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_members(&mut tx, id, members).await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        self.get(id).await
    }

    /// Deletes a group. Categories pointing at it fall back to their own
    /// members (`ON DELETE SET NULL`).
    pub async fn delete(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM printer_groups WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PrinterGroup", id));
        }
        Ok(())
    }
}

async fn insert_members(
    tx: &mut Transaction<'_, Sqlite>,
    group_id: &str,
    members: &[GroupMember],
) -> DbResult<()> {
    for member in members {
        sqlx::query("INSERT INTO group_printers (group_id, printer_name, priority) VALUES (?1, ?2, ?3)")
            .bind(group_id)
            .bind(&member.printer)
            .bind(member.priority)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}
