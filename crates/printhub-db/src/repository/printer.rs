//! # Printer Repository
//!
//! Known physical printers. Names are the primary key and are referenced by
//! group and category membership rows (deleting a printer removes it from
//! every group and category).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use printhub_core::Printer;

/// Printer definition as submitted by an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPrinter {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub connection: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, sqlx::FromRow)]
struct PrinterRow {
    name: String,
    description: Option<String>,
    connection: String,
    is_default: bool,
    enabled: bool,
    created_at: DateTime<Utc>,
}

impl From<PrinterRow> for Printer {
    fn from(row: PrinterRow) -> Self {
        Printer {
            name: row.name,
            description: row.description,
            connection: row.connection,
            is_default: row.is_default,
            enabled: row.enabled,
            created_at: row.created_at,
        }
    }
}

/// Repository for printer definitions.
#[derive(Debug, Clone)]
pub struct PrinterRepository {
    pool: SqlitePool,
}

impl PrinterRepository {
    /// Creates a new PrinterRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PrinterRepository { pool }
    }

    /// All printers, ordered by name.
    pub async fn list(&self) -> DbResult<Vec<Printer>> {
        let rows = sqlx::query_as::<_, PrinterRow>(
            "SELECT name, description, connection, is_default, enabled, created_at \
             FROM printers ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Printer::from).collect())
    }

    pub async fn get(&self, name: &str) -> DbResult<Printer> {
        let row = sqlx::query_as::<_, PrinterRow>(
            "SELECT name, description, connection, is_default, enabled, created_at \
             FROM printers WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Printer::from)
            .ok_or_else(|| DbError::not_found("Printer", name))
    }

    /// Inserts or replaces a printer definition.
    ///
    /// Marking a printer as default clears the flag on every other printer in
    /// the same transaction.
    pub async fn save(&self, printer: &NewPrinter) -> DbResult<Printer> {
        debug!(printer = %printer.name, connection = %printer.connection, "Saving printer");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        if printer.is_default {
            sqlx::query("UPDATE printers SET is_default = 0 WHERE name <> ?1 AND is_default = 1")
                .bind(&printer.name)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO printers (name, description, connection, is_default, enabled, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                connection = excluded.connection,
                is_default = excluded.is_default,
                enabled = excluded.enabled
            "#,
        )
        .bind(&printer.name)
        .bind(&printer.description)
        .bind(&printer.connection)
        .bind(printer.is_default)
        .bind(printer.enabled)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        self.get(&printer.name).await
    }

    /// Deletes a printer and its membership rows.
    pub async fn delete(&self, name: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM printers WHERE name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Printer", name));
        }
        Ok(())
    }

    /// The printer flagged as default, if any.
    pub async fn default_printer(&self) -> DbResult<Option<Printer>> {
        let row = sqlx::query_as::<_, PrinterRow>(
            "SELECT name, description, connection, is_default, enabled, created_at \
             FROM printers WHERE is_default = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Printer::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    fn printer(name: &str, is_default: bool) -> NewPrinter {
        NewPrinter {
            name: name.to_string(),
            description: None,
            connection: "memory://".to_string(),
            is_default,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_save_and_list() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let printers = db.printers();

        printers.save(&printer("kitchen-1", false)).await.unwrap();
        printers.save(&printer("bar-1", false)).await.unwrap();

        let names: Vec<String> = printers.list().await.unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["bar-1", "kitchen-1"]);
    }

    #[tokio::test]
    async fn test_single_default_printer() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let printers = db.printers();

        printers.save(&printer("a", true)).await.unwrap();
        printers.save(&printer("b", true)).await.unwrap();

        let default = printers.default_printer().await.unwrap().unwrap();
        assert_eq!(default.name, "b");
        assert!(!printers.get("a").await.unwrap().is_default);
    }

    #[tokio::test]
    async fn test_update_keeps_created_at() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let printers = db.printers();

        let first = printers.save(&printer("a", false)).await.unwrap();
        let mut changed = printer("a", false);
        changed.connection = "tcp://10.0.0.5:9100".into();
        let second = printers.save(&changed).await.unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.connection, "tcp://10.0.0.5:9100");
    }

    #[tokio::test]
    async fn test_delete_missing_printer() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.printers().delete("ghost").await.unwrap_err().is_not_found());
    }
}
