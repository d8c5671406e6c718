//! # Routing Rule Repository
//!
//! Rules are stored with a monotonic `position` assigned at creation, so
//! rules with equal priority keep creation order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use printhub_core::{MatchType, RoutingRule};

/// Rule definition as submitted by an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRule {
    pub category_id: String,
    pub field: String,
    pub pattern: String,
    pub match_type: MatchType,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub match_type: Option<MatchType>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, sqlx::FromRow)]
struct RuleRow {
    id: String,
    category_id: String,
    field: String,
    pattern: String,
    match_type: MatchType,
    priority: i64,
    position: i64,
    enabled: bool,
    created_at: DateTime<Utc>,
}

impl From<RuleRow> for RoutingRule {
    fn from(row: RuleRow) -> Self {
        RoutingRule {
            id: row.id,
            category_id: row.category_id,
            field: row.field,
            pattern: row.pattern,
            match_type: row.match_type,
            priority: row.priority,
            position: row.position,
            enabled: row.enabled,
            created_at: row.created_at,
        }
    }
}

const RULE_COLUMNS: &str =
    "id, category_id, field, pattern, match_type, priority, position, enabled, created_at";

/// Repository for routing rules.
#[derive(Debug, Clone)]
pub struct RuleRepository {
    pool: SqlitePool,
}

impl RuleRepository {
    /// Creates a new RuleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RuleRepository { pool }
    }

    /// All rules in evaluation order (priority desc, position asc).
    pub async fn list(&self) -> DbResult<Vec<RoutingRule>> {
        let sql = format!(
            "SELECT {} FROM routing_rules ORDER BY priority DESC, position ASC",
            RULE_COLUMNS
        );
        let rows = sqlx::query_as::<_, RuleRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(RoutingRule::from).collect())
    }

    pub async fn get(&self, id: &str) -> DbResult<RoutingRule> {
        let sql = format!("SELECT {} FROM routing_rules WHERE id = ?1", RULE_COLUMNS);
        sqlx::query_as::<_, RuleRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(RoutingRule::from)
            .ok_or_else(|| DbError::not_found("RoutingRule", id))
    }

    /// Inserts a rule at the next creation position.
    ///
    /// The caller validates `field` and `pattern` first.
    pub async fn create(&self, rule: &NewRule) -> DbResult<RoutingRule> {
        let id = Uuid::new_v4().to_string();
        debug!(
            rule_id = %id,
            category_id = %rule.category_id,
            field = %rule.field,
            match_type = %rule.match_type,
            "Creating routing rule"
        );

        sqlx::query(
            r#"
            INSERT INTO routing_rules (
                id, category_id, field, pattern, match_type, priority, position, enabled, created_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, COALESCE(MAX(position), 0) + 1, ?7, ?8
            FROM routing_rules
            "#,
        )
        .bind(&id)
        .bind(&rule.category_id)
        .bind(&rule.field)
        .bind(&rule.pattern)
        .bind(rule.match_type)
        .bind(rule.priority)
        .bind(rule.enabled)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.get(&id).await
    }

    pub async fn update(&self, id: &str, update: &RuleUpdate) -> DbResult<RoutingRule> {
        let result = sqlx::query(
            r#"
            UPDATE routing_rules SET
                field = COALESCE(?2, field),
                pattern = COALESCE(?3, pattern),
                match_type = COALESCE(?4, match_type),
                priority = COALESCE(?5, priority),
                enabled = COALESCE(?6, enabled)
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(&update.field)
        .bind(&update.pattern)
        .bind(update.match_type)
        .bind(update.priority)
        .bind(update.enabled)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("RoutingRule", id));
        }
        self.get(id).await
    }

    pub async fn delete(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM routing_rules WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("RoutingRule", id));
        }
        Ok(())
    }
}
