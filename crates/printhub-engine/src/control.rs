//! # Control Plane
//!
//! The one entry point for operators, shared by the HTTP API and the
//! realtime channel.
//!
//! ```text
//!   HTTP handler ─┐
//!                 ├──► ControlPlane ──► SecurityGate ──► store / dispatcher
//!   channel msg  ─┘         │
//!                           └── category/rule/group/config change
//!                                   └──► routing table rebuilt
//! ```
//!
//! Every operation except [`ControlPlane::health`] authorizes first; a
//! rejected call has no side effects.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use printhub_core::validation::{
    validate_connection, validate_name, validate_new_job, validate_rule,
};
use printhub_core::{
    AnalyticsSummary, GroupMember, JobEvent, NewPrintJob, PrintJob, Printer, PrinterCategory,
    PrinterGroup, PrinterStatus, RoutingRule,
};
use printhub_db::{
    AnalyticsFilter, CategoryUpdate, Database, GroupUpdate, JobFilter, NewCategory, NewGroup,
    NewPrinter, NewRule, RuleUpdate,
};

use crate::analytics::{AnalyticsRecorder, ExportFormat};
use crate::config::{merge_json, ConfigError, ConfigStore, StationConfig};
use crate::dispatcher::Dispatcher;
use crate::error::EngineResult;
use crate::events::EventBus;
use crate::registry::PrinterRegistry;
use crate::security::{ApiKeyInfo, SecurityGate};

/// Answer to an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    pub database: bool,
    pub jobs: BTreeMap<String, i64>,
    pub printers: Vec<PrinterStatus>,
}

/// Exported analytics plus the content type to serve it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsExport {
    pub format: ExportFormat,
    pub body: String,
}

pub struct ControlPlane {
    db: Arc<Database>,
    config: Arc<ConfigStore>,
    gate: SecurityGate,
    registry: Arc<PrinterRegistry>,
    dispatcher: Dispatcher,
    events: Arc<EventBus>,
    analytics: AnalyticsRecorder,
}

impl ControlPlane {
    pub fn new(
        db: Arc<Database>,
        config: Arc<ConfigStore>,
        registry: Arc<PrinterRegistry>,
        dispatcher: Dispatcher,
        events: Arc<EventBus>,
    ) -> Self {
        ControlPlane {
            gate: SecurityGate::new(config.clone()),
            analytics: AnalyticsRecorder::new(db.clone()),
            db,
            config,
            registry,
            dispatcher,
            events,
        }
    }

    /// Security Gate check. Callers that decode a payload before handing it
    /// over run this first, so a bad key is reported before bad content.
    pub async fn authorize(&self, api_key: Option<&str>) -> EngineResult<()> {
        self.gate.authorize(api_key).await?;
        Ok(())
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Validates and persists a submission, then wakes the dispatcher.
    ///
    /// The job is durable before this returns.
    pub async fn submit_job(&self, api_key: Option<&str>, job: NewPrintJob) -> EngineResult<SubmitReceipt> {
        self.authorize(api_key).await?;
        validate_new_job(&job)?;

        let job = self.db.jobs().enqueue(job).await?;
        info!(
            job_id = %job.id,
            file_name = %job.file_name,
            priority = job.priority,
            "Job accepted"
        );
        self.events.publish(&JobEvent::accepted(&job));
        self.dispatcher.wake();

        Ok(SubmitReceipt {
            job_id: job.id,
            status: "accepted".to_string(),
        })
    }

    pub async fn get_job(&self, api_key: Option<&str>, id: &str) -> EngineResult<PrintJob> {
        self.authorize(api_key).await?;
        Ok(self.db.jobs().get(id).await?)
    }

    pub async fn list_jobs(&self, api_key: Option<&str>, filter: &JobFilter) -> EngineResult<Vec<PrintJob>> {
        self.authorize(api_key).await?;
        Ok(self.db.jobs().list(filter).await?)
    }

    pub async fn cancel_job(&self, api_key: Option<&str>, id: &str) -> EngineResult<PrintJob> {
        self.authorize(api_key).await?;
        self.dispatcher.cancel(id).await
    }

    pub async fn acknowledge_job(&self, api_key: Option<&str>, id: &str) -> EngineResult<PrintJob> {
        self.authorize(api_key).await?;
        self.dispatcher.acknowledge(id).await
    }

    pub async fn requeue_job(&self, api_key: Option<&str>, id: &str) -> EngineResult<PrintJob> {
        self.authorize(api_key).await?;
        self.dispatcher.requeue(id).await
    }

    // =========================================================================
    // Printers
    // =========================================================================

    pub async fn list_printers(&self, api_key: Option<&str>) -> EngineResult<Vec<Printer>> {
        self.authorize(api_key).await?;
        Ok(self.db.printers().list().await?)
    }

    /// Creates or replaces a printer definition.
    pub async fn save_printer(&self, api_key: Option<&str>, printer: NewPrinter) -> EngineResult<Printer> {
        self.authorize(api_key).await?;
        validate_name("name", &printer.name)?;
        validate_connection(&printer.connection)?;

        let saved = self.db.printers().save(&printer).await?;
        info!(printer = %saved.name, connection = %saved.connection, "Printer saved");
        self.registry.load().await?;
        self.dispatcher.wake();
        Ok(saved)
    }

    pub async fn delete_printer(&self, api_key: Option<&str>, name: &str) -> EngineResult<()> {
        self.authorize(api_key).await?;
        self.db.printers().delete(name).await?;
        info!(printer = %name, "Printer deleted");
        self.registry.load().await?;
        // Memberships referencing the printer are gone too
        self.dispatcher.reload_routing().await
    }

    pub async fn printer_statuses(&self, api_key: Option<&str>) -> EngineResult<Vec<PrinterStatus>> {
        self.authorize(api_key).await?;
        Ok(self.statuses().await)
    }

    async fn statuses(&self) -> Vec<PrinterStatus> {
        let dispatcher = self.dispatcher.clone();
        self.registry
            .statuses(move |name| dispatcher.in_flight(name))
            .await
    }

    // =========================================================================
    // Categories
    // =========================================================================

    pub async fn list_categories(&self, api_key: Option<&str>) -> EngineResult<Vec<PrinterCategory>> {
        self.authorize(api_key).await?;
        Ok(self.db.categories().list().await?)
    }

    pub async fn create_category(&self, api_key: Option<&str>, category: NewCategory) -> EngineResult<PrinterCategory> {
        self.authorize(api_key).await?;
        validate_name("name", &category.name)?;

        let created = self.db.categories().create(&category).await?;
        info!(category_id = %created.id, name = %created.name, "Category created");
        self.routing_changed().await?;
        Ok(created)
    }

    pub async fn update_category(
        &self,
        api_key: Option<&str>,
        id: &str,
        update: CategoryUpdate,
    ) -> EngineResult<PrinterCategory> {
        self.authorize(api_key).await?;
        if let Some(ref name) = update.name {
            validate_name("name", name)?;
        }

        let updated = self.db.categories().update(id, &update).await?;
        info!(category_id = %id, "Category updated");
        self.routing_changed().await?;
        Ok(updated)
    }

    /// Replaces the category's own printer list.
    pub async fn set_category_printers(
        &self,
        api_key: Option<&str>,
        id: &str,
        members: Vec<GroupMember>,
    ) -> EngineResult<PrinterCategory> {
        self.authorize(api_key).await?;
        let updated = self.db.categories().set_members(id, &members).await?;
        info!(category_id = %id, printers = members.len(), "Category printers set");
        self.routing_changed().await?;
        Ok(updated)
    }

    pub async fn delete_category(&self, api_key: Option<&str>, id: &str) -> EngineResult<()> {
        self.authorize(api_key).await?;
        self.db.categories().delete(id).await?;
        info!(category_id = %id, "Category deleted");
        self.routing_changed().await
    }

    // =========================================================================
    // Rules
    // =========================================================================

    pub async fn list_rules(&self, api_key: Option<&str>) -> EngineResult<Vec<RoutingRule>> {
        self.authorize(api_key).await?;
        Ok(self.db.rules().list().await?)
    }

    pub async fn create_rule(&self, api_key: Option<&str>, rule: NewRule) -> EngineResult<RoutingRule> {
        self.authorize(api_key).await?;
        validate_rule(&rule.field, &rule.pattern, rule.match_type)?;

        let created = self.db.rules().create(&rule).await?;
        info!(
            rule_id = %created.id,
            category_id = %created.category_id,
            field = %created.field,
            "Rule created"
        );
        self.routing_changed().await?;
        Ok(created)
    }

    pub async fn update_rule(&self, api_key: Option<&str>, id: &str, update: RuleUpdate) -> EngineResult<RoutingRule> {
        self.authorize(api_key).await?;

        // Validate the rule as it will be after the change
        let current = self.db.rules().get(id).await?;
        validate_rule(
            update.field.as_deref().unwrap_or(&current.field),
            update.pattern.as_deref().unwrap_or(&current.pattern),
            update.match_type.unwrap_or(current.match_type),
        )?;

        let updated = self.db.rules().update(id, &update).await?;
        info!(rule_id = %id, "Rule updated");
        self.routing_changed().await?;
        Ok(updated)
    }

    pub async fn delete_rule(&self, api_key: Option<&str>, id: &str) -> EngineResult<()> {
        self.authorize(api_key).await?;
        self.db.rules().delete(id).await?;
        info!(rule_id = %id, "Rule deleted");
        self.routing_changed().await
    }

    // =========================================================================
    // Groups
    // =========================================================================

    pub async fn list_groups(&self, api_key: Option<&str>) -> EngineResult<Vec<PrinterGroup>> {
        self.authorize(api_key).await?;
        Ok(self.db.groups().list().await?)
    }

    pub async fn create_group(&self, api_key: Option<&str>, group: NewGroup) -> EngineResult<PrinterGroup> {
        self.authorize(api_key).await?;
        validate_name("name", &group.name)?;

        let created = self.db.groups().create(&group).await?;
        info!(group_id = %created.id, name = %created.name, "Group created");
        self.routing_changed().await?;
        Ok(created)
    }

    pub async fn update_group(&self, api_key: Option<&str>, id: &str, update: GroupUpdate) -> EngineResult<PrinterGroup> {
        self.authorize(api_key).await?;
        if let Some(ref name) = update.name {
            validate_name("name", name)?;
        }

        let updated = self.db.groups().update(id, &update).await?;
        info!(group_id = %id, "Group updated");
        self.dispatcher.forget_group(id);
        self.routing_changed().await?;
        Ok(updated)
    }

    pub async fn set_group_printers(
        &self,
        api_key: Option<&str>,
        id: &str,
        members: Vec<GroupMember>,
    ) -> EngineResult<PrinterGroup> {
        self.authorize(api_key).await?;
        let updated = self.db.groups().set_members(id, &members).await?;
        info!(group_id = %id, printers = members.len(), "Group printers set");
        self.dispatcher.forget_group(id);
        self.routing_changed().await?;
        Ok(updated)
    }

    pub async fn delete_group(&self, api_key: Option<&str>, id: &str) -> EngineResult<()> {
        self.authorize(api_key).await?;
        self.db.groups().delete(id).await?;
        info!(group_id = %id, "Group deleted");
        self.dispatcher.forget_group(id);
        self.routing_changed().await
    }

    async fn routing_changed(&self) -> EngineResult<()> {
        self.dispatcher.reload_routing().await?;
        self.dispatcher.wake();
        Ok(())
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Current configuration with secrets masked.
    pub async fn get_config(&self, api_key: Option<&str>) -> EngineResult<StationConfig> {
        self.authorize(api_key).await?;
        Ok(self.config.get().await.redacted())
    }

    /// Applies a partial JSON document to the configuration.
    ///
    /// The `security` section is ignored here; keys change only through the
    /// key rotation operations.
    pub async fn update_config(&self, api_key: Option<&str>, patch: serde_json::Value) -> EngineResult<StationConfig> {
        self.authorize(api_key).await?;

        let current = self.config.get().await;
        let mut document = serde_json::to_value(&current)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        merge_json(&mut document, patch);
        let mut next: StationConfig = serde_json::from_value(document)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        next.security = current.security;

        let updated = self.config.update(move |config| *config = next).await?;

        info!("Configuration updated");
        self.routing_changed().await?;
        Ok(updated.redacted())
    }

    /// Re-reads the configuration file.
    pub async fn reload_config(&self, api_key: Option<&str>) -> EngineResult<StationConfig> {
        self.authorize(api_key).await?;
        self.reload().await
    }

    /// Re-reads the configuration file on behalf of the station itself
    /// (SIGHUP).
    pub async fn reload(&self) -> EngineResult<StationConfig> {
        let reloaded = self.config.reload().await?;
        info!("Configuration reloaded");
        self.routing_changed().await?;
        Ok(reloaded.redacted())
    }

    // =========================================================================
    // API key
    // =========================================================================

    pub async fn get_api_key(&self, api_key: Option<&str>) -> EngineResult<ApiKeyInfo> {
        self.authorize(api_key).await?;
        Ok(self.gate.get_api_key().await)
    }

    pub async fn update_api_key(&self, api_key: Option<&str>, new_key: &str) -> EngineResult<ApiKeyInfo> {
        self.authorize(api_key).await?;
        self.gate.update_api_key(new_key).await
    }

    pub async fn reset_api_key(&self, api_key: Option<&str>) -> EngineResult<ApiKeyInfo> {
        self.authorize(api_key).await?;
        Ok(self.gate.reset_api_key().await?)
    }

    // =========================================================================
    // Analytics
    // =========================================================================

    pub async fn export_analytics(
        &self,
        api_key: Option<&str>,
        format: ExportFormat,
        filter: &AnalyticsFilter,
    ) -> EngineResult<AnalyticsExport> {
        self.authorize(api_key).await?;
        let body = self.analytics.export(format, filter).await?;
        Ok(AnalyticsExport { format, body })
    }

    pub async fn analytics_summary(
        &self,
        api_key: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> EngineResult<AnalyticsSummary> {
        self.authorize(api_key).await?;
        self.analytics.summary(since).await
    }

    /// Summary for the realtime channel's periodic report.
    pub async fn report_summary(&self, since: Option<DateTime<Utc>>) -> EngineResult<AnalyticsSummary> {
        self.analytics.summary(since).await
    }

    /// Printer snapshot for the realtime channel's periodic report.
    pub async fn snapshot(&self) -> Vec<PrinterStatus> {
        self.statuses().await
    }

    // =========================================================================
    // Health
    // =========================================================================

    /// Liveness report. Needs no API key.
    pub async fn health(&self) -> HealthReport {
        let database = self.db.health_check().await;
        let jobs = match self.db.jobs().count_by_status().await {
            Ok(counts) => counts
                .into_iter()
                .map(|(status, count)| (status.to_string(), count))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Health check could not count jobs");
                BTreeMap::new()
            }
        };

        HealthReport {
            status: if database { "ok" } else { "degraded" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database,
            jobs,
            printers: self.statuses().await,
        }
    }
}
