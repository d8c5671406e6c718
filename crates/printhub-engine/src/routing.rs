//! # Routing Table
//!
//! Immutable snapshot of rules, categories and groups used by the
//! dispatcher. Rebuilt after every configuration change and swapped in
//! whole, so a job is always routed against one consistent view.
//!
//! ```text
//!   job metadata ──classify──► category ──resolve_group──► group
//!                                  │                         ▲
//!                                  ├── group_id set ─────────┘
//!                                  └── own members ──► implicit group
//! ```

use std::collections::HashMap;

use tracing::{debug, warn};

use printhub_core::routing::RuleEngine;
use printhub_core::{PrintJob, PrinterCategory, PrinterGroup, RoutingError, RoutingRule};
use printhub_db::Database;

use crate::error::EngineResult;

#[derive(Debug, Default)]
pub struct RoutingTable {
    engine: RuleEngine,
    categories: HashMap<String, PrinterCategory>,
    groups: HashMap<String, PrinterGroup>,
}

impl RoutingTable {
    /// Compiles a table. `default_category` may be a category id or name;
    /// an unknown default is ignored with a warning.
    pub fn build(
        rules: &[RoutingRule],
        categories: Vec<PrinterCategory>,
        groups: Vec<PrinterGroup>,
        default_category: Option<&str>,
    ) -> EngineResult<Self> {
        let default_id = default_category.and_then(|wanted| {
            let found = categories
                .iter()
                .find(|c| c.id == wanted)
                .or_else(|| categories.iter().find(|c| c.name == wanted))
                .map(|c| c.id.clone());
            if found.is_none() {
                warn!(category = %wanted, "Default category does not exist");
            }
            found
        });

        let engine = RuleEngine::new(rules, default_id)?;
        debug!(
            rules = engine.len(),
            categories = categories.len(),
            groups = groups.len(),
            "Routing table built"
        );

        Ok(RoutingTable {
            engine,
            categories: categories.into_iter().map(|c| (c.id.clone(), c)).collect(),
            groups: groups.into_iter().map(|g| (g.id.clone(), g)).collect(),
        })
    }

    /// Reads everything from the store.
    pub async fn load(db: &Database, default_category: Option<&str>) -> EngineResult<Self> {
        let rules = db.rules().list().await?;
        let categories = db.categories().list().await?;
        let groups = db.groups().list().await?;
        Self::build(&rules, categories, groups, default_category)
    }

    /// The job's category.
    pub fn classify(&self, job: &PrintJob) -> Result<&PrinterCategory, RoutingError> {
        let id = self.engine.classify(&job.metadata, &job.file_name)?;
        self.categories
            .get(id)
            .ok_or_else(|| RoutingError::UnknownCategory {
                category: id.to_string(),
            })
    }

    /// The group a category dispatches to (one group per category).
    pub fn resolve_group(&self, category: &PrinterCategory) -> Result<PrinterGroup, RoutingError> {
        match category.group_id {
            Some(ref group_id) => self
                .groups
                .get(group_id)
                .cloned()
                .ok_or_else(|| RoutingError::NoEligiblePrinter {
                    group: group_id.clone(),
                }),
            None if !category.members.is_empty() => Ok(category.implicit_group()),
            None => Err(RoutingError::NoEligiblePrinter {
                group: category.name.clone(),
            }),
        }
    }

    /// Looks up a group by id, including implicit category groups.
    pub fn group(&self, id: &str) -> Option<PrinterGroup> {
        if let Some(group) = self.groups.get(id) {
            return Some(group.clone());
        }
        id.strip_prefix(printhub_core::types::IMPLICIT_GROUP_PREFIX)
            .and_then(|category_id| self.categories.get(category_id))
            .map(PrinterCategory::implicit_group)
    }

    pub fn category(&self, id: &str) -> Option<&PrinterCategory> {
        self.categories.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use printhub_core::{BalancingStrategy, GroupMember, JobOptions, MatchType, NewPrintJob};

    fn category(id: &str, group_id: Option<&str>, members: Vec<GroupMember>) -> PrinterCategory {
        PrinterCategory {
            id: id.into(),
            name: format!("{}-name", id),
            description: None,
            group_id: group_id.map(str::to_string),
            balancing_strategy: BalancingStrategy::RoundRobin,
            members,
            created_at: Utc::now(),
        }
    }

    fn group(id: &str) -> PrinterGroup {
        PrinterGroup {
            id: id.into(),
            name: id.into(),
            balancing_strategy: BalancingStrategy::Priority,
            active: true,
            members: vec![GroupMember::new("P1", 1)],
            created_at: Utc::now(),
        }
    }

    fn job(station: Option<&str>) -> PrintJob {
        let mut metadata = printhub_core::JobMetadata::default();
        metadata.station = station.map(str::to_string);
        PrintJob::new(NewPrintJob {
            file_name: "t.txt".into(),
            content: vec![1],
            content_type: Default::default(),
            options: JobOptions::default(),
            metadata,
            priority: 0,
        })
    }

    #[test]
    fn test_classify_and_resolve_explicit_group() {
        let rules = vec![RoutingRule::new("kitchen", "station", "kitchen", MatchType::Exact, 0, 1)];
        let table = RoutingTable::build(
            &rules,
            vec![category("kitchen", Some("g1"), vec![])],
            vec![group("g1")],
            None,
        )
        .unwrap();

        let category = table.classify(&job(Some("kitchen"))).unwrap();
        assert_eq!(category.id, "kitchen");
        assert_eq!(table.resolve_group(category).unwrap().id, "g1");
    }

    #[test]
    fn test_default_category_by_name() {
        let table = RoutingTable::build(
            &[],
            vec![category("receipts", None, vec![GroupMember::new("P1", 0)])],
            vec![],
            Some("receipts-name"),
        )
        .unwrap();

        let category = table.classify(&job(None)).unwrap();
        let group = table.resolve_group(category).unwrap();
        assert_eq!(group.id, "category:receipts");
        assert_eq!(table.group("category:receipts").unwrap().members.len(), 1);
    }

    #[test]
    fn test_no_route_without_default() {
        let table = RoutingTable::build(&[], vec![], vec![], None).unwrap();
        assert_eq!(table.classify(&job(Some("bar"))), Err(RoutingError::NoMatchingRoute));
    }

    #[test]
    fn test_unknown_default_is_ignored() {
        let table = RoutingTable::build(&[], vec![], vec![], Some("ghost")).unwrap();
        assert_eq!(table.classify(&job(None)), Err(RoutingError::NoMatchingRoute));
    }

    #[test]
    fn test_category_without_printers() {
        let table = RoutingTable::build(&[], vec![category("empty", None, vec![])], vec![], None).unwrap();
        let err = table
            .resolve_group(table.category("empty").unwrap())
            .unwrap_err();
        assert!(err.is_exhausted());
    }
}
