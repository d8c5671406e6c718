//! # Routing Rule Engine
//!
//! Maps a job's metadata to a printer category using ordered rules.
//!
//! ## Evaluation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  rules sorted by (priority DESC, position ASC), disabled rules dropped  │
//! │                                                                         │
//! │   metadata ─► rule 1 ─ no ─► rule 2 ─ no ─► ... ─ no ─► default?        │
//! │                 │yes          │yes                        │     │       │
//! │                 ▼             ▼                           ▼     ▼       │
//! │             category A    category B                category  NoMatchingRoute
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Regex patterns are compiled when the engine is built. A bad pattern fails
//! the build; `classify` itself cannot fail on configuration. The engine is
//! immutable, so identical input always produces the identical category.

use regex::Regex;

use crate::error::{RoutingError, ValidationError};
use crate::metadata::{JobMetadata, MetadataField};
use crate::types::{MatchType, RoutingRule};

/// Pattern test for a single rule.
#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Prefix(String),
    Contains(String),
    Regex(Regex),
}

impl Matcher {
    fn compile(match_type: MatchType, pattern: &str) -> Result<Self, ValidationError> {
        Ok(match match_type {
            MatchType::Exact => Matcher::Exact(pattern.to_string()),
            MatchType::Prefix => Matcher::Prefix(pattern.to_string()),
            MatchType::Contains => Matcher::Contains(pattern.to_string()),
            MatchType::Regex => Matcher::Regex(
                Regex::new(pattern).map_err(|e| ValidationError::invalid("pattern", e.to_string()))?,
            ),
        })
    }

    fn is_match(&self, value: &str) -> bool {
        match self {
            Matcher::Exact(p) => value == p,
            Matcher::Prefix(p) => value.starts_with(p.as_str()),
            Matcher::Contains(p) => value.contains(p.as_str()),
            Matcher::Regex(re) => re.is_match(value),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule_id: String,
    category_id: String,
    field: MetadataField,
    matcher: Matcher,
}

/// Immutable, precompiled rule table.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
    default_category: Option<String>,
}

impl RuleEngine {
    /// Compiles `rules` into evaluation order.
    ///
    /// ## Errors
    /// `ValidationError` for an unknown field or an invalid regex.
    pub fn new(rules: &[RoutingRule], default_category: Option<String>) -> Result<Self, ValidationError> {
        let mut ordered: Vec<&RoutingRule> = rules.iter().filter(|r| r.enabled).collect();
        // Stable sort keeps input order for rules with equal keys
        ordered.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.position.cmp(&b.position))
        });

        let compiled = ordered
            .into_iter()
            .map(|rule| {
                Ok(CompiledRule {
                    rule_id: rule.id.clone(),
                    category_id: rule.category_id.clone(),
                    field: rule.field.parse()?,
                    matcher: Matcher::compile(rule.match_type, &rule.pattern)?,
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        Ok(RuleEngine {
            rules: compiled,
            default_category,
        })
    }

    /// Returns the category for a job.
    ///
    /// A rule whose field is absent from the metadata does not match.
    pub fn classify(&self, metadata: &JobMetadata, file_name: &str) -> Result<&str, RoutingError> {
        self.matching_rule(metadata, file_name)
            .map(|rule| rule.category_id.as_str())
            .or(self.default_category.as_deref())
            .ok_or(RoutingError::NoMatchingRoute)
    }

    /// Id of the first rule that matches, if any (for diagnostics).
    pub fn explain(&self, metadata: &JobMetadata, file_name: &str) -> Option<&str> {
        self.matching_rule(metadata, file_name)
            .map(|rule| rule.rule_id.as_str())
    }

    fn matching_rule(&self, metadata: &JobMetadata, file_name: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|rule| {
            metadata
                .lookup(&rule.field, file_name)
                .map(|value| rule.matcher.is_match(value))
                .unwrap_or(false)
        })
    }

    pub fn default_category(&self) -> Option<&str> {
        self.default_category.as_deref()
    }

    /// Number of enabled rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rule(category: &str, field: &str, pattern: &str, match_type: MatchType, priority: i64, position: i64) -> RoutingRule {
        RoutingRule::new(category, field, pattern, match_type, priority, position)
    }

    fn station(value: &str) -> JobMetadata {
        JobMetadata {
            station: Some(value.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_exact_match() {
        let engine = RuleEngine::new(&[rule("kitchen", "station", "kitchen", MatchType::Exact, 0, 1)], None).unwrap();
        assert_eq!(engine.classify(&station("kitchen"), "a").unwrap(), "kitchen");
        assert_eq!(
            engine.classify(&station("kitchen-2"), "a"),
            Err(RoutingError::NoMatchingRoute)
        );
    }

    #[test]
    fn test_match_types() {
        let rules = vec![
            rule("prefix", "orderType", "deliv", MatchType::Prefix, 0, 1),
            rule("contains", "source", "kiosk", MatchType::Contains, 0, 2),
            rule("regex", "fileName", r"^receipt-\d+\.bin$", MatchType::Regex, 0, 3),
        ];
        let engine = RuleEngine::new(&rules, None).unwrap();

        let delivery = JobMetadata {
            order_type: Some("delivery".into()),
            ..Default::default()
        };
        assert_eq!(engine.classify(&delivery, "x").unwrap(), "prefix");

        let kiosk = JobMetadata {
            source: Some("lobby-kiosk-2".into()),
            ..Default::default()
        };
        assert_eq!(engine.classify(&kiosk, "x").unwrap(), "contains");

        assert_eq!(engine.classify(&JobMetadata::default(), "receipt-17.bin").unwrap(), "regex");
        assert!(engine.classify(&JobMetadata::default(), "receipt-x.bin").is_err());
    }

    #[test]
    fn test_first_match_wins_in_creation_order() {
        let rules = vec![
            rule("second", "station", "kit", MatchType::Prefix, 0, 2),
            rule("first", "station", "kitchen", MatchType::Exact, 0, 1),
        ];
        let engine = RuleEngine::new(&rules, None).unwrap();
        assert_eq!(engine.classify(&station("kitchen"), "a").unwrap(), "first");
    }

    #[test]
    fn test_priority_beats_creation_order() {
        let rules = vec![
            rule("early", "station", "kitchen", MatchType::Exact, 0, 1),
            rule("urgent", "station", "kitchen", MatchType::Exact, 10, 2),
        ];
        let engine = RuleEngine::new(&rules, None).unwrap();
        assert_eq!(engine.classify(&station("kitchen"), "a").unwrap(), "urgent");
    }

    #[test]
    fn test_default_category_and_disabled_rules() {
        let mut disabled = rule("bar", "station", "bar", MatchType::Exact, 0, 1);
        disabled.enabled = false;
        let engine = RuleEngine::new(&[disabled], Some("receipts".into())).unwrap();
        assert_eq!(engine.len(), 0);
        assert_eq!(engine.classify(&station("bar"), "a").unwrap(), "receipts");
    }

    #[test]
    fn test_invalid_regex_fails_at_load() {
        let result = RuleEngine::new(&[rule("x", "station", "([", MatchType::Regex, 0, 1)], None);
        assert!(matches!(result, Err(ValidationError::InvalidFormat { .. })));
    }

    #[test]
    fn test_extra_field_rule() {
        let engine = RuleEngine::new(&[rule("bikes", "extra.courier", "bike", MatchType::Exact, 0, 1)], None).unwrap();
        let mut metadata = JobMetadata::default();
        metadata.extra.insert("courier".into(), "bike".into());
        assert_eq!(engine.classify(&metadata, "a").unwrap(), "bikes");
        assert!(engine.explain(&metadata, "a").is_some());
    }

    fn arb_rule() -> impl Strategy<Value = RoutingRule> {
        (
            prop::sample::select(vec!["c1", "c2", "c3"]),
            prop::sample::select(vec!["station", "orderType", "source"]),
            "[a-c]{0,2}",
            prop::sample::select(vec![MatchType::Exact, MatchType::Prefix, MatchType::Contains]),
            -2i64..3,
            0i64..50,
        )
            .prop_map(|(c, f, p, m, prio, pos)| {
                RoutingRule::new(c, f, if p.is_empty() { "a".to_string() } else { p }, m, prio, pos)
            })
    }

    fn arb_metadata() -> impl Strategy<Value = JobMetadata> {
        (
            prop::option::of("[a-c]{0,3}"),
            prop::option::of("[a-c]{0,3}"),
            prop::option::of("[a-c]{0,3}"),
        )
            .prop_map(|(station, order_type, source)| JobMetadata {
                station,
                order_type,
                source,
                ..Default::default()
            })
    }

    proptest! {
        #[test]
        fn classify_is_deterministic(
            rules in prop::collection::vec(arb_rule(), 0..12),
            metadata in arb_metadata(),
            default in prop::option::of(Just("fallback".to_string())),
        ) {
            let a = RuleEngine::new(&rules, default.clone()).unwrap();
            let b = RuleEngine::new(&rules, default).unwrap();
            let first = a.classify(&metadata, "f").map(str::to_string);
            prop_assert_eq!(&first, &a.classify(&metadata, "f").map(str::to_string));
            prop_assert_eq!(&first, &b.classify(&metadata, "f").map(str::to_string));
        }

        #[test]
        fn classify_only_returns_known_categories(
            rules in prop::collection::vec(arb_rule(), 0..12),
            metadata in arb_metadata(),
        ) {
            let engine = RuleEngine::new(&rules, None).unwrap();
            if let Ok(category) = engine.classify(&metadata, "f") {
                prop_assert!(rules.iter().any(|r| r.category_id == category));
            }
        }
    }
}
