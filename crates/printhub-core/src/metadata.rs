//! # Job Metadata
//!
//! Typed view over the attributes a routing rule may test.
//!
//! The cloud backend sends metadata as a flat JSON object. The keys the
//! kitchen and front-of-house flows rely on are modelled as fields; anything
//! else lands in `extra` and is addressed by rules as `extra.<key>`.
//!
//! ```text
//! { "station": "kitchen", "orderType": "delivery", "courier": "bike" }
//!        │                        │                      │
//!        ▼                        ▼                      ▼
//!   station = Some(..)     order_type = Some(..)   extra["courier"]
//!
//! Rule fields:  "station" | "orderType" | "source" | "table"
//!               | "fileName" | "extra.<key>"
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// =============================================================================
// Job Metadata
// =============================================================================

/// Routing attributes attached to a print job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    /// Order channel: dine_in, takeaway, delivery, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_type: Option<String>,

    /// Station tag set by the backend (kitchen, bar, counter).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station: Option<String>,

    /// Originating system (web, pos, kiosk).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Table identifier for dine-in orders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    /// Any other attribute.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl JobMetadata {
    /// Returns the value a rule on `field` should test.
    ///
    /// `fileName` is not part of the metadata object; it is taken from the
    /// job itself and passed in.
    pub fn lookup<'a>(&'a self, field: &MetadataField, file_name: &'a str) -> Option<&'a str> {
        match field {
            MetadataField::OrderType => self.order_type.as_deref(),
            MetadataField::Station => self.station.as_deref(),
            MetadataField::Source => self.source.as_deref(),
            MetadataField::Table => self.table.as_deref(),
            MetadataField::FileName => Some(file_name),
            MetadataField::Extra(key) => self.extra.get(key).map(String::as_str),
        }
    }
}

// =============================================================================
// Metadata Field
// =============================================================================

/// A rule field name, validated when the rule is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetadataField {
    OrderType,
    Station,
    Source,
    Table,
    FileName,
    /// `extra.<key>`
    Extra(String),
}

/// Prefix for free-form metadata keys in rule definitions.
pub const EXTRA_PREFIX: &str = "extra.";

impl MetadataField {
    /// Canonical spelling of the known fields, for error messages.
    pub fn known_fields() -> Vec<String> {
        ["orderType", "station", "source", "table", "fileName", "extra.<key>"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}

impl FromStr for MetadataField {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(key) = trimmed.strip_prefix(EXTRA_PREFIX) {
            if key.is_empty() {
                return Err(ValidationError::invalid("field", "extra key is empty"));
            }
            return Ok(MetadataField::Extra(key.to_string()));
        }

        match trimmed {
            "orderType" | "order_type" => Ok(MetadataField::OrderType),
            "station" => Ok(MetadataField::Station),
            "source" => Ok(MetadataField::Source),
            "table" => Ok(MetadataField::Table),
            "fileName" | "file_name" => Ok(MetadataField::FileName),
            "" => Err(ValidationError::required("field")),
            _ => Err(ValidationError::NotAllowed {
                field: "field".to_string(),
                allowed: Self::known_fields(),
            }),
        }
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataField::OrderType => write!(f, "orderType"),
            MetadataField::Station => write!(f, "station"),
            MetadataField::Source => write!(f, "source"),
            MetadataField::Table => write!(f, "table"),
            MetadataField::FileName => write!(f, "fileName"),
            MetadataField::Extra(key) => write!(f, "{}{}", EXTRA_PREFIX, key),
        }
    }
}
