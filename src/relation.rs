//! Relation types - typed, temporally versioned edges between entities
//!
//! All relations reduce to four types:
//! - `DependsOn`: source needs target to work
//! - `Implements`: source realizes target
//! - `PartOf`: source is a component of target
//! - `RelatesTo`: loose association

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Opaque string-keyed JSON map attached to a relation.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Fixed set of relation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    DependsOn,
    Implements,
    PartOf,
    RelatesTo,
}

impl RelationType {
    /// Get the string representation of the relation type
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::DependsOn => "depends_on",
            RelationType::Implements => "implements",
            RelationType::PartOf => "part_of",
            RelationType::RelatesTo => "relates_to",
        }
    }

    /// Get all relation types
    pub fn all() -> &'static [RelationType] {
        &[
            RelationType::DependsOn,
            RelationType::Implements,
            RelationType::PartOf,
            RelationType::RelatesTo,
        ]
    }
}

impl FromStr for RelationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "depends_on" => Ok(RelationType::DependsOn),
            "implements" => Ok(RelationType::Implements),
            "part_of" => Ok(RelationType::PartOf),
            "relates_to" => Ok(RelationType::RelatesTo),
            _ => Err(Error::invalid_input(format!(
                "Unknown relation type: {} (expected one of: depends_on, implements, part_of, relates_to)",
                s
            ))),
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Natural key of a relation, addressed by endpoint names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationKey {
    pub from: String,
    pub to: String,
    pub relation_type: RelationType,
}

impl RelationKey {
    pub fn new(from: impl Into<String>, to: impl Into<String>, relation_type: RelationType) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relation_type,
        }
    }
}

impl std::fmt::Display for RelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -[{}]-> {}", self.from, self.relation_type, self.to)
    }
}

/// Input for creating a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRelation {
    pub from: String,
    pub to: String,
    pub relation_type: RelationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewRelation {
    pub fn new(from: impl Into<String>, to: impl Into<String>, relation_type: RelationType) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relation_type,
            strength: None,
            confidence: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn key(&self) -> RelationKey {
        RelationKey::new(self.from.clone(), self.to.clone(), self.relation_type)
    }

    pub fn validate(&self) -> Result<()> {
        crate::entity::validate_name(&self.from)?;
        crate::entity::validate_name(&self.to)?;
        validate_score("strength", self.strength)?;
        validate_score("confidence", self.confidence)
    }
}

/// Changes to apply to a live relation. `None` fields keep their current value;
/// supplied metadata keys are merged into the current map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationUpdate {
    pub from: String,
    pub to: String,
    pub relation_type: RelationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl RelationUpdate {
    pub fn new(from: impl Into<String>, to: impl Into<String>, relation_type: RelationType) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relation_type,
            strength: None,
            confidence: None,
            metadata: None,
        }
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn key(&self) -> RelationKey {
        RelationKey::new(self.from.clone(), self.to.clone(), self.relation_type)
    }

    pub fn validate(&self) -> Result<()> {
        validate_score("strength", self.strength)?;
        validate_score("confidence", self.confidence)
    }
}

fn validate_score(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) => Err(Error::invalid_input(format!(
            "{} must be within [0, 1], got {}",
            field, v
        ))),
        _ => Ok(()),
    }
}

/// One version row of a relation.
///
/// `from_name`/`to_name` are denormalized copies of the endpoints' current
/// names; they are rewritten in place when an endpoint is renamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    /// Row identifier of this version
    pub id: i64,
    pub from_entity_id: String,
    pub to_entity_id: String,
    pub from_name: String,
    pub to_name: String,
    pub relation_type: RelationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub metadata: Metadata,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub valid_from: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<i64>,
}

impl Relation {
    pub fn key(&self) -> RelationKey {
        RelationKey::new(self.from_name.clone(), self.to_name.clone(), self.relation_type)
    }

    pub fn is_current(&self) -> bool {
        self.valid_to.is_none()
    }

    pub fn is_self_relation(&self) -> bool {
        self.from_entity_id == self.to_entity_id
    }
}
