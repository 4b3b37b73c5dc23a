//! Entity types - temporally versioned graph nodes
//!
//! Every entity belongs to one of five kinds:
//! - `Feature`: user-visible capability
//! - `Task`: unit of work
//! - `Decision`: recorded design or product decision
//! - `Component`: structural part of a system
//! - `Test`: verification artifact

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Fixed set of entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Feature,
    Task,
    Decision,
    Component,
    Test,
}

impl EntityType {
    /// Get the string representation of the entity type
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Feature => "feature",
            EntityType::Task => "task",
            EntityType::Decision => "decision",
            EntityType::Component => "component",
            EntityType::Test => "test",
        }
    }

    /// Get all entity types
    pub fn all() -> &'static [EntityType] {
        &[
            EntityType::Feature,
            EntityType::Task,
            EntityType::Decision,
            EntityType::Component,
            EntityType::Test,
        ]
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "feature" => Ok(EntityType::Feature),
            "task" => Ok(EntityType::Task),
            "decision" => Ok(EntityType::Decision),
            "component" => Ok(EntityType::Component),
            "test" => Ok(EntityType::Test),
            _ => Err(Error::invalid_input(format!(
                "Unknown entity type: {} (expected one of: feature, task, decision, component, test)",
                s
            ))),
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Input for creating an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntity {
    pub name: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub observations: Vec<String>,
}

impl NewEntity {
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            name: name.into(),
            entity_type,
            observations: Vec::new(),
        }
    }

    pub fn with_observations<I, S>(mut self, observations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.observations = observations.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)
    }
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::invalid_input("entity name must not be empty"));
    }
    Ok(())
}

/// One version row of an entity.
///
/// `entity_id` is stable across versions. The row with `valid_to == None`
/// is the current version; an entity with no such row is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub entity_id: String,
    pub name: String,
    pub entity_type: EntityType,
    pub observations: Vec<String>,
    pub version: i64,
    /// Copied from version 1 for the entity's whole lifetime
    pub created_at: i64,
    pub updated_at: i64,
    pub valid_from: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<String>,
}

impl Entity {
    /// Whether this row is the live version
    pub fn is_current(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Whether the name or any observation contains `needle` (already lowercased)
    pub(crate) fn matches_text(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
            || self
                .observations
                .iter()
                .any(|o| o.to_lowercase().contains(needle))
    }

    /// Text handed to an embedding model for this entity
    pub fn embedding_text(&self) -> String {
        let mut text = format!("{} ({})", self.name, self.entity_type);
        for observation in &self.observations {
            text.push('\n');
            text.push_str(observation);
        }
        text
    }
}

/// Observations to append to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationAddition {
    pub entity_name: String,
    pub contents: Vec<String>,
}

impl ObservationAddition {
    pub fn new<I, S>(entity_name: impl Into<String>, contents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity_name: entity_name.into(),
            contents: contents.into_iter().map(Into::into).collect(),
        }
    }
}

/// Observations to remove from an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationDeletion {
    pub entity_name: String,
    pub observations: Vec<String>,
}

impl ObservationDeletion {
    pub fn new<I, S>(entity_name: impl Into<String>, observations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity_name: entity_name.into(),
            observations: observations.into_iter().map(Into::into).collect(),
        }
    }
}

/// Outcome of an observation addition: only contents that were not already present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedObservations {
    pub entity_name: String,
    pub added_observations: Vec<String>,
}
