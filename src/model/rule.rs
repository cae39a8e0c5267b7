use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RelgraphError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Cardinality,
    Required,
    Forbidden,
    Conditional,
}

impl RuleType {
    pub const ALL: [RuleType; 4] = [
        RuleType::Cardinality,
        RuleType::Required,
        RuleType::Forbidden,
        RuleType::Conditional,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Cardinality => "cardinality",
            RuleType::Required => "required",
            RuleType::Forbidden => "forbidden",
            RuleType::Conditional => "conditional",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        RuleType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown rule type '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardinalityConfig {
    pub min_count: u32,
    #[serde(default)]
    pub max_count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredConfig {
    /// Overrides the generated violation message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForbiddenConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalConfig {
    pub condition_entity_type: String,
    pub then_relationship_type: String,
    pub then_target_type: String,
}

/// Typed rule payload, stored as internally tagged JSON and parsed once when
/// the rule row is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule_type", rename_all = "snake_case")]
pub enum RuleConfig {
    Cardinality(CardinalityConfig),
    Required(RequiredConfig),
    Forbidden(ForbiddenConfig),
    Conditional(ConditionalConfig),
}

impl RuleConfig {
    pub fn rule_type(&self) -> RuleType {
        match self {
            RuleConfig::Cardinality(_) => RuleType::Cardinality,
            RuleConfig::Required(_) => RuleType::Required,
            RuleConfig::Forbidden(_) => RuleType::Forbidden,
            RuleConfig::Conditional(_) => RuleType::Conditional,
        }
    }
}

/// A stored validation rule. `project_id = None` applies to every project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub rule_id: Uuid,
    pub project_id: Option<Uuid>,
    pub name: Option<String>,
    pub source_entity_type: Option<String>,
    pub target_entity_type: Option<String>,
    pub relationship_type: Option<String>,
    pub config: RuleConfig,
    pub severity: Severity,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ValidationRule {
    pub fn rule_type(&self) -> RuleType {
        self.config.rule_type()
    }

    /// Human-readable label for log lines and messages.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{} rule {}", self.rule_type(), self.rule_id),
        }
    }
}

/// Creation payload for a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source_entity_type: Option<String>,
    #[serde(default)]
    pub target_entity_type: Option<String>,
    #[serde(default)]
    pub relationship_type: Option<String>,
    pub config: RuleConfig,
    #[serde(default)]
    pub severity: Severity,
}

impl NewRule {
    pub fn cardinality(source_type: &str, relationship_type: &str, target_type: &str, min_count: u32, max_count: Option<u32>) -> Self {
        Self::triple(
            Some(source_type),
            relationship_type,
            Some(target_type),
            RuleConfig::Cardinality(CardinalityConfig { min_count, max_count }),
        )
    }

    pub fn required(source_type: &str, relationship_type: &str, target_type: Option<&str>) -> Self {
        Self::triple(
            Some(source_type),
            relationship_type,
            target_type,
            RuleConfig::Required(RequiredConfig::default()),
        )
    }

    pub fn forbidden(source_type: Option<&str>, relationship_type: &str, target_type: Option<&str>) -> Self {
        Self::triple(
            source_type,
            relationship_type,
            target_type,
            RuleConfig::Forbidden(ForbiddenConfig::default()),
        )
    }

    pub fn conditional(condition_entity_type: &str, then_relationship_type: &str, then_target_type: &str) -> Self {
        Self {
            project_id: None,
            name: None,
            source_entity_type: Some(condition_entity_type.to_string()),
            target_entity_type: Some(then_target_type.to_string()),
            relationship_type: Some(then_relationship_type.to_string()),
            config: RuleConfig::Conditional(ConditionalConfig {
                condition_entity_type: condition_entity_type.to_string(),
                then_relationship_type: then_relationship_type.to_string(),
                then_target_type: then_target_type.to_string(),
            }),
            severity: Severity::Warning,
        }
    }

    fn triple(source: Option<&str>, relationship_type: &str, target: Option<&str>, config: RuleConfig) -> Self {
        Self {
            project_id: None,
            name: None,
            source_entity_type: source.map(str::to_string),
            target_entity_type: target.map(str::to_string),
            relationship_type: Some(relationship_type.to_string()),
            config,
            severity: Severity::Warning,
        }
    }

    pub fn in_project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Check that the fields the rule type needs are present and consistent.
    pub fn validate(&self) -> Result<()> {
        let need = |field: &Option<String>, name: &str| -> Result<()> {
            match field.as_deref() {
                Some(v) if !v.trim().is_empty() => Ok(()),
                _ => Err(RelgraphError::InvalidInput(format!(
                    "{} rule requires {}",
                    self.config.rule_type(),
                    name
                ))),
            }
        };

        match &self.config {
            RuleConfig::Cardinality(c) => {
                need(&self.source_entity_type, "source_entity_type")?;
                need(&self.relationship_type, "relationship_type")?;
                need(&self.target_entity_type, "target_entity_type")?;
                if let Some(max) = c.max_count {
                    if max < c.min_count {
                        return Err(RelgraphError::InvalidInput(format!(
                            "max_count {} is below min_count {}",
                            max, c.min_count
                        )));
                    }
                }
            }
            RuleConfig::Required(_) => {
                need(&self.source_entity_type, "source_entity_type")?;
                need(&self.relationship_type, "relationship_type")?;
            }
            RuleConfig::Forbidden(_) => {
                need(&self.relationship_type, "relationship_type")?;
            }
            RuleConfig::Conditional(c) => {
                for (value, name) in [
                    (&c.condition_entity_type, "condition_entity_type"),
                    (&c.then_relationship_type, "then_relationship_type"),
                    (&c.then_target_type, "then_target_type"),
                ] {
                    if value.trim().is_empty() {
                        return Err(RelgraphError::InvalidInput(format!(
                            "conditional rule requires {}",
                            name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
