//! Rule evaluation over a snapshot of one scope. Nothing here touches the database.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::model::{
    CardinalityConfig, ConditionalConfig, Edge, EntityRef, Finding, RuleConfig, Scope, ValidationRule,
    ViolationKind,
};
use crate::registry::EntityRegistry;

use super::ValidationContext;

/// Active edges of a scope plus everything needed to enumerate known entities.
pub(crate) struct Snapshot {
    pub scope: Scope,
    pub edges: Vec<Edge>,
    /// Endpoints of every edge in scope, active or not.
    pub endpoints: BTreeSet<EntityRef>,
    pub registry: Option<Arc<dyn EntityRegistry>>,
}

impl Snapshot {
    /// Entities of a type that are known to exist in scope.
    pub fn known_of_type(&self, entity_type: &str) -> BTreeSet<EntityRef> {
        let mut known: BTreeSet<EntityRef> = self
            .endpoints
            .iter()
            .filter(|e| e.entity_type == entity_type)
            .cloned()
            .collect();
        if let Some(registry) = &self.registry {
            known.extend(registry.entities_of_type(entity_type, self.scope));
        }
        known
    }

    fn outgoing(&self) -> HashMap<&EntityRef, Vec<&Edge>> {
        let mut by_source: HashMap<&EntityRef, Vec<&Edge>> = HashMap::new();
        for edge in &self.edges {
            by_source.entry(&edge.source).or_default().push(edge);
        }
        by_source
    }
}

fn count_matching(edges: Option<&Vec<&Edge>>, relationship_type: &str, target_type: Option<&str>) -> usize {
    edges
        .map(|list| {
            list.iter()
                .filter(|e| {
                    e.relationship_type == relationship_type
                        && target_type.map_or(true, |t| e.target.entity_type == t)
                })
                .count()
        })
        .unwrap_or(0)
}

fn finding(rule: &ValidationRule, entity: EntityRef, edge: Option<&Edge>, kind: ViolationKind, message: String) -> Finding {
    Finding {
        rule_id: rule.rule_id,
        edge_id: edge.map(|e| e.edge_id),
        entity,
        violation_type: kind,
        message,
        severity: rule.severity,
    }
}

/// Findings for one rule, in entity order.
///
/// Rules missing a field their type needs produce nothing; they are rejected
/// at creation, so this only happens for rows written by other tools.
pub(crate) fn evaluate_rule(rule: &ValidationRule, snapshot: &Snapshot, ctx: &ValidationContext) -> Vec<Finding> {
    let by_source = snapshot.outgoing();
    let admitted = |entity: &EntityRef| ctx.entity_filter.as_ref().map_or(true, |f| f(rule, entity));

    match &rule.config {
        RuleConfig::Cardinality(config) => cardinality(rule, config, snapshot, &by_source, &admitted),
        RuleConfig::Required(config) => {
            let (Some(source_type), Some(rel)) = (&rule.source_entity_type, &rule.relationship_type) else {
                return Vec::new();
            };
            let target_type = rule.target_entity_type.as_deref();
            snapshot
                .known_of_type(source_type)
                .into_iter()
                .filter(|e| admitted(e))
                .filter(|e| count_matching(by_source.get(e), rel, target_type) == 0)
                .map(|e| {
                    let message = config.message.clone().unwrap_or_else(|| match target_type {
                        Some(t) => format!("{} has no {} relationship to a {}", e, rel, t),
                        None => format!("{} has no {} relationship", e, rel),
                    });
                    finding(rule, e, None, ViolationKind::MissingRequired, message)
                })
                .collect()
        }
        RuleConfig::Forbidden(config) => {
            let Some(rel) = &rule.relationship_type else {
                return Vec::new();
            };
            snapshot
                .edges
                .iter()
                .filter(|e| {
                    e.relationship_type == *rel
                        && rule.source_entity_type.as_ref().map_or(true, |s| e.source.entity_type == *s)
                        && rule.target_entity_type.as_ref().map_or(true, |t| e.target.entity_type == *t)
                })
                .map(|e| {
                    let message = config
                        .message
                        .clone()
                        .unwrap_or_else(|| format!("{} -[{}]-> {} is forbidden", e.source, rel, e.target));
                    finding(rule, e.source.clone(), Some(e), ViolationKind::ForbiddenEdge, message)
                })
                .collect()
        }
        RuleConfig::Conditional(config) => conditional(rule, config, snapshot, &by_source, ctx, &admitted),
    }
}

fn cardinality(
    rule: &ValidationRule,
    config: &CardinalityConfig,
    snapshot: &Snapshot,
    by_source: &HashMap<&EntityRef, Vec<&Edge>>,
    admitted: &dyn Fn(&EntityRef) -> bool,
) -> Vec<Finding> {
    let (Some(source_type), Some(rel), Some(target_type)) = (
        &rule.source_entity_type,
        &rule.relationship_type,
        &rule.target_entity_type,
    ) else {
        return Vec::new();
    };

    // Entities already linked to the target type, plus every registered one
    let mut candidates: BTreeSet<EntityRef> = snapshot
        .edges
        .iter()
        .filter(|e| e.source.entity_type == *source_type && e.target.entity_type == *target_type)
        .map(|e| e.source.clone())
        .collect();
    if let Some(registry) = &snapshot.registry {
        candidates.extend(registry.entities_of_type(source_type, snapshot.scope));
    }

    let mut out = Vec::new();
    for entity in candidates.into_iter().filter(|e| admitted(e)) {
        let count = count_matching(by_source.get(&entity), rel, Some(target_type.as_str()));
        if count < config.min_count as usize {
            let message = format!(
                "{} has {} {} edge(s) to {}, expected at least {}",
                entity, count, rel, target_type, config.min_count
            );
            out.push(finding(rule, entity, None, ViolationKind::BelowMinCount, message));
        } else if let Some(max) = config.max_count.filter(|m| count > *m as usize) {
            let message = format!(
                "{} has {} {} edge(s) to {}, expected at most {}",
                entity, count, rel, target_type, max
            );
            out.push(finding(rule, entity, None, ViolationKind::AboveMaxCount, message));
        }
    }
    out
}

fn conditional(
    rule: &ValidationRule,
    config: &ConditionalConfig,
    snapshot: &Snapshot,
    by_source: &HashMap<&EntityRef, Vec<&Edge>>,
    ctx: &ValidationContext,
    admitted: &dyn Fn(&EntityRef) -> bool,
) -> Vec<Finding> {
    let Some(condition) = &ctx.condition else {
        log::debug!("Skipping {}: no condition predicate supplied", rule.label());
        return Vec::new();
    };
    snapshot
        .known_of_type(&config.condition_entity_type)
        .into_iter()
        .filter(|e| admitted(e) && condition(rule, e))
        .filter(|e| {
            count_matching(
                by_source.get(e),
                &config.then_relationship_type,
                Some(config.then_target_type.as_str()),
            ) == 0
        })
        .map(|e| {
            let message = format!(
                "{} meets the condition but has no {} relationship to a {}",
                e, config.then_relationship_type, config.then_target_type
            );
            finding(rule, e, None, ViolationKind::ConditionalMissing, message)
        })
        .collect()
}
