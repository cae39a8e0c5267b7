//! Rule evaluation and the violation audit trail.
//!
//! Evaluation is a stateless pass over the active edges of a scope; rule
//! violations are data, never errors. Persisted violations are deduplicated
//! against open ones and never deleted.

mod rule_store;
mod rules;
mod violations;

pub use violations::ViolationFilter;

use std::collections::BTreeSet;
use std::sync::Arc;

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::cache::HealthCache;
use crate::db::{codec, Db};
use crate::error::{RelgraphError, Result};
use crate::graph::scope_edges;
use crate::model::{EntityRef, Finding, NewRule, RuleType, Scope, ValidationRule, Violation};
use crate::registry::EntityRegistry;

use rules::Snapshot;

/// Caller-supplied predicate over a rule and a candidate entity.
pub type EntityPredicate = Arc<dyn Fn(&ValidationRule, &EntityRef) -> bool + Send + Sync>;

/// Predicates that narrow rule evaluation.
///
/// `entity_filter` limits which entities entity-based rules consider.
/// `condition` decides which entities trigger a conditional rule; without
/// it conditional rules are skipped.
#[derive(Clone, Default)]
pub struct ValidationContext {
    pub entity_filter: Option<EntityPredicate>,
    pub condition: Option<EntityPredicate>,
}

impl std::fmt::Debug for ValidationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationContext")
            .field("entity_filter", &self.entity_filter.is_some())
            .field("condition", &self.condition.is_some())
            .finish()
    }
}

impl ValidationContext {
    pub fn with_entity_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&ValidationRule, &EntityRef) -> bool + Send + Sync + 'static,
    {
        self.entity_filter = Some(Arc::new(f));
        self
    }

    pub fn with_condition<F>(mut self, f: F) -> Self
    where
        F: Fn(&ValidationRule, &EntityRef) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(f));
        self
    }
}

#[derive(Clone)]
pub struct ValidationEngine {
    db: Db,
    entities: Option<Arc<dyn EntityRegistry>>,
    health: Option<Arc<HealthCache>>,
}

impl std::fmt::Debug for ValidationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationEngine")
            .field("db", &self.db)
            .field("entity_registry", &self.entities.is_some())
            .field("health_cache", &self.health.is_some())
            .finish()
    }
}

fn load_endpoints(conn: &Connection, scope: Scope) -> Result<BTreeSet<EntityRef>> {
    let mut stmt = conn.prepare(
        "SELECT source_entity_type, source_entity_id FROM edges WHERE (?1 IS NULL OR project_id = ?1) \
         UNION \
         SELECT target_entity_type, target_entity_id FROM edges WHERE (?1 IS NULL OR project_id = ?1)",
    )?;
    let rows = stmt.query_map(params![scope.project_param()], |row| {
        Ok(EntityRef::new(row.get::<_, String>(0)?, codec::get_uuid(row, 1)?))
    })?;
    let mut out = BTreeSet::new();
    for row in rows {
        out.insert(row?);
    }
    Ok(out)
}

/// Evaluate every applicable rule of a scope against one snapshot.
fn evaluate_scope(
    conn: &Connection,
    scope: Scope,
    rule_types: Option<&[RuleType]>,
    ctx: &ValidationContext,
    registry: Option<Arc<dyn EntityRegistry>>,
) -> Result<Vec<Finding>> {
    let rules: Vec<ValidationRule> = rule_store::applicable_rules(conn, scope)?
        .into_iter()
        .filter(|r| rule_types.map_or(true, |types| types.contains(&r.rule_type())))
        .collect();
    if rules.is_empty() {
        return Ok(Vec::new());
    }

    let snapshot = Snapshot {
        scope,
        edges: scope_edges(conn, scope)?,
        endpoints: load_endpoints(conn, scope)?,
        registry,
    };

    let mut findings = Vec::new();
    for rule in &rules {
        let found = rules::evaluate_rule(rule, &snapshot, ctx);
        log::debug!("{}: {} finding(s)", rule.label(), found.len());
        findings.extend(found);
    }
    Ok(findings)
}

impl ValidationEngine {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            entities: None,
            health: None,
        }
    }

    pub fn with_entity_registry(mut self, registry: Arc<dyn EntityRegistry>) -> Self {
        self.entities = Some(registry);
        self
    }

    /// Clear `cache` whenever the set of open violations changes.
    pub fn with_health_cache(mut self, cache: Arc<HealthCache>) -> Self {
        self.health = Some(cache);
        self
    }

    fn violations_changed(&self) {
        if let Some(cache) = &self.health {
            cache.invalidate(None);
        }
    }

    pub async fn create_rule(&self, new: NewRule) -> Result<ValidationRule> {
        new.validate()?;
        let rule = ValidationRule {
            rule_id: Uuid::new_v4(),
            project_id: new.project_id,
            name: new.name,
            source_entity_type: new.source_entity_type,
            target_entity_type: new.target_entity_type,
            relationship_type: new.relationship_type,
            config: new.config,
            severity: new.severity,
            is_active: true,
            created_at: codec::now(),
        };
        let rule = self
            .db
            .with_connection(move |conn| {
                rule_store::insert_rule(conn, &rule)?;
                Ok(rule)
            })
            .await?;
        log::info!("Created {} ({})", rule.label(), rule.severity.as_str());
        Ok(rule)
    }

    pub async fn get_rule(&self, rule_id: Uuid) -> Result<ValidationRule> {
        self.db
            .with_connection(move |conn| {
                rule_store::load_rule(conn, rule_id)?
                    .ok_or_else(|| RelgraphError::not_found("validation rule", rule_id))
            })
            .await
    }

    /// Rules visible in a scope: a project's own plus global rules, or every
    /// rule for `Scope::all()`.
    pub async fn list_rules(&self, scope: Scope, active_only: bool) -> Result<Vec<ValidationRule>> {
        self.db
            .with_connection(move |conn| rule_store::list_rules(conn, scope, active_only))
            .await
    }

    pub async fn deactivate_rule(&self, rule_id: Uuid) -> Result<()> {
        self.db
            .with_connection(move |conn| rule_store::set_rule_active(conn, rule_id, false))
            .await?;
        log::info!("Deactivated validation rule {}", rule_id);
        Ok(())
    }

    /// Findings for a scope without recording anything.
    pub async fn evaluate(
        &self,
        scope: Scope,
        rule_types: Option<Vec<RuleType>>,
        ctx: ValidationContext,
    ) -> Result<Vec<Finding>> {
        let registry = self.entities.clone();
        self.db
            .with_connection(move |conn| evaluate_scope(conn, scope, rule_types.as_deref(), &ctx, registry))
            .await
    }

    /// Evaluate a project and record new violations.
    ///
    /// Findings that match an open violation of the same project (same rule,
    /// entity, edge and kind) are not recorded again. Returns only the
    /// violations written by this run.
    pub async fn validate_project(
        &self,
        project_id: Uuid,
        rule_types: Option<Vec<RuleType>>,
        ctx: ValidationContext,
    ) -> Result<Vec<Violation>> {
        self.validate_scope(Scope::project(project_id), rule_types, ctx).await
    }

    /// Like `validate_project`, for any scope. Global-scope violations carry no project.
    pub async fn validate_scope(
        &self,
        scope: Scope,
        rule_types: Option<Vec<RuleType>>,
        ctx: ValidationContext,
    ) -> Result<Vec<Violation>> {
        let registry = self.entities.clone();
        let (found, written) = self
            .db
            .with_connection(move |conn| {
                let findings = evaluate_scope(conn, scope, rule_types.as_deref(), &ctx, registry)?;
                let found = findings.len();
                let tx = conn.transaction()?;
                let written = violations::persist_findings(&tx, scope.project_id, findings)?;
                tx.commit()?;
                Ok((found, written))
            })
            .await?;
        if !written.is_empty() {
            self.violations_changed();
        }

        log::info!(
            "Validation of {} found {} violation(s), {} new",
            scope
                .project_id
                .map(|p| format!("project {}", p))
                .unwrap_or_else(|| "global scope".to_string()),
            found,
            written.len()
        );
        Ok(written)
    }

    pub async fn resolve_violation(
        &self,
        violation_id: Uuid,
        notes: Option<String>,
        resolved_by: Option<String>,
    ) -> Result<Violation> {
        let violation = self
            .db
            .with_transaction(move |tx| violations::resolve(tx, violation_id, notes, resolved_by))
            .await?;
        self.violations_changed();
        log::info!("Resolved violation {}", violation_id);
        Ok(violation)
    }

    pub async fn get_violation(&self, violation_id: Uuid) -> Result<Violation> {
        self.db
            .with_connection(move |conn| {
                violations::load_violation(conn, violation_id)?
                    .ok_or_else(|| RelgraphError::not_found("violation", violation_id))
            })
            .await
    }

    pub async fn list_violations(&self, filter: ViolationFilter) -> Result<Vec<Violation>> {
        self.db
            .with_connection(move |conn| violations::list(conn, &filter))
            .await
    }

    pub async fn count_open(&self, scope: Scope) -> Result<usize> {
        self.db
            .with_connection(move |conn| violations::count_open(conn, scope))
            .await
    }
}
