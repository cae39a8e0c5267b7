//! Graph health metrics: density, ratios, grade and recommendations.

use std::fmt;

use serde::Serialize;

use crate::config::HealthConfig;

/// Below this density a graph is sparse.
pub const SPARSE_BELOW: f64 = 0.01;
/// Above this density a graph is dense.
pub const DENSE_ABOVE: f64 = 0.1;

/// Coverage below this ratio earns a recommendation.
const COVERAGE_TARGET: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DensityLevel {
    Sparse,
    Moderate,
    Dense,
}

impl DensityLevel {
    pub fn from_density(density: f64) -> Self {
        if density < SPARSE_BELOW {
            DensityLevel::Sparse
        } else if density > DENSE_ABOVE {
            DensityLevel::Dense
        } else {
            DensityLevel::Moderate
        }
    }
}

impl fmt::Display for DensityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DensityLevel::Sparse => "sparse",
            DensityLevel::Moderate => "moderate",
            DensityLevel::Dense => "dense",
        })
    }
}

/// Directed density: edges / (nodes * (nodes - 1)). Fewer than two nodes gives 0.
pub fn directed_density(nodes: usize, edges: usize) -> f64 {
    if nodes < 2 {
        return 0.0;
    }
    edges as f64 / (nodes as f64 * (nodes as f64 - 1.0))
}

/// `part / whole`, or 1.0 for an empty whole.
pub fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        1.0
    } else {
        part as f64 / whole as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum HealthGrade {
    A,
    B,
    C,
    D,
    F,
}

impl HealthGrade {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            HealthGrade::A
        } else if score >= 80.0 {
            HealthGrade::B
        } else if score >= 70.0 {
            HealthGrade::C
        } else if score >= 60.0 {
            HealthGrade::D
        } else {
            HealthGrade::F
        }
    }
}

impl fmt::Display for HealthGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Health ratios, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HealthComponents {
    pub coverage: f64,
    pub violation_free: f64,
    pub orphan_free: f64,
}

impl HealthComponents {
    /// Clamp each ratio to [0, 1].
    pub fn clamped(self) -> Self {
        Self {
            coverage: self.coverage.clamp(0.0, 1.0),
            violation_free: self.violation_free.clamp(0.0, 1.0),
            orphan_free: self.orphan_free.clamp(0.0, 1.0),
        }
    }
}

/// Weighted composite scaled to [0, 100].
pub fn weighted_score(components: HealthComponents, weights: &HealthConfig) -> f64 {
    let c = components.clamped();
    let score = (c.coverage * weights.coverage_weight
        + c.violation_free * weights.violation_weight
        + c.orphan_free * weights.orphan_weight)
        * 100.0;
    score.clamp(0.0, 100.0)
}

/// Counts behind a health report, used to phrase recommendations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthFacts {
    pub entities: usize,
    pub orphans: usize,
    pub open_violations: usize,
    /// Entity type with the lowest coverage, if any falls below target.
    pub weakest_type: Option<(String, f64)>,
}

pub fn recommendations(components: HealthComponents, facts: &HealthFacts) -> Vec<String> {
    if facts.entities == 0 {
        return vec!["No entities in scope yet; add relationships to start tracking graph health".to_string()];
    }
    let mut out = Vec::new();
    if facts.open_violations > 0 {
        out.push(format!("Resolve {} open rule violation(s)", facts.open_violations));
    }
    if facts.orphans > 0 {
        out.push(format!(
            "Link or retire {} orphaned entit{}",
            facts.orphans,
            if facts.orphans == 1 { "y" } else { "ies" }
        ));
    }
    if components.coverage < COVERAGE_TARGET {
        out.push(format!(
            "Coverage is {:.0}%; aim for at least {:.0}%",
            components.coverage * 100.0,
            COVERAGE_TARGET * 100.0
        ));
    }
    if let Some((entity_type, cov)) = &facts.weakest_type {
        if *cov < COVERAGE_TARGET {
            out.push(format!("Lowest coverage is '{}' at {:.0}%", entity_type, cov * 100.0));
        }
    }
    out
}
