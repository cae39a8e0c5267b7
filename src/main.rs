use anyhow::Result;
use clap::{Parser, Subcommand};
use relgraph::{Config, RelationshipEngine, Scope, ValidationContext};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "relgraph")]
#[command(about = "Relationship graph engine: schema checks, validation runs and graph health reports")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending migrations and check the schema (default)
    Verify,
    /// List registered relationship types
    Types {
        /// Include deactivated types
        #[arg(long)]
        all: bool,
    },
    /// Evaluate the rules of a project and record new violations
    Validate {
        #[arg(long)]
        project: Uuid,
    },
    /// Print density, coverage, health, hubs and cycles
    Report {
        /// Limit the report to one project (default: every edge)
        #[arg(long)]
        project: Option<Uuid>,

        /// Number of most connected entities to list
        #[arg(long, default_value = "10")]
        top: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    // RUST_LOG wins over the configured level
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", config.relgraph.log_level.as_str())
    ).init();

    log::info!("Database path: {}", config.db_path().display());

    let engine = RelationshipEngine::open(config).await?;

    match args.command.unwrap_or(Command::Verify) {
        Command::Verify => run_verify(&engine).await?,
        Command::Types { all } => run_types(&engine, all).await?,
        Command::Validate { project } => run_validate(&engine, project).await?,
        Command::Report { project, top } => {
            let scope = project.map(Scope::project).unwrap_or_else(Scope::all);
            run_report(&engine, scope, top).await?
        }
    }

    Ok(())
}

async fn run_verify(engine: &RelationshipEngine) -> Result<()> {
    let status = engine.verify().await?;
    if !status.is_ok() {
        anyhow::bail!(
            "Schema verification failed: missing={:?}, journal_mode={}, foreign_keys={}, integrity={}",
            status.missing,
            status.journal_mode,
            status.foreign_keys,
            status.integrity
        );
    }
    log::info!("✓ {} migrations applied", status.applied_migrations.len());
    log::info!("✓ Database schema verification complete");
    Ok(())
}

async fn run_types(engine: &RelationshipEngine, include_inactive: bool) -> Result<()> {
    let types = engine.types().list(!include_inactive).await?;
    if types.is_empty() {
        println!("No relationship types registered.");
        return Ok(());
    }
    for ty in types {
        println!(
            "{:<24} {:<28} {:<14} {} -> {}{}{}",
            ty.type_code,
            ty.display_name,
            ty.category,
            join(&ty.valid_source_types),
            join(&ty.valid_target_types),
            if ty.default_bidirectional { " (bidirectional)" } else { "" },
            if ty.is_active { "" } else { " [inactive]" },
        );
    }
    Ok(())
}

fn join(types: &std::collections::BTreeSet<String>) -> String {
    types.iter().cloned().collect::<Vec<_>>().join(",")
}

async fn run_validate(engine: &RelationshipEngine, project: Uuid) -> Result<()> {
    let written = engine
        .validation()
        .validate_project(project, None, ValidationContext::default())
        .await?;

    println!("{} new violation(s)", written.len());
    for v in &written {
        println!("  [{}] {} {}: {}", v.severity.as_str(), v.violation_type.as_str(), v.entity(), v.message);
    }
    let open = engine.validation().count_open(Scope::project(project)).await?;
    println!("{} open violation(s) in project {}", open, project);
    Ok(())
}

async fn run_report(engine: &RelationshipEngine, scope: Scope, top: usize) -> Result<()> {
    let analytics = engine.analytics();
    let density = analytics.density(scope).await?;
    let coverage = analytics.coverage(scope).await?;
    let health = analytics.health_score(scope).await?;
    let distribution = analytics.relationship_distribution(scope).await?;
    let hubs = engine.graph().find_most_connected(scope, top).await?;
    let cycles = engine.graph().detect_cycles(scope).await?;

    let title = scope
        .project_id
        .map(|p| format!("project {}", p))
        .unwrap_or_else(|| "all projects".to_string());
    println!("\n=== Relationship Graph Report ({}) ===\n", title);

    println!(
        "Density: {:.4} ({}) over {} nodes / {} active edges",
        density.density, density.level, density.nodes, density.edges
    );

    println!(
        "Coverage: {:.1}% ({} of {} entities connected)",
        coverage.overall * 100.0,
        coverage.connected,
        coverage.known
    );
    for (entity_type, c) in &coverage.by_type {
        println!("  {:<20} {:>6.1}%  {}/{}", entity_type, c.ratio * 100.0, c.connected, c.known);
    }

    println!("\nHealth: {:.1} (grade {})", health.score, health.grade);
    println!(
        "  coverage {:.2}, violation-free {:.2}, orphan-free {:.2}",
        health.components.coverage, health.components.violation_free, health.components.orphan_free
    );
    for rec in &health.recommendations {
        println!("  - {}", rec);
    }

    if !distribution.is_empty() {
        println!("\nRelationship types:");
        for (code, count) in &distribution {
            println!("  {:<24} {}", code, count);
        }
    }

    if !hubs.is_empty() {
        println!("\nMost connected:");
        for (entity, degree) in &hubs {
            println!("  {:<50} {}", entity.to_string(), degree);
        }
    }

    println!("\nCycles: {}", cycles.len());
    for cycle in cycles.iter().take(top) {
        let ring: Vec<String> = cycle.nodes.iter().map(|n| n.to_string()).collect();
        println!("  {}", ring.join(" -> "));
    }

    Ok(())
}
