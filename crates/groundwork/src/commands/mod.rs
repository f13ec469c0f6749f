//! CLI command handlers and shared rendering

pub mod apply;
pub mod destroy;
pub mod plan;
pub mod state;

use crate::blueprint;
use colored::Colorize;
use groundwork_cloud::{
    ApplyResult, ChangeSet, ExecuteOptions, OpKind, Orchestrator, Outcome, StateManager,
};
use groundwork_cloud_sim::SimControlPlane;
use std::path::Path;
use std::sync::Arc;

/// Build the simulated control plane backed by a file under the state dir,
/// with the output rules the web-service resource types rely on
pub fn control_plane(state_dir: &Path) -> anyhow::Result<Arc<SimControlPlane>> {
    let store = state_dir.join(".groundwork").join("sim-remote.json");
    let sim = SimControlPlane::new()
        .with_output_rule("load-balanced-service", "dns_name", |resource, _| {
            serde_json::json!(format!("{resource}.lb.sim.internal"))
        })
        .with_output_rule("load-balancer", "dns_name", |resource, _| {
            serde_json::json!(format!("{resource}.lb.sim.internal"))
        })
        .with_output_rule("role", "arn", |resource, _| {
            serde_json::json!(format!("arn:sim:role/{resource}"))
        })
        .with_output_rule("task-definition", "arn", |resource, _| {
            serde_json::json!(format!("arn:sim:task-definition/{resource}"))
        })
        .with_store(store)?;
    Ok(Arc::new(sim))
}

pub fn orchestrator(state_dir: &Path, options: ExecuteOptions) -> anyhow::Result<Orchestrator> {
    let control = control_plane(state_dir)?;
    let manager = Arc::new(StateManager::new(state_dir));
    Ok(Orchestrator::new(control, manager)
        .with_policy(blueprint::update_policy())
        .with_options(options))
}

pub fn print_change_set(change_set: &ChangeSet) {
    if change_set.is_empty() {
        println!(
            "{}",
            "No changes. The stack matches the recorded state.".green()
        );
        println!();
        println!("{}", change_set.summary());
        return;
    }

    for op in &change_set.operations {
        let glyph = match op.kind {
            OpKind::Create => "+".green().bold(),
            OpKind::Update => "~".yellow().bold(),
            OpKind::Replace => "±".magenta().bold(),
            OpKind::Delete => "-".red().bold(),
        };
        println!("  {} {} ({})", glyph, op.resource_id.cyan(), op.resource_type);
        println!("      {}", op.reason.dimmed());
    }
    println!();
    println!("{}", change_set.summary());
}

pub fn print_result(result: &ApplyResult) {
    for resource in &result.resources {
        let line = format!("{} {}", resource.resource_id, resource.outcome);
        let rendered = match resource.outcome {
            Outcome::Created | Outcome::Updated | Outcome::Replaced | Outcome::Deleted => {
                format!("  ✓ {line}").green().to_string()
            }
            Outcome::Unchanged => format!("  - {line}").normal().to_string(),
            Outcome::RolledBack => format!("  ↩ {line}").yellow().to_string(),
            Outcome::NotStarted => format!("  · {line}").dimmed().to_string(),
            Outcome::Failed | Outcome::RollbackFailed => format!("  ✗ {line}").red().to_string(),
        };
        println!("{rendered}");
        if let Some(message) = &resource.message {
            println!("      {}", message.dimmed());
        }
    }

    if !result.outputs.is_empty() {
        println!();
        println!("{}", "Outputs:".bold());
        for (name, value) in &result.outputs {
            println!("  {} = {}", name.bold(), value);
        }
    }

    println!();
    println!("Finished in {}ms", result.duration_ms);
}
