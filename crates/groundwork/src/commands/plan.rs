use crate::blueprint::Blueprint;
use crate::commands;
use colored::Colorize;
use groundwork_cloud::ExecuteOptions;
use std::path::Path;

pub async fn handle(state_dir: &Path, stack_name: &str, blueprint: Blueprint) -> anyhow::Result<()> {
    let stack = blueprint.stack(stack_name);
    println!(
        "Planning stack {} ({} resources declared)",
        stack.name.cyan(),
        stack.len()
    );
    println!();

    let orchestrator = commands::orchestrator(state_dir, ExecuteOptions::default())?;
    let change_set = orchestrator.plan(&stack).await?;
    commands::print_change_set(&change_set);
    Ok(())
}
