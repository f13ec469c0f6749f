use crate::blueprint::Blueprint;
use crate::commands;
use colored::Colorize;
use groundwork_cloud::ExecuteOptions;
use std::path::Path;
use std::time::Duration;

pub async fn handle(
    state_dir: &Path,
    stack_name: &str,
    blueprint: Blueprint,
    timeout_secs: u64,
    yes: bool,
) -> anyhow::Result<()> {
    let stack = blueprint.stack(stack_name);

    if !yes {
        println!(
            "{}",
            format!(
                "This deletes every resource tracked by stack '{}'.",
                stack.name
            )
            .yellow()
        );
        println!("Run again with --yes to proceed.");
        return Ok(());
    }

    let options = ExecuteOptions {
        op_timeout: Duration::from_secs(timeout_secs),
        ..ExecuteOptions::default()
    };
    let orchestrator = commands::orchestrator(state_dir, options)?;

    println!("Destroying stack {}...", stack.name.cyan());
    println!();
    let result = orchestrator.destroy(&stack).await?;
    commands::print_result(&result);

    if !result.is_success() {
        anyhow::bail!("destroy finished with failures");
    }
    Ok(())
}
