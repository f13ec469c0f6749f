use crate::blueprint::Blueprint;
use crate::commands;
use colored::Colorize;
use groundwork_cloud::ExecuteOptions;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn handle(
    state_dir: &Path,
    stack_name: &str,
    blueprint: Blueprint,
    parallelism: usize,
    timeout_secs: u64,
    yes: bool,
) -> anyhow::Result<()> {
    let stack = blueprint.stack(stack_name);

    if !yes {
        println!(
            "{}",
            "This will create, update and delete remote resources.".yellow()
        );
        println!("Run again with --yes to proceed.");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancellation requested; letting in-flight operations finish...");
            signal_token.cancel();
        }
    });

    let options = ExecuteOptions {
        parallelism,
        op_timeout: Duration::from_secs(timeout_secs),
        cancel,
    };
    let orchestrator = commands::orchestrator(state_dir, options)?;

    println!("Applying stack {}...", stack.name.cyan());
    println!();
    let result = orchestrator.apply(&stack).await?;
    commands::print_result(&result);

    if !result.is_success() {
        anyhow::bail!("apply finished with failures");
    }
    Ok(())
}
