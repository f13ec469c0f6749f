use colored::Colorize;
use groundwork_cloud::{ResourceStatus, StateManager};
use std::path::Path;

pub async fn handle(state_dir: &Path, stack_name: &str) -> anyhow::Result<()> {
    let manager = StateManager::new(state_dir);
    let state = manager.load(stack_name).await?;

    if state.resources.is_empty() {
        println!("No resources recorded for stack '{stack_name}'.");
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{:<20} {:<22} {:<10} REMOTE ID",
            "RESOURCE", "TYPE", "STATUS"
        )
        .bold()
    );

    let mut ids: Vec<&String> = state.resources.keys().collect();
    ids.sort();
    for id in ids {
        let record = &state.resources[id];
        let status = match record.status {
            ResourceStatus::Active => record.status.to_string().green(),
            ResourceStatus::Failed => record.status.to_string().red(),
            ResourceStatus::Deleted => record.status.to_string().dimmed(),
            _ => record.status.to_string().yellow(),
        };
        println!(
            "{:<20} {:<22} {:<10} {}",
            id,
            record.descriptor.resource_type,
            status,
            record.remote_id.as_deref().unwrap_or("-")
        );
    }

    println!();
    println!("Last updated: {}", state.updated_at);
    Ok(())
}
