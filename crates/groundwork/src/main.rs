mod blueprint;
mod commands;

use blueprint::Blueprint;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ground")]
#[command(about = "Declare the topology. groundwork makes it so.", long_about = None)]
struct Cli {
    /// Stack name; also the key the state is stored under
    #[arg(short, long, env = "GROUND_STACK", default_value = "webapp", global = true)]
    stack: String,

    /// Directory holding the .groundwork/ state
    #[arg(long, env = "GROUND_STATE_DIR", default_value = ".", global = true)]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the change-set for a blueprint without touching anything
    Plan {
        /// Topology variant to declare
        #[arg(short, long, env = "GROUND_BLUEPRINT", value_enum, default_value = "fargate-lb")]
        blueprint: Blueprint,
    },
    /// Plan and apply a blueprint
    Apply {
        /// Topology variant to declare
        #[arg(short, long, env = "GROUND_BLUEPRINT", value_enum, default_value = "fargate-lb")]
        blueprint: Blueprint,
        /// Maximum number of concurrently running operations
        #[arg(long, default_value_t = 4)]
        parallelism: usize,
        /// Per-operation timeout in seconds
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
        /// Apply without confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete everything the stack's state tracks
    Destroy {
        /// Topology variant (only used for the stack's name context)
        #[arg(short, long, env = "GROUND_BLUEPRINT", value_enum, default_value = "fargate-lb")]
        blueprint: Blueprint,
        /// Per-operation timeout in seconds
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
        /// Destroy without confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Show the recorded state of the stack's resources
    State,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt::init();

    match cli.command {
        Commands::Plan { blueprint } => {
            commands::plan::handle(&cli.state_dir, &cli.stack, blueprint).await
        }
        Commands::Apply {
            blueprint,
            parallelism,
            timeout_secs,
            yes,
        } => {
            commands::apply::handle(
                &cli.state_dir,
                &cli.stack,
                blueprint,
                parallelism,
                timeout_secs,
                yes,
            )
            .await
        }
        Commands::Destroy {
            blueprint,
            timeout_secs,
            yes,
        } => {
            commands::destroy::handle(&cli.state_dir, &cli.stack, blueprint, timeout_secs, yes)
                .await
        }
        Commands::State => commands::state::handle(&cli.state_dir, &cli.stack).await,
        Commands::Version => {
            println!("groundwork {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
