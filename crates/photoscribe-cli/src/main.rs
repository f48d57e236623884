mod run;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "photoscribe", about = "Batch AI descriptions for media collections")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or resume a workspace over a media root and process it
    Run {
        /// Media root directory
        #[arg(short, long)]
        root: PathBuf,

        /// Workspace document path (defaults to <root>/.photoscribe/workspace.json)
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Provider id (defaults to the configured default_provider)
        #[arg(short, long)]
        provider: Option<String>,

        /// Model identifier (defaults to the provider's default model)
        #[arg(short, long)]
        model: Option<String>,

        /// Worker pool size
        #[arg(long)]
        workers: Option<usize>,

        /// Recurse into subdirectories
        #[arg(long)]
        recursive: bool,

        /// Prompt style name from the config prompts table
        #[arg(long)]
        prompt_style: Option<String>,

        /// Resolve place names for GPS-tagged items after processing
        #[arg(long)]
        geocode: bool,
    },
    /// Resume an existing workspace using its configuration snapshot
    Resume {
        /// Workspace document path
        #[arg(short, long)]
        workspace: PathBuf,

        /// Resolve place names for GPS-tagged items after processing
        #[arg(long)]
        geocode: bool,
    },
    /// Re-enqueue failed items and process them again
    RetryFailed {
        /// Workspace document path
        #[arg(short, long)]
        workspace: PathBuf,
    },
    /// Print a status summary of a workspace document
    Status {
        /// Workspace document path
        #[arg(short, long)]
        workspace: PathBuf,
    },
    /// List providers and their installed models
    Models {
        /// Restrict to one provider id
        #[arg(short, long)]
        provider: Option<String>,
    },
    /// Check configuration and provider availability
    Health,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Run {
            root,
            workspace,
            provider,
            model,
            workers,
            recursive,
            prompt_style,
            geocode,
        } => {
            rt.block_on(run::run(run::RunArgs {
                root,
                workspace,
                provider,
                model,
                workers,
                recursive,
                prompt_style,
                geocode,
            }))?;
        }
        Commands::Resume { workspace, geocode } => {
            rt.block_on(run::resume(workspace, geocode, run::Pass::Pending))?;
        }
        Commands::RetryFailed { workspace } => {
            rt.block_on(run::resume(workspace, false, run::Pass::RetryFailed))?;
        }
        Commands::Status { workspace } => {
            status::status(&workspace)?;
        }
        Commands::Models { provider } => {
            rt.block_on(status::models(provider))?;
        }
        Commands::Health => {
            status::health()?;
        }
    }

    Ok(())
}
