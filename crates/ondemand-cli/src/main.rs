//! ondemand CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "ondemand")]
#[command(about = "Compile CI jobs into agent task specifications", long_about = None)]
struct Cli {
    /// KDL scheduler configuration; the environment is used when absent
    #[arg(short, long, global = true, env = "ONDEMAND_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a job into its task specification
    Render {
        /// Agent query rules, e.g. `image=alpine cpu=512`
        #[arg(required = true)]
        rules: Vec<String>,
        /// Job identifier the agent acquires
        #[arg(long, default_value = "local")]
        job: String,
        /// Base layout (KDL); the built-in layout when absent
        #[arg(long)]
        layout: Option<PathBuf>,
        /// Print the Kubernetes pod template and job instead
        #[arg(long)]
        kubernetes: bool,
    },
    /// Expand placeholder resources in a template fragment (JSON)
    Expand {
        /// Path to the fragment
        path: PathBuf,
    },
    /// Validate a container layout
    ValidateLayout {
        /// Path to the layout file
        path: PathBuf,
    },
    /// Show the supported cpu/memory pair for a request
    Quantize {
        /// CPU units (1024 = one vCPU)
        #[arg(long, default_value_t = 0)]
        cpu: u32,
        /// Memory in MiB
        #[arg(long, default_value_t = 0)]
        memory: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            rules,
            job,
            layout,
            kubernetes,
        } => {
            let config = commands::load_config(cli.config.as_deref())?;
            let output = commands::render(&config, &job, &rules, layout.as_deref(), kubernetes)?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Expand { path } => {
            let config = commands::load_config(cli.config.as_deref())?;
            let output = commands::expand(&config, &path)?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::ValidateLayout { path } => {
            let layout = commands::validate_layout(&path)?;
            println!("Layout '{}' is valid", layout.name);
            for container in &layout.containers {
                println!("  {}", container.name);
            }
        }
        Commands::Quantize { cpu, memory } => {
            let quantum = ondemand_core::quantize(cpu, memory);
            println!("cpu={} memory={}", quantum.cpu, quantum.memory);
        }
    }

    Ok(())
}
