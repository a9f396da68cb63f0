//! Ring Sim CLI.
//!
//! Commands:
//! - run: Simulate participants on a circle with an orbiting interactive object
//! - neighbors: Print the ring and the tier each participant would request

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use haptic_ring::EngineConfig;
use ring_sim::neighbors::neighbor_table;
use ring_sim::simulation::{Simulation, SimulationConfig};

#[derive(Parser)]
#[command(name = "ring-sim")]
#[command(version)]
#[command(about = "Neighbor haptic coordination simulator")]
struct Cli {
    /// Engine configuration file (JSON); defaults apply to missing fields
    #[arg(long, env = "HAPTIC_RING_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation
    Run {
        /// Number of ring participants
        #[arg(long, default_value = "4")]
        participants: u32,

        /// Also join an observer (rank 0)
        #[arg(long)]
        observer: bool,

        /// Simulated duration in milliseconds
        #[arg(long, default_value = "10000")]
        duration_ms: u64,

        /// Scene update interval in milliseconds
        #[arg(long, default_value = "50")]
        step_ms: u64,

        /// Angular speed of the object in radians per second
        #[arg(long, default_value = "1.0")]
        orbit_speed: f32,

        /// Have one participant leave and rejoin mid-run
        #[arg(long)]
        churn: bool,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Write the full result as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show neighbors and requested tiers for a set of ranks
    Neighbors {
        /// Ranks (comma-separated)
        #[arg(value_delimiter = ',', required = true)]
        ranks: Vec<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG overrides the default level
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let engine = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Run {
            participants,
            observer,
            duration_ms,
            step_ms,
            orbit_speed,
            churn,
            seed,
            output,
        } => {
            if orbit_speed <= 0.0 {
                bail!("orbit speed must be positive, got {orbit_speed}");
            }

            let config = SimulationConfig {
                participants,
                observer,
                duration_ms,
                step_ms,
                orbit_speed,
                churn,
                seed,
                engine,
            };
            let result = Simulation::new(config).run().await?;

            println!("\n=== Simulation Result ===");
            println!("Seed: {}", result.seed);
            println!("Participants: {}", result.participants);
            if let Some(rank) = result.churned {
                println!("Churned: rank {}", rank);
            }
            println!("Activations: {}", result.activations());
            println!(
                "Registry: {} activate / {} release requests, {} commands",
                result.registry.activate_requests,
                result.registry.release_requests,
                result.registry.commands_emitted
            );

            println!("\nMembership:");
            for record in &result.membership {
                println!(
                    "  {:>6}ms {:<8} rank {:<3} ring {:?}",
                    record.at_ms, record.kind, record.rank, record.ring
                );
            }

            println!("\nTimeline:");
            println!("  {:>6}  {:<20} {}", "ms", "engaged", "feedback");
            for entry in &result.timeline {
                let engaged: Vec<String> = entry.engaged.iter().map(|id| id.to_string()).collect();
                let feedback: Vec<String> = entry
                    .feedback
                    .iter()
                    .map(|(id, intensity)| format!("{id}:{intensity}"))
                    .collect();
                println!(
                    "  {:>6}  {:<20} {}",
                    entry.at_ms,
                    engaged.join(","),
                    feedback.join(" ")
                );
            }

            println!("\nPulses:");
            for (rank, counts) in &result.pulses {
                println!(
                    "  rank {:<3} normal {:>5} strong {:>5}",
                    rank, counts.normal, counts.strong
                );
            }

            if let Some(path) = output {
                result.save(&path)?;
                info!(path = %path.display(), "Result saved");
            }
        }

        Commands::Neighbors { ranks } => {
            let rows = neighbor_table(&ranks)?;
            println!("{:>5} {:>5} {:>5}  requests", "id", "left", "right");
            for row in rows {
                let requests: Vec<String> = row
                    .requests
                    .iter()
                    .map(|(id, intensity)| format!("{id}:{intensity}"))
                    .collect();
                println!(
                    "{:>5} {:>5} {:>5}  {}",
                    row.id.to_string(),
                    row.left.to_string(),
                    row.right.to_string(),
                    if requests.is_empty() {
                        "(none)".to_string()
                    } else {
                        requests.join(" ")
                    }
                );
            }
        }
    }

    Ok(())
}
