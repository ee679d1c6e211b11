use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use triage::ai::{AIProvider, AnthropicProvider};
use triage::{Catalog, Config, Engine, LlmOracle, StopReason};

#[derive(Parser)]
#[command(name = "triage", version, about = "Automated production incident investigation")]
struct Cli {
    /// Problem statement to investigate
    problem: String,

    /// Path to the YAML configuration file
    #[arg(short, long, env = "TRIAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the step budget from configuration
    #[arg(long)]
    max_steps: Option<usize>,

    /// Override the model from configuration
    #[arg(long)]
    model: Option<String>,

    /// Override the output directory from configuration
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// List registered probes and exit
    #[arg(long)]
    list_probes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(max_steps) = cli.max_steps {
        config.investigation.max_steps = max_steps;
    }
    if let Some(model) = cli.model {
        config.investigation.model = model;
    }
    if let Some(output_dir) = cli.output_dir {
        config.investigation.output_dir = output_dir;
    }

    for issue in config.validate() {
        warn!(issue, "Configuration issue");
    }

    let catalog = Catalog::from_config(&config);
    if cli.list_probes {
        let mut descriptors = catalog.list();
        descriptors.sort_by(|a, b| a.id.cmp(&b.id));
        for descriptor in descriptors {
            println!("{:<24} {}", descriptor.id, descriptor.description);
        }
        return Ok(());
    }

    let provider = AnthropicProvider::from_env();
    if !provider.is_configured() {
        anyhow::bail!(
            "{} is not set; the planning oracle cannot run",
            provider.api_key_env_var()
        );
    }

    let oracle = Arc::new(LlmOracle::new(
        Arc::new(provider),
        config.investigation.model.clone(),
    ));
    let engine = Engine::new(
        catalog,
        oracle,
        config.investigation.max_steps,
        config.investigation.output_dir.clone(),
    );

    let result = engine
        .run(&cli.problem)
        .await
        .context("Investigation failed")?;

    match result.stop_reason {
        StopReason::Complete => info!("Investigation completed"),
        StopReason::BudgetExhausted => warn!(
            max_steps = config.investigation.max_steps,
            "Investigation stopped: step budget exhausted"
        ),
        StopReason::PlanUninterpretable => {
            warn!("Investigation stopped: planner output was uninterpretable");
        }
    }

    println!("{}", serde_json::to_string_pretty(&result.report)?);
    info!(
        run_id = result.run_id,
        path = %result.output_path.display(),
        "Transcript and report written"
    );

    Ok(())
}
