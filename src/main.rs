//! Scout Agent - command-line entry point.
//!
//! Runs one task given as command-line arguments and prints the final answer.

use scout_agent::{agent::Agent, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scout_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let task = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if task.trim().is_empty() {
        anyhow::bail!("usage: scout-agent <task description>");
    }

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: model={}, sandbox={}",
        config.default_model,
        config.sandbox_path.display()
    );

    let agent = Agent::new(config)?;
    let outcome = agent.run_task(&task).await?;

    info!("Completed in {} iterations", outcome.iterations);
    println!("{}", outcome.answer);

    Ok(())
}
