//! elastic-scheduler binary entrypoint.

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use elastic_scaling::StrategyId;
use elastic_scheduler::cli::{Cli, Commands};
use elastic_scheduler::output::{self, Format, HistoryList};
use elastic_scheduler::{LogFormat, Scheduler, SchedulerConfig};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LOG_DIRECTIVES: &str = "elastic_scheduler=info,elastic_scaling=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { output, force } = &cli.command {
        init_tracing(cli.log_format.unwrap_or_default());
        return init_config(output, *force);
    }

    let config = SchedulerConfig::from_file(&cli.config)?;
    init_tracing(cli.log_format.unwrap_or(config.log_format));
    info!(
        config = %cli.config.display(),
        state_dir = %config.state_dir.display(),
        "loaded config"
    );

    match cli.command {
        Commands::Run => run(&config).await,
        Commands::Tick => tick(&config, cli.format),
        Commands::History { strategy, limit } => history(&config, cli.format, strategy, limit),
        Commands::InitConfig { .. } => Ok(()),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVES));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(fmt::layer().with_writer(io::stderr)).init(),
        LogFormat::Json => registry.with(fmt::layer().json().with_writer(io::stderr)).init(),
    }
}

async fn run(config: &SchedulerConfig) -> anyhow::Result<()> {
    let scheduler = Arc::new(Scheduler::new(config)?);
    let ticks = scheduler.run().await?;
    info!(ticks, "scheduler stopped");
    Ok(())
}

fn tick(config: &SchedulerConfig, format: Format) -> anyhow::Result<()> {
    let scheduler = Scheduler::new(config)?;
    let report = scheduler.tick()?;
    output::write(&mut io::stdout().lock(), format, &report)?;
    Ok(())
}

fn history(config: &SchedulerConfig, format: Format, strategy: Option<u64>, limit: usize) -> anyhow::Result<()> {
    let scheduler = Scheduler::new(config)?;
    let rows = scheduler
        .repository()
        .history(strategy.map(StrategyId::new), limit);
    output::write(&mut io::stdout().lock(), format, &HistoryList { rows })?;
    Ok(())
}

fn init_config(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists; pass --force to overwrite", output.display());
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }

    let rendered = SchedulerConfig::default().to_toml()?;
    std::fs::write(output, rendered).with_context(|| format!("writing {}", output.display()))?;
    info!(path = %output.display(), "wrote default config");
    println!("Config written to {}", output.display());
    Ok(())
}
