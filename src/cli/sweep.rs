// ABOUTME: CLI sweep command - force-remove every room container left behind

use anyhow::{Context, Result};
use roomshell::{AppConfig, ContainerPool, ContainerRuntime, DockerRuntime};
use std::sync::Arc;

pub async fn execute(config: &AppConfig) -> Result<()> {
    let runtime = DockerRuntime::connect(config).context("Failed to connect to Docker")?;
    if !runtime.ping().await {
        anyhow::bail!("Docker is not running");
    }

    let pool = ContainerPool::new(Arc::new(runtime), config.container.clone());
    pool.sweep_all().await;

    println!("✅ Removed containers named {}*", config.container.name_prefix);
    Ok(())
}
