// ABOUTME: CLI check command - report whether rooms will get containers or local shells

use super::OutputFormat;
use anyhow::Result;
use roomshell::{AppConfig, ContainerRuntime, DockerRuntime};
use serde::Serialize;

/// JSON output structure for check command
#[derive(Debug, Serialize)]
pub struct CheckOutput {
    pub docker_reachable: bool,
    pub image: String,
    pub image_present: bool,
    pub placement: &'static str,
}

pub async fn execute(config: &AppConfig, format: OutputFormat) -> Result<()> {
    let image = config.container.image.clone();

    let (docker_reachable, image_present) = match DockerRuntime::connect(config) {
        Ok(runtime) => {
            let reachable = runtime.ping().await;
            let present = reachable
                && runtime.get_docker_client().inspect_image(&image).await.is_ok();
            (reachable, present)
        }
        Err(e) => {
            tracing::warn!("Failed to create Docker client: {}", e);
            (false, false)
        }
    };

    let output = CheckOutput {
        docker_reachable,
        image,
        image_present,
        placement: if docker_reachable { "container" } else { "local" },
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            if output.docker_reachable {
                println!("✅ Docker is reachable");
                if output.image_present {
                    println!("✅ Image {} is present", output.image);
                } else {
                    println!("⚠️  Image {} is missing; it will be built on first use", output.image);
                }
            } else {
                println!("❌ Docker is not reachable; sessions will use local shells");
            }
        }
    }

    Ok(())
}
