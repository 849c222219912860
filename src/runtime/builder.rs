// ABOUTME: Docker image builder for the room execution image
// Packs the build context directory into a tar archive and streams it to the engine

use super::ContainerError;
use bollard::image::BuildImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::path::{Path, PathBuf};
use tar::{Builder, Header};
use tracing::{debug, error, info};

/// Directories never shipped to the engine as part of a build context
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "target", ".cache", "rooms"];

pub struct ImageBuilder {
    docker: Docker,
}

impl ImageBuilder {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Build `tag` from the Dockerfile at the root of `context_dir`
    pub async fn build_from_context(
        &self,
        tag: &str,
        context_dir: &Path,
    ) -> Result<(), ContainerError> {
        if !context_dir.join("Dockerfile").is_file() {
            return Err(ContainerError::ImageBuild(format!(
                "No Dockerfile in build context {}",
                context_dir.display()
            )));
        }

        let context_dir = context_dir.to_path_buf();
        let tar_data = tokio::task::spawn_blocking(move || Self::create_build_context(&context_dir))
            .await
            .map_err(|e| ContainerError::ImageBuild(format!("Build context task failed: {e}")))??;

        let build_options = BuildImageOptions {
            dockerfile: "Dockerfile",
            t: tag,
            rm: true,
            ..Default::default()
        };

        info!("Building image: {}", tag);
        let mut stream = self.docker.build_image(build_options, None, Some(tar_data.into()));

        while let Some(result) = stream.next().await {
            match result {
                Ok(output) => {
                    if let Some(stream) = output.stream {
                        debug!("Docker build output: {}", stream.trim());
                    }
                    if let Some(error) = output.error {
                        error!("Build error: {}", error);
                        return Err(ContainerError::ImageBuild(error));
                    }
                }
                Err(e) => {
                    error!("Build stream error: {}", e);
                    return Err(ContainerError::ImageBuild(e.to_string()));
                }
            }
        }

        info!("Successfully built image: {}", tag);
        Ok(())
    }

    /// Create build context tar from a directory
    pub fn create_build_context(context_dir: &Path) -> Result<Vec<u8>, ContainerError> {
        let mut files = Vec::new();
        Self::collect_files(context_dir, "", &mut files)?;

        let mut build_context = Vec::new();
        let mut tar_builder = Builder::new(&mut build_context);

        for (tar_path, file_path, is_dir) in files {
            if is_dir {
                let mut header = Header::new_gnu();
                header.set_path(format!("{tar_path}/"))?;
                header.set_size(0);
                header.set_mode(0o755);
                header.set_entry_type(tar::EntryType::Directory);
                header.set_cksum();
                tar_builder.append(&header, std::io::empty())?;
            } else {
                let data = std::fs::read(&file_path)?;
                let mut header = Header::new_gnu();
                header.set_path(&tar_path)?;
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                tar_builder.append(&header, std::io::Cursor::new(data))?;
            }
        }

        tar_builder.finish()?;
        drop(tar_builder);
        Ok(build_context)
    }

    /// Collect all files to add to tar
    fn collect_files(
        dir_path: &Path,
        prefix: &str,
        files: &mut Vec<(String, PathBuf, bool)>,
    ) -> Result<(), ContainerError> {
        let mut entries = std::fs::read_dir(dir_path)?.collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(std::fs::DirEntry::file_name);

        for entry in entries {
            let path = entry.path();
            let name = entry.file_name();
            let tar_path = if prefix.is_empty() {
                name.to_string_lossy().to_string()
            } else {
                format!("{}/{}", prefix, name.to_string_lossy())
            };

            if path.is_file() {
                files.push((tar_path, path, false));
            } else if path.is_dir() {
                if SKIPPED_DIRS.iter().any(|skip| name == *skip) {
                    continue;
                }

                files.push((tar_path.clone(), path.clone(), true));
                Self::collect_files(&path, &tar_path, files)?;
            }
        }

        Ok(())
    }
}
