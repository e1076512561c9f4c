//! Default working-directory collaborators.
//!
//! The initializer copies an unpacked Cassandra distribution into the working
//! directory, the destroyer removes what a run does not need to keep, and
//! [`CopyFileCustomizer`] places individual files (configuration, keystores)
//! before the node is launched.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use cassandra_layer_core::{
    Version, WorkingDirectoryCustomizer, WorkingDirectoryDestroyer, WorkingDirectoryInitializer,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Environment variable naming the Cassandra distribution to copy
pub const CASSANDRA_HOME: &str = "CASSANDRA_HOME";

/// Directories removed by [`DefaultWorkingDirectoryDestroyer::default`]
pub const DEFAULT_DESTROY_TARGETS: &[&str] =
    &["bin", "pylib", "lib", "tools", "doc", "javadoc", "interface"];

/// Copies a Cassandra distribution into the working directory, keeping
/// files that are already present
#[derive(Debug, Clone, Default)]
pub struct CopyWorkingDirectoryInitializer {
    home: Option<PathBuf>,
}

impl CopyWorkingDirectoryInitializer {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: Some(home.into()),
        }
    }

    fn home(&self) -> Result<PathBuf> {
        match &self.home {
            Some(home) => Ok(home.clone()),
            None => std::env::var_os(CASSANDRA_HOME)
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("No Cassandra home given and {CASSANDRA_HOME} is not set")),
        }
    }
}

#[async_trait]
impl WorkingDirectoryInitializer for CopyWorkingDirectoryInitializer {
    async fn init(&self, working_directory: &Path, version: &Version) -> Result<()> {
        let home = self.home()?;
        if !home.is_dir() {
            return Err(anyhow!("'{}' is not a directory", home.display()));
        }
        info!(
            "Copying Cassandra ({}) from '{}' to '{}'",
            version,
            home.display(),
            working_directory.display()
        );
        let target = working_directory.to_path_buf();
        tokio::task::spawn_blocking(move || copy_tree(&home, &target))
            .await
            .context("Copy task panicked")?
    }
}

fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry.with_context(|| format!("Unable to walk '{}'", source.display()))?;
        let relative = entry.path().strip_prefix(source)?;
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination)
                .with_context(|| format!("Unable to create '{}'", destination.display()))?;
        } else if !destination.exists() {
            std::fs::copy(entry.path(), &destination).with_context(|| {
                format!(
                    "Unable to copy '{}' to '{}'",
                    entry.path().display(),
                    destination.display()
                )
            })?;
        }
    }
    Ok(())
}

/// Removes parts of the working directory after a run.
///
/// By default only the distribution itself is removed so data and logs
/// survive for inspection; [`DefaultWorkingDirectoryDestroyer::all`] removes
/// the whole tree.
#[derive(Debug, Clone)]
pub struct DefaultWorkingDirectoryDestroyer {
    targets: Option<Vec<String>>,
}

impl DefaultWorkingDirectoryDestroyer {
    pub fn with_targets<S: ToString, I: IntoIterator<Item = S>>(targets: I) -> Self {
        Self {
            targets: Some(targets.into_iter().map(|s| s.to_string()).collect()),
        }
    }

    pub fn all() -> Self {
        Self { targets: None }
    }
}

impl Default for DefaultWorkingDirectoryDestroyer {
    fn default() -> Self {
        Self::with_targets(DEFAULT_DESTROY_TARGETS.iter().copied())
    }
}

#[async_trait]
impl WorkingDirectoryDestroyer for DefaultWorkingDirectoryDestroyer {
    async fn destroy(&self, working_directory: &Path, _version: &Version) -> Result<()> {
        let Some(targets) = &self.targets else {
            if tokio::fs::try_exists(working_directory).await.unwrap_or(false) {
                debug!("Deleting '{}'", working_directory.display());
                tokio::fs::remove_dir_all(working_directory)
                    .await
                    .with_context(|| format!("Unable to delete '{}'", working_directory.display()))?;
            }
            return Ok(());
        };

        for target in targets {
            let path = working_directory.join(target);
            let Ok(metadata) = tokio::fs::symlink_metadata(&path).await else {
                continue;
            };
            debug!("Deleting '{}'", path.display());
            let removed = if metadata.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            removed.with_context(|| format!("Unable to delete '{}'", path.display()))?;
        }
        Ok(())
    }
}

/// Copies one file to a path relative to the working directory
#[derive(Debug, Clone)]
pub struct CopyFileCustomizer {
    source: PathBuf,
    destination: PathBuf,
}

impl CopyFileCustomizer {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

#[async_trait]
impl WorkingDirectoryCustomizer for CopyFileCustomizer {
    async fn customize(&self, working_directory: &Path, _version: &Version) -> Result<()> {
        let destination = working_directory.join(&self.destination);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Unable to create '{}'", parent.display()))?;
        }
        debug!(
            "Copying '{}' to '{}'",
            self.source.display(),
            destination.display()
        );
        tokio::fs::copy(&self.source, &destination)
            .await
            .with_context(|| {
                format!(
                    "Unable to copy '{}' to '{}'",
                    self.source.display(),
                    destination.display()
                )
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn distribution() -> TempDir {
        let home = TempDir::new().unwrap();
        std::fs::create_dir_all(home.path().join("bin")).unwrap();
        std::fs::create_dir_all(home.path().join("conf")).unwrap();
        std::fs::create_dir_all(home.path().join("lib")).unwrap();
        std::fs::write(home.path().join("bin").join("cassandra"), "#!/bin/sh\n").unwrap();
        std::fs::write(home.path().join("conf").join("cassandra.yaml"), "cluster_name: a\n").unwrap();
        std::fs::write(home.path().join("lib").join("cassandra.jar"), "jar").unwrap();
        home
    }

    #[tokio::test]
    async fn test_copy_initializer_keeps_existing_files() {
        let home = distribution();
        let working_directory = TempDir::new().unwrap();
        std::fs::create_dir_all(working_directory.path().join("conf")).unwrap();
        std::fs::write(
            working_directory.path().join("conf").join("cassandra.yaml"),
            "cluster_name: custom\n",
        )
        .unwrap();

        CopyWorkingDirectoryInitializer::new(home.path())
            .init(working_directory.path(), &Version::default())
            .await
            .unwrap();

        assert!(working_directory.path().join("bin").join("cassandra").is_file());
        assert!(working_directory.path().join("lib").join("cassandra.jar").is_file());
        assert_eq!(
            std::fs::read_to_string(working_directory.path().join("conf").join("cassandra.yaml"))
                .unwrap(),
            "cluster_name: custom\n"
        );
    }

    #[tokio::test]
    async fn test_copy_initializer_requires_existing_home() {
        let working_directory = TempDir::new().unwrap();
        let result = CopyWorkingDirectoryInitializer::new(working_directory.path().join("missing"))
            .init(working_directory.path(), &Version::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_default_destroyer_keeps_data() {
        let home = distribution();
        let working_directory = TempDir::new().unwrap();
        CopyWorkingDirectoryInitializer::new(home.path())
            .init(working_directory.path(), &Version::default())
            .await
            .unwrap();
        std::fs::create_dir_all(working_directory.path().join("data")).unwrap();

        DefaultWorkingDirectoryDestroyer::default()
            .destroy(working_directory.path(), &Version::default())
            .await
            .unwrap();

        assert!(!working_directory.path().join("bin").exists());
        assert!(!working_directory.path().join("lib").exists());
        assert!(working_directory.path().join("conf").exists());
        assert!(working_directory.path().join("data").exists());
    }

    #[tokio::test]
    async fn test_destroy_all_and_missing_directory() {
        let parent = TempDir::new().unwrap();
        let working_directory = parent.path().join("node");
        std::fs::create_dir_all(working_directory.join("data")).unwrap();

        let destroyer = DefaultWorkingDirectoryDestroyer::all();
        destroyer
            .destroy(&working_directory, &Version::default())
            .await
            .unwrap();
        assert!(!working_directory.exists());

        destroyer
            .destroy(&working_directory, &Version::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_copy_file_customizer_creates_parents() {
        let source = TempDir::new().unwrap();
        let file = source.path().join("keystore.jks");
        std::fs::write(&file, "secret").unwrap();
        let working_directory = TempDir::new().unwrap();

        CopyFileCustomizer::new(&file, "conf/.keystore")
            .customize(working_directory.path(), &Version::default())
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(working_directory.path().join("conf").join(".keystore"))
                .unwrap(),
            "secret"
        );
    }
}
