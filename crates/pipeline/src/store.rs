//! Single-writer access to the config file.
//!
//! All read-modify-write cycles go through one [`ConfigStore`], which
//! holds an async mutex for the whole cycle and replaces the file by
//! writing a sibling temp file and renaming it over the original.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use shotq_core::annotation;
use shotq_core::config_parser::{self, ConfigModel, ParseOptions, ParseOutcome};
use shotq_core::shot_range::split_lines;
use tokio::sync::Mutex;

use crate::dispatcher::DispatchResult;
use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read_text(&self) -> Result<String, PipelineError> {
        let _guard = self.lock.lock().await;
        self.read_unlocked().await
    }

    pub async fn load(&self, options: ParseOptions) -> Result<ParseOutcome, PipelineError> {
        let text = self.read_text().await?;
        Ok(config_parser::parse_with(&text, options))
    }

    pub async fn load_model(&self) -> Result<ConfigModel, PipelineError> {
        Ok(self.load(ParseOptions::default()).await?.model)
    }

    /// Apply `edit` to the current lines and write the result back.
    ///
    /// The lock is held from the read until the rename completes. An
    /// edit error leaves the file untouched.
    pub async fn edit<T, F>(&self, edit: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&mut Vec<String>) -> Result<T, PipelineError>,
    {
        let _guard = self.lock.lock().await;
        let text = self.read_unlocked().await?;
        let mut lines = split_lines(&text);
        let value = edit(&mut lines)?;
        let updated = lines.concat();
        if updated != text {
            self.write_unlocked(&updated).await?;
            tracing::info!(path = %self.path.display(), "Config updated");
        }
        Ok(value)
    }

    /// Mark every successful result as run in one write.
    ///
    /// Results whose shot no longer exists are skipped with a warning.
    /// Returns how many subshots were annotated.
    pub async fn annotate_results(&self, results: &[DispatchResult]) -> Result<usize, PipelineError> {
        let successes: Vec<&DispatchResult> = results.iter().filter(|r| r.success()).collect();
        if successes.is_empty() {
            return Ok(0);
        }
        self.edit(|lines| {
            let mut marked = 0;
            for result in successes {
                let selector =
                    annotation::ShotSelector::subshot(&result.sequence, &result.shot, &result.subshot);
                match annotation::mark_run(lines, &selector, result.family) {
                    Ok(()) => marked += 1,
                    Err(e) => tracing::warn!(job = %result.job, error = %e, "Could not annotate result"),
                }
            }
            Ok(marked)
        })
        .await
    }

    async fn read_unlocked(&self) -> Result<String, PipelineError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| {
                PipelineError::Core(shotq_core::error::CoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            })
    }

    async fn write_unlocked(&self, text: &str) -> Result<(), PipelineError> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config".to_string());
        let tmp = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, text).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}
