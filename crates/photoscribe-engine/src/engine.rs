//! Scheduler/controller over the workspace document.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use photoscribe_convert::MediaConverter;
use photoscribe_discovery::Candidate;
use photoscribe_providers::{ProviderRegistry, VisionProvider};
use photoscribe_types::{ItemStatus, RunConfiguration, WorkItem};
use photoscribe_workspace::{WorkspaceError, WorkspaceStore};

use crate::worker::{ItemOutcome, process_item};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Provider '{0}' is not registered")]
    NoSuchProvider(String),
    #[error("Provider '{0}' is not available (missing API key or unreachable service)")]
    ProviderUnavailable(String),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

/// Which items a run dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPass {
    /// Normal pass over `pending` items. Failed items are left alone.
    Pending,
    /// Explicit retry pass: failed items are re-enqueued first.
    RetryFailed,
}

/// Aggregate outcome of one engine run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Items handed to a worker this run.
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    /// Conversion sources (video/HEIC) moved to `skipped`.
    pub skipped: usize,
    /// Completed items whose final text was empty.
    pub empty_text: usize,
    /// Whether the run stopped early on a cancellation signal.
    pub cancelled: bool,
}

/// The workflow engine. Owns the only write handle to the workspace
/// document; constructed with an explicit provider registry so concurrent
/// jobs with different provider sets can coexist.
pub struct Engine {
    store: Arc<WorkspaceStore>,
    registry: ProviderRegistry,
    converters: Vec<Arc<dyn MediaConverter>>,
    derived_dir: PathBuf,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        store: Arc<WorkspaceStore>,
        registry: ProviderRegistry,
        converters: Vec<Arc<dyn MediaConverter>>,
        derived_dir: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            registry,
            converters,
            derived_dir,
            cancel,
        }
    }

    /// Process the workspace to completion (or cancellation).
    ///
    /// Semantics come from the document's configuration snapshot, not from
    /// whatever the CLI was invoked with this time: a resumed run cannot
    /// silently change provider, model, or prompt mid-job.
    pub async fn run(&self, pass: RunPass) -> Result<RunReport, EngineError> {
        let config = self.store.configuration().await;

        let provider = self
            .registry
            .get(&config.provider)
            .ok_or_else(|| EngineError::NoSuchProvider(config.provider.clone()))?;
        if !provider.is_available() {
            return Err(EngineError::ProviderUnavailable(config.provider.clone()));
        }

        if pass == RunPass::RetryFailed {
            self.store.reset_failed().await?;
        }

        let mut report = RunReport::default();
        self.conversion_pass(&mut report).await?;
        self.dispatch_pass(&config, provider, &mut report).await?;

        report.cancelled = self.cancel.is_cancelled();
        tracing::info!(
            dispatched = report.dispatched,
            completed = report.completed,
            failed = report.failed,
            skipped = report.skipped,
            empty_text = report.empty_text,
            cancelled = report.cancelled,
            "Run finished"
        );
        Ok(report)
    }

    /// Produce derived items for pending video/HEIC sources, then move the
    /// sources to `skipped` (their derivatives carry the descriptions).
    /// Idempotent: a source whose derivatives are already registered is not
    /// re-produced.
    async fn conversion_pass(&self, report: &mut RunReport) -> Result<(), EngineError> {
        let document = self.store.document().await;
        let sources: Vec<WorkItem> = document
            .items
            .values()
            .filter(|item| item.kind.needs_conversion() && item.status == ItemStatus::Pending)
            .cloned()
            .collect();

        for source in sources {
            if self.cancel.is_cancelled() {
                break;
            }

            if !document.derived_of(&source.id).is_empty() {
                self.store
                    .finish(&source.relative_path, ItemStatus::Skipped, None)
                    .await?;
                report.skipped += 1;
                continue;
            }

            let Some(converter) = self
                .converters
                .iter()
                .find(|c| c.applies_to(source.kind))
            else {
                self.store
                    .finish(
                        &source.relative_path,
                        ItemStatus::Failed,
                        Some("No converter available for this file type".to_string()),
                    )
                    .await?;
                report.failed += 1;
                continue;
            };

            match converter.produce(&source, &self.derived_dir).await {
                Ok(derived) => {
                    let candidates: Vec<Candidate> = derived
                        .iter()
                        .map(|d| {
                            let file_name = d
                                .path
                                .file_name()
                                .map(|n| n.to_string_lossy().into_owned())
                                .unwrap_or_default();
                            let relative =
                                format!("derived/{}/{}", source.relative_path, file_name);
                            let size = std::fs::metadata(&d.path).map(|m| m.len()).unwrap_or(0);
                            Candidate::derived(
                                relative,
                                d.path.clone(),
                                d.kind,
                                size,
                                d.source_id.clone(),
                            )
                        })
                        .collect();
                    self.store.merge_candidates(&candidates).await?;
                    self.store
                        .finish(&source.relative_path, ItemStatus::Skipped, None)
                        .await?;
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(item = %source.relative_path, "Conversion failed: {e}");
                    self.store
                        .finish(&source.relative_path, ItemStatus::Failed, Some(e.to_string()))
                        .await?;
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Dispatch pending describable items to the provider through a
    /// bounded worker pool. Dispatch order follows the document (discovery
    /// order); completion order is unordered.
    async fn dispatch_pass(
        &self,
        config: &RunConfiguration,
        provider: Arc<dyn VisionProvider>,
        report: &mut RunReport,
    ) -> Result<(), EngineError> {
        let document = self.store.document().await;
        let keys: Vec<String> = document
            .items
            .values()
            .filter(|item| item.status == ItemStatus::Pending && item.kind.is_describable())
            .map(|item| item.relative_path.clone())
            .collect();

        let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));
        let mut workers = FuturesUnordered::new();

        for key in keys {
            // No new dispatch after a cancellation signal; in-flight calls
            // are allowed to finish so a provider-side charge always has a
            // recorded result.
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            if self.cancel.is_cancelled() {
                break;
            }

            let item = match self.store.begin_processing(&key).await {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!(item = %key, "Skipping dispatch: {e}");
                    continue;
                }
            };
            report.dispatched += 1;

            let store = self.store.clone();
            let provider = provider.clone();
            let config = config.clone();
            workers.push(tokio::spawn(async move {
                let _permit = permit;
                process_item(store, provider, config, item).await
            }));
        }

        while let Some(joined) = workers.next().await {
            match joined {
                Ok(ItemOutcome::Completed { empty_text }) => {
                    report.completed += 1;
                    if empty_text {
                        report.empty_text += 1;
                    }
                }
                Ok(ItemOutcome::Failed) => report.failed += 1,
                Err(e) => tracing::error!("Worker task failed: {e}"),
            }
        }
        Ok(())
    }
}
