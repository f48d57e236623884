//! The `run`/`resume`/`retry-failed` subcommands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use photoscribe_config::{PhotoscribeConfig, ProviderConfig};
use photoscribe_convert::{FrameExtractor, HeicConverter, MediaConverter};
use photoscribe_engine::{Engine, RunPass, RunReport};
use photoscribe_enrich::{GeocodeCache, NominatimGeocoder, ReverseGeocoder};
use photoscribe_providers::{
    AnthropicProvider, OllamaProvider, OpenAiProvider, ProviderRegistry,
};
use photoscribe_types::RunConfiguration;
use photoscribe_workspace::WorkspaceStore;

pub struct RunArgs {
    pub root: PathBuf,
    pub workspace: Option<PathBuf>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub workers: Option<usize>,
    pub recursive: bool,
    pub prompt_style: Option<String>,
    pub geocode: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Pending,
    RetryFailed,
}

/// Build the provider registry from configuration. The registry is an
/// explicit value handed to the engine, not shared global state.
pub fn build_registry(config: &PhotoscribeConfig) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for (id, provider_config) in &config.providers {
        match provider_config {
            ProviderConfig::Openai {
                api_key, base_url, ..
            } => {
                registry.register(Arc::new(OpenAiProvider::new(
                    id.clone(),
                    api_key.clone(),
                    base_url.clone(),
                )));
            }
            ProviderConfig::Anthropic { api_key, .. } => {
                registry.register(Arc::new(AnthropicProvider::new(id.clone(), api_key.clone())));
            }
            ProviderConfig::Ollama { base_url, .. } => {
                registry.register(Arc::new(OllamaProvider::new(id.clone(), base_url.clone())));
            }
        }
    }
    registry
}

/// Workspace path for a media root when none is given.
fn default_workspace_path(root: &std::path::Path) -> PathBuf {
    root.join(".photoscribe").join("workspace.json")
}

fn derived_dir_for(workspace_path: &std::path::Path) -> PathBuf {
    workspace_path
        .parent()
        .map(|p| p.join("derived"))
        .unwrap_or_else(|| PathBuf::from("derived"))
}

/// Trip the cancellation token on Ctrl-C. In-flight calls finish; no new
/// items are dispatched.
fn install_ctrl_c(cancel: &CancellationToken) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Cancellation requested; letting in-flight calls finish");
            cancel.cancel();
        }
    });
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = photoscribe_config::load_config()?;

    let root = args
        .root
        .canonicalize()
        .with_context(|| format!("Media root not found: {}", args.root.display()))?;
    let workspace_path = args
        .workspace
        .unwrap_or_else(|| default_workspace_path(&root));

    let provider_id = args
        .provider
        .unwrap_or_else(|| config.default_provider.clone());
    let provider_config = config
        .providers
        .get(&provider_id)
        .with_context(|| format!("Provider '{provider_id}' is not configured"))?;
    let prompt_style = args.prompt_style.unwrap_or_else(|| "detailed".to_string());

    let snapshot = RunConfiguration {
        root: root.clone(),
        provider: provider_id,
        model: args
            .model
            .unwrap_or_else(|| provider_config.default_model().to_string()),
        prompt: config.prompt_for(&prompt_style),
        prompt_style,
        workers: args.workers.unwrap_or(config.engine.workers),
        recursive: args.recursive,
        timeout_secs: config.engine.timeout_secs,
        retry: config.engine.retry,
        conversion: config.engine.conversion,
        options: provider_config.options().clone(),
    };

    let store = Arc::new(WorkspaceStore::load_or_create(&workspace_path, snapshot)?);
    execute(config, store, workspace_path, args.geocode, Pass::Pending).await
}

pub async fn resume(workspace: PathBuf, geocode: bool, pass: Pass) -> anyhow::Result<()> {
    let config = photoscribe_config::load_config()?;
    let store = Arc::new(WorkspaceStore::load(&workspace)?);
    execute(config, store, workspace, geocode, pass).await
}

async fn execute(
    config: PhotoscribeConfig,
    store: Arc<WorkspaceStore>,
    workspace_path: PathBuf,
    geocode: bool,
    pass: Pass,
) -> anyhow::Result<()> {
    // All run semantics come from the persisted snapshot.
    let snapshot = store.configuration().await;
    info!(
        root = %snapshot.root.display(),
        provider = %snapshot.provider,
        model = %snapshot.model,
        workers = snapshot.workers,
        "Starting run"
    );

    let candidates = photoscribe_discovery::scan(&snapshot.root, snapshot.recursive, &[])?;
    let merge = store.merge_candidates(&candidates).await?;
    info!(
        discovered = candidates.len(),
        added = merge.added,
        failed_on_entry = merge.failed_on_entry,
        "Discovery merged"
    );

    let registry = build_registry(&config);
    let cancel = CancellationToken::new();
    install_ctrl_c(&cancel);

    let converters: Vec<Arc<dyn MediaConverter>> = vec![
        Arc::new(HeicConverter::new()),
        Arc::new(FrameExtractor::new(snapshot.conversion)),
    ];

    let engine = Engine::new(
        store.clone(),
        registry,
        converters,
        derived_dir_for(&workspace_path),
        cancel,
    );
    let engine_pass = match pass {
        Pass::Pending => RunPass::Pending,
        Pass::RetryFailed => RunPass::RetryFailed,
    };
    let report = engine.run(engine_pass).await?;

    enrich(&config, &store, geocode).await;
    print_report(&report);

    let summary = store.summary().await;
    println!(
        "Workspace: {} ({} items: {} completed, {} failed, {} pending, {} skipped)",
        workspace_path.display(),
        summary.total,
        summary.completed,
        summary.failed,
        summary.pending,
        summary.skipped
    );
    Ok(())
}

/// EXIF enrichment always runs (local, cheap); reverse geocoding only on
/// request. The coordinate cache persists only when the config names an
/// opt-in cache file.
async fn enrich(config: &PhotoscribeConfig, store: &WorkspaceStore, geocode: bool) {
    let mut cache = match &config.geocode_cache {
        Some(path) => match GeocodeCache::load(path) {
            Ok(cache) => cache,
            Err(e) => {
                warn!("Failed to load geocode cache: {e}");
                GeocodeCache::default()
            }
        },
        None => GeocodeCache::default(),
    };

    let geocoder = geocode.then(NominatimGeocoder::new);
    let geocoder_ref: Option<&dyn ReverseGeocoder> =
        geocoder.as_ref().map(|g| g as &dyn ReverseGeocoder);

    match photoscribe_enrich::enrich_document(store, geocoder_ref, &mut cache).await {
        Ok(report) => {
            if report.enriched > 0 {
                info!(
                    enriched = report.enriched,
                    geocoded = report.geocoded,
                    "Enrichment attached metadata"
                );
            }
        }
        Err(e) => warn!("Enrichment pass failed: {e}"),
    }

    if let Some(path) = &config.geocode_cache {
        if let Err(e) = cache.save(path) {
            warn!("Failed to save geocode cache: {e}");
        }
    }
}

fn print_report(report: &RunReport) {
    println!(
        "Run finished: {} dispatched, {} completed, {} failed, {} skipped",
        report.dispatched, report.completed, report.failed, report.skipped
    );
    if report.empty_text > 0 {
        println!(
            "  {} item(s) completed with EMPTY descriptions (provider returned no content)",
            report.empty_text
        );
    }
    if report.cancelled {
        println!("  run was cancelled; remaining items stay pending and will resume next run");
    }
}
