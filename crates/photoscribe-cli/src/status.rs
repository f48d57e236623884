//! Read-only subcommands: `status`, `models`, `health`.

use std::path::Path;

use crate::run::build_registry;

/// Print a summary of a workspace document. Opens read-only; safe while a
/// run is active elsewhere.
pub fn status(workspace: &Path) -> anyhow::Result<()> {
    let document = photoscribe_workspace::read_document(workspace)?;
    let summary = document.summary();

    println!("Workspace: {}", workspace.display());
    println!("  created:  {}", document.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  root:     {}", document.configuration.root.display());
    println!(
        "  provider: {} / {}",
        document.configuration.provider, document.configuration.model
    );
    println!("  items:    {}", summary.total);
    println!("    pending:    {}", summary.pending);
    println!("    processing: {}", summary.processing);
    println!("    completed:  {}", summary.completed);
    println!("    failed:     {}", summary.failed);
    println!("    skipped:    {}", summary.skipped);
    if summary.empty_text > 0 {
        println!("    empty-text successes: {}", summary.empty_text);
    }

    let failed: Vec<_> = document
        .items
        .values()
        .filter(|item| item.error.is_some())
        .collect();
    if !failed.is_empty() {
        println!("  errors:");
        for item in failed.iter().take(20) {
            println!(
                "    {}: {}",
                item.relative_path,
                item.error.as_deref().unwrap_or("")
            );
        }
        if failed.len() > 20 {
            println!("    ... and {} more", failed.len() - 20);
        }
    }
    Ok(())
}

/// List providers and the models they offer.
pub async fn models(only: Option<String>) -> anyhow::Result<()> {
    let config = photoscribe_config::load_config()?;
    let registry = build_registry(&config);

    for provider in registry.iter() {
        if let Some(only) = &only {
            if provider.id() != only {
                continue;
            }
        }
        if !provider.is_available() {
            println!("{}: not available", provider.id());
            continue;
        }
        match provider.list_models().await {
            Ok(models) if models.is_empty() => {
                println!("{}: available, no models installed", provider.id());
            }
            Ok(models) => {
                println!("{}:", provider.id());
                for model in models {
                    println!("  {model}");
                }
            }
            Err(e) => println!("{}: failed to list models ({e})", provider.id()),
        }
    }
    Ok(())
}

/// Configuration and provider availability report.
pub fn health() -> anyhow::Result<()> {
    let config = photoscribe_config::load_config()?;
    let registry = build_registry(&config);

    println!("photoscribe is healthy");
    println!("  default provider: {}", config.default_provider);
    println!("  providers configured: {}", config.providers.len());
    for provider in registry.iter() {
        println!(
            "    {}: {}",
            provider.id(),
            if provider.is_available() {
                "available"
            } else {
                "not available"
            }
        );
    }
    println!("  workers: {}", config.engine.workers);
    println!(
        "  retry: {} attempts, {}ms base backoff",
        config.engine.retry.max_attempts, config.engine.retry.base_delay_ms
    );
    match &config.geocode_cache {
        Some(path) => println!("  geocode cache: {}", path.display()),
        None => println!("  geocode cache: in-memory only (set geocode_cache to persist)"),
    }
    Ok(())
}
