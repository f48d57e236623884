//! File-producing conversion utilities: HEIC→JPEG and video→frame
//! sequence. Pixel work is delegated to external tools; this crate owns
//! invocation, timeouts, and provenance back to the source item.

mod frames;
mod heic;

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use photoscribe_types::{ItemKind, WorkItem};

pub use frames::FrameExtractor;
pub use heic::HeicConverter;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Required tool '{0}' not found in PATH")]
    ToolMissing(String),
    #[error("{tool} failed: {stderr}")]
    CommandFailed { tool: String, stderr: String },
    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },
    #[error("{tool} reported success but produced no output under {path}")]
    NoOutput { tool: String, path: PathBuf },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file produced by a converter, carrying provenance to its source item.
#[derive(Debug, Clone)]
pub struct DerivedFile {
    pub path: PathBuf,
    pub kind: ItemKind,
    /// Id of the work item this file was derived from.
    pub source_id: String,
}

/// A producer of derived files for one class of source items.
#[async_trait]
pub trait MediaConverter: Send + Sync {
    fn id(&self) -> &str;

    fn applies_to(&self, kind: ItemKind) -> bool;

    /// Produce derived files for `source` under `out_dir`. Output naming
    /// is deterministic so a re-run over an unchanged source yields the
    /// same paths.
    async fn produce(
        &self,
        source: &WorkItem,
        out_dir: &std::path::Path,
    ) -> Result<Vec<DerivedFile>, ConvertError>;
}

/// Probe whether an external tool runs. Results are cached for the life of
/// the process.
pub fn tool_available(tool: &str, probe_arg: &str) -> bool {
    static CACHE: OnceLock<Mutex<HashMap<String, bool>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));

    if let Some(&known) = cache.lock().unwrap().get(tool) {
        return known;
    }
    let available = std::process::Command::new(tool)
        .arg(probe_arg)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    if !available {
        tracing::warn!(tool, "Conversion tool not available");
    }
    cache.lock().unwrap().insert(tool.to_string(), available);
    available
}

/// Run an external tool with a wall-clock bound, surfacing stderr on
/// failure.
pub(crate) async fn run_tool(
    tool: &str,
    args: &[String],
    timeout: Duration,
) -> Result<(), ConvertError> {
    let mut cmd = tokio::process::Command::new(tool);
    cmd.args(args);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    tracing::debug!(tool, ?args, "Running conversion tool");

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) if output.status.success() => Ok(()),
        Ok(Ok(output)) => Err(ConvertError::CommandFailed {
            tool: tool.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }),
        Ok(Err(e)) => Err(ConvertError::Io(e)),
        Err(_) => Err(ConvertError::Timeout {
            tool: tool.to_string(),
            secs: timeout.as_secs(),
        }),
    }
}
