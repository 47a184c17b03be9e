use std::path::Path;

use anyhow::{Context, Result};
use uuid::Uuid;

/// Resolve this member's stable instance id. Config wins when set; next
/// the identity file; otherwise a fresh id is generated and written. The
/// file is created once and never overwritten.
pub fn load_or_create(path: &Path, configured: Option<&str>) -> Result<String> {
    if let Some(id) = configured.filter(|id| !id.trim().is_empty()) {
        return Ok(id.trim().to_string());
    }

    if path.exists() {
        let stored = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read identity file {}", path.display()))?;
        let stored = stored.trim();
        if !stored.is_empty() {
            return Ok(stored.to_string());
        }
    }

    let id = Uuid::new_v4().to_string();
    std::fs::write(path, &id)
        .with_context(|| format!("failed to write identity file {}", path.display()))?;
    tracing::info!(instance_id = %id, file = %path.display(), "generated new instance id");
    Ok(id)
}
