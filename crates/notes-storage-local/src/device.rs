use std::path::Path;

use notes_storage_core::{DeviceId, StoreError};
use tracing::{debug, info};

/// Load this installation's device id from `path`, creating it on first use.
///
/// The id must stay stable across restarts: leases are matched against it.
pub async fn load_or_create(path: &Path) -> Result<DeviceId, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => {
            let id = text.trim().parse::<DeviceId>().map_err(|e| {
                StoreError::Internal(format!("Invalid device id in {}: {}", path.display(), e))
            })?;
            debug!("Loaded device id {} from {}", id, path.display());
            Ok(id)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let id = DeviceId::generate();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StoreError::Io(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }

            let tmp = path.with_extension("tmp");
            tokio::fs::write(&tmp, format!("{}\n", id))
                .await
                .map_err(|e| StoreError::Io(format!("Failed to write {}: {}", tmp.display(), e)))?;
            tokio::fs::rename(&tmp, path)
                .await
                .map_err(|e| StoreError::Io(format!("Failed to write {}: {}", path.display(), e)))?;

            info!("Generated device id {} at {}", id, path.display());
            Ok(id)
        }
        Err(e) => Err(StoreError::Io(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}
