//! Snapshot crop files

use crate::DbResult;
use hazard_core::{CameraId, ObjectId};
use std::path::PathBuf;
use tracing::trace;

/// Writes first-sighting crops as JPEG files under one directory
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, camera_id: &CameraId, img_id: u64, object_id: ObjectId) -> PathBuf {
        let camera: String = camera_id
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}_{}_{}.jpg", camera, img_id, object_id.0))
    }

    pub async fn write(
        &self,
        camera_id: &CameraId,
        img_id: u64,
        object_id: ObjectId,
        data: &[u8],
    ) -> DbResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(camera_id, img_id, object_id);
        tokio::fs::write(&path, data).await?;

        trace!(path = %path.display(), size = data.len(), "Stored snapshot");
        Ok(path)
    }
}
