//! Read-through cache of zone authority levels

use hazard_core::{AccessCondition, CoreError};
use hazard_db::PersistenceGateway;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default time a loaded table is trusted before the next read reloads it
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum AccessError {
    #[error("Access levels unavailable: {0}")]
    Unavailable(String),

    #[error("Expected 8 authority levels, got {0}")]
    WrongCount(usize),

    #[error("Invalid authority level: {0}")]
    InvalidLevel(String),

    #[error("Failed to store access levels: {0}")]
    Store(String),
}

impl AccessError {
    /// Error code reported on the admin channel
    pub fn code(&self) -> u8 {
        match self {
            AccessError::Unavailable(_) => 1,
            AccessError::WrongCount(_) => 2,
            AccessError::InvalidLevel(_) => 3,
            AccessError::Store(_) => 4,
        }
    }
}

impl From<CoreError> for AccessError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::WrongZoneCount { actual, .. } => AccessError::WrongCount(actual),
            other => AccessError::InvalidLevel(other.to_string()),
        }
    }
}

pub type AccessResult<T> = Result<T, AccessError>;

#[derive(Debug, Default)]
struct CacheState {
    levels: Option<AccessCondition>,
    loaded_at: Option<Instant>,
}

/// TTL cache in front of the stored authority table.
///
/// The lock is held across the reload so concurrent readers wait for one
/// load instead of issuing their own.
pub struct AccessControlCache {
    gateway: Arc<dyn PersistenceGateway>,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl AccessControlCache {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, ttl: Duration) -> Self {
        Self {
            gateway,
            ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub async fn get(&self) -> AccessResult<AccessCondition> {
        let mut state = self.state.lock().await;

        if let (Some(levels), Some(loaded_at)) = (state.levels, state.loaded_at) {
            if loaded_at.elapsed() <= self.ttl {
                return Ok(levels);
            }
        }

        match self.gateway.load_access_levels().await {
            Ok(levels) => {
                debug!(levels = %levels.to_wire(), "Reloaded access levels");
                state.levels = Some(levels);
                state.loaded_at = Some(Instant::now());
                Ok(levels)
            }
            Err(e) => match state.levels {
                Some(stale) => {
                    warn!(error = %e, "Access level reload failed, serving cached levels");
                    Ok(stale)
                }
                None => Err(AccessError::Unavailable(e.to_string())),
            },
        }
    }

    /// Validate and store a complete table; the cache changes only when the store succeeds
    pub async fn set(&self, levels: &[i64]) -> AccessResult<AccessCondition> {
        let access = AccessCondition::from_levels(levels)?;
        self.commit(access).await
    }

    /// Store an already validated table
    pub async fn commit(&self, access: AccessCondition) -> AccessResult<AccessCondition> {
        let mut state = self.state.lock().await;

        self.gateway
            .store_access_levels(&access)
            .await
            .map_err(|e| AccessError::Store(e.to_string()))?;

        state.levels = Some(access);
        state.loaded_at = Some(Instant::now());
        Ok(access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hazard_db::{MemoryGateway, SnapshotStore};

    fn cache(ttl: Duration) -> (Arc<MemoryGateway>, AccessControlCache) {
        let gateway = Arc::new(MemoryGateway::new(SnapshotStore::new("unused")));
        let cache = AccessControlCache::new(gateway.clone(), ttl);
        (gateway, cache)
    }

    #[tokio::test]
    async fn test_wrong_count_rejected() {
        let (_, cache) = cache(DEFAULT_ACCESS_TTL);
        let before = cache.get().await.unwrap();

        let err = cache.set(&[1; 7]).await.unwrap_err();
        assert_eq!(err.code(), 2);
        let err = cache.set(&[1; 9]).await.unwrap_err();
        assert_eq!(err.code(), 2);

        assert_eq!(cache.get().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_out_of_range_rejected() {
        let (_, cache) = cache(DEFAULT_ACCESS_TTL);

        assert_eq!(cache.set(&[1, 1, 1, 1, 1, 1, 1, 0]).await.unwrap_err().code(), 3);
        assert_eq!(cache.set(&[4, 1, 1, 1, 1, 1, 1, 1]).await.unwrap_err().code(), 3);
    }

    #[tokio::test]
    async fn test_set_visible_without_reload() {
        let (gateway, cache) = cache(DEFAULT_ACCESS_TTL);
        cache.set(&[3, 3, 3, 3, 2, 2, 1, 1]).await.unwrap();

        let levels = cache.get().await.unwrap();
        assert_eq!(levels.levels(), [3, 3, 3, 3, 2, 2, 1, 1]);
        assert_eq!(gateway.access_load_count(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_leaves_cache() {
        let (gateway, cache) = cache(DEFAULT_ACCESS_TTL);
        let before = cache.get().await.unwrap();

        gateway.set_fail_writes(true);
        let err = cache.set(&[2; 8]).await.unwrap_err();
        assert_eq!(err.code(), 4);
        assert_eq!(cache.get().await.unwrap(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_after_ttl() {
        let (gateway, cache) = cache(Duration::from_secs(300));

        cache.get().await.unwrap();
        cache.get().await.unwrap();
        assert_eq!(gateway.access_load_count(), 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        cache.get().await.unwrap();
        assert_eq!(gateway.access_load_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_levels_served_when_reload_fails() {
        let (gateway, cache) = cache(Duration::from_secs(1));
        let loaded = cache.get().await.unwrap();

        gateway.set_ready(false);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get().await.unwrap(), loaded);
    }

    #[tokio::test]
    async fn test_unavailable_without_levels() {
        let (gateway, cache) = cache(DEFAULT_ACCESS_TTL);
        gateway.set_ready(false);

        assert_eq!(cache.get().await.unwrap_err().code(), 1);
    }
}
