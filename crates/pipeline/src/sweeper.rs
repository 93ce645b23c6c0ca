//! Periodic eviction of finished tasks.
//!
//! Tasks are otherwise kept for the life of the process. When a TTL is
//! configured this loop drops terminal tasks whose last update is older
//! than the TTL; their handles then poll as not found.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::registry::TaskRegistry;

/// Sweep interval for a given TTL: a tenth of it, clamped to 1s..=60s.
pub fn sweep_interval(ttl: Duration) -> Duration {
    (ttl / 10).clamp(Duration::from_secs(1), Duration::from_secs(60))
}

/// Run the eviction loop until `cancel` fires.
pub async fn run(registry: TaskRegistry, ttl: Duration, cancel: CancellationToken) {
    let interval_period = sweep_interval(ttl);
    tracing::info!(
        ttl_secs = ttl.as_secs(),
        interval_secs = interval_period.as_secs(),
        "Task eviction started"
    );

    let Ok(ttl) = chrono::Duration::from_std(ttl) else {
        tracing::error!("Task TTL out of range, eviction disabled");
        return;
    };
    let mut interval = tokio::time::interval(interval_period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Task eviction stopping");
                break;
            }
            _ = interval.tick() => {
                let evicted = registry.evict_finished_before(Utc::now() - ttl).await;
                if evicted > 0 {
                    tracing::info!(evicted, "Evicted finished tasks");
                } else {
                    tracing::debug!("No finished tasks to evict");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use inpaint_core::error::CoreError;
    use serde_json::json;

    use super::*;
    use crate::task::{JobKind, TaskState};
    use crate::test_support::wait_for_state;

    #[test]
    fn interval_is_clamped() {
        assert_eq!(sweep_interval(Duration::from_secs(5)), Duration::from_secs(1));
        assert_eq!(sweep_interval(Duration::from_secs(100)), Duration::from_secs(10));
        assert_eq!(sweep_interval(Duration::from_secs(86_400)), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn sweeper_evicts_expired_tasks_and_stops() {
        let registry = TaskRegistry::start(CancellationToken::new());
        let done = registry.create(JobKind::Mask).await;
        let pending = registry.create(JobKind::Mask).await;
        registry.reporter(done).completed(json!({}));
        wait_for_state(&registry, done, TaskState::Completed).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(registry.clone(), Duration::from_millis(10), cancel.clone()));

        // The first tick fires immediately.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while registry.status(done).await.is_ok() {
            assert!(tokio::time::Instant::now() < deadline, "task never evicted");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_matches!(registry.status(done).await, Err(CoreError::NotFound { .. }));
        assert!(registry.status(pending).await.is_ok());

        cancel.cancel();
        handle.await.expect("sweeper exits");
    }
}
