use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{quiz_store::QuizStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Connect to the storage backend and keep the shared state degraded while it is unreachable.
///
/// Once connected the store is health-checked periodically. A failed check
/// triggers a few reconnect attempts; when they are exhausted the store is
/// uninstalled and the whole connection is retried with backoff.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn QuizStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_store(store.clone()).await;
                info!("storage connection established; leaving degraded mode");
                delay = INITIAL_DELAY;

                loop {
                    if store.health_check().await.is_ok() {
                        if state.is_degraded() {
                            info!("storage healthy again; leaving degraded mode");
                            state.update_degraded(false);
                        }
                        sleep(HEALTH_POLL_INTERVAL).await;
                        continue;
                    }

                    if reconnect(&state, store.as_ref()).await {
                        state.update_degraded(false);
                        sleep(HEALTH_POLL_INTERVAL).await;
                        continue;
                    }

                    warn!("exhausted storage reconnect attempts; staying in degraded mode");
                    state.clear_store().await;
                    break;
                }

                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

async fn reconnect(state: &SharedState, store: &dyn QuizStore) -> bool {
    let mut reconnect_delay = INITIAL_DELAY;

    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "storage reconnection succeeded after health check failure");
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(
                        attempt,
                        error = %err,
                        "storage reconnect first attempt failed; entering degraded mode"
                    );
                    state.update_degraded(true);
                } else {
                    warn!(attempt, error = %err, "storage reconnect attempt failed");
                }
                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::SystemTime,
    };

    use super::*;
    use crate::{
        clock::ManualClock, config::AppConfig, dao::quiz_store::memory::MemoryQuizStore,
        state::AppState,
    };

    #[tokio::test]
    async fn installs_the_store_once_connected() {
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(ManualClock::new(SystemTime::UNIX_EPOCH)),
        );
        let store = MemoryQuizStore::new();

        let supervisor = tokio::spawn(run(state.clone(), move || {
            let store = store.clone();
            async move { Ok(Arc::new(store) as Arc<dyn QuizStore>) }
        }));

        let mut degraded = state.degraded_watcher();
        while *degraded.borrow_and_update() {
            degraded.changed().await.unwrap();
        }
        assert!(state.quiz_store().await.is_some());
        supervisor.abort();
    }

    #[tokio::test]
    async fn stays_degraded_while_the_backend_is_down() {
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(ManualClock::new(SystemTime::UNIX_EPOCH)),
        );

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let supervisor = tokio::spawn(run(state.clone(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<Arc<dyn QuizStore>, _>(StorageError::unavailable(
                    "connection refused".into(),
                    std::io::Error::other("refused"),
                ))
            }
        }));

        sleep(Duration::from_millis(50)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(state.is_degraded());
        assert!(state.quiz_store().await.is_none());
        supervisor.abort();
    }
}
