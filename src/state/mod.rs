pub mod rooms;
pub mod session_machine;

use std::{future::Future, sync::Arc, time::SystemTime};

use dashmap::DashMap;
use tokio::{
    sync::{RwLock, watch},
    task::AbortHandle,
    time::timeout,
};
use uuid::Uuid;

use crate::{
    clock::Clock, config::AppConfig, dao::quiz_store::QuizStore, dao::storage::StorageResult,
    error::ServiceError,
};

pub use self::rooms::{RoomHub, SessionRooms};

pub type SharedState = Arc<AppState>;

const ROOM_CAPACITY: usize = 64;
const ADMIN_CAPACITY: usize = 64;

/// Central application state shared by the scheduler, the services and the HTTP layer.
pub struct AppState {
    quiz_store: RwLock<Option<Arc<dyn QuizStore>>>,
    clock: Arc<dyn Clock>,
    config: AppConfig,
    rooms: SessionRooms,
    countdowns: DashMap<Uuid, AbortHandle>,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig, clock: Arc<dyn Clock>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            quiz_store: RwLock::new(None),
            clock,
            config,
            rooms: SessionRooms::new(ROOM_CAPACITY, ADMIN_CAPACITY),
            countdowns: DashMap::new(),
            degraded: degraded_tx,
        })
    }

    /// Build a state with `store` already installed.
    pub async fn with_store(
        config: AppConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn QuizStore>,
    ) -> SharedState {
        let state = Self::new(config, clock);
        state.install_store(store).await;
        state
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn quiz_store(&self) -> Option<Arc<dyn QuizStore>> {
        let guard = self.quiz_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_store(&self) -> Result<Arc<dyn QuizStore>, ServiceError> {
        self.quiz_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new store implementation and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn QuizStore>) {
        {
            let mut guard = self.quiz_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.quiz_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Run a storage future within the configured budget.
    ///
    /// An elapsed budget surfaces as [`ServiceError::Timeout`]; the caller
    /// must not assume the operation was applied.
    pub async fn store_call<T, F>(&self, operation: F) -> Result<T, ServiceError>
    where
        F: Future<Output = StorageResult<T>>,
    {
        match timeout(self.config.storage_timeout, operation).await {
            Ok(result) => result.map_err(ServiceError::from),
            Err(_) => Err(ServiceError::Timeout),
        }
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Shorthand for `self.clock().now()`.
    pub fn now(&self) -> SystemTime {
        self.clock.now()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Broadcast rooms keyed by session.
    pub fn rooms(&self) -> &SessionRooms {
        &self.rooms
    }

    /// Auto-submit countdowns currently armed, keyed by session.
    pub fn countdowns(&self) -> &DashMap<Uuid, AbortHandle> {
        &self.countdowns
    }
}
