//! Bounded dispatcher for gateway calls.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Default number of gateway calls allowed in flight at once.
pub const DEFAULT_MAX_IN_FLIGHT: NonZeroUsize = NonZeroUsize::MIN.saturating_add(31);

/// Concurrency limit for dispatched gateway calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchConfig {
    max_in_flight: NonZeroUsize,
}

impl DispatchConfig {
    /// Limits concurrent gateway calls to `max_in_flight`.
    #[must_use]
    pub const fn new(max_in_flight: NonZeroUsize) -> Self {
        Self { max_in_flight }
    }

    /// Maximum calls running at once.
    #[must_use]
    pub const fn max_in_flight(self) -> NonZeroUsize {
        self.max_in_flight
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}

/// Runs gateway calls on the ambient tokio runtime, at most
/// [`DispatchConfig::max_in_flight`] at a time.
///
/// Closing stops new submissions; calls already queued still run so every
/// dispatched mutation settles.
#[derive(Debug, Clone)]
pub struct CallDispatcher {
    slots: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
    config: DispatchConfig,
}

impl Default for CallDispatcher {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}

impl CallDispatcher {
    /// Builds a dispatcher with `config.max_in_flight()` slots.
    #[must_use]
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(config.max_in_flight().get())),
            closed: Arc::new(AtomicBool::default()),
            config,
        }
    }

    /// Limit this dispatcher was built with.
    #[must_use]
    pub const fn config(&self) -> DispatchConfig {
        self.config
    }

    /// Calls currently holding a slot.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.config.max_in_flight().get() - self.slots.available_permits()
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuses further submissions.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Secures the right to spawn one call.
    ///
    /// A reservation taken before [`close`](Self::close) can still be spent
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Closed`] after [`close`](Self::close) and
    /// [`DispatchError::NoRuntime`] outside a tokio runtime.
    pub fn reserve(&self) -> DispatchResult<Reservation> {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }
        let runtime = Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;
        Ok(Reservation {
            runtime,
            slots: Arc::clone(&self.slots),
        })
    }

    /// Spawns `call`; it starts once a slot frees up.
    ///
    /// # Errors
    ///
    /// Same as [`reserve`](Self::reserve).
    pub fn spawn<C, T>(&self, call: C) -> DispatchResult<JoinHandle<T>>
    where
        C: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.reserve().map(|reservation| reservation.spawn(call))
    }
}

/// Permission to spawn one call, obtained from [`CallDispatcher::reserve`].
#[derive(Debug)]
#[must_use = "a reservation does nothing until spawned"]
pub struct Reservation {
    runtime: Handle,
    slots: Arc<Semaphore>,
}

impl Reservation {
    /// Spawns `call`; it starts once a slot frees up.
    pub fn spawn<C, T>(self, call: C) -> JoinHandle<T>
    where
        C: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let slots = self.slots;
        self.runtime.spawn(async move {
            // Never closed, so this only waits.
            let _slot = slots.acquire_owned().await.ok();
            call.await
        })
    }
}

/// Why a call could not be dispatched.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// The library was shut down.
    #[error("dispatcher closed")]
    Closed,
    /// Called from outside a tokio runtime.
    #[error("no tokio runtime available to dispatch on")]
    NoRuntime,
}

/// Result alias for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
