//! Timer-driving service around an [`ApsEngine`].
//!
//! [`ApsService`] owns the engine behind a mutex and runs a dedicated
//! `linaps-timer` thread. The thread sleeps until the earliest timer
//! deadline, takes the lock once, fires every due timer (including timers
//! armed by the callbacks themselves) and goes back to sleep. Callers reach
//! the engine through [`ApsService::with_engine`]; if their call produced a
//! deadline earlier than the one the thread sleeps toward, the thread is
//! woken to re-plan.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, warn};

use crate::engine::ApsEngine;
use crate::error::ApsError;

/// Name of the timer thread.
pub const TIMER_THREAD_NAME: &str = "linaps-timer";

#[derive(Debug)]
struct ServiceState {
    engine: ApsEngine,
    /// Deadline the timer thread currently sleeps toward; `None` while it
    /// waits for a kick.
    sleeping_until: Option<Instant>,
    shutdown: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ServiceState>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An [`ApsEngine`] with its own timer thread.
#[derive(Debug)]
pub struct ApsService {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl ApsService {
    /// Takes ownership of `engine` and starts the timer thread.
    ///
    /// # Errors
    /// - [`ApsError::Internal`] - The timer thread could not be spawned
    pub fn start(engine: ApsEngine) -> Result<Self, ApsError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(ServiceState {
                engine,
                sleeping_until: None,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(TIMER_THREAD_NAME.to_string())
            .spawn(move || timer_loop(&thread_shared))
            .map_err(|e| ApsError::Internal(format!("spawning {TIMER_THREAD_NAME}: {e}")))?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Runs `f` with exclusive access to the engine.
    ///
    /// Wakes the timer thread afterwards if `f` armed a timer that is due
    /// before the thread's planned wakeup.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut ApsEngine) -> R) -> R {
        let mut state = self.shared.lock();
        let result = f(&mut state.engine);

        let next = state.engine.next_deadline();
        let earlier = match (next, state.sleeping_until) {
            (Some(next), Some(planned)) => next < planned,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if earlier {
            debug!("kicking timer thread");
            self.shared.wake.notify_one();
        }
        result
    }

    /// Forces the timer thread to re-plan, e.g. after a mock clock moved.
    pub fn kick(&self) {
        let _state = self.shared.lock();
        self.shared.wake.notify_one();
    }

    /// Whether the timer thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops and joins the timer thread. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_one();
        if handle.join().is_err() {
            warn!("{TIMER_THREAD_NAME} panicked");
        }
    }
}

impl Drop for ApsService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(shared: &Shared) {
    debug!("{TIMER_THREAD_NAME} started");
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            break;
        }

        let fired = state.engine.process_timers();
        if fired > 0 {
            debug!(fired, "timer batch");
        }

        let next = state.engine.next_deadline();
        state.sleeping_until = next;
        state = match next {
            None => shared
                .wake
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner),
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(state.engine.now());
                shared
                    .wake
                    .wait_timeout(state, timeout)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
        };
    }
    debug!("{TIMER_THREAD_NAME} stopped");
}
