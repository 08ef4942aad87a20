use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use spots_core::{AdError, AdEvent};
use tokio::sync::broadcast;
use tracing::trace;

const EVENT_BUFFER: usize = 32;

/// One ad slot of the ad provider.
///
/// `load` and `show` only start the operation; its outcome arrives later as an
/// [`AdEvent`] on the subscription.
#[async_trait]
pub trait AdUnit: Send + Sync + 'static {
    async fn load(&self) -> Result<(), AdError>;

    async fn show(&self) -> Result<(), AdError>;

    fn subscribe(&self) -> broadcast::Receiver<AdEvent>;
}

struct ScriptedState {
    events: broadcast::Sender<AdEvent>,
    auto_fill: AtomicBool,
    load_calls: AtomicUsize,
    show_calls: AtomicUsize,
    load_failures: Mutex<VecDeque<AdError>>,
    show_failures: Mutex<VecDeque<AdError>>,
}

/// Ad unit driven by the caller, for local runs and tests.
///
/// With auto-fill on, a load is answered with `Loaded` and a show with `Closed`.
#[derive(Clone)]
pub struct ScriptedAdUnit {
    state: Arc<ScriptedState>,
}

impl Default for ScriptedAdUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAdUnit {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: Arc::new(ScriptedState {
                events,
                auto_fill: AtomicBool::new(false),
                load_calls: AtomicUsize::new(0),
                show_calls: AtomicUsize::new(0),
                load_failures: Mutex::new(VecDeque::new()),
                show_failures: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn with_auto_fill(self) -> Self {
        self.set_auto_fill(true);
        self
    }

    pub fn set_auto_fill(&self, enabled: bool) {
        self.state.auto_fill.store(enabled, Ordering::SeqCst);
    }

    /// Reject the next `load` call synchronously.
    pub fn fail_next_load(&self, error: AdError) {
        self.state
            .load_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// Reject the next `show` call synchronously.
    pub fn fail_next_show(&self, error: AdError) {
        self.state
            .show_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// Deliver a provider event to every subscriber; returns how many got it.
    pub fn emit(&self, event: AdEvent) -> usize {
        trace!(?event, "scripted ad event");
        self.state.events.send(event).unwrap_or(0)
    }

    pub fn load_calls(&self) -> usize {
        self.state.load_calls.load(Ordering::SeqCst)
    }

    pub fn show_calls(&self) -> usize {
        self.state.show_calls.load(Ordering::SeqCst)
    }

    fn auto_fill(&self) -> bool {
        self.state.auto_fill.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdUnit for ScriptedAdUnit {
    async fn load(&self) -> Result<(), AdError> {
        self.state.load_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self
            .state
            .load_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(error) = failure {
            return Err(error);
        }
        if self.auto_fill() {
            self.emit(AdEvent::Loaded);
        }
        Ok(())
    }

    async fn show(&self) -> Result<(), AdError> {
        self.state.show_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self
            .state
            .show_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(error) = failure {
            return Err(error);
        }
        if self.auto_fill() {
            self.emit(AdEvent::Closed);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AdEvent> {
        self.state.events.subscribe()
    }
}
