use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use spots_core::{
    AdEffect, AdInput, AdLifecycleState, AdStateMachine, AdTimings, StatePublisher, StateStream,
};
use spots_platform::AdUnit;
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadOptions {
    /// Bypass the request spacing window.
    pub force: bool,
}

struct ReloadTimer {
    generation: u64,
    task: JoinHandle<()>,
}

struct Shared<U> {
    unit: U,
    machine: Mutex<AdStateMachine>,
    publisher: StatePublisher<AdLifecycleState>,
    timer: Mutex<Option<ReloadTimer>>,
    timer_generation: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
    stop: CancellationToken,
    initialized: AtomicBool,
}

impl<U> Shared<U> {
    fn cancel_timer(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.task.abort();
        }
    }

    /// Take the slot if `generation` is still the pending timer.
    fn claim_timer(&self, generation: u64) -> bool {
        let mut slot = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map(|timer| timer.generation) == Some(generation) {
            slot.take();
            true
        } else {
            false
        }
    }
}

impl<U> Drop for Shared<U> {
    fn drop(&mut self) {
        self.stop.cancel();
        self.cancel_timer();
    }
}

impl<U: AdUnit> Shared<U> {
    fn apply(&self, input: AdInput) -> Vec<AdEffect> {
        let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
        let effects = machine.apply(input, Instant::now().into_std());
        self.publisher.publish(machine.state().clone());
        effects
    }

    async fn dispatch(self: &Arc<Self>, input: AdInput) -> bool {
        let effects = self.apply(input);
        self.run_effects(effects).await
    }

    /// Execute effects in order; returns whether a show request went through.
    async fn run_effects(self: &Arc<Self>, effects: Vec<AdEffect>) -> bool {
        let mut queue = VecDeque::from(effects);
        let mut shown = false;

        while let Some(effect) = queue.pop_front() {
            match effect {
                AdEffect::RequestLoad => {
                    debug!("requesting ad load");
                    if let Err(err) = self.unit.load().await {
                        warn!(error = %err, "ad load request failed");
                        queue.extend(self.apply(AdInput::LoadFailed(err)));
                    }
                }
                AdEffect::RequestShow => match self.unit.show().await {
                    Ok(()) => shown = true,
                    Err(err) => {
                        warn!(error = %err, "failed to show ad");
                        queue.extend(self.apply(AdInput::ShowFailed(err)));
                    }
                },
                AdEffect::ScheduleLoad(delay) => self.schedule_load(delay),
                AdEffect::CancelScheduledLoad => self.cancel_timer(),
            }
        }
        shown
    }

    /// Replace any pending reload with one firing after `delay`.
    fn schedule_load(self: &Arc<Self>, delay: Duration) {
        if self.stop.is_cancelled() {
            return;
        }

        let mut slot = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = self.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let weak = Arc::downgrade(self);
        let stop = self.stop.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if shared.claim_timer(generation) {
                shared.dispatch(AdInput::ScheduledLoad).await;
            }
        });

        debug!(delay_ms = delay.as_millis() as u64, "ad reload scheduled");
        if let Some(previous) = slot.replace(ReloadTimer { generation, task }) {
            previous.task.abort();
        }
    }
}

/// Owner of one app-open ad slot.
///
/// Clones share the slot. Observers read immutable snapshots through
/// [`AppOpenAdManager::subscribe`].
pub struct AppOpenAdManager<U> {
    shared: Arc<Shared<U>>,
}

impl<U> Clone for AppOpenAdManager<U> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<U: AdUnit> AppOpenAdManager<U> {
    pub fn new(unit: U) -> Self {
        Self::with_timings(unit, AdTimings::default())
    }

    pub fn with_timings(unit: U, timings: AdTimings) -> Self {
        let machine = AdStateMachine::new(timings);
        let publisher = StatePublisher::new(machine.state().clone());
        Self {
            shared: Arc::new(Shared {
                unit,
                machine: Mutex::new(machine),
                publisher,
                timer: Mutex::new(None),
                timer_generation: AtomicU64::new(0),
                listener: Mutex::new(None),
                stop: CancellationToken::new(),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to the ad unit's events. Later calls, and calls after
    /// [`shutdown`](Self::shutdown), do nothing and return `false`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn initialize(&self) -> bool {
        if self.shared.stop.is_cancelled() || self.shared.initialized.swap(true, Ordering::SeqCst)
        {
            return false;
        }

        let mut events = self.shared.unit.subscribe();
        let weak = Arc::downgrade(&self.shared);
        let stop = self.shared.stop.clone();
        let listener = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = stop.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => {
                        let Some(shared) = weak.upgrade() else {
                            break;
                        };
                        debug!(?event, "ad event");
                        shared.dispatch(AdInput::Provider(event)).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "ad events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        *self
            .shared
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
        info!("app open ad manager initialized");
        true
    }

    pub fn state(&self) -> AdLifecycleState {
        self.shared.publisher.snapshot()
    }

    pub fn subscribe(&self) -> StateStream<AdLifecycleState> {
        self.shared.publisher.subscribe()
    }

    /// Request an ad unless one was requested within the spacing window.
    pub async fn load_ad(&self, options: LoadOptions) {
        self.shared
            .dispatch(AdInput::Load {
                force: options.force,
            })
            .await;
    }

    /// Show the loaded ad. Returns `false` when nothing is loaded, an ad is
    /// already showing, or the provider rejected the show.
    pub async fn show_ad_if_available(&self) -> bool {
        self.shared.dispatch(AdInput::Show).await
    }

    /// Stop listening and drop any pending reload. The manager stays readable.
    pub async fn shutdown(&self) {
        self.shared.stop.cancel();
        self.shared.cancel_timer();
        let listener = self
            .shared
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener
            && let Err(err) = listener.await
        {
            warn!(error = %err, "ad event listener ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use spots_core::{AdError, AdEvent, AdPhase};
    use spots_platform::ScriptedAdUnit;

    use super::*;

    fn manager(unit: &ScriptedAdUnit) -> AppOpenAdManager<ScriptedAdUnit> {
        let manager = AppOpenAdManager::new(unit.clone());
        assert!(manager.initialize());
        manager
    }

    async fn wait_until(
        manager: &AppOpenAdManager<ScriptedAdUnit>,
        condition: impl FnMut(&AdLifecycleState) -> bool,
    ) -> AdLifecycleState {
        let mut rx = manager.subscribe();
        let state = rx
            .wait_for(condition)
            .await
            .expect("manager should stay alive")
            .clone();
        state
    }

    #[tokio::test(start_paused = true)]
    async fn loads_inside_the_window_are_debounced_unless_forced() {
        let unit = ScriptedAdUnit::new();
        let manager = manager(&unit);

        manager.load_ad(LoadOptions::default()).await;
        manager.load_ad(LoadOptions::default()).await;
        assert_eq!(unit.load_calls(), 1);
        assert_eq!(manager.state().phase(), AdPhase::Loading);

        manager.load_ad(LoadOptions { force: true }).await;
        assert_eq!(unit.load_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn load_errors_retry_after_the_request_window() {
        let unit = ScriptedAdUnit::new();
        let manager = manager(&unit);

        manager.load_ad(LoadOptions::default()).await;
        unit.emit(AdEvent::Error(AdError::new("no-fill", "nothing to serve")));
        let state = wait_until(&manager, |state| state.last_error.is_some()).await;
        assert_eq!(state.phase(), AdPhase::Error);

        tokio::time::sleep(Duration::from_secs(14)).await;
        assert_eq!(unit.load_calls(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(unit.load_calls(), 2);
        assert!(manager.state().is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn loaded_event_cancels_a_pending_retry() {
        let unit = ScriptedAdUnit::new();
        let manager = manager(&unit);

        unit.fail_next_load(AdError::new("internal", "sdk not ready"));
        manager.load_ad(LoadOptions::default()).await;
        assert!(manager.state().last_error.is_some());

        manager.load_ad(LoadOptions { force: true }).await;
        unit.emit(AdEvent::Loaded);
        wait_until(&manager, |state| state.is_loaded).await;

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(unit.load_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn show_then_close_marks_the_session_as_shown() {
        let unit = ScriptedAdUnit::new().with_auto_fill();
        let manager = manager(&unit);

        assert!(!manager.show_ad_if_available().await);
        manager.load_ad(LoadOptions::default()).await;
        wait_until(&manager, |state| state.is_loaded).await;

        assert!(manager.show_ad_if_available().await);
        let state = wait_until(&manager, |state| state.has_shown).await;
        assert!(!state.is_showing);
        assert!(state.has_attempted_to_show);
        assert_eq!(unit.show_calls(), 1);

        // Close schedules a reload one request window later.
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(unit.load_calls(), 2);
        assert!(manager.state().has_shown);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_show_reverts_and_schedules_a_retry() {
        let unit = ScriptedAdUnit::new().with_auto_fill();
        let manager = manager(&unit);

        manager.load_ad(LoadOptions::default()).await;
        wait_until(&manager, |state| state.is_loaded).await;

        unit.fail_next_show(AdError::new("show-failed", "activity gone"));
        assert!(!manager.show_ad_if_available().await);
        let state = manager.state();
        assert!(!state.is_showing);
        assert!(!state.has_shown);
        assert_eq!(
            state.last_error.map(|err| err.code),
            Some("show-failed".to_owned())
        );

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(unit.load_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_subscribes_once() {
        let unit = ScriptedAdUnit::new();
        let manager = manager(&unit);
        assert!(!manager.initialize());
        assert!(!manager.clone().initialize());
        assert_eq!(unit.emit(AdEvent::Closed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_listening_and_reloading() {
        let unit = ScriptedAdUnit::new();
        let manager = manager(&unit);

        manager.load_ad(LoadOptions::default()).await;
        unit.emit(AdEvent::Error(AdError::new("no-fill", "nothing to serve")));
        wait_until(&manager, |state| state.last_error.is_some()).await;

        manager.shutdown().await;
        assert_eq!(unit.emit(AdEvent::Loaded), 0);
        assert!(!manager.initialize());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(unit.load_calls(), 1);
    }
}
