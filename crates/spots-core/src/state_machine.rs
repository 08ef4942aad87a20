use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{AdError, AdEvent, AdLifecycleState};

/// Minimum spacing between two non-forced load requests.
pub const MIN_REQUEST_INTERVAL: Duration = Duration::from_secs(15);
pub const BASE_RETRY_DELAY: Duration = Duration::from_secs(10);
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
/// Minimum spacing between two interstitial impressions.
pub const MIN_INTERSTITIAL_INTERVAL: Duration = Duration::from_secs(120);

/// Timing knobs of the ad slot lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AdTimings {
    pub min_request_interval_ms: u64,
    pub base_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for AdTimings {
    fn default() -> Self {
        Self {
            min_request_interval_ms: MIN_REQUEST_INTERVAL.as_millis() as u64,
            base_retry_delay_ms: BASE_RETRY_DELAY.as_millis() as u64,
            max_retry_delay_ms: MAX_RETRY_DELAY.as_millis() as u64,
        }
    }
}

impl AdTimings {
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms.max(self.base_retry_delay_ms))
    }
}

/// Inputs driving the ad slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdInput {
    /// Caller asked for a load; `force` bypasses request spacing.
    Load { force: bool },
    /// A previously scheduled reload fired.
    ScheduledLoad,
    /// Caller asked to show the loaded ad.
    Show,
    /// Event emitted by the ad unit.
    Provider(AdEvent),
    /// `load()` on the ad unit failed synchronously.
    LoadFailed(AdError),
    /// `show()` on the ad unit failed synchronously.
    ShowFailed(AdError),
}

/// Side effects the runtime must carry out, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdEffect {
    RequestLoad,
    RequestShow,
    /// Replace any pending reload timer with one firing after the delay.
    ScheduleLoad(Duration),
    CancelScheduledLoad,
}

/// Load/show lifecycle of one ad slot. Time is injected so transitions stay pure.
#[derive(Debug, Clone)]
pub struct AdStateMachine {
    state: AdLifecycleState,
    timings: AdTimings,
    last_request_at: Option<Instant>,
    retry_delay: Duration,
}

impl Default for AdStateMachine {
    fn default() -> Self {
        Self::new(AdTimings::default())
    }
}

impl AdStateMachine {
    pub fn new(timings: AdTimings) -> Self {
        Self {
            state: AdLifecycleState::default(),
            retry_delay: timings.base_retry_delay(),
            timings,
            last_request_at: None,
        }
    }

    pub fn state(&self) -> &AdLifecycleState {
        &self.state
    }

    pub fn timings(&self) -> AdTimings {
        self.timings
    }

    /// Delay the next failure will wait before reloading.
    pub fn pending_retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn apply(&mut self, input: AdInput, now: Instant) -> Vec<AdEffect> {
        match input {
            AdInput::Load { force } => self.load(force, now),
            AdInput::ScheduledLoad => {
                let remaining = self.request_window_remaining(now);
                if remaining.is_zero() {
                    self.load(false, now)
                } else {
                    vec![AdEffect::ScheduleLoad(remaining)]
                }
            }
            AdInput::Show => self.show(),
            AdInput::Provider(AdEvent::Loaded) => {
                self.retry_delay = self.timings.base_retry_delay();
                self.state.is_loaded = true;
                self.state.is_loading = false;
                self.state.last_error = None;
                vec![AdEffect::CancelScheduledLoad]
            }
            AdInput::Provider(AdEvent::Error(error)) => {
                self.state.is_loaded = false;
                self.state.is_loading = false;
                self.state.last_error = Some(error);
                vec![self.schedule_retry(now)]
            }
            AdInput::Provider(AdEvent::Closed) => {
                self.state.is_showing = false;
                self.state.has_shown |= self.state.has_attempted_to_show;
                vec![AdEffect::ScheduleLoad(self.timings.min_request_interval())]
            }
            AdInput::LoadFailed(error) => {
                self.state.is_loading = false;
                self.state.last_error = Some(error);
                vec![self.schedule_retry(now)]
            }
            AdInput::ShowFailed(error) => {
                self.state.is_showing = false;
                self.state.last_error = Some(error);
                vec![self.schedule_retry(now)]
            }
        }
    }

    fn load(&mut self, force: bool, now: Instant) -> Vec<AdEffect> {
        if !force && !self.request_window_remaining(now).is_zero() {
            debug!(
                since_last_ms = self.since_last_request(now).as_millis() as u64,
                "skipping ad load; last request too recent"
            );
            return Vec::new();
        }

        self.last_request_at = Some(now);
        self.state.is_loading = true;
        self.state.is_loaded = false;
        self.state.last_error = None;
        vec![AdEffect::RequestLoad]
    }

    fn show(&mut self) -> Vec<AdEffect> {
        if self.state.is_showing {
            debug!("ad already showing");
            return Vec::new();
        }
        if !self.state.is_loaded {
            debug!("no loaded ad available; skipping show");
            return Vec::new();
        }

        self.state.is_showing = true;
        self.state.is_loaded = false;
        self.state.has_attempted_to_show = true;
        vec![AdEffect::RequestShow]
    }

    /// Delay grows linearly per consecutive failure up to the cap, and never
    /// lands inside the request spacing window.
    fn schedule_retry(&mut self, now: Instant) -> AdEffect {
        let delay = self.retry_delay.max(self.request_window_remaining(now));
        self.retry_delay = (self.retry_delay + self.timings.base_retry_delay())
            .min(self.timings.max_retry_delay());
        debug!(delay_ms = delay.as_millis() as u64, "scheduling ad reload");
        AdEffect::ScheduleLoad(delay)
    }

    fn since_last_request(&self, now: Instant) -> Duration {
        self.last_request_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX)
    }

    fn request_window_remaining(&self, now: Instant) -> Duration {
        self.timings
            .min_request_interval()
            .saturating_sub(self.since_last_request(now))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterstitialDecision {
    /// Ads are turned off for this user.
    Disabled,
    /// Previous impression is too recent.
    TooSoon { wait: Duration },
    Show,
}

/// Spacing and opt-out gate for interstitial placements.
#[derive(Debug, Clone)]
pub struct InterstitialPacer {
    min_interval: Duration,
    last_shown_at: Option<Instant>,
}

impl Default for InterstitialPacer {
    fn default() -> Self {
        Self::new(MIN_INTERSTITIAL_INTERVAL)
    }
}

impl InterstitialPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_shown_at: None,
        }
    }

    pub fn decide(&self, now: Instant, ads_disabled: bool) -> InterstitialDecision {
        if ads_disabled {
            return InterstitialDecision::Disabled;
        }
        match self.last_shown_at {
            Some(at) if now.saturating_duration_since(at) < self.min_interval => {
                InterstitialDecision::TooSoon {
                    wait: self.min_interval - now.saturating_duration_since(at),
                }
            }
            _ => InterstitialDecision::Show,
        }
    }

    pub fn record_shown(&mut self, now: Instant) {
        self.last_shown_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(value: u64) -> Duration {
        Duration::from_secs(value)
    }

    fn no_fill() -> AdError {
        AdError::new("no-fill", "no ad to show")
    }

    #[test]
    fn debounces_loads_inside_request_window() {
        let mut sm = AdStateMachine::default();
        let t0 = Instant::now();

        assert_eq!(
            sm.apply(AdInput::Load { force: false }, t0),
            vec![AdEffect::RequestLoad]
        );
        assert!(sm.apply(AdInput::Load { force: false }, t0 + secs(5)).is_empty());
        assert_eq!(
            sm.apply(AdInput::Load { force: true }, t0 + secs(6)),
            vec![AdEffect::RequestLoad]
        );
        assert_eq!(
            sm.apply(AdInput::Load { force: false }, t0 + secs(21)),
            vec![AdEffect::RequestLoad]
        );
    }

    #[test]
    fn runs_load_show_close_cycle() {
        let mut sm = AdStateMachine::default();
        let t0 = Instant::now();

        sm.apply(AdInput::Load { force: false }, t0);
        assert!(sm.state().is_loading);

        assert_eq!(
            sm.apply(AdInput::Provider(AdEvent::Loaded), t0 + secs(1)),
            vec![AdEffect::CancelScheduledLoad]
        );
        assert!(sm.state().is_loaded);

        assert_eq!(
            sm.apply(AdInput::Show, t0 + secs(2)),
            vec![AdEffect::RequestShow]
        );
        assert!(sm.state().is_showing);
        assert!(sm.state().has_attempted_to_show);
        assert!(!sm.state().has_shown);

        assert_eq!(
            sm.apply(AdInput::Provider(AdEvent::Closed), t0 + secs(30)),
            vec![AdEffect::ScheduleLoad(MIN_REQUEST_INTERVAL)]
        );
        assert!(!sm.state().is_showing);
        assert!(sm.state().has_shown);
    }

    #[test]
    fn show_is_refused_when_nothing_is_loaded_or_already_showing() {
        let mut sm = AdStateMachine::default();
        let t0 = Instant::now();
        assert!(sm.apply(AdInput::Show, t0).is_empty());
        assert!(!sm.state().has_attempted_to_show);

        sm.apply(AdInput::Load { force: false }, t0);
        sm.apply(AdInput::Provider(AdEvent::Loaded), t0);
        sm.apply(AdInput::Show, t0);
        assert!(sm.apply(AdInput::Show, t0).is_empty());
    }

    #[test]
    fn error_backoff_grows_linearly_and_caps() {
        let mut sm = AdStateMachine::default();
        let t0 = Instant::now();
        let far = t0 + secs(3_600);

        let delays: Vec<_> = (0..7)
            .map(|_| sm.apply(AdInput::Provider(AdEvent::Error(no_fill())), far))
            .collect();

        assert_eq!(
            delays,
            vec![
                vec![AdEffect::ScheduleLoad(secs(10))],
                vec![AdEffect::ScheduleLoad(secs(20))],
                vec![AdEffect::ScheduleLoad(secs(30))],
                vec![AdEffect::ScheduleLoad(secs(40))],
                vec![AdEffect::ScheduleLoad(secs(50))],
                vec![AdEffect::ScheduleLoad(secs(60))],
                vec![AdEffect::ScheduleLoad(secs(60))],
            ]
        );
        assert_eq!(sm.state().last_error, Some(no_fill()));
    }

    #[test]
    fn loaded_event_resets_backoff() {
        let mut sm = AdStateMachine::default();
        let far = Instant::now() + secs(3_600);

        sm.apply(AdInput::Provider(AdEvent::Error(no_fill())), far);
        sm.apply(AdInput::Provider(AdEvent::Error(no_fill())), far);
        assert_eq!(sm.pending_retry_delay(), secs(30));

        sm.apply(AdInput::Provider(AdEvent::Loaded), far);
        assert_eq!(sm.pending_retry_delay(), BASE_RETRY_DELAY);
        assert_eq!(sm.state().last_error, None);
    }

    #[test]
    fn retry_never_lands_inside_request_window() {
        let mut sm = AdStateMachine::default();
        let t0 = Instant::now();

        sm.apply(AdInput::Load { force: false }, t0);
        let effects = sm.apply(AdInput::Provider(AdEvent::Error(no_fill())), t0 + secs(1));
        assert_eq!(effects, vec![AdEffect::ScheduleLoad(secs(14))]);
    }

    #[test]
    fn early_scheduled_load_is_deferred_not_dropped() {
        let mut sm = AdStateMachine::default();
        let t0 = Instant::now();

        sm.apply(AdInput::Load { force: true }, t0);
        assert_eq!(
            sm.apply(AdInput::ScheduledLoad, t0 + secs(10)),
            vec![AdEffect::ScheduleLoad(secs(5))]
        );
        assert_eq!(
            sm.apply(AdInput::ScheduledLoad, t0 + secs(15)),
            vec![AdEffect::RequestLoad]
        );
    }

    #[test]
    fn synchronous_failures_revert_flags_and_retry() {
        let mut sm = AdStateMachine::default();
        let t0 = Instant::now();
        let far = t0 + secs(3_600);

        sm.apply(AdInput::Load { force: false }, t0);
        let effects = sm.apply(AdInput::LoadFailed(no_fill()), far);
        assert!(!sm.state().is_loading);
        assert_eq!(effects, vec![AdEffect::ScheduleLoad(secs(10))]);

        sm.apply(AdInput::Provider(AdEvent::Loaded), far);
        sm.apply(AdInput::Show, far);
        let effects = sm.apply(AdInput::ShowFailed(no_fill()), far);
        assert!(!sm.state().is_showing);
        assert!(sm.state().has_attempted_to_show);
        assert_eq!(effects, vec![AdEffect::ScheduleLoad(secs(10))]);
    }

    #[test]
    fn has_shown_is_never_cleared() {
        let mut sm = AdStateMachine::default();
        let t0 = Instant::now();

        sm.apply(AdInput::Load { force: false }, t0);
        sm.apply(AdInput::Provider(AdEvent::Loaded), t0);
        sm.apply(AdInput::Show, t0);
        sm.apply(AdInput::Provider(AdEvent::Closed), t0);
        assert!(sm.state().has_shown);

        sm.apply(AdInput::Load { force: true }, t0 + secs(20));
        sm.apply(AdInput::Provider(AdEvent::Error(no_fill())), t0 + secs(21));
        assert!(sm.state().has_shown);
    }

    #[test]
    fn paces_interstitials() {
        let mut pacer = InterstitialPacer::default();
        let t0 = Instant::now();

        assert_eq!(pacer.decide(t0, true), InterstitialDecision::Disabled);
        assert_eq!(pacer.decide(t0, false), InterstitialDecision::Show);

        pacer.record_shown(t0);
        assert_eq!(
            pacer.decide(t0 + secs(20), false),
            InterstitialDecision::TooSoon { wait: secs(100) }
        );
        assert_eq!(
            pacer.decide(t0 + secs(120), false),
            InterstitialDecision::Show
        );
    }
}
