//! Resilience core shared by the spot data layer and the ad runtime.
//!
//! This crate defines the typed error model and retry classifiers, the retry
//! engine, rating aggregation, record normalization, and the ad slot
//! lifecycle state machine.

/// Snapshot publishing for observers.
pub mod channel;
/// Typed service errors and transient/permanent classifiers.
pub mod error;
/// Boundary normalization for collaborator errors and stored records.
pub mod normalization;
/// Running average rating maintained per spot.
pub mod rating;
/// Async retry loop with deterministic exponential backoff.
pub mod retry;
/// Ad slot lifecycle state machine and interstitial pacing.
pub mod state_machine;
/// Domain documents and ad lifecycle payloads.
pub mod types;

pub use channel::{StatePublisher, StateStream};
pub use error::{
    ErrorClass, PlatformCode, ServiceError, is_retriable_database_error,
    is_retriable_http_status, is_retriable_network_error, is_transient,
};
pub use normalization::{
    normalize_foreign_error, normalize_http_failure, normalize_platform_failure,
    normalize_spot_record,
};
pub use rating::{Rating, RatingAggregate, RatingOutOfRange};
pub use retry::{RetryAttempt, RetryPolicy, RetrySettings, retry_async};
pub use state_machine::{
    AdEffect, AdInput, AdStateMachine, AdTimings, InterstitialDecision, InterstitialPacer,
};
pub use types::{
    AdError, AdEvent, AdLifecycleState, AdPhase, GeoPoint, MarkerIcon, ModerationStatus,
    NewReview, PilotMarker, PilotMarkerEntry, Review, ReviewKind, ReviewRejected, Socials, Spot,
    SpotDraft, SpotPatch, SpotRecord, UserProfile, ValidReview,
};
