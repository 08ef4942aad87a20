mod config;
mod logging;

use std::{process::ExitCode, sync::Arc, time::Duration};

use spots_backend::{AppOpenAdManager, LoadOptions, RepositoryConfig, SpotsError, SpotsRepository};
use spots_core::{AdLifecycleState, InterstitialDecision, InterstitialPacer, NewReview, SpotDraft};
use spots_platform::{AuthenticatedUser, InMemoryDocumentStore, InMemorySession, ScriptedAdUnit};
use thiserror::Error;
use tracing::{error, info};

use crate::config::SmokeConfig;

const PILOT_ID: &str = "smoke-pilot";
const AD_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
enum SmokeError {
    #[error(transparent)]
    Spots(#[from] SpotsError),
    #[error("review task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("spot {0} vanished after creation")]
    MissingSpot(String),
    #[error("ad slot never reached state: {0}")]
    AdStalled(&'static str),
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "smoke run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: SmokeConfig) -> Result<(), SmokeError> {
    review_round(config).await?;
    ad_round(config).await?;
    interstitial_round();
    Ok(())
}

async fn review_round(config: SmokeConfig) -> Result<(), SmokeError> {
    let session = InMemorySession::signed_in(AuthenticatedUser {
        uid: PILOT_ID.to_owned(),
        display_name: Some("Smoke Pilot".to_owned()),
    });
    let repo = Arc::new(SpotsRepository::with_config(
        InMemoryDocumentStore::new(),
        session,
        RepositoryConfig {
            read_retry: config.retry,
        },
    ));

    let spot_id = repo
        .add_spot(SpotDraft {
            name: "Old Quarry".to_owned(),
            description: "Open pit with clear line of sight".to_owned(),
            latitude: 38.72,
            longitude: -9.14,
            flight_styles: vec!["freestyle".to_owned()],
            ..SpotDraft::default()
        })
        .await?;

    let submissions = [
        (Some(5), None),
        (Some(3), Some("gusty in the afternoon")),
        (Some(4), None),
        (None, Some("parking by the gate")),
    ];
    let tasks: Vec<_> = submissions
        .into_iter()
        .map(|(rating, text)| {
            let repo = Arc::clone(&repo);
            let review = NewReview {
                spot_id: spot_id.clone(),
                user_id: PILOT_ID.to_owned(),
                rating,
                text: text.map(str::to_owned),
                ..NewReview::default()
            };
            tokio::spawn(async move { repo.add_review(review).await })
        })
        .collect();
    for task in tasks {
        task.await??;
    }

    let spot = repo
        .get_spot(&spot_id)
        .await?
        .ok_or_else(|| SmokeError::MissingSpot(spot_id.clone()))?;
    let reviews = repo.get_reviews_for_spot(&spot_id).await?;
    info!(
        spot = %spot.id,
        average = spot.rating.average_rating,
        reviews = spot.rating.review_count,
        ratings = spot.rating.rating_count,
        stored_reviews = reviews.len(),
        "aggregate after concurrent reviews"
    );
    println!(
        "{}: {:.2} stars from {} ratings ({} reviews)",
        spot.name, spot.rating.average_rating, spot.rating.rating_count, spot.rating.review_count
    );
    Ok(())
}

async fn wait_for_ad(
    manager: &AppOpenAdManager<ScriptedAdUnit>,
    label: &'static str,
    condition: impl FnMut(&AdLifecycleState) -> bool,
) -> Result<(), SmokeError> {
    let mut rx = manager.subscribe();
    match tokio::time::timeout(AD_WAIT, rx.wait_for(condition)).await {
        Ok(Ok(_)) => Ok(()),
        _ => Err(SmokeError::AdStalled(label)),
    }
}

async fn ad_round(config: SmokeConfig) -> Result<(), SmokeError> {
    let unit = ScriptedAdUnit::new().with_auto_fill();
    let manager = AppOpenAdManager::with_timings(unit.clone(), config.ad_timings);
    manager.initialize();

    manager.load_ad(LoadOptions::default()).await;
    wait_for_ad(&manager, "loaded", |state| state.is_loaded).await?;

    let shown = manager.show_ad_if_available().await;
    wait_for_ad(&manager, "shown", |state| state.has_shown).await?;
    info!(
        shown,
        load_calls = unit.load_calls(),
        show_calls = unit.show_calls(),
        phase = ?manager.state().phase(),
        "app open ad round finished"
    );

    manager.shutdown().await;
    Ok(())
}

fn interstitial_round() {
    let mut pacer = InterstitialPacer::default();
    let now = std::time::Instant::now();

    let first = pacer.decide(now, false);
    if first == InterstitialDecision::Show {
        pacer.record_shown(now);
    }
    let second = pacer.decide(now + Duration::from_secs(30), false);
    let opted_out = pacer.decide(now + Duration::from_secs(600), true);
    info!(?first, ?second, ?opted_out, "interstitial pacing");
}
