use std::{future::Future, sync::Arc};

use serde_json::Value;
use spots_core::{
    GeoPoint, MarkerIcon, NewReview, PilotMarker, PilotMarkerEntry, RatingAggregate,
    RetryPolicy, RetrySettings, Review, ReviewRejected, ServiceError, Spot, SpotDraft, SpotPatch,
    SpotRecord, UserProfile, is_transient, normalize_spot_record, retry_async,
};
use spots_platform::{
    AuthenticatedUser, DocumentPath, DocumentSnapshot, DocumentStore, Fields, Query,
    SessionProvider, SetMode, SortDirection, Transaction, server_timestamp, to_fields,
};
use thiserror::Error;
use tracing::{debug, error, warn};

const SPOTS: &str = "spots";
const REVIEWS: &str = "reviews";
const USERS: &str = "users";
const NOTIFICATION_TOKENS: &str = "notificationTokens";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpotsError {
    #[error("no user is signed in")]
    Unauthenticated,
    #[error("signed-in user {actual} may not act for {expected}")]
    Unauthorized { expected: String, actual: String },
    #[error("spot {0} does not exist")]
    SpotNotFound(String),
    #[error("invalid review: {0}")]
    InvalidReview(#[from] ReviewRejected),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Retry budget of the data layer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RepositoryConfig {
    /// Applied to every read. Writes and transactions are never retried here.
    pub read_retry: RetrySettings,
}

/// Result of a committed review.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewAdded {
    pub review_id: String,
    /// Spot aggregate written by the same transaction.
    pub aggregate: RatingAggregate,
}

enum ReviewOutcome {
    SpotMissing,
    Committed(RatingAggregate),
}

fn transient_policy(settings: RetrySettings, operation: &'static str) -> RetryPolicy {
    RetryPolicy::<ServiceError>::new(
        settings,
        Arc::new(|error: &ServiceError, _attempt: u32| is_transient(error)),
    )
    .with_on_retry(move |retry| {
        warn!(
            operation,
            attempt = retry.attempt,
            delay_ms = retry.delay.as_millis() as u64,
            error = %retry.error,
            "transient failure; retrying"
        );
    })
}

fn decode_spot(doc: &DocumentSnapshot) -> Result<Spot, ServiceError> {
    Ok(normalize_spot_record(doc.id(), doc.decode::<SpotRecord>()?))
}

fn decode_review(doc: &DocumentSnapshot) -> Result<Review, ServiceError> {
    let mut review: Review = doc.decode()?;
    review.id = doc.id().to_owned();
    Ok(review)
}

fn marker_entry(doc: &DocumentSnapshot) -> Option<PilotMarkerEntry> {
    let profile = match doc.decode::<UserProfile>() {
        Ok(profile) => profile,
        Err(err) => {
            warn!(user = doc.id(), error = %err, "skipping unreadable profile");
            return None;
        }
    };
    let marker = profile.pilot_marker?;
    Some(PilotMarkerEntry {
        user_id: doc.id().to_owned(),
        latitude: marker.latitude,
        longitude: marker.longitude,
        photo_url: profile.profile_picture_url,
        display_name: profile.display_name,
        city_region: profile.city_region,
    })
}

fn fields<const N: usize>(entries: [(&str, Value); N]) -> Fields {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect()
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, ServiceError> {
    to_fields(value).map(Value::Object)
}

/// Data-access layer over the document store.
///
/// Reads are retried on transient failures. Plain writes are not, since a
/// write such as `add_spot` is not idempotent; they are logged and propagated.
#[derive(Debug, Clone)]
pub struct SpotsRepository<S, A> {
    store: S,
    session: A,
    config: RepositoryConfig,
}

impl<S, A> SpotsRepository<S, A>
where
    S: DocumentStore,
    A: SessionProvider,
{
    pub fn new(store: S, session: A) -> Self {
        Self::with_config(store, session, RepositoryConfig::default())
    }

    pub fn with_config(store: S, session: A, config: RepositoryConfig) -> Self {
        Self {
            store,
            session,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn session(&self) -> &A {
        &self.session
    }

    pub fn config(&self) -> RepositoryConfig {
        self.config
    }

    /// The signed-in user, provided it is `user_id`.
    pub fn ensure_current_user_is(&self, user_id: &str) -> Result<AuthenticatedUser, SpotsError> {
        let user = self
            .session
            .current_user()
            .ok_or(SpotsError::Unauthenticated)?;
        if user.uid != user_id {
            return Err(SpotsError::Unauthorized {
                expected: user_id.to_owned(),
                actual: user.uid,
            });
        }
        Ok(user)
    }

    async fn read<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let policy = transient_policy(self.config.read_retry, operation);
        retry_async(call, &policy).await.inspect_err(|err| {
            warn!(operation, error = %err, "read failed");
        })
    }

    async fn write<T, Fut>(&self, operation: &'static str, call: Fut) -> Result<T, ServiceError>
    where
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        call.await.inspect_err(|err| {
            error!(operation, error = %err, "write failed");
        })
    }

    pub async fn add_spot(&self, draft: SpotDraft) -> Result<String, SpotsError> {
        let user = self
            .session
            .current_user()
            .ok_or(SpotsError::Unauthenticated)?;

        let record = SpotRecord {
            parent_id: draft.parent_id,
            name: draft.name,
            nickname: draft.nickname,
            description: draft.description,
            coordinates: Some(GeoPoint {
                latitude: draft.latitude,
                longitude: draft.longitude,
            }),
            created_by: user.uid,
            created_at_ms: 0,
            average_rating: Some(0.0),
            review_count: Some(0),
            rating_count: Some(0),
            main_image: draft.main_image,
            background_url: draft.background_url,
            gallery_images: draft.gallery_images,
            video_url: draft.video_url,
            address: draft.address,
            flight_styles: draft.flight_styles,
            tags: draft.tags,
        };
        let mut body = to_fields(&record)?;
        body.insert("createdAt".to_owned(), server_timestamp());

        let path = self
            .write("add_spot", self.store.add_document(SPOTS, body))
            .await?;
        debug!(spot = path.id(), "spot created");
        Ok(path.id().to_owned())
    }

    pub async fn get_spot(&self, spot_id: &str) -> Result<Option<Spot>, SpotsError> {
        let path = DocumentPath::new(SPOTS, spot_id);
        let doc = self
            .read("get_spot", || self.store.get_document(&path))
            .await?;
        Ok(doc.as_ref().map(decode_spot).transpose()?)
    }

    pub async fn get_spots(&self) -> Result<Vec<Spot>, SpotsError> {
        self.query_spots("get_spots", Query::collection(SPOTS)).await
    }

    pub async fn get_spots_by_user(&self, user_id: &str) -> Result<Vec<Spot>, SpotsError> {
        let query = Query::collection(SPOTS).where_eq("createdBy", user_id);
        self.query_spots("get_spots_by_user", query).await
    }

    /// Every version sharing the spot's root, followed by the root itself.
    pub async fn get_spot_with_versions(&self, spot_id: &str) -> Result<Vec<Spot>, SpotsError> {
        let Some(spot) = self.get_spot(spot_id).await? else {
            return Ok(Vec::new());
        };
        let root_id = spot.parent_id.clone().unwrap_or_else(|| spot.id.clone());

        let query = Query::collection(SPOTS).where_eq("parentId", root_id.as_str());
        let mut spots = self.query_spots("get_spot_versions", query).await?;

        let root = if root_id == spot.id {
            Some(spot)
        } else {
            self.get_spot(&root_id).await?
        };
        if let Some(root) = root
            && !spots.iter().any(|version| version.id == root.id)
        {
            spots.push(root);
        }
        Ok(spots)
    }

    async fn query_spots(
        &self,
        operation: &'static str,
        query: Query,
    ) -> Result<Vec<Spot>, SpotsError> {
        let docs = self
            .read(operation, || self.store.query_documents(&query))
            .await?;
        Ok(docs
            .iter()
            .map(decode_spot)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Apply editable fields. Aggregate fields cannot be reached from here.
    pub async fn update_spot(&self, spot_id: &str, patch: &SpotPatch) -> Result<(), SpotsError> {
        let path = DocumentPath::new(SPOTS, spot_id);
        let body = to_fields(patch)?;
        self.write("update_spot", self.store.update_document(&path, body))
            .await?;
        Ok(())
    }

    pub async fn delete_spot(&self, spot_id: &str) -> Result<(), SpotsError> {
        let path = DocumentPath::new(SPOTS, spot_id);
        self.write("delete_spot", self.store.delete_document(&path))
            .await?;
        Ok(())
    }

    /// Store a review and fold it into the spot aggregate in one transaction.
    ///
    /// The store reruns the body on write conflict. Failures reaching this
    /// layer are logged and propagated, never retried: a commit whose
    /// acknowledgement was lost would otherwise be counted twice.
    pub async fn add_review(&self, review: NewReview) -> Result<ReviewAdded, SpotsError> {
        self.ensure_current_user_is(&review.user_id)?;
        let review = review.validate()?;

        let spot_path = DocumentPath::new(SPOTS, &review.spot_id);
        let review_path = self.store.new_document_path(REVIEWS);
        let rating = review.rating;
        let mut document = to_fields(&review.into_review())?;
        document.insert("createdAt".to_owned(), server_timestamp());

        let mut outcome = ReviewOutcome::SpotMissing;
        self.write(
            "add_review",
            self.store.run_transaction(&mut |tx: &mut dyn Transaction| {
                outcome = ReviewOutcome::SpotMissing;
                let Some(spot) = tx.get(&spot_path)? else {
                    return Ok(());
                };
                let next = decode_spot(&spot)?.rating.apply(rating);
                tx.set(&review_path, document.clone())?;
                tx.update(&spot_path, to_fields(&next)?)?;
                outcome = ReviewOutcome::Committed(next);
                Ok(())
            }),
        )
        .await?;

        match outcome {
            ReviewOutcome::SpotMissing => Err(SpotsError::SpotNotFound(spot_path.id().to_owned())),
            ReviewOutcome::Committed(aggregate) => {
                debug!(
                    spot = spot_path.id(),
                    review = review_path.id(),
                    average = aggregate.average_rating,
                    ratings = aggregate.rating_count,
                    "review recorded"
                );
                Ok(ReviewAdded {
                    review_id: review_path.id().to_owned(),
                    aggregate,
                })
            }
        }
    }

    /// Reviews of a spot, newest first.
    pub async fn get_reviews_for_spot(&self, spot_id: &str) -> Result<Vec<Review>, SpotsError> {
        let query = Query::collection(REVIEWS)
            .where_eq("spotId", spot_id)
            .order_by("createdAt", SortDirection::Descending);
        let docs = self
            .read("get_reviews_for_spot", || self.store.query_documents(&query))
            .await?;
        Ok(docs
            .iter()
            .map(decode_review)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Merge the set fields of `profile` into the stored profile.
    pub async fn save_user_profile(
        &self,
        user_id: &str,
        profile: &UserProfile,
    ) -> Result<(), SpotsError> {
        self.ensure_current_user_is(user_id)?;
        let path = DocumentPath::new(USERS, user_id);
        let body = to_fields(profile)?;
        self.write(
            "save_user_profile",
            self.store.set_document(&path, body, SetMode::Merge),
        )
        .await?;
        Ok(())
    }

    pub async fn get_user_profile(&self, user_id: &str) -> Result<Option<UserProfile>, SpotsError> {
        let path = DocumentPath::new(USERS, user_id);
        let doc = self
            .read("get_user_profile", || self.store.get_document(&path))
            .await?;
        Ok(doc.map(|doc| doc.decode()).transpose()?)
    }

    fn token_path(user_id: &str, token: &str) -> DocumentPath {
        DocumentPath::new(
            DocumentPath::new(USERS, user_id).subcollection(NOTIFICATION_TOKENS),
            token,
        )
    }

    pub async fn add_notification_token(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<(), SpotsError> {
        self.ensure_current_user_is(user_id)?;
        let path = Self::token_path(user_id, token);
        let body = fields([
            ("token", Value::from(token)),
            ("updatedAt", server_timestamp()),
        ]);
        self.write(
            "add_notification_token",
            self.store.set_document(&path, body, SetMode::Overwrite),
        )
        .await?;
        Ok(())
    }

    pub async fn remove_notification_token(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<(), SpotsError> {
        self.ensure_current_user_is(user_id)?;
        let path = Self::token_path(user_id, token);
        self.write(
            "remove_notification_token",
            self.store.delete_document(&path),
        )
        .await?;
        Ok(())
    }

    /// Place the user's marker and make it public.
    pub async fn set_pilot_marker(
        &self,
        user_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), SpotsError> {
        self.ensure_current_user_is(user_id)?;
        let marker = PilotMarker {
            latitude,
            longitude,
            icon_type: MarkerIcon::Avatar,
            icon_value: None,
        };
        let body = fields([
            ("pilotMarker", to_value(&marker)?),
            ("showPilotMarker", Value::Bool(true)),
        ]);
        self.merge_user("set_pilot_marker", user_id, body).await
    }

    pub async fn set_pilot_marker_visibility(
        &self,
        user_id: &str,
        visible: bool,
    ) -> Result<(), SpotsError> {
        self.ensure_current_user_is(user_id)?;
        let body = fields([("showPilotMarker", Value::Bool(visible))]);
        self.merge_user("set_pilot_marker_visibility", user_id, body)
            .await
    }

    pub async fn clear_pilot_marker(&self, user_id: &str) -> Result<(), SpotsError> {
        self.ensure_current_user_is(user_id)?;
        let body = fields([
            ("pilotMarker", Value::Null),
            ("showPilotMarker", Value::Bool(false)),
        ]);
        self.merge_user("clear_pilot_marker", user_id, body).await
    }

    async fn merge_user(
        &self,
        operation: &'static str,
        user_id: &str,
        body: Fields,
    ) -> Result<(), SpotsError> {
        let path = DocumentPath::new(USERS, user_id);
        self.write(operation, self.store.set_document(&path, body, SetMode::Merge))
            .await?;
        Ok(())
    }

    /// Markers of every user who chose to show one.
    pub async fn get_public_pilot_markers(&self) -> Result<Vec<PilotMarkerEntry>, SpotsError> {
        let query = Query::collection(USERS).where_eq("showPilotMarker", true);
        let docs = self
            .read("get_public_pilot_markers", || {
                self.store.query_documents(&query)
            })
            .await?;
        Ok(docs.iter().filter_map(marker_entry).collect())
    }

    /// Remove the profile document, then the account itself.
    pub async fn delete_user_account(&self, user_id: &str) -> Result<(), SpotsError> {
        self.ensure_current_user_is(user_id)?;
        let path = DocumentPath::new(USERS, user_id);
        self.write("delete_user_profile", self.store.delete_document(&path))
            .await?;
        self.write("delete_user_account", self.session.delete_current_user())
            .await?;
        Ok(())
    }
}
