use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rating::{Rating, RatingAggregate, RatingOutOfRange};

/// Latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Spot document as it sits in the store.
///
/// Older documents predate `ratingCount`, so the aggregate fields are optional
/// here and resolved by `normalization::normalize_spot_record`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SpotRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    pub description: String,
    pub coordinates: Option<GeoPoint>,
    pub created_by: String,
    #[serde(rename = "createdAt")]
    pub created_at_ms: u64,
    pub average_rating: Option<f64>,
    pub review_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gallery_images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flight_styles: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Normalized spot handed to callers.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Spot {
    pub id: String,
    /// Original spot when this one is a version of it.
    pub parent_id: Option<String>,
    pub name: String,
    pub nickname: Option<String>,
    pub description: String,
    pub coordinates: Option<GeoPoint>,
    pub created_by: String,
    pub created_at_ms: u64,
    #[serde(flatten)]
    pub rating: RatingAggregate,
    pub main_image: Option<String>,
    pub background_url: Option<String>,
    pub gallery_images: Vec<String>,
    pub video_url: Option<String>,
    pub address: Option<String>,
    pub flight_styles: Vec<String>,
    pub tags: Vec<String>,
}

/// Input for creating a spot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SpotDraft {
    pub name: String,
    pub nickname: Option<String>,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub parent_id: Option<String>,
    pub main_image: Option<String>,
    pub background_url: Option<String>,
    pub address: Option<String>,
    pub gallery_images: Vec<String>,
    pub video_url: Option<String>,
    pub flight_styles: Vec<String>,
    pub tags: Vec<String>,
}

/// Editable spot fields. Aggregate fields are absent on purpose: they change
/// only through the review transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SpotPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gallery_images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight_styles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReviewKind {
    Rating,
    Comment,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    #[default]
    Approved,
    Rejected,
    NeedsReview,
}

/// Review submission before validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewReview {
    pub spot_id: String,
    /// Declared author; must match the signed-in user.
    pub user_id: String,
    pub rating: Option<u8>,
    pub text: Option<String>,
    pub photos: Vec<String>,
    pub video_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReviewRejected {
    #[error("review needs a rating or a comment")]
    Empty,
    #[error(transparent)]
    Rating(#[from] RatingOutOfRange),
}

impl NewReview {
    /// Strip blank text and check that something is left to store.
    pub fn validate(self) -> Result<ValidReview, ReviewRejected> {
        let rating = self.rating.map(Rating::new).transpose()?;
        let text = self
            .text
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty());

        if rating.is_none() && text.is_none() {
            return Err(ReviewRejected::Empty);
        }

        Ok(ValidReview {
            spot_id: self.spot_id,
            user_id: self.user_id,
            rating,
            text,
            photos: self.photos,
            video_url: self.video_url.filter(|url| !url.trim().is_empty()),
        })
    }
}

/// Review that passed [`NewReview::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidReview {
    pub spot_id: String,
    pub user_id: String,
    pub rating: Option<Rating>,
    pub text: Option<String>,
    pub photos: Vec<String>,
    pub video_url: Option<String>,
}

impl ValidReview {
    /// Document for a fresh review: approved, unreported, timestamp left to the store.
    pub fn into_review(self) -> Review {
        let kind = if self.rating.is_some() {
            ReviewKind::Rating
        } else {
            ReviewKind::Comment
        };
        Review {
            id: String::new(),
            spot_id: self.spot_id,
            user_id: self.user_id,
            rating: self.rating,
            text: self.text,
            photos: self.photos,
            video_url: self.video_url,
            kind,
            moderation_status: ModerationStatus::Approved,
            moderation_notes: None,
            moderated_by: None,
            moderated_at_ms: None,
            report_count: 0,
            created_at_ms: 0,
        }
    }
}

/// Stored review. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub spot_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photos: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(rename = "type")]
    pub kind: ReviewKind,
    #[serde(default)]
    pub moderation_status: ModerationStatus,
    #[serde(default)]
    pub moderation_notes: Option<String>,
    #[serde(default)]
    pub moderated_by: Option<String>,
    #[serde(default, rename = "moderatedAt")]
    pub moderated_at_ms: Option<u64>,
    #[serde(default)]
    pub report_count: u32,
    #[serde(default, rename = "createdAt")]
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Socials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub youtube: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instagram: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facebook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MarkerIcon {
    #[default]
    Avatar,
    Color,
}

/// Pilot position published on the shared map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PilotMarker {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub icon_type: MarkerIcon,
    #[serde(default)]
    pub icon_value: Option<String>,
}

/// User profile. Every field is optional so a value doubles as a merge patch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pilot_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city_region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socials: Option<Socials>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_picture_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_picture_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flight_styles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pilot_marker: Option<PilotMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_pilot_marker: Option<bool>,
}

/// Public map entry derived from a profile with a visible marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PilotMarkerEntry {
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub photo_url: Option<String>,
    pub display_name: Option<String>,
    pub city_region: Option<String>,
}

/// Failure reported by the ad provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct AdError {
    pub code: String,
    pub message: String,
}

impl AdError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Events emitted by an ad unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AdEvent {
    Loaded,
    Error(AdError),
    Closed,
}

/// Snapshot of one ad slot, published to observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AdLifecycleState {
    pub is_loaded: bool,
    pub is_loading: bool,
    pub is_showing: bool,
    pub has_attempted_to_show: bool,
    /// Set once an ad closes after a show attempt; never cleared.
    pub has_shown: bool,
    pub last_error: Option<AdError>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AdPhase {
    Idle,
    Loading,
    Loaded,
    Showing,
    Error,
}

impl AdLifecycleState {
    pub fn phase(&self) -> AdPhase {
        if self.is_showing {
            AdPhase::Showing
        } else if self.is_loading {
            AdPhase::Loading
        } else if self.is_loaded {
            AdPhase::Loaded
        } else if self.last_error.is_some() {
            AdPhase::Error
        } else {
            AdPhase::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(rating: Option<u8>, text: Option<&str>) -> NewReview {
        NewReview {
            spot_id: "spot-1".into(),
            user_id: "pilot-1".into(),
            rating,
            text: text.map(str::to_owned),
            ..NewReview::default()
        }
    }

    #[test]
    fn rejects_review_without_rating_or_text() {
        assert_eq!(
            review(None, Some("   ")).validate(),
            Err(ReviewRejected::Empty)
        );
        assert_eq!(review(None, None).validate(), Err(ReviewRejected::Empty));
    }

    #[test]
    fn rejects_out_of_range_rating() {
        assert_eq!(
            review(Some(9), Some("great")).validate(),
            Err(ReviewRejected::Rating(RatingOutOfRange(9)))
        );
    }

    #[test]
    fn strips_blank_fields_and_picks_kind() {
        let valid = review(Some(4), Some("  "))
            .validate()
            .expect("rating alone is enough");
        assert_eq!(valid.text, None);

        let doc = valid.into_review();
        assert_eq!(doc.kind, ReviewKind::Rating);
        assert_eq!(doc.moderation_status, ModerationStatus::Approved);
        assert_eq!(doc.report_count, 0);

        let comment = review(None, Some(" windy but fun "))
            .validate()
            .expect("comment alone is enough")
            .into_review();
        assert_eq!(comment.kind, ReviewKind::Comment);
        assert_eq!(comment.text.as_deref(), Some("windy but fun"));
    }

    #[test]
    fn submissions_use_camel_case_keys() {
        let draft = serde_json::to_value(SpotDraft {
            name: "Quarry".into(),
            parent_id: Some("spot-0".into()),
            main_image: Some("main.jpg".into()),
            ..SpotDraft::default()
        })
        .expect("draft serializes");
        assert_eq!(draft["parentId"], "spot-0");
        assert_eq!(draft["mainImage"], "main.jpg");
        assert!(draft.get("parent_id").is_none());
        assert!(draft.get("flightStyles").is_some());

        let parsed: NewReview = serde_json::from_value(serde_json::json!({
            "spotId": "spot-1",
            "userId": "pilot-1",
            "rating": 5,
            "text": null,
            "photos": [],
            "videoUrl": "https://video.example/clip",
        }))
        .expect("camelCase review parses");
        assert_eq!(parsed.spot_id, "spot-1");
        assert_eq!(parsed.user_id, "pilot-1");
        assert_eq!(parsed.video_url.as_deref(), Some("https://video.example/clip"));
    }

    #[test]
    fn derives_ad_phase_from_flags() {
        let mut state = AdLifecycleState::default();
        assert_eq!(state.phase(), AdPhase::Idle);

        state.last_error = Some(AdError::new("no-fill", "no ad"));
        assert_eq!(state.phase(), AdPhase::Error);

        state.is_loading = true;
        assert_eq!(state.phase(), AdPhase::Loading);

        state.is_loading = false;
        state.is_loaded = true;
        state.last_error = None;
        assert_eq!(state.phase(), AdPhase::Loaded);

        state.is_showing = true;
        assert_eq!(state.phase(), AdPhase::Showing);
    }
}
