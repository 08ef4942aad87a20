use std::error::Error;

use crate::{
    error::{PlatformCode, ServiceError},
    rating::RatingAggregate,
    types::{Spot, SpotRecord},
};

/// Convert a failed HTTP exchange into a [`ServiceError::Http`].
pub fn normalize_http_failure(status: u16, body: impl Into<String>) -> ServiceError {
    let body = body.into();
    let message = if body.trim().is_empty() {
        format!("request failed with status {status}")
    } else {
        body
    };
    ServiceError::http(status, message)
}

/// Convert a database client failure (symbolic code + message) into a
/// [`ServiceError::Platform`].
pub fn normalize_platform_failure(code: &str, message: impl Into<String>) -> ServiceError {
    ServiceError::platform(PlatformCode::from(code), message)
}

/// Wrap an arbitrary error so a message is always available, keeping the
/// source chain in the text.
pub fn normalize_foreign_error(error: &(dyn Error + 'static)) -> ServiceError {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    ServiceError::generic(message)
}

/// Resolve a stored spot into the current shape.
///
/// Documents written before `ratingCount` existed treat every review as rated.
pub fn normalize_spot_record(id: impl Into<String>, record: SpotRecord) -> Spot {
    let review_count = record.review_count.unwrap_or(0);
    let rating = RatingAggregate {
        average_rating: record.average_rating.unwrap_or(0.0),
        review_count,
        rating_count: record.rating_count.unwrap_or(review_count),
    };

    Spot {
        id: id.into(),
        parent_id: record.parent_id,
        name: record.name,
        nickname: record.nickname,
        description: record.description,
        coordinates: record.coordinates,
        created_by: record.created_by,
        created_at_ms: record.created_at_ms,
        rating,
        main_image: record.main_image,
        background_url: record.background_url,
        gallery_images: record.gallery_images,
        video_url: record.video_url,
        address: record.address,
        flight_styles: record.flight_styles,
        tags: record.tags,
    }
}
