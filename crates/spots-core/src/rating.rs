use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Star rating attached to a review, always within `1..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

/// Rejected star value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rating {0} is outside 1..=5")]
pub struct RatingOutOfRange(pub u8);

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    /// Accept `value` only when it lies within `MIN..=MAX`.
    pub fn new(value: u8) -> Result<Self, RatingOutOfRange> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(RatingOutOfRange(value))
        }
    }

    /// Number of stars.
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Rating {
    type Error = RatingOutOfRange;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> Self {
        rating.0
    }
}

/// Running review statistics kept on a spot.
///
/// `average_rating * rating_count` is the sum of every accepted rating. The
/// sum is never stored; both figures must move together in one atomic write.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingAggregate {
    pub average_rating: f64,
    /// Every submission, rated or not.
    pub review_count: u64,
    /// Submissions that carried a rating; never exceeds `review_count`.
    pub rating_count: u64,
}

impl RatingAggregate {
    /// Sum of all accepted ratings, reconstructed from average and count.
    pub fn rating_total(&self) -> f64 {
        self.average_rating * self.rating_count as f64
    }

    /// Aggregate after accepting one more review.
    pub fn apply(&self, rating: Option<Rating>) -> Self {
        let review_count = self.review_count + 1;

        let (average_rating, rating_count) = match rating {
            Some(rating) => {
                let rating_count = self.rating_count + 1;
                let average =
                    (self.rating_total() + f64::from(rating.value())) / rating_count as f64;
                (average, rating_count)
            }
            // Comment-only reviews leave the average where it was.
            None if self.rating_count > 0 => (
                self.rating_total() / self.rating_count as f64,
                self.rating_count,
            ),
            None => (0.0, 0),
        };

        Self {
            average_rating,
            review_count,
            rating_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rating(value: u8) -> Option<Rating> {
        Some(Rating::new(value).expect("valid rating"))
    }

    #[test]
    fn rejects_out_of_range_ratings() {
        assert_eq!(Rating::new(0), Err(RatingOutOfRange(0)));
        assert_eq!(Rating::new(6), Err(RatingOutOfRange(6)));
        assert_eq!(Rating::new(5).map(Rating::value), Ok(5));
    }

    #[test]
    fn averages_ratings_and_counts_comments() {
        let aggregate = RatingAggregate::default()
            .apply(rating(5))
            .apply(None)
            .apply(rating(3))
            .apply(rating(4));

        assert_eq!(aggregate.rating_count, 3);
        assert_eq!(aggregate.review_count, 4);
        assert!((aggregate.average_rating - 4.0).abs() < 1e-9);
    }

    #[test]
    fn comment_only_review_keeps_average() {
        let existing = RatingAggregate {
            average_rating: 4.5,
            review_count: 2,
            rating_count: 2,
        };

        let next = existing.apply(None);
        assert_eq!(next.average_rating, 4.5);
        assert_eq!(next.rating_count, 2);
        assert_eq!(next.review_count, 3);
    }

    #[test]
    fn comment_on_unrated_spot_keeps_zero_average() {
        let next = RatingAggregate::default().apply(None);
        assert_eq!(
            next,
            RatingAggregate {
                average_rating: 0.0,
                review_count: 1,
                rating_count: 0,
            }
        );
    }

    #[test]
    fn order_of_ratings_does_not_change_result() {
        let values = [5, 3, 4, 1, 2, 5];
        let forward = values
            .iter()
            .fold(RatingAggregate::default(), |acc, v| acc.apply(rating(*v)));
        let backward = values
            .iter()
            .rev()
            .fold(RatingAggregate::default(), |acc, v| acc.apply(rating(*v)));

        assert_eq!(forward.rating_count, backward.rating_count);
        assert!((forward.average_rating - backward.average_rating).abs() < 1e-9);
        assert!((forward.average_rating - 20.0 / 6.0).abs() < 1e-9);
    }
}
